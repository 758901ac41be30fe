//! The application state object. The TUI and the headless modes only ever
//! talk to a `Deck`; every mutation of the list, tags, focus and batch log
//! goes through one of its operations.

use crate::api::{JobApi, PageRequest};
use crate::batch::{BatchLogEntry, BatchRun, BatchSource};
use crate::config::RestoreTarget;
use crate::errors::DeckError;
use crate::focus::{Direction, FocusController, Surface};
use crate::hotkeys::{action_for_key, controls_legend, HotkeyAction, KeyInput};
use crate::job_store::JobStore;
use crate::lifecycle::{LifecycleEngine, ProcessReport, TransitionReport};
use crate::logging::append_run_log;
use crate::runtime::Clock;
use crate::tags::{TagClassifier, TagReport};
use crate::types::{
    ArtifactVariant, Job, JobDetail, JobId, ModelConfig, Outcome, PipelineStats, Stage,
    TagCategory,
};
use crate::view::{tag_names, PanelModel, View};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct DeckOptions {
    pub initial_view: View,
    pub page_size: u32,
    pub model: ModelConfig,
    pub restore_target: RestoreTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    /// Blocks input until the next key dismisses it.
    Error(String),
}

impl Notice {
    pub fn text(&self) -> &str {
        match self {
            Self::Info(text) | Self::Error(text) => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectTarget {
    Tag,
    Company,
    Title,
}

#[derive(Debug)]
pub enum DeckCommand {
    Continue,
    Quit,
    RunBatch(BatchRun),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub job: Job,
    pub target: Stage,
}

/// Read-only view of the deck handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckSnapshot {
    pub view: View,
    pub surface: Surface,
    pub jobs: Vec<Job>,
    pub total: usize,
    pub selected: Option<JobId>,
    pub pending: Vec<PendingRow>,
    pub tags: Vec<String>,
    pub tag_cursor: Option<usize>,
    pub marked: Vec<JobId>,
    pub batch_target: Option<JobId>,
    pub panel: PanelModel,
    pub notice: Option<Notice>,
    pub stats: PipelineStats,
    pub legend: String,
}

pub struct Deck {
    api: Arc<dyn JobApi>,
    engine: LifecycleEngine,
    clock: Arc<dyn Clock>,
    options: DeckOptions,
    view: View,
    store: JobStore,
    detail: Option<JobDetail>,
    tags: TagClassifier,
    focus: FocusController,
    marked: Vec<JobId>,
    log: Vec<BatchLogEntry>,
    batch_target: Option<JobId>,
    artifact: Option<String>,
    notice: Option<Notice>,
    stats: PipelineStats,
}

impl Deck {
    pub fn open(
        api: Arc<dyn JobApi>,
        clock: Arc<dyn Clock>,
        options: DeckOptions,
    ) -> Result<Self, DeckError> {
        options.model.validate()?;
        let view = options.initial_view;
        let mut deck = Self {
            engine: LifecycleEngine::new(Arc::clone(&api))
                .with_restore_target(options.restore_target),
            api,
            clock,
            options,
            view,
            store: JobStore::new(view.status_query()),
            detail: None,
            tags: TagClassifier::new(),
            focus: FocusController::new(),
            marked: Vec::new(),
            log: Vec::new(),
            batch_target: None,
            artifact: None,
            notice: None,
            stats: PipelineStats::default(),
        };
        deck.switch_view(view)?;
        Ok(deck)
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn tags(&self) -> &TagClassifier {
        &self.tags
    }

    pub fn focus(&self) -> &FocusController {
        &self.focus
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn log(&self) -> &[BatchLogEntry] {
        &self.log
    }

    pub fn marked(&self) -> &[JobId] {
        &self.marked
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn model(&self) -> &ModelConfig {
        &self.options.model
    }

    pub fn set_model(&mut self, model: ModelConfig) -> Result<(), DeckError> {
        model.validate()?;
        self.options.model = model;
        Ok(())
    }

    /// Switches the view and reloads its job list. Focus, marks and the
    /// batch log never survive a switch.
    pub fn switch_view(&mut self, view: View) -> Result<(), DeckError> {
        self.view = view;
        self.focus.reset();
        self.marked.clear();
        self.log.clear();
        self.batch_target = None;
        self.artifact = None;
        append_run_log("info", "deck.view.switched", json!({ "view": view.label() }));
        self.reload()
    }

    pub fn reload(&mut self) -> Result<(), DeckError> {
        let stage = self.view.status_query();
        let page = self
            .api
            .list_jobs(stage, Some(PageRequest::first(self.options.page_size)))?;
        self.store.load(stage, page);
        self.marked.retain(|id| self.store.contains(id));
        self.load_selected_detail();
        self.refresh_stats();
        Ok(())
    }

    /// Loads the whole stage, page by page, so every job is resident.
    fn load_every_page(&mut self) -> Result<(), DeckError> {
        if self.store.jobs().len() >= self.store.total() {
            return Ok(());
        }
        let stage = self.view.status_query();
        let limit = self.options.page_size;
        let mut page = self.api.list_jobs(stage, Some(PageRequest::first(limit)))?;
        while page.jobs.len() < page.total {
            let offset = u32::try_from(page.jobs.len()).unwrap_or(u32::MAX);
            let next = self
                .api
                .list_jobs(stage, Some(PageRequest { offset, limit }))?;
            if next.jobs.is_empty() {
                break;
            }
            page.total = next.total;
            page.jobs.extend(next.jobs);
        }
        append_run_log(
            "info",
            "deck.list.loaded_all",
            json!({ "stage": stage.as_str(), "jobs": page.jobs.len() }),
        );
        self.store.load(stage, page);
        self.after_list_change();
        Ok(())
    }

    fn refresh_stats(&mut self) {
        match self.api.stats() {
            Ok(stats) => self.stats = stats,
            Err(err) => append_run_log(
                "warn",
                "deck.stats.unavailable",
                json!({ "error": err.to_string() }),
            ),
        }
    }

    /// Loads tags and description for the current selection and resets focus.
    fn load_selected_detail(&mut self) {
        self.focus.reset();
        self.artifact = None;
        let Some(id) = self.store.selected().cloned() else {
            self.detail = None;
            self.tags.clear();
            return;
        };
        match self.api.job_detail(&id) {
            Ok(detail) => {
                self.tags.load(id, detail.skills.clone());
                self.detail = Some(detail);
            }
            Err(err) => {
                append_run_log(
                    "warn",
                    "deck.detail.unavailable",
                    json!({ "job_id": id.as_str(), "error": err.to_string() }),
                );
                self.tags.load(id, Vec::new());
                self.detail = None;
            }
        }
    }

    fn after_list_change(&mut self) {
        self.marked.retain(|id| self.store.contains(id));
        if self.store.selected() != self.tags.job_id() {
            self.load_selected_detail();
        }
    }

    fn selected_id(&self) -> Result<JobId, DeckError> {
        self.store
            .selected()
            .cloned()
            .ok_or_else(|| DeckError::NotFound("no job selected".to_string()))
    }

    fn collection_len(&self) -> usize {
        self.tags.collection_len(self.view.tag_collection())
    }

    pub fn toggle_focus(&mut self) -> Surface {
        let len = self.collection_len();
        self.focus.toggle(len)
    }

    /// Next/previous on whichever surface has focus.
    pub fn navigate(&mut self, direction: Direction) -> bool {
        match self.focus.surface() {
            Surface::Tags => {
                let len = self.collection_len();
                self.focus.move_cursor(direction, len)
            }
            Surface::List => {
                let moved = match direction {
                    Direction::Next => self.store.select_next(),
                    Direction::Previous => self.store.select_previous(),
                };
                if moved {
                    self.load_selected_detail();
                }
                moved
            }
        }
    }

    pub fn select(&mut self, id: &JobId) -> Result<(), DeckError> {
        self.store.select(id)?;
        self.load_selected_detail();
        Ok(())
    }

    pub fn approve_selected(&mut self) -> Result<TransitionReport, DeckError> {
        let id = self.selected_id()?;
        let report = self.engine.approve(&mut self.store, &id)?;
        self.after_transition();
        Ok(report)
    }

    pub fn deny_selected(&mut self) -> Result<TransitionReport, DeckError> {
        let id = self.selected_id()?;
        let report = self.engine.deny(&mut self.store, &id)?;
        self.after_transition();
        Ok(report)
    }

    pub fn restore_selected(&mut self) -> Result<TransitionReport, DeckError> {
        let id = self.selected_id()?;
        let report = self.engine.restore(&mut self.store, &id)?;
        self.after_transition();
        Ok(report)
    }

    pub fn process_selected(&mut self) -> Result<ProcessReport, DeckError> {
        let id = self.selected_id()?;
        let model = self.options.model.clone();
        let report = self.engine.process(&mut self.store, &id, &model)?;
        self.refresh_stats();
        Ok(report)
    }

    pub fn deliver_selected(&mut self) -> Result<TransitionReport, DeckError> {
        let id = self.selected_id()?;
        let report = self.engine.deliver(&mut self.store, &id)?;
        self.after_transition();
        Ok(report)
    }

    fn after_transition(&mut self) {
        self.after_list_change();
        self.refresh_stats();
    }

    /// Marks or unmarks the selected job for "process marked". Returns whether
    /// it is now marked.
    pub fn toggle_mark(&mut self) -> Result<bool, DeckError> {
        let id = self.selected_id()?;
        if let Some(position) = self.marked.iter().position(|marked| marked == &id) {
            self.marked.remove(position);
            return Ok(false);
        }
        self.marked.push(id);
        Ok(true)
    }

    /// Builds a batch over `source`. Marked jobs run in list order.
    pub fn start_batch(&mut self, source: BatchSource) -> Result<BatchRun, DeckError> {
        if self.view != View::ApprovedTailoring {
            return Err(DeckError::Precondition(format!(
                "batches run from the {} view",
                View::ApprovedTailoring.label()
            )));
        }
        let ids = match source {
            BatchSource::Marked => {
                let ids = self
                    .store
                    .jobs()
                    .iter()
                    .filter(|job| self.marked.contains(&job.id))
                    .map(|job| job.id.clone())
                    .collect::<Vec<_>>();
                if ids.is_empty() {
                    return Err(DeckError::Precondition("no jobs are marked".to_string()));
                }
                ids
            }
            BatchSource::All => {
                self.load_every_page()?;
                self.store.jobs().iter().map(|job| job.id.clone()).collect()
            }
            BatchSource::Selected => vec![self.selected_id()?],
        };
        self.start_batch_for(ids)
    }

    /// Builds a batch over explicit ids. Ids missing from the list fail as
    /// their own entries when the batch reaches them.
    pub fn start_batch_for(&mut self, ids: Vec<JobId>) -> Result<BatchRun, DeckError> {
        let run = BatchRun::new(ids, self.options.model.clone())?;
        self.log.clear();
        self.batch_target = run.current().cloned();
        Ok(run)
    }

    /// Runs one batch step and appends its entry to the log.
    pub fn step_batch(&mut self, run: &mut BatchRun) -> Option<BatchLogEntry> {
        self.batch_target = run.current().cloned();
        let entry = run.step(&self.engine, &mut self.store, self.clock.as_ref())?;
        self.log.push(entry.clone());
        if entry.is_terminal() {
            self.batch_target = None;
            self.marked.clear();
            self.load_selected_detail();
            self.refresh_stats();
        }
        Some(entry)
    }

    pub fn run_batch(
        &mut self,
        run: &mut BatchRun,
        mut observe: impl FnMut(&BatchLogEntry),
    ) -> Vec<BatchLogEntry> {
        let mut entries = Vec::new();
        while let Some(entry) = self.step_batch(run) {
            observe(&entry);
            entries.push(entry);
        }
        entries
    }

    pub fn highlighted_tag(&self) -> Option<String> {
        if self.focus.surface() != Surface::Tags {
            return None;
        }
        let cursor = self.focus.tag_cursor()?;
        self.tags
            .collection(self.view.tag_collection())
            .get(cursor)
            .map(|tag| tag.name.clone())
    }

    /// Files the highlighted tag. `None` when nothing is highlighted.
    pub fn harvest_highlighted(
        &mut self,
        category: TagCategory,
    ) -> Result<Option<TagReport>, DeckError> {
        let Some(name) = self.highlighted_tag() else {
            return Ok(None);
        };
        let id = self.selected_id()?;
        let report = self.tags.harvest(self.api.as_ref(), &id, &name, category)?;
        let len = self.collection_len();
        self.focus.revalidate(len);
        Ok(Some(report))
    }

    /// Rejects the highlighted tag or the selected job's company or title.
    /// Only acts on the TAGS surface; a tag reject needs a highlighted tag.
    pub fn reject(&mut self, target: RejectTarget) -> Result<Option<TagReport>, DeckError> {
        if self.focus.surface() != Surface::Tags {
            return Ok(None);
        }
        let term = match target {
            RejectTarget::Tag => self.highlighted_tag(),
            RejectTarget::Company => self.store.selected_job().map(|job| job.company.clone()),
            RejectTarget::Title => self.store.selected_job().map(|job| job.title.clone()),
        };
        let Some(term) = term else {
            return Ok(None);
        };
        let report = self.tags.reject(self.api.as_ref(), &term)?;
        let len = self.collection_len();
        self.focus.revalidate(len);
        Ok(Some(report))
    }

    pub fn view_artifact(&mut self) -> Result<&str, DeckError> {
        let id = self.selected_id()?;
        let content = self.api.artifact(&id, ArtifactVariant::Primary)?;
        Ok(self.artifact.insert(content).as_str())
    }

    /// Feeds one key through the active view and focus surface.
    pub fn handle_key(&mut self, key: KeyInput) -> DeckCommand {
        if matches!(self.notice, Some(Notice::Error(_))) {
            self.notice = None;
            return DeckCommand::Continue;
        }
        self.notice = None;
        let Some(action) = action_for_key(self.view, self.focus.surface(), key) else {
            return DeckCommand::Continue;
        };
        match self.dispatch(action) {
            Ok(command) => command,
            Err(err) => {
                self.notice = Some(Notice::Error(err.to_string()));
                DeckCommand::Continue
            }
        }
    }

    fn dispatch(&mut self, action: HotkeyAction) -> Result<DeckCommand, DeckError> {
        use HotkeyAction as A;

        match action {
            A::Quit => return Ok(DeckCommand::Quit),
            A::ToggleFocus => {
                self.toggle_focus();
            }
            A::Next => {
                self.navigate(Direction::Next);
            }
            A::Previous => {
                self.navigate(Direction::Previous);
            }
            A::SwitchView(view) => self.switch_view(view)?,
            A::CancelBatch => {}
            A::Approve => {
                let report = self.approve_selected()?;
                self.note_transition(&report);
            }
            A::Deny => {
                let report = self.deny_selected()?;
                self.note_transition(&report);
            }
            A::Restore => {
                let report = self.restore_selected()?;
                self.note_transition(&report);
            }
            A::Deliver => {
                let report = self.deliver_selected()?;
                self.note_transition(&report);
            }
            A::Process => {
                return Ok(DeckCommand::RunBatch(self.start_batch(BatchSource::Selected)?))
            }
            A::ProcessMarked => {
                return Ok(DeckCommand::RunBatch(self.start_batch(BatchSource::Marked)?))
            }
            A::ProcessAll => return Ok(DeckCommand::RunBatch(self.start_batch(BatchSource::All)?)),
            A::ToggleMark => {
                self.toggle_mark()?;
            }
            A::ViewArtifact => {
                self.view_artifact()?;
            }
            A::Harvest(category) => {
                if let Some(report) = self.harvest_highlighted(category)? {
                    self.note_tag(&report);
                }
            }
            A::RejectTag => self.reject_and_note(RejectTarget::Tag)?,
            A::RejectCompany => self.reject_and_note(RejectTarget::Company)?,
            A::RejectTitle => self.reject_and_note(RejectTarget::Title)?,
        }
        Ok(DeckCommand::Continue)
    }

    fn reject_and_note(&mut self, target: RejectTarget) -> Result<(), DeckError> {
        if let Some(report) = self.reject(target)? {
            self.note_tag(&report);
        }
        Ok(())
    }

    fn note_transition(&mut self, report: &TransitionReport) {
        self.notice = Some(match report.outcome {
            Outcome::Success => Notice::Info(format!(
                "{} {}",
                report.transition.as_str(),
                report.job_id
            )),
            Outcome::Failure => Notice::Error(format!(
                "{} {} failed: {}",
                report.transition.as_str(),
                report.job_id,
                report.error_message.as_deref().unwrap_or("unknown error")
            )),
        });
    }

    fn note_tag(&mut self, report: &TagReport) {
        self.notice = Some(match (report.outcome, report.category) {
            (Outcome::Success, Some(category)) => {
                Notice::Info(format!("{} -> {}", report.subject, category.as_str()))
            }
            (Outcome::Success, None) => Notice::Info(format!("rejected {}", report.subject)),
            (Outcome::Failure, _) => Notice::Error(format!(
                "{} failed: {}",
                report.subject,
                report.error_message.as_deref().unwrap_or("unknown error")
            )),
        });
    }

    pub fn panel_model(&self) -> PanelModel {
        let description = self
            .detail
            .as_ref()
            .map(|detail| detail.description.clone())
            .unwrap_or_default();
        match self.view {
            View::New => PanelModel::Review {
                description,
                chips: tag_names(self.tags.chips()),
            },
            View::ApprovedTagging => PanelModel::Tagging {
                unsorted: tag_names(self.tags.unsorted()),
                qualifications: tag_names(self.tags.in_category(TagCategory::Qualifications)),
                skills: tag_names(self.tags.in_category(TagCategory::Skills)),
                benefits: tag_names(self.tags.in_category(TagCategory::Benefits)),
            },
            View::ApprovedTailoring => PanelModel::Tailoring {
                description,
                target: self.batch_target.clone(),
                marked: self.marked.clone(),
                log: self.log.clone(),
                artifact: self.artifact.clone(),
            },
            View::Delivered => PanelModel::Delivered {
                description,
                artifact: self.artifact.clone(),
            },
            View::Denied => PanelModel::Denied {
                description,
                chips: tag_names(self.tags.chips()),
            },
        }
    }

    pub fn snapshot(&self) -> DeckSnapshot {
        DeckSnapshot {
            view: self.view,
            surface: self.focus.surface(),
            jobs: self.store.jobs().to_vec(),
            total: self.store.total(),
            selected: self.store.selected().cloned(),
            pending: self
                .store
                .pending()
                .iter()
                .map(|pending| PendingRow {
                    job: pending.job.clone(),
                    target: pending.target,
                })
                .collect(),
            tags: tag_names(self.tags.collection(self.view.tag_collection())),
            tag_cursor: self.focus.tag_cursor(),
            marked: self.marked.clone(),
            batch_target: self.batch_target.clone(),
            panel: self.panel_model(),
            notice: self.notice.clone(),
            stats: self.stats,
            legend: controls_legend(self.view, self.focus.surface()),
        }
    }
}

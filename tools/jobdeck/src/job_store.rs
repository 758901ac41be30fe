use crate::api::JobPage;
use crate::errors::DeckError;
use crate::types::{Job, JobId, Stage};

/// A row that left the confirmed list while its remote call is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransition {
    pub job: Job,
    pub target: Stage,
    index: usize,
    was_selected: bool,
}

/// The loaded page of jobs for one stage plus the operator's selection.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStore {
    stage: Stage,
    jobs: Vec<Job>,
    total: usize,
    selected: Option<JobId>,
    pending: Vec<PendingTransition>,
}

impl JobStore {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            jobs: Vec::new(),
            total: 0,
            selected: None,
            pending: Vec::new(),
        }
    }

    /// Replaces the page. Selection falls back to the first row when the
    /// previously selected job is no longer present.
    pub fn load(&mut self, stage: Stage, page: JobPage) {
        let keep = self
            .selected
            .as_ref()
            .filter(|id| stage == self.stage && page.jobs.iter().any(|job| &job.id == *id))
            .cloned();
        self.stage = stage;
        self.total = page.total;
        self.jobs = page.jobs;
        self.pending.clear();
        self.selected = keep.or_else(|| self.jobs.first().map(|job| job.id.clone()));
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn pending(&self) -> &[PendingTransition] {
        &self.pending
    }

    pub fn is_pending(&self, id: &JobId) -> bool {
        self.pending.iter().any(|p| &p.job.id == id)
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|job| &job.id == id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.get(id).is_some()
    }

    pub fn index_of(&self, id: &JobId) -> Option<usize> {
        self.jobs.iter().position(|job| &job.id == id)
    }

    /// The job if it is resident for the active stage, else `NotFound`.
    pub fn require(&self, id: &JobId) -> Result<&Job, DeckError> {
        self.get(id).ok_or_else(|| {
            DeckError::NotFound(format!(
                "job {id} is not loaded for {}",
                self.stage.as_str()
            ))
        })
    }

    pub fn selected(&self) -> Option<&JobId> {
        self.selected.as_ref()
    }

    pub fn selected_job(&self) -> Option<&Job> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected.as_ref().and_then(|id| self.index_of(id))
    }

    pub fn select(&mut self, id: &JobId) -> Result<(), DeckError> {
        self.require(id)?;
        self.selected = Some(id.clone());
        Ok(())
    }

    /// Moves the selection one row down. Returns false at the end of the list.
    pub fn select_next(&mut self) -> bool {
        self.step_selection(1)
    }

    pub fn select_previous(&mut self) -> bool {
        self.step_selection(-1)
    }

    fn step_selection(&mut self, delta: isize) -> bool {
        let Some(current) = self.selected_index() else {
            return match self.jobs.first() {
                Some(first) => {
                    self.selected = Some(first.id.clone());
                    true
                }
                None => false,
            };
        };
        let Some(next) = current.checked_add_signed(delta) else {
            return false;
        };
        match self.jobs.get(next) {
            Some(job) => {
                self.selected = Some(job.id.clone());
                true
            }
            None => false,
        }
    }

    pub fn update(&mut self, id: &JobId, apply: impl FnOnce(&mut Job)) -> Result<(), DeckError> {
        let stage = self.stage;
        let job = self
            .jobs
            .iter_mut()
            .find(|job| &job.id == id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id} is not loaded for {}", stage.as_str())))?;
        apply(job);
        Ok(())
    }

    /// Removes a confirmed row. Selection moves to the row that takes its
    /// place, or to the one above when the last row was removed.
    pub fn remove(&mut self, id: &JobId) -> Result<Job, DeckError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        let job = self.jobs.remove(index);
        self.total = self.total.saturating_sub(1);
        if self.selected.as_ref() == Some(id) {
            let fallback = self
                .jobs
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|i| self.jobs.get(i)));
            self.selected = fallback.map(|job| job.id.clone());
        }
        Ok(job)
    }

    /// First phase of an optimistic transition: the row leaves the list and
    /// is held as pending until `commit_pending` or `rollback_pending`.
    pub fn begin_pending(&mut self, id: &JobId, target: Stage) -> Result<(), DeckError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        let was_selected = self.selected.as_ref() == Some(id);
        let job = self.remove(id)?;
        self.pending.push(PendingTransition {
            job,
            target,
            index,
            was_selected,
        });
        Ok(())
    }

    pub fn commit_pending(&mut self, id: &JobId) -> Option<PendingTransition> {
        let position = self.pending.iter().position(|p| &p.job.id == id)?;
        Some(self.pending.remove(position))
    }

    /// Puts a pending row back at its prior index and restores the selection
    /// if it was selected when the transition began.
    pub fn rollback_pending(&mut self, id: &JobId) -> bool {
        let Some(pending) = self.commit_pending(id) else {
            return false;
        };
        let index = pending.index.min(self.jobs.len());
        let id = pending.job.id.clone();
        self.jobs.insert(index, pending.job);
        self.total += 1;
        if pending.was_selected || self.selected.is_none() {
            self.selected = Some(id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::sample_job;

    fn store_with(ids: &[&str]) -> JobStore {
        let mut store = JobStore::new(Stage::New);
        let jobs = ids.iter().map(|id| sample_job(id, 50)).collect::<Vec<_>>();
        store.load(
            Stage::New,
            JobPage {
                total: jobs.len(),
                jobs,
            },
        );
        store
    }

    fn ids(store: &JobStore) -> Vec<&str> {
        store.jobs().iter().map(|job| job.id.as_str()).collect()
    }

    #[test]
    fn navigation_does_not_wrap() {
        let mut store = store_with(&["A", "B"]);
        assert_eq!(store.selected().map(JobId::as_str), Some("A"));
        assert!(!store.select_previous());
        assert!(store.select_next());
        assert!(!store.select_next());
        assert_eq!(store.selected().map(JobId::as_str), Some("B"));
    }

    #[test]
    fn pending_row_leaves_list_and_selection_moves_forward_then_back() {
        let mut store = store_with(&["A", "B", "C"]);
        store.select(&JobId::from("B")).expect("select");
        store
            .begin_pending(&JobId::from("B"), Stage::Approved)
            .expect("pending");
        assert_eq!(ids(&store), vec!["A", "C"]);
        assert_eq!(store.selected().map(JobId::as_str), Some("C"));
        assert!(store.is_pending(&JobId::from("B")));

        store
            .begin_pending(&JobId::from("C"), Stage::Approved)
            .expect("pending");
        assert_eq!(store.selected().map(JobId::as_str), Some("A"));
    }

    #[test]
    fn rollback_restores_prior_index_and_selection() {
        let mut store = store_with(&["A", "B", "C"]);
        store.select(&JobId::from("B")).expect("select");
        store
            .begin_pending(&JobId::from("B"), Stage::Denied)
            .expect("pending");
        assert!(store.rollback_pending(&JobId::from("B")));
        assert_eq!(ids(&store), vec!["A", "B", "C"]);
        assert_eq!(store.selected().map(JobId::as_str), Some("B"));
        assert_eq!(store.total(), 3);
        assert!(store.pending().is_empty());
        assert!(!store.rollback_pending(&JobId::from("B")));
    }

    #[test]
    fn missing_ids_are_not_found_and_leave_state_alone() {
        let mut store = store_with(&["A"]);
        let before = store.clone();
        let err = store
            .begin_pending(&JobId::from("Z"), Stage::Approved)
            .expect_err("missing");
        assert!(matches!(err, DeckError::NotFound(_)));
        assert!(store.select(&JobId::from("Z")).is_err());
        assert_eq!(store, before);
    }

    #[test]
    fn reload_keeps_selection_when_still_present() {
        let mut store = store_with(&["A", "B"]);
        store.select(&JobId::from("B")).expect("select");
        let jobs = vec![sample_job("C", 90), sample_job("B", 50)];
        store.load(Stage::New, JobPage { total: 2, jobs });
        assert_eq!(store.selected().map(JobId::as_str), Some("B"));

        store.load(Stage::Denied, JobPage::default());
        assert_eq!(store.selected(), None);
        assert_eq!(store.stage(), Stage::Denied);
    }
}

use super::{DocumentReply, JobApi, JobPage, PageRequest, ProcessReply, RemoteReply, ReplyStatus};
use crate::config::RestoreTarget;
use crate::errors::DeckError;
use crate::types::{
    ArtifactVariant, Job, JobDetail, JobId, ModelConfig, PipelineStats, SkillTag, Stage,
    StatCounter, TagCategory,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    ListJobs,
    JobDetail,
    Approve,
    Deny,
    Restore,
    Process,
    HarvestTag,
    Reject,
    Artifact,
    SaveArtifact,
    GenerateDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeFailure {
    /// The call itself fails, e.g. a transport error.
    Error(DeckError),
    /// The call succeeds but reports a non-success status.
    Status(String),
}

#[derive(Default)]
struct FakeState {
    jobs: Vec<Job>,
    details: HashMap<JobId, JobDetail>,
    artifacts: HashMap<JobId, String>,
    blacklist: Vec<String>,
    failures: HashMap<(ApiOp, String), VecDeque<FakeFailure>>,
    calls: Vec<String>,
    stats: PipelineStats,
    restore_target: RestoreTarget,
}

/// In-memory `JobApi` with scripted failures and a call log.
#[derive(Clone, Default)]
pub struct FakeJobApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeJobApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_job(self, job: Job) -> Self {
        self.insert(job, sample_detail("", &[]));
        self
    }

    pub fn with_job_detail(self, job: Job, detail: JobDetail) -> Self {
        self.insert(job, detail);
        self
    }

    pub fn with_restore_target(self, target: RestoreTarget) -> Self {
        self.lock().restore_target = target;
        self
    }

    pub fn insert(&self, job: Job, detail: JobDetail) {
        let mut state = self.lock();
        state.details.insert(job.id.clone(), detail);
        state.jobs.retain(|existing| existing.id != job.id);
        state.jobs.push(job);
    }

    /// Queues a failure for the next call of `op` keyed by job id (or term).
    pub fn fail_next(&self, op: ApiOp, key: &str, failure: FakeFailure) {
        self.lock()
            .failures
            .entry((op, key.to_string()))
            .or_default()
            .push_back(failure);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.lock().jobs.iter().find(|job| job.id.as_str() == id).cloned()
    }

    pub fn tag_category(&self, id: &str, tag: &str) -> Option<TagCategory> {
        self.lock()
            .details
            .get(&JobId::from(id))
            .and_then(|detail| detail.skills.iter().find(|t| t.name == tag))
            .map(|tag| tag.category)
    }

    pub fn blacklist(&self) -> Vec<String> {
        self.lock().blacklist.clone()
    }

    fn begin(&self, op: ApiOp, key: &str) -> Result<Option<String>, DeckError> {
        let mut state = self.lock();
        state.calls.push(format!("{op:?}:{key}"));
        match state
            .failures
            .get_mut(&(op, key.to_string()))
            .and_then(VecDeque::pop_front)
        {
            Some(FakeFailure::Error(err)) => Err(err),
            Some(FakeFailure::Status(message)) => Ok(Some(message)),
            None => Ok(None),
        }
    }

    fn move_stage(
        &self,
        id: &JobId,
        allowed_from: &[Stage],
        to: Stage,
        counter: Option<StatCounter>,
    ) -> Result<RemoteReply, DeckError> {
        let mut state = self.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|job| &job.id == id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        if !allowed_from.contains(&job.stage) {
            return Err(DeckError::Precondition(format!(
                "job {id} is {}",
                job.stage.as_str()
            )));
        }
        job.previous_stage = Some(job.stage);
        job.stage = to;
        job.auto_denied = false;
        if let Some(counter) = counter {
            state.stats.session.bump(counter);
            state.stats.all_time.bump(counter);
        }
        Ok(RemoteReply::ok())
    }
}

impl JobApi for FakeJobApi {
    fn list_jobs(&self, stage: Stage, page: Option<PageRequest>) -> Result<JobPage, DeckError> {
        if let Some(message) = self.begin(ApiOp::ListJobs, stage.as_str())? {
            return Err(DeckError::RemoteStatus(message));
        }
        let state = self.lock();
        let mut jobs = state
            .jobs
            .iter()
            .filter(|job| job.stage == stage)
            .cloned()
            .collect::<Vec<_>>();
        jobs.sort_by(|a, b| b.score.cmp(&a.score));
        let total = jobs.len();
        if let Some(page) = page {
            jobs = jobs
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect();
        }
        Ok(JobPage { jobs, total })
    }

    fn job_detail(&self, id: &JobId) -> Result<JobDetail, DeckError> {
        if let Some(message) = self.begin(ApiOp::JobDetail, id.as_str())? {
            return Err(DeckError::RemoteStatus(message));
        }
        let state = self.lock();
        let mut detail = state
            .details
            .get(id)
            .cloned()
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        detail
            .skills
            .retain(|tag| !state.blacklist.contains(&tag.name.to_lowercase()));
        Ok(detail)
    }

    fn approve(&self, id: &JobId) -> Result<RemoteReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::Approve, id.as_str())? {
            return Ok(RemoteReply::error(message));
        }
        self.move_stage(
            id,
            &[Stage::New],
            Stage::Approved,
            Some(StatCounter::Approved),
        )
    }

    fn deny(&self, id: &JobId) -> Result<RemoteReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::Deny, id.as_str())? {
            return Ok(RemoteReply::error(message));
        }
        self.move_stage(
            id,
            &[Stage::New, Stage::Approved],
            Stage::Denied,
            Some(StatCounter::Denied),
        )
    }

    fn restore(&self, id: &JobId) -> Result<RemoteReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::Restore, id.as_str())? {
            return Ok(RemoteReply::error(message));
        }
        let target = {
            let state = self.lock();
            let previous = state
                .jobs
                .iter()
                .find(|job| &job.id == id)
                .and_then(|job| job.previous_stage);
            state.restore_target.resolve(previous)
        };
        self.move_stage(id, &[Stage::Denied], target, None)
    }

    fn process(&self, id: &JobId, config: &ModelConfig) -> Result<ProcessReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::Process, id.as_str())? {
            return Ok(ProcessReply::failed(message));
        }
        let mut state = self.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|job| &job.id == id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        if job.stage != Stage::Approved {
            return Err(DeckError::Precondition(format!("job {id} is not approved")));
        }
        job.has_ai_artifact = true;
        let path = format!("artifacts/{id}.json");
        state.artifacts.insert(
            id.clone(),
            format!("{{\"model\":\"{}\",\"job\":\"{id}\"}}", config.model),
        );
        state.stats.session.bump(StatCounter::Processed);
        state.stats.all_time.bump(StatCounter::Processed);
        Ok(ProcessReply {
            status: ReplyStatus::Ok,
            artifact_path: Some(path),
            duration_seconds: Some(1.5),
            document_path: None,
            message: None,
        })
    }

    fn harvest_tag(
        &self,
        id: &JobId,
        tag: &str,
        category: TagCategory,
    ) -> Result<RemoteReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::HarvestTag, id.as_str())? {
            return Ok(RemoteReply::error(message));
        }
        let mut state = self.lock();
        let detail = state
            .details
            .get_mut(id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        let skill = detail
            .skills
            .iter_mut()
            .find(|skill| skill.name == tag && skill.category == TagCategory::Unsorted)
            .ok_or_else(|| DeckError::NotFound(format!("unsorted tag {tag}")))?;
        skill.category = category;
        Ok(RemoteReply::ok())
    }

    fn reject(&self, term: &str) -> Result<RemoteReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::Reject, term)? {
            return Ok(RemoteReply::error(message));
        }
        let term = term.trim().to_lowercase();
        let mut state = self.lock();
        if !state.blacklist.contains(&term) {
            state.blacklist.push(term);
        }
        Ok(RemoteReply::ok())
    }

    fn artifact(&self, id: &JobId, _variant: ArtifactVariant) -> Result<String, DeckError> {
        if let Some(message) = self.begin(ApiOp::Artifact, id.as_str())? {
            return Err(DeckError::RemoteStatus(message));
        }
        self.lock()
            .artifacts
            .get(id)
            .cloned()
            .ok_or_else(|| DeckError::NotFound(format!("no artifact for job {id}")))
    }

    fn save_artifact(&self, id: &JobId, content: &str) -> Result<RemoteReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::SaveArtifact, id.as_str())? {
            return Ok(RemoteReply::error(message));
        }
        let mut state = self.lock();
        state.artifacts.insert(id.clone(), content.to_string());
        if let Some(job) = state.jobs.iter_mut().find(|job| &job.id == id) {
            job.has_ai_artifact = true;
        }
        Ok(RemoteReply::ok())
    }

    fn generate_document(&self, id: &JobId) -> Result<DocumentReply, DeckError> {
        if let Some(message) = self.begin(ApiOp::GenerateDocument, id.as_str())? {
            return Ok(DocumentReply::failed(message));
        }
        let mut state = self.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|job| &job.id == id)
            .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
        if !job.has_ai_artifact {
            return Err(DeckError::Precondition(format!("job {id} has no artifact")));
        }
        job.has_pdf_artifact = true;
        job.stage = Stage::Delivered;
        state.stats.session.bump(StatCounter::Delivered);
        state.stats.all_time.bump(StatCounter::Delivered);
        Ok(DocumentReply::created(format!("done/{id}.pdf")))
    }

    fn stats(&self) -> Result<PipelineStats, DeckError> {
        Ok(self.lock().stats)
    }
}

/// Builds a NEW job with sensible display fields for tests and demos.
pub fn sample_job(id: &str, score: i64) -> Job {
    Job {
        id: JobId::from(id),
        stage: Stage::New,
        title: format!("Engineer {id}"),
        company: format!("Company {id}"),
        city: "Remote".to_string(),
        pay: "$120k".to_string(),
        job_url: format!("https://jobs.example/{id}"),
        score,
        has_ai_artifact: false,
        has_pdf_artifact: false,
        auto_denied: false,
        previous_stage: None,
    }
}

pub fn sample_detail(description: &str, tags: &[&str]) -> JobDetail {
    JobDetail {
        description: description.to_string(),
        skills: tags.iter().map(|name| SkillTag::unsorted(*name)).collect(),
        url: String::new(),
    }
}

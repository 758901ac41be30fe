use crate::api::{JobApi, ReplyStatus};
use crate::config::RestoreTarget;
use crate::errors::DeckError;
use crate::job_store::JobStore;
use crate::logging::append_run_log;
use crate::types::{Job, JobId, ModelConfig, Outcome, Stage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Approve,
    Deny,
    Restore,
    Process,
    Deliver,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::Restore => "restore",
            Self::Process => "process",
            Self::Deliver => "deliver",
        }
    }
}

/// Checks that `transition` may start from `from` and returns the stage the
/// job lands in. Process keeps the job in APPROVED. Restore always answers
/// NEW here; `LifecycleEngine::landing_stage` applies the restore target.
pub fn validate_transition(transition: Transition, from: Stage) -> Result<Stage, DeckError> {
    let to = match (transition, from) {
        (Transition::Approve, Stage::New) => Stage::Approved,
        (Transition::Deny, Stage::New | Stage::Approved) => Stage::Denied,
        (Transition::Restore, Stage::Denied) => Stage::New,
        (Transition::Process, Stage::Approved) => Stage::Approved,
        (Transition::Deliver, Stage::Approved) => Stage::Delivered,
        _ => {
            return Err(DeckError::Precondition(format!(
                "cannot {} a {} job",
                transition.as_str(),
                from.as_str()
            )))
        }
    };
    Ok(to)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReport {
    pub job_id: JobId,
    pub transition: Transition,
    pub outcome: Outcome,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub job_id: JobId,
    pub outcome: Outcome,
    pub artifact_path: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl ProcessReport {
    fn failure(job_id: &JobId, message: String) -> Self {
        Self {
            job_id: job_id.clone(),
            outcome: Outcome::Failure,
            artifact_path: None,
            duration_seconds: None,
            error_message: Some(message),
        }
    }
}

/// Ids with an operation in flight. A ticket is released when dropped.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<JobId>>>,
}

pub struct InFlightTicket {
    ids: Arc<Mutex<HashSet<JobId>>>,
    id: JobId,
}

impl InFlight {
    pub fn try_acquire(&self, id: &JobId) -> Result<InFlightTicket, DeckError> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| DeckError::Precondition("in-flight registry poisoned".to_string()))?;
        if !ids.insert(id.clone()) {
            return Err(DeckError::Precondition(format!(
                "an operation on job {id} is already in flight"
            )));
        }
        Ok(InFlightTicket {
            ids: Arc::clone(&self.ids),
            id: id.clone(),
        })
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.ids.lock().map(|ids| ids.contains(id)).unwrap_or(false)
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(&self.id);
        }
    }
}

/// Runs one stage transition per call against the remote API and keeps the
/// store consistent with the reply.
#[derive(Clone)]
pub struct LifecycleEngine {
    api: Arc<dyn JobApi>,
    in_flight: InFlight,
    restore_target: RestoreTarget,
}

impl LifecycleEngine {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self {
            api,
            in_flight: InFlight::default(),
            restore_target: RestoreTarget::default(),
        }
    }

    /// Must match the restore target the remote store is configured with.
    pub fn with_restore_target(mut self, target: RestoreTarget) -> Self {
        self.restore_target = target;
        self
    }

    /// Stage `job` lands in after `transition`. Restore honours the
    /// configured target and the stage held before denial.
    pub fn landing_stage(&self, job: &Job, transition: Transition) -> Result<Stage, DeckError> {
        let to = validate_transition(transition, job.stage)?;
        if transition == Transition::Restore {
            return Ok(self.restore_target.resolve(job.previous_stage));
        }
        Ok(to)
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn approve(&self, store: &mut JobStore, id: &JobId) -> Result<TransitionReport, DeckError> {
        self.optimistic(store, id, Transition::Approve)
    }

    pub fn deny(&self, store: &mut JobStore, id: &JobId) -> Result<TransitionReport, DeckError> {
        self.optimistic(store, id, Transition::Deny)
    }

    pub fn restore(&self, store: &mut JobStore, id: &JobId) -> Result<TransitionReport, DeckError> {
        self.optimistic(store, id, Transition::Restore)
    }

    fn optimistic(
        &self,
        store: &mut JobStore,
        id: &JobId,
        transition: Transition,
    ) -> Result<TransitionReport, DeckError> {
        let job = store.require(id)?;
        let target = self.landing_stage(job, transition)?;
        let _ticket = self.in_flight.try_acquire(id)?;

        store.begin_pending(id, target)?;
        let result = match transition {
            Transition::Approve => self.api.approve(id),
            Transition::Deny => self.api.deny(id),
            _ => self.api.restore(id),
        }
        .and_then(|reply| reply.into_result());

        match result {
            Ok(_) => {
                store.commit_pending(id);
                append_run_log(
                    "info",
                    "lifecycle.transition.committed",
                    json!({ "job_id": id.as_str(), "transition": transition.as_str() }),
                );
                Ok(TransitionReport {
                    job_id: id.clone(),
                    transition,
                    outcome: Outcome::Success,
                    error_message: None,
                })
            }
            Err(err) => {
                store.rollback_pending(id);
                if !err.is_remote_failure() {
                    log_violation(id, transition, &err);
                    return Err(err);
                }
                Ok(self.remote_failure(id, transition, &err))
            }
        }
    }

    pub fn process(
        &self,
        store: &mut JobStore,
        id: &JobId,
        config: &ModelConfig,
    ) -> Result<ProcessReport, DeckError> {
        config.validate()?;
        let job = store.require(id)?;
        validate_transition(Transition::Process, job.stage)?;
        let _ticket = self.in_flight.try_acquire(id)?;

        let reply = match self.api.process(id, config) {
            Ok(reply) => reply,
            Err(err) if err.is_remote_failure() => {
                log_remote_failure(id, Transition::Process, &err);
                return Ok(ProcessReport::failure(id, err.message()));
            }
            Err(err) => {
                log_violation(id, Transition::Process, &err);
                return Err(err);
            }
        };
        if reply.status == ReplyStatus::Error {
            let err = DeckError::RemoteStatus(
                reply
                    .message
                    .unwrap_or_else(|| "tailoring failed".to_string()),
            );
            log_remote_failure(id, Transition::Process, &err);
            return Ok(ProcessReport::failure(id, err.message()));
        }

        let has_document = reply.document_path.is_some();
        store.update(id, |job| {
            job.has_ai_artifact = true;
            job.has_pdf_artifact |= has_document;
        })?;
        append_run_log(
            "info",
            "lifecycle.process.completed",
            json!({
                "job_id": id.as_str(),
                "artifact_path": reply.artifact_path,
                "duration_seconds": reply.duration_seconds,
            }),
        );
        Ok(ProcessReport {
            job_id: id.clone(),
            outcome: Outcome::Success,
            artifact_path: reply.artifact_path,
            duration_seconds: reply.duration_seconds,
            error_message: None,
        })
    }

    pub fn deliver(&self, store: &mut JobStore, id: &JobId) -> Result<TransitionReport, DeckError> {
        let job = store.require(id)?;
        validate_transition(Transition::Deliver, job.stage)?;
        if !job.has_ai_artifact {
            return Err(DeckError::Precondition(format!(
                "job {id} has no tailored artifact to deliver"
            )));
        }
        let _ticket = self.in_flight.try_acquire(id)?;

        let reply = match self.api.generate_document(id) {
            Ok(reply) => reply,
            Err(err) if err.is_remote_failure() => {
                return Ok(self.remote_failure(id, Transition::Deliver, &err))
            }
            Err(err) => {
                log_violation(id, Transition::Deliver, &err);
                return Err(err);
            }
        };
        if reply.status == ReplyStatus::Error {
            let err = DeckError::RemoteStatus(
                reply
                    .message
                    .unwrap_or_else(|| "document generation failed".to_string()),
            );
            return Ok(self.remote_failure(id, Transition::Deliver, &err));
        }

        store.update(id, |job| job.has_pdf_artifact = true)?;
        store.remove(id)?;
        append_run_log(
            "info",
            "lifecycle.deliver.completed",
            json!({ "job_id": id.as_str(), "path": reply.path }),
        );
        Ok(TransitionReport {
            job_id: id.clone(),
            transition: Transition::Deliver,
            outcome: Outcome::Success,
            error_message: None,
        })
    }

    fn remote_failure(&self, id: &JobId, transition: Transition, err: &DeckError) -> TransitionReport {
        log_remote_failure(id, transition, err);
        TransitionReport {
            job_id: id.clone(),
            transition,
            outcome: Outcome::Failure,
            error_message: Some(err.message()),
        }
    }
}

fn log_remote_failure(id: &JobId, transition: Transition, err: &DeckError) {
    append_run_log(
        "error",
        "lifecycle.remote_failure",
        json!({
            "job_id": id.as_str(),
            "transition": transition.as_str(),
            "error": err.to_string(),
        }),
    );
}

fn log_violation(id: &JobId, transition: Transition, err: &DeckError) {
    append_run_log(
        "warn",
        "lifecycle.view_violation",
        json!({
            "job_id": id.as_str(),
            "transition": transition.as_str(),
            "error": err.to_string(),
        }),
    );
}

use crate::errors::DeckError;
use crate::job_store::JobStore;
use crate::lifecycle::LifecycleEngine;
use crate::logging::{append_run_log, structured_fallback_line};
use crate::runtime::Clock;
use crate::types::{JobId, ModelConfig, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Where the ids of a batch come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSource {
    Marked,
    All,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchLogEntry {
    Item {
        job_id: JobId,
        outcome: Outcome,
        detail: String,
        timestamp: u64,
    },
    Complete {
        succeeded: usize,
        failed: usize,
        timestamp: u64,
    },
    Cancelled {
        succeeded: usize,
        failed: usize,
        timestamp: u64,
    },
}

impl BatchLogEntry {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Item { .. })
    }

    /// One `key=value` line for non-TTY output.
    pub fn structured_line(&self) -> String {
        match self {
            Self::Item {
                job_id,
                outcome,
                detail,
                ..
            } => structured_fallback_line(job_id.as_str(), outcome.as_str(), detail),
            Self::Complete {
                succeeded, failed, ..
            } => structured_fallback_line(
                "-",
                "COMPLETE",
                &format!("{succeeded} succeeded, {failed} failed"),
            ),
            Self::Cancelled {
                succeeded, failed, ..
            } => structured_fallback_line(
                "-",
                "CANCELLED",
                &format!("{succeeded} succeeded, {failed} failed"),
            ),
        }
    }
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// One sequential pass of `process` over an ordered id list. Stepped one
/// entry at a time so the caller can check for cancellation between items.
#[derive(Debug, Clone)]
pub struct BatchRun {
    ids: Vec<JobId>,
    config: ModelConfig,
    next: usize,
    succeeded: usize,
    failed: usize,
    finished: bool,
    cancel: CancellationToken,
}

impl BatchRun {
    pub fn new(
        ids: impl IntoIterator<Item = JobId>,
        config: ModelConfig,
    ) -> Result<Self, DeckError> {
        config.validate()?;
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect::<Vec<_>>();
        append_run_log(
            "info",
            "batch.started",
            json!({ "items": ids.len(), "model": config.model }),
        );
        Ok(Self {
            ids,
            config,
            next: 0,
            succeeded: 0,
            failed: 0,
            finished: false,
            cancel: CancellationToken::new(),
        })
    }

    pub fn ids(&self) -> &[JobId] {
        &self.ids
    }

    pub fn current(&self) -> Option<&JobId> {
        if self.finished {
            return None;
        }
        self.ids.get(self.next)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs the next item, or emits the terminal marker once. Returns `None`
    /// after the marker.
    pub fn step(
        &mut self,
        engine: &LifecycleEngine,
        store: &mut JobStore,
        clock: &dyn Clock,
    ) -> Option<BatchLogEntry> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            let entry = BatchLogEntry::Cancelled {
                succeeded: self.succeeded,
                failed: self.failed,
                timestamp: unix_seconds(clock.now()),
            };
            append_run_log(
                "warn",
                "batch.cancelled",
                json!({ "succeeded": self.succeeded, "failed": self.failed, "remaining": self.ids.len() - self.next }),
            );
            return Some(entry);
        }
        let Some(id) = self.ids.get(self.next).cloned() else {
            self.finished = true;
            append_run_log(
                "info",
                "batch.complete",
                json!({ "succeeded": self.succeeded, "failed": self.failed }),
            );
            return Some(BatchLogEntry::Complete {
                succeeded: self.succeeded,
                failed: self.failed,
                timestamp: unix_seconds(clock.now()),
            });
        };
        self.next += 1;

        // A job that left the list since the batch started fails as its own item.
        let processed = store
            .select(&id)
            .and_then(|()| engine.process(store, &id, &self.config));
        let (outcome, detail) = match processed {
            Ok(report) => match report.outcome {
                Outcome::Success => (Outcome::Success, success_detail(&report)),
                Outcome::Failure => (
                    Outcome::Failure,
                    report
                        .error_message
                        .unwrap_or_else(|| "processing failed".to_string()),
                ),
            },
            Err(err) => (Outcome::Failure, err.to_string()),
        };
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failure => self.failed += 1,
        }
        append_run_log(
            "info",
            "batch.item",
            json!({ "job_id": id.as_str(), "outcome": outcome.as_str(), "detail": detail }),
        );
        Some(BatchLogEntry::Item {
            job_id: id,
            outcome,
            detail,
            timestamp: unix_seconds(clock.now()),
        })
    }

    /// Steps to the end, handing every entry to `observe` as it is produced.
    pub fn run_to_end(
        &mut self,
        engine: &LifecycleEngine,
        store: &mut JobStore,
        clock: &dyn Clock,
        mut observe: impl FnMut(&BatchLogEntry),
    ) -> Vec<BatchLogEntry> {
        let mut entries = Vec::new();
        while let Some(entry) = self.step(engine, store, clock) {
            observe(&entry);
            entries.push(entry);
        }
        entries
    }
}

fn success_detail(report: &crate::lifecycle::ProcessReport) -> String {
    let path = report.artifact_path.as_deref().unwrap_or("artifact saved");
    match report.duration_seconds {
        Some(seconds) => format!("{path} ({seconds:.1}s)"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::sample_job;
    use crate::api::{FakeJobApi, JobApi};
    use crate::runtime::FakeClock;
    use crate::types::Stage;
    use std::sync::Arc;

    fn model() -> ModelConfig {
        ModelConfig {
            model: "m".to_string(),
            temperature: 0.5,
            prompt_override: None,
        }
    }

    fn approved(ids: &[&str]) -> (Arc<FakeJobApi>, JobStore) {
        let api = FakeJobApi::new();
        for id in ids {
            let mut job = sample_job(id, 50);
            job.stage = Stage::Approved;
            api.insert(job, crate::api::fake::sample_detail("", &[]));
        }
        let mut store = JobStore::new(Stage::Approved);
        store.load(
            Stage::Approved,
            api.list_jobs(Stage::Approved, None).expect("list"),
        );
        (Arc::new(api), store)
    }

    #[test]
    fn duplicates_are_dropped_first_occurrence_wins() {
        let run = BatchRun::new(
            ["B", "A", "B", "C", "A"].map(JobId::from),
            model(),
        )
        .expect("run");
        let ids = run.ids().iter().map(JobId::as_str).collect::<Vec<_>>();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[test]
    fn invalid_config_runs_nothing() {
        let mut config = model();
        config.temperature = 3.0;
        let err = BatchRun::new([JobId::from("A")], config).expect_err("invalid");
        assert!(matches!(err, DeckError::Input(_)));
    }

    #[test]
    fn empty_batch_emits_only_the_marker() {
        let (api, mut store) = approved(&[]);
        let engine = LifecycleEngine::new(api);
        let mut run = BatchRun::new(Vec::new(), model()).expect("run");
        let entries = run.run_to_end(&engine, &mut store, &FakeClock::default(), |_| {});
        assert_eq!(
            entries,
            vec![BatchLogEntry::Complete {
                succeeded: 0,
                failed: 0,
                timestamp: 0
            }]
        );
        assert!(run.step(&engine, &mut store, &FakeClock::default()).is_none());
    }

    #[test]
    fn missing_job_becomes_a_failure_entry() {
        let (api, mut store) = approved(&["A"]);
        let engine = LifecycleEngine::new(api.clone());
        let mut run = BatchRun::new(["Z", "A"].map(JobId::from), model()).expect("run");
        let entries = run.run_to_end(&engine, &mut store, &FakeClock::default(), |_| {});
        assert_eq!(entries.len(), 3);
        assert!(!api.calls().iter().any(|call| call == "Process:Z"));
        assert_eq!(store.selected().map(JobId::as_str), Some("A"));
        assert!(matches!(
            &entries[0],
            BatchLogEntry::Item { outcome: Outcome::Failure, detail, .. } if detail.contains("not found")
        ));
        assert!(matches!(
            &entries[1],
            BatchLogEntry::Item { outcome: Outcome::Success, .. }
        ));
        assert_eq!(
            entries[2],
            BatchLogEntry::Complete {
                succeeded: 1,
                failed: 1,
                timestamp: 0
            }
        );
    }

    #[test]
    fn structured_lines_name_job_and_outcome() {
        let entry = BatchLogEntry::Item {
            job_id: JobId::from("A"),
            outcome: Outcome::Failure,
            detail: "boom\nline".to_string(),
            timestamp: 1,
        };
        assert_eq!(
            entry.structured_line(),
            "job_id=A state=FAILURE message=boom\\nline"
        );
    }
}

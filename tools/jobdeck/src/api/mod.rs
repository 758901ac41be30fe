//! The remote job API as seen by the deck. Every transition, tag decision
//! and tailoring run crosses this boundary exactly once.

pub mod fake;
pub mod sqlite;

use crate::errors::DeckError;
use crate::types::{
    ArtifactVariant, Job, JobDetail, JobId, ModelConfig, PipelineStats, Stage, TagCategory,
};
use serde::{Deserialize, Serialize};

pub use fake::{ApiOp, FakeFailure, FakeJobApi};
pub use sqlite::{InsertOutcome, NewJob, SqliteJobApi, SqliteJobApiOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReply {
    pub status: ReplyStatus,
    pub message: Option<String>,
}

impl RemoteReply {
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            message: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            message: Some(message.into()),
        }
    }

    /// Folds a non-success status into `DeckError::RemoteStatus`.
    pub fn into_result(self) -> Result<Option<String>, DeckError> {
        match self.status {
            ReplyStatus::Ok => Ok(self.message),
            ReplyStatus::Error => Err(DeckError::RemoteStatus(
                self.message
                    .unwrap_or_else(|| "remote reported an error".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReply {
    pub status: ReplyStatus,
    pub artifact_path: Option<String>,
    pub duration_seconds: Option<f64>,
    pub document_path: Option<String>,
    pub message: Option<String>,
}

impl ProcessReply {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            artifact_path: None,
            duration_seconds: None,
            document_path: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReply {
    pub status: ReplyStatus,
    pub path: Option<String>,
    pub message: Option<String>,
}

impl DocumentReply {
    pub fn created(path: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            path: Some(path.into()),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            path: None,
            message: Some(message.into()),
        }
    }
}

pub trait JobApi: Send + Sync {
    fn list_jobs(&self, stage: Stage, page: Option<PageRequest>) -> Result<JobPage, DeckError>;
    fn job_detail(&self, id: &JobId) -> Result<JobDetail, DeckError>;
    fn approve(&self, id: &JobId) -> Result<RemoteReply, DeckError>;
    fn deny(&self, id: &JobId) -> Result<RemoteReply, DeckError>;
    fn restore(&self, id: &JobId) -> Result<RemoteReply, DeckError>;
    fn process(&self, id: &JobId, config: &ModelConfig) -> Result<ProcessReply, DeckError>;
    fn harvest_tag(
        &self,
        id: &JobId,
        tag: &str,
        category: TagCategory,
    ) -> Result<RemoteReply, DeckError>;
    fn reject(&self, term: &str) -> Result<RemoteReply, DeckError>;
    fn artifact(&self, id: &JobId, variant: ArtifactVariant) -> Result<String, DeckError>;
    fn save_artifact(&self, id: &JobId, content: &str) -> Result<RemoteReply, DeckError>;
    fn generate_document(&self, id: &JobId) -> Result<DocumentReply, DeckError>;
    fn stats(&self) -> Result<PipelineStats, DeckError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_becomes_remote_status_error() {
        assert_eq!(RemoteReply::ok().into_result(), Ok(None));
        let err = RemoteReply::error("503 upstream").into_result().expect_err("error");
        assert_eq!(err, DeckError::RemoteStatus("503 upstream".to_string()));
        assert!(err.is_remote_failure());
    }
}

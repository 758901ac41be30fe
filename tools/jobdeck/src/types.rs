use crate::errors::DeckError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    New,
    Approved,
    Delivered,
    Denied,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Approved => "APPROVED",
            Self::Delivered => "DELIVERED",
            Self::Denied => "DENIED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(Self::New),
            "APPROVED" => Some(Self::Approved),
            "DELIVERED" => Some(Self::Delivered),
            "DENIED" => Some(Self::Denied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    Unsorted,
    Qualifications,
    Skills,
    Benefits,
}

impl TagCategory {
    pub const SORTED: [TagCategory; 3] = [Self::Qualifications, Self::Skills, Self::Benefits];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsorted => "unsorted",
            Self::Qualifications => "qualifications",
            Self::Skills => "skills",
            Self::Benefits => "benefits",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unsorted" | "new" => Some(Self::Unsorted),
            "qualifications" => Some(Self::Qualifications),
            "skills" => Some(Self::Skills),
            "benefits" => Some(Self::Benefits),
            _ => None,
        }
    }

    pub fn is_sorted(self) -> bool {
        self != Self::Unsorted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTag {
    pub name: String,
    pub category: TagCategory,
}

impl SkillTag {
    pub fn unsorted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: TagCategory::Unsorted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub stage: Stage,
    pub title: String,
    pub company: String,
    pub city: String,
    pub pay: String,
    pub job_url: String,
    pub score: i64,
    pub has_ai_artifact: bool,
    pub has_pdf_artifact: bool,
    #[serde(default)]
    pub auto_denied: bool,
    /// Stage held before the job was denied.
    #[serde(default)]
    pub previous_stage: Option<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub description: String,
    pub skills: Vec<SkillTag>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub prompt_override: Option<String>,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), DeckError> {
        if self.model.trim().is_empty() {
            return Err(DeckError::Input("model must not be empty".to_string()));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(DeckError::Input(format!(
                "temperature {} is outside [0, {MAX_TEMPERATURE}]",
                self.temperature
            )));
        }
        if let Some(prompt) = &self.prompt_override {
            if prompt.trim().is_empty() {
                return Err(DeckError::Input(
                    "custom instructions must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Result of one remote-backed operation as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactVariant {
    Primary,
}

impl ArtifactVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounters {
    pub approved: u64,
    pub denied: u64,
    pub processed: u64,
    pub delivered: u64,
}

impl StatCounters {
    pub fn bump(&mut self, counter: StatCounter) {
        match counter {
            StatCounter::Approved => self.approved += 1,
            StatCounter::Denied => self.denied += 1,
            StatCounter::Processed => self.processed += 1,
            StatCounter::Delivered => self.delivered += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCounter {
    Approved,
    Denied,
    Processed,
    Delivered,
}

impl StatCounter {
    pub const ALL: [StatCounter; 4] = [
        Self::Approved,
        Self::Denied,
        Self::Processed,
        Self::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Processed => "processed",
            Self::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|counter| counter.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub session: StatCounters,
    pub all_time: StatCounters,
}

use crate::batch::BatchLogEntry;
use crate::types::{JobId, SkillTag, Stage};
use serde::{Deserialize, Serialize};

/// Operator-facing views. The two approved work modes share `Stage::Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    New,
    ApprovedTagging,
    ApprovedTailoring,
    Delivered,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    JobList,
    Description,
    TagChips,
    TagColumns,
    BatchTerminal,
    ArtifactPreview,
}

/// Which tag collection the TAGS surface navigates in a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCollection {
    Unsorted,
    Chips,
    None,
}

impl View {
    pub const ALL: [View; 5] = [
        Self::New,
        Self::ApprovedTagging,
        Self::ApprovedTailoring,
        Self::Delivered,
        Self::Denied,
    ];

    pub fn status_query(self) -> Stage {
        match self {
            Self::New => Stage::New,
            Self::ApprovedTagging | Self::ApprovedTailoring => Stage::Approved,
            Self::Delivered => Stage::Delivered,
            Self::Denied => Stage::Denied,
        }
    }

    pub fn panels(self) -> &'static [Panel] {
        match self {
            Self::New | Self::Denied => &[Panel::JobList, Panel::Description, Panel::TagChips],
            Self::ApprovedTagging => &[Panel::JobList, Panel::TagColumns],
            Self::ApprovedTailoring => &[Panel::JobList, Panel::Description, Panel::BatchTerminal],
            Self::Delivered => &[Panel::JobList, Panel::Description, Panel::ArtifactPreview],
        }
    }

    pub fn tag_collection(self) -> TagCollection {
        match self {
            Self::ApprovedTagging => TagCollection::Unsorted,
            Self::New | Self::Denied => TagCollection::Chips,
            Self::ApprovedTailoring | Self::Delivered => TagCollection::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::ApprovedTagging => "REFINERY",
            Self::ApprovedTailoring => "FACTORY",
            Self::Delivered => "DELIVERED",
            Self::Denied => "DENIED",
        }
    }

    pub fn hotkey(self) -> char {
        match self {
            Self::New => '1',
            Self::ApprovedTagging => '2',
            Self::ApprovedTailoring => '3',
            Self::Delivered => '4',
            Self::Denied => '5',
        }
    }

    pub fn from_hotkey(key: char) -> Option<Self> {
        Self::ALL.into_iter().find(|view| view.hotkey() == key)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "tagging" | "refinery" | "approved_tagging" => Some(Self::ApprovedTagging),
            "tailoring" | "factory" | "approved_tailoring" | "approved" => {
                Some(Self::ApprovedTailoring)
            }
            "delivered" => Some(Self::Delivered),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Per-view panel payload handed to the renderer; each variant carries only
/// what its panel set draws.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelModel {
    Review {
        description: String,
        chips: Vec<String>,
    },
    Tagging {
        unsorted: Vec<String>,
        qualifications: Vec<String>,
        skills: Vec<String>,
        benefits: Vec<String>,
    },
    Tailoring {
        description: String,
        target: Option<JobId>,
        marked: Vec<JobId>,
        log: Vec<BatchLogEntry>,
        artifact: Option<String>,
    },
    Delivered {
        description: String,
        artifact: Option<String>,
    },
    Denied {
        description: String,
        chips: Vec<String>,
    },
}

pub fn tag_names<'a>(tags: impl IntoIterator<Item = &'a SkillTag>) -> Vec<String> {
    tags.into_iter().map(|tag| tag.name.clone()).collect()
}

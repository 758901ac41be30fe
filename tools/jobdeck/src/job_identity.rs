use crate::types::JobId;
use sha2::{Digest, Sha256};

const ID_HEX_LEN: usize = 16;

/// The fields that make two imported postings the same posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub title: String,
    pub company: String,
    pub url: String,
}

impl JobIdentity {
    pub fn canonical_json(&self) -> String {
        format!(
            "{{\"title\":\"{}\",\"company\":\"{}\",\"url\":\"{}\"}}",
            escape_json(&normalize_text(&self.title)),
            escape_json(&normalize_text(&self.company)),
            escape_json(self.url.trim()),
        )
    }

    pub fn job_id(&self) -> JobId {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        let hex = digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        JobId::new(format!("job_{}", &hex[..ID_HEX_LEN]))
    }
}

/// A record key from the import wins; otherwise the id is derived from content.
pub fn resolve_job_id(record_key: Option<&str>, identity: &JobIdentity) -> JobId {
    match record_key.map(str::trim) {
        Some(key) if !key.is_empty() => JobId::new(key),
        _ => identity.job_id(),
    }
}

pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn escape_json(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
}

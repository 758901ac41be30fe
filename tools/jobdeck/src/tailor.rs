use crate::runtime::ProcessRequest;
use crate::types::JobId;
use std::path::Path;

pub const MISSING_RESUME: &str = "Master resume not found.";
const SAFE_TITLE_MAX_CHARS: usize = 50;
const DEFAULT_TASK: &str = "TASK: Return JSON tailored resume.";

/// Filesystem-safe stem for artifacts: alphanumerics, space, `-` and `_`
/// only, trimmed, at most 50 characters.
pub fn safe_title(title: &str) -> String {
    let kept = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>();
    kept.trim().chars().take(SAFE_TITLE_MAX_CHARS).collect()
}

pub fn artifact_file_name(title: &str, id: &JobId) -> String {
    format!("{}_{}.json", safe_title(title), id)
}

pub fn prompt_file_name(title: &str, id: &JobId) -> String {
    format!("{}_{}.prompt.txt", safe_title(title), id)
}

pub fn document_file_name(title: &str, id: &JobId) -> String {
    format!("{}_{}.pdf", safe_title(title), id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInputs<'a> {
    pub resume: Option<&'a str>,
    pub qualifications: &'a [String],
    pub skills: &'a [String],
    pub description: &'a str,
    pub instructions: Option<&'a str>,
}

pub fn build_prompt(inputs: &PromptInputs<'_>) -> String {
    let resume = inputs
        .resume
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(MISSING_RESUME);
    let task = match inputs.instructions.map(str::trim) {
        Some(instructions) if !instructions.is_empty() => format!("TASK: {instructions}"),
        _ => DEFAULT_TASK.to_string(),
    };
    format!(
        "RESUME:\n{resume}\n\nMY QUALIFICATIONS: {}\nMY SKILLS: {}\n\nJOB:\n{}\n\n{task}",
        inputs.qualifications.join(", "),
        inputs.skills.join(", "),
        inputs.description.trim(),
    )
}

/// An external command whose args carry `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn render(&self, values: &[(&str, &str)], cwd: Option<&Path>) -> ProcessRequest {
        let args = self
            .args
            .iter()
            .map(|arg| {
                values.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect();
        ProcessRequest {
            program: self.program.clone(),
            args,
            cwd: cwd.map(Path::to_path_buf),
        }
    }
}

/// Extracts the artifact from completion output. Markdown code fences are
/// stripped; with `require_json` the body must parse as JSON.
pub fn parse_completion(stdout: &str, require_json: bool) -> Result<String, String> {
    let mut body = stdout.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    if body.is_empty() {
        return Err("completion returned no content".to_string());
    }
    if require_json {
        serde_json::from_str::<serde_json::Value>(body)
            .map_err(|e| format!("completion was not valid JSON: {e}"))?;
    }
    Ok(body.to_string())
}

use crate::errors::DeckError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use crate::types::{ModelConfig, Stage, MAX_TEMPERATURE};
use crate::view::View;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub view: Option<View>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub tailor: TailorConfig,
    pub document: DocumentConfig,
    pub lifecycle: LifecycleConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TailorConfig {
    pub program: String,
    /// `{model}`, `{temperature}` and `{prompt_file}` are substituted per call.
    pub args: Vec<String>,
    pub model: String,
    pub temperature: f32,
    pub resume_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub require_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentConfig {
    pub program: String,
    /// `{artifact}` and `{output}` are substituted per call.
    pub args: Vec<String>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestoreTarget {
    #[default]
    New,
    Previous,
}

impl RestoreTarget {
    /// Stage a restored job lands in. Anything but NEW or APPROVED falls back to NEW.
    pub fn resolve(self, previous: Option<Stage>) -> Stage {
        match (self, previous) {
            (Self::Previous, Some(stage @ (Stage::New | Stage::Approved))) => stage,
            _ => Stage::New,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub restore_target: RestoreTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UiConfig {
    pub page_size: u32,
    pub initial_view: View,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                db_path: PathBuf::from(".jobdeck/jobs.sqlite3"),
            },
            tailor: TailorConfig {
                program: "jobdeck-tailor".to_string(),
                args: vec![
                    "--model".to_string(),
                    "{model}".to_string(),
                    "--temperature".to_string(),
                    "{temperature}".to_string(),
                    "--prompt-file".to_string(),
                    "{prompt_file}".to_string(),
                ],
                model: DEFAULT_MODEL.to_string(),
                temperature: DEFAULT_TEMPERATURE,
                resume_path: PathBuf::from("master_resume.txt"),
                artifact_dir: PathBuf::from(".jobdeck/artifacts"),
                require_json: true,
            },
            document: DocumentConfig {
                program: "jobdeck-render".to_string(),
                args: vec!["{artifact}".to_string(), "{output}".to_string()],
                output_dir: PathBuf::from(".jobdeck/done"),
            },
            lifecycle: LifecycleConfig {
                restore_target: RestoreTarget::New,
            },
            ui: UiConfig {
                page_size: 200,
                initial_view: View::New,
            },
            logging: LoggingConfig {
                path: PathBuf::from(".jobdeck/logs/run.jsonl"),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl AppConfig {
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model: self.tailor.model.clone(),
            temperature: self.tailor.temperature,
            prompt_override: None,
        }
    }

    /// Resolves relative paths against `base` so the deck behaves the same
    /// regardless of where it was launched from.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        for path in [
            &mut self.store.db_path,
            &mut self.tailor.resume_path,
            &mut self.tailor.artifact_dir,
            &mut self.document.output_dir,
            &mut self.logging.path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    store: Option<PartialStoreConfig>,
    tailor: Option<PartialTailorConfig>,
    document: Option<PartialDocumentConfig>,
    lifecycle: Option<PartialLifecycleConfig>,
    ui: Option<PartialUiConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialStoreConfig {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialTailorConfig {
    program: Option<String>,
    args: Option<Vec<String>>,
    model: Option<String>,
    temperature: Option<f32>,
    resume_path: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    require_json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialDocumentConfig {
    program: Option<String>,
    args: Option<Vec<String>>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialLifecycleConfig {
    restore_target: Option<RestoreTarget>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialUiConfig {
    page_size: Option<u32>,
    initial_view: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(overrides: &CliOverrides, fs: &dyn FileSystem) -> Result<AppConfig, DeckError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig =
            toml::from_str(&contents).map_err(|e| DeckError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial)?;
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) -> Result<(), DeckError> {
    if let Some(store) = partial.store {
        if let Some(db_path) = store.db_path {
            cfg.store.db_path = db_path;
        }
    }

    if let Some(tailor) = partial.tailor {
        if let Some(value) = tailor.program {
            cfg.tailor.program = value;
        }
        if let Some(value) = tailor.args {
            cfg.tailor.args = value;
        }
        if let Some(value) = tailor.model {
            cfg.tailor.model = value;
        }
        if let Some(value) = tailor.temperature {
            cfg.tailor.temperature = value;
        }
        if let Some(value) = tailor.resume_path {
            cfg.tailor.resume_path = value;
        }
        if let Some(value) = tailor.artifact_dir {
            cfg.tailor.artifact_dir = value;
        }
        if let Some(value) = tailor.require_json {
            cfg.tailor.require_json = value;
        }
    }

    if let Some(document) = partial.document {
        if let Some(value) = document.program {
            cfg.document.program = value;
        }
        if let Some(value) = document.args {
            cfg.document.args = value;
        }
        if let Some(value) = document.output_dir {
            cfg.document.output_dir = value;
        }
    }

    if let Some(lifecycle) = partial.lifecycle {
        if let Some(value) = lifecycle.restore_target {
            cfg.lifecycle.restore_target = value;
        }
    }

    if let Some(ui) = partial.ui {
        if let Some(value) = ui.page_size {
            cfg.ui.page_size = value;
        }
        if let Some(value) = ui.initial_view {
            cfg.ui.initial_view = View::parse(&value).ok_or_else(|| {
                DeckError::InvalidConfig(format!("ui.initial_view `{value}` is not a view"))
            })?;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
    Ok(())
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(db_path) = &overrides.db_path {
        cfg.store.db_path = db_path.clone();
    }
    if let Some(view) = overrides.view {
        cfg.ui.initial_view = view;
    }
    if let Some(model) = &overrides.model {
        cfg.tailor.model = model.clone();
    }
    if let Some(temperature) = overrides.temperature {
        cfg.tailor.temperature = temperature;
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), DeckError> {
    if cfg.ui.page_size == 0 {
        return Err(DeckError::InvalidConfig(
            "ui.page_size must be greater than zero".to_string(),
        ));
    }
    if cfg.tailor.program.trim().is_empty() {
        return Err(DeckError::InvalidConfig(
            "tailor.program must not be empty".to_string(),
        ));
    }
    if cfg.document.program.trim().is_empty() {
        return Err(DeckError::InvalidConfig(
            "document.program must not be empty".to_string(),
        ));
    }
    if cfg.tailor.model.trim().is_empty() {
        return Err(DeckError::InvalidConfig(
            "tailor.model must be a real model id".to_string(),
        ));
    }
    if !(0.0..=MAX_TEMPERATURE).contains(&cfg.tailor.temperature) {
        return Err(DeckError::InvalidConfig(format!(
            "tailor.temperature must be within [0, {MAX_TEMPERATURE}]"
        )));
    }
    if cfg.logging.max_payload_bytes < 16 {
        return Err(DeckError::InvalidConfig(
            "logging.max_payload_bytes must be at least 16".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    fn overrides_for(path: &str) -> CliOverrides {
        CliOverrides {
            config_path: Some(PathBuf::from(path)),
            ..CliOverrides::default()
        }
    }

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = load_config(&CliOverrides::default(), &FakeFileSystem::default()).expect("cfg");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.lifecycle.restore_target, RestoreTarget::New);
        assert_eq!(cfg.model_config().model, DEFAULT_MODEL);
    }

    #[test]
    fn file_values_merge_over_defaults_and_cli_wins() {
        let fs = FakeFileSystem::with_file(
            "/cfg/jobdeck.toml",
            r#"
[tailor]
model = "from-file"
temperature = 0.2

[lifecycle]
restore_target = "previous"

[ui]
initial_view = "refinery"
"#,
        );
        let mut overrides = overrides_for("/cfg/jobdeck.toml");
        overrides.temperature = Some(1.1);

        let cfg = load_config(&overrides, &fs).expect("cfg");
        assert_eq!(cfg.tailor.model, "from-file");
        assert_eq!(cfg.tailor.temperature, 1.1);
        assert_eq!(cfg.lifecycle.restore_target, RestoreTarget::Previous);
        assert_eq!(cfg.ui.initial_view, View::ApprovedTagging);
        assert_eq!(cfg.tailor.program, "jobdeck-tailor");
    }

    #[test]
    fn restore_target_resolves_only_to_review_stages() {
        assert_eq!(RestoreTarget::New.resolve(Some(Stage::Approved)), Stage::New);
        assert_eq!(
            RestoreTarget::Previous.resolve(Some(Stage::Approved)),
            Stage::Approved
        );
        assert_eq!(RestoreTarget::Previous.resolve(Some(Stage::Delivered)), Stage::New);
        assert_eq!(RestoreTarget::Previous.resolve(None), Stage::New);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let fs = FakeFileSystem::with_file("/c.toml", "[ui]\npage_size = 0\n");
        let err = load_config(&overrides_for("/c.toml"), &fs).expect_err("page size");
        assert!(matches!(err, DeckError::InvalidConfig(_)));

        let fs = FakeFileSystem::with_file("/c.toml", "[ui]\ninitial_view = \"archive\"\n");
        let err = load_config(&overrides_for("/c.toml"), &fs).expect_err("view");
        assert!(matches!(err, DeckError::InvalidConfig(_)));

        let mut overrides = CliOverrides::default();
        overrides.temperature = Some(3.0);
        let err = load_config(&overrides, &FakeFileSystem::default()).expect_err("temp");
        assert!(matches!(err, DeckError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_sections_are_parse_errors() {
        let fs = FakeFileSystem::with_file("/c.toml", "[scheduler]\nlease = 1\n");
        let err = load_config(&overrides_for("/c.toml"), &fs).expect_err("unknown");
        assert!(matches!(err, DeckError::ConfigParse(_)));
    }

    #[test]
    fn anchoring_only_touches_relative_paths() {
        let mut cfg = AppConfig::default();
        cfg.tailor.resume_path = PathBuf::from("/abs/resume.txt");
        let cfg = cfg.anchored_at(Path::new("/work"));
        assert_eq!(cfg.store.db_path, PathBuf::from("/work/.jobdeck/jobs.sqlite3"));
        assert_eq!(cfg.tailor.resume_path, PathBuf::from("/abs/resume.txt"));
    }
}

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeckError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote status error: {0}")]
    RemoteStatus(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("database error: {0}")]
    Database(String),
}

impl DeckError {
    /// Failures that originate on the far side of the job API. Lifecycle and
    /// tag operations fold these into a failure report instead of returning them.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::RemoteStatus(_)
                | Self::Database(_)
                | Self::Process(_)
                | Self::Io(_)
        )
    }

    /// Invariant violations against the in-memory view.
    pub fn is_view_violation(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Precondition(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Transport(m)
            | Self::RemoteStatus(m)
            | Self::NotFound(m)
            | Self::Precondition(m)
            | Self::Input(m)
            | Self::Io(m)
            | Self::ConfigParse(m)
            | Self::InvalidConfig(m)
            | Self::Cli(m)
            | Self::Process(m)
            | Self::Database(m) => m.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DeckError;

    #[test]
    fn classification_separates_remote_failures_from_view_violations() {
        for err in [
            DeckError::Transport("down".to_string()),
            DeckError::RemoteStatus("500".to_string()),
            DeckError::Database("locked".to_string()),
            DeckError::Process("exit 1".to_string()),
        ] {
            assert!(err.is_remote_failure(), "{err} should be remote");
            assert!(!err.is_view_violation());
        }

        for err in [
            DeckError::NotFound("job".to_string()),
            DeckError::Precondition("no artifact".to_string()),
        ] {
            assert!(err.is_view_violation(), "{err} should be a view violation");
            assert!(!err.is_remote_failure());
        }

        let input = DeckError::Input("empty".to_string());
        assert!(!input.is_remote_failure());
        assert!(!input.is_view_violation());
        assert_eq!(input.message(), "empty");
    }
}

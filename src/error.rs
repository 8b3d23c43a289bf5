use std::process::ExitStatus;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("usage: {0}")]
    Usage(String),

    #[error(
        "application directory {0} not found; clone the repository \
         there or pass --repo"
    )]
    MissingRepository(String),

    #[error("command failed: {command}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("{0} step(s) failed; see the summary above")]
    StepsFailed(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// Whether `--keep-going` may skip past this error. A missing
    /// application tree leaves nothing for later stages to act on.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::CommandNotFound(_) | Self::Io(_)
        )
    }
}

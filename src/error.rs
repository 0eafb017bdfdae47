use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowGuardError {
    #[error("packet parse error: {0}")]
    Parse(String),

    #[error("malformed model: {0}")]
    ModelFormat(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("rule installation failed: {0}")]
    RuleInstall(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine isn't running")]
    NotRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowGuardError>;

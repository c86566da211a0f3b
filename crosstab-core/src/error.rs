use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("template {template:?}: unsupported placeholder '%{found}'")]
    UnsupportedPlaceholder { template: String, found: char },

    #[error("template {template:?}: placeholder {index} has no argument")]
    MissingArgument { template: String, index: usize },

    #[error("template {template:?}: '%d' needs an integer for placeholder {index}")]
    NotAnInteger { template: String, index: usize },

    #[error("template {template:?}: dangling '%' at end of template")]
    DanglingPercent { template: String },

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("player name exceeds 16 characters")]
    PlayerNameTooLong,

    #[error("viewer is not tracked")]
    ViewerNotTracked,

    #[error("presence refresh failed: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

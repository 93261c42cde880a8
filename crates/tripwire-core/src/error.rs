use thiserror::Error;

/// Failure to apply values to a step's declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("no such field {0}")]
    Unknown(String),

    #[error("bad value for field {0}")]
    BadValue(String),

    #[error("required field {0} missing or invalid")]
    Missing(String),
}

impl FieldError {
    /// Name of the field the error refers to.
    pub fn field(&self) -> &str {
        match self {
            FieldError::Unknown(name) | FieldError::BadValue(name) | FieldError::Missing(name) => {
                name
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TripwireError {
    // Definition errors
    #[error("Graph definition error: {0}")]
    GraphDefinition(String),

    #[error("Step kind not on the allow-list: {0}")]
    Security(String),

    // Execution errors
    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    #[error("Step execution failed: {step}: {message}")]
    Execution { step: String, message: String },

    #[error("Graph cancelled")]
    Cancelled,

    // Service errors
    #[error("Service not registered: {0}")]
    NotRegistered(String),

    #[error("Service error: {service}: {message}")]
    Service { service: String, message: String },

    #[error("Message relay is closed")]
    RelayClosed,

    #[error("Lock poisoned: {0}")]
    Lock(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TripwireError {
    /// Build an execution error for a named step.
    pub fn execution(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TripwireError::Execution {
            step: step.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TripwireError>;

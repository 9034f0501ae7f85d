use thiserror::Error;

/// Failures surfaced by the simulation engine.
///
/// Input problems reject the whole request and name the offending field so
/// the transport layer can map them to a 4xx response. Data-dependency
/// failures are fatal at startup. Run-level depletion is an expected outcome
/// and is never reported through this type.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("historical return series has {months} usable months; at least 12 required")]
    EmptyHistory { months: usize },

    #[error("failed to read historical data file {path}: {source}")]
    DataFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown market regime '{0}' (expected 'bear', 'bull', or 'none')")]
    UnknownRegime(String),

    #[error("historical series contains no {regime} windows to sample")]
    EmptyRegimePool { regime: &'static str },

    #[error("simulation cancelled before any run completed")]
    Cancelled,

    #[error("invariant violated in run {run} at age {age}, account '{account}': {message}")]
    InvariantViolation {
        run: usize,
        age: u32,
        account: String,
        message: String,
    },
}

impl SimError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Field name for input-validation errors, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidInput { field, .. } => Some(field),
            _ => None,
        }
    }
}

//! Error types for the terminology engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown code '{code}' in system '{system}'")]
    CodeNotFound { system: String, code: String },

    #[error("Unknown code system: {0}")]
    UnknownCodeSystem(String),

    #[error("Unknown value set: {0}")]
    UnknownValueSet(String),

    #[error("Unknown concept map: {0}")]
    UnknownConceptMap(String),

    #[error("Malformed hierarchy in '{system}': concept '{code}' declares missing parent '{parent}'")]
    MalformedHierarchy {
        system: String,
        code: String,
        parent: String,
    },

    #[error("Cyclic hierarchy in '{system}' involving concept '{code}'")]
    CyclicHierarchy { system: String, code: String },

    #[error("Invalid filter '{property} {op} {value}': {reason}")]
    InvalidFilter {
        property: String,
        op: String,
        value: String,
        reason: String,
    },

    #[error("Value set reference cycle involving '{0}'")]
    ValueSetCycle(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is the recoverable "thing does not exist" kind,
    /// surfaced to callers as a negative result where the operation
    /// defines one.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CodeNotFound { .. }
                | Error::UnknownCodeSystem(_)
                | Error::UnknownValueSet(_)
                | Error::UnknownConceptMap(_)
        )
    }
}

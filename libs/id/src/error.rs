//! Error types for ID and name parsing.

use thiserror::Error;

/// Errors that can occur when parsing or validating identities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The value is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ID is missing the separator between its parts.
    #[error("ID missing separator")]
    MissingSeparator,

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// A name exceeds the maximum length.
    #[error("name '{value}' is {len} characters, maximum is {max}")]
    TooLong {
        value: String,
        len: usize,
        max: usize,
    },

    /// A name is not a valid DNS label.
    #[error("name '{0}' must consist of lowercase alphanumerics or '-', and start and end with an alphanumeric")]
    InvalidLabel(String),

    /// The ordinal suffix of a replica name is invalid.
    #[error("invalid ordinal in replica name '{0}'")]
    InvalidOrdinal(String),

    /// A replica name does not belong to the expected fleet.
    #[error("replica name '{actual}' does not belong to fleet '{fleet}'")]
    FleetMismatch { fleet: String, actual: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error came from parsing a replica ordinal.
    pub fn is_ordinal_error(&self) -> bool {
        matches!(
            self,
            IdError::InvalidOrdinal(_) | IdError::FleetMismatch { .. }
        )
    }
}

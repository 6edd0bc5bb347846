#[cfg(test)]
#[path = "tests/progress.rs"]
mod tests;

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

pub const NO_REPLICATORS_MESSAGE: &str = "no replicators available";
pub const ALL_REPLICATORS_FAILED_MESSAGE: &str = "every replicator failed to replicate repo";

/// Closed set of failure kinds shared by local APIs and the wire.
#[derive(
    BorshDeserialize,
    BorshSerialize,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
)]
#[borsh(use_discriminant = true)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorKind {
    NotFound = 0,
    Unauthorized = 1,
    LengthMismatch = 2,
    DigestMismatch = 3,
    Transport = 4,
    NoReplicators = 5,
    AllReplicatorsFailed = 6,
    NotReplicating = 7,
    Cancelled = 8,
    Exhausted = 9,
    Storage = 10,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::Unauthorized => "unauthorized",
            Self::LengthMismatch => "length mismatch",
            Self::DigestMismatch => "digest mismatch",
            Self::Transport => "transport",
            Self::NoReplicators => "no replicators",
            Self::AllReplicatorsFailed => "all replicators failed",
            Self::NotReplicating => "not replicating",
            Self::Cancelled => "cancelled",
            Self::Exhausted => "exhausted",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct ProgressError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProgressError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProgressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One step of a replication job.
///
/// `done` and `error` are mutually exclusive; the constructors below are the
/// only way to build a terminal value.
#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub done: bool,
    pub error: Option<ProgressError>,
}

impl Progress {
    #[must_use]
    pub const fn new(current: u64, total: u64) -> Self {
        Self {
            current,
            total,
            done: false,
            error: None,
        }
    }

    #[must_use]
    pub const fn done() -> Self {
        Self {
            current: 100,
            total: 100,
            done: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(ProgressError::new(kind, message)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_replicators() -> Self {
        Self::failed(ErrorKind::NoReplicators, NO_REPLICATORS_MESSAGE)
    }

    #[must_use]
    pub fn all_replicators_failed() -> Self {
        Self::failed(ErrorKind::AllReplicatorsFailed, ALL_REPLICATORS_FAILED_MESSAGE)
    }

    /// Completion as an integer percentage, `0` when the total is unknown.
    #[must_use]
    pub fn percent(&self) -> u64 {
        if self.done {
            return 100;
        }

        self.current
            .saturating_mul(100)
            .checked_div(self.total)
            .unwrap_or(0)
            .min(100)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

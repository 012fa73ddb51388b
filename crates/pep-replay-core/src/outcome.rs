// crates/pep-replay-core/src/outcome.rs
// ============================================================================
// Module: Outcome Classifier
// Description: Maps decision-engine HTTP status codes to verdicts.
// Purpose: Provide a pure, total, closed classification of responses.
// Dependencies: std
// ============================================================================

//! ## Overview
//! The decision engine signals its verdict through the HTTP status code only.
//! `200` grants, `401` denies, and every other code is unexpected. The
//! response body is never inspected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Status code signalling a granted request.
pub const STATUS_GRANTED: u16 = 200;
/// Status code signalling a denied request.
pub const STATUS_DENIED: u16 = 401;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Authorization verdict derived from a response status.
///
/// # Invariants
/// - The mapping from status code is closed: no other variants exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Status 200.
    Granted,
    /// Status 401.
    Denied,
    /// Any other status, carrying the raw code.
    Unexpected(u16),
}

impl Outcome {
    /// Classifies an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            STATUS_GRANTED => Self::Granted,
            STATUS_DENIED => Self::Denied,
            other => Self::Unexpected(other),
        }
    }

    /// Returns the telemetry label: `GRANTED`, `DENIED`, or the raw code.
    #[must_use]
    pub fn label(self) -> Cow<'static, str> {
        match self {
            Self::Granted => Cow::Borrowed("GRANTED"),
            Self::Denied => Cow::Borrowed("DENIED"),
            Self::Unexpected(code) => Cow::Owned(code.to_string()),
        }
    }

    /// Returns true for [`Outcome::Unexpected`].
    #[must_use]
    pub const fn is_unexpected(self) -> bool {
        matches!(self, Self::Unexpected(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

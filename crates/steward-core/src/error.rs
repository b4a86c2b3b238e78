//! Numeric error codes and the serialisable cause chain.
//!
//! Every component error implements [`Coded`]. Callers at the process edge
//! turn any coded error into an [`ErrorReport`], which nests the coded cause
//! chain and renders either as JSON or as the flattened
//! `message: …, code: …` form used on stderr.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An error carrying a stable numeric code and an optional coded cause.
pub trait Coded: std::error::Error {
    /// Stable numeric code, namespaced by component.
    fn code(&self) -> u16;

    /// The lower-level coded failure this error wraps, when there is one.
    fn cause(&self) -> Option<&dyn Coded> {
        None
    }
}

/// Recursively printable failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Human-readable message.
    pub message: String,
    /// Numeric code of the failing step.
    pub code: u16,
    /// The failure that caused this one.
    #[serde(rename = "stack", default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorReport>>,
}

impl ErrorReport {
    /// Builds a report without a cause.
    #[must_use]
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code,
            cause: None,
        }
    }

    /// Builds the report chain for a coded error.
    #[must_use]
    pub fn from_error(error: &dyn Coded) -> Self {
        Self {
            message: error.to_string(),
            code: error.code(),
            cause: error.cause().map(|cause| Box::new(Self::from_error(cause))),
        }
    }

    /// Iterates over this report and every nested cause, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |report| report.cause.as_deref())
    }
}

impl<E: Coded> From<&E> for ErrorReport {
    fn from(error: &E) -> Self {
        Self::from_error(error)
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for report in self.chain() {
            if !first {
                formatter.write_str("\n")?;
            }
            first = false;
            write!(
                formatter,
                "message: {}, code: {}",
                report.message, report.code
            )?;
        }
        Ok(())
    }
}

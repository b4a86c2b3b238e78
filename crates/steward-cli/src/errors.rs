//! Error types for the CLI runtime.
//!
//! Operation failures are not represented here: they are coded errors from
//! `steward-core` rendered straight to stderr. These variants cover the
//! process plumbing around an operation.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Layout(#[from] steward_config::LayoutError),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to serialise operation output: {0}")]
    Serialise(#[from] serde_json::Error),
    #[error("failed to write operation output: {0}")]
    Write(#[from] io::Error),
}

//! Hard failures of a prerender run.
//!
//! Anything in here aborts the whole batch. Errors raised *inside* a render
//! call are not represented here: they are absorbed per route and written to
//! the page as a diagnostic (see [`crate::RenderOutcome::Diagnostic`]).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrerenderError {
    #[error("Unable to find renderEntry {entry} in assets {}.", .available.join(","))]
    UnknownRenderEntry {
        entry: String,
        available: Vec<String>,
    },

    #[error("renderEntry {entry} has no JavaScript asset (emitted: {}).", .assets.join(","))]
    NoRenderAsset { entry: String, assets: Vec<String> },

    #[error("Unable to evaluate render module {asset}: {source:#}")]
    Evaluate {
        asset: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unable to find render function. File {asset}. Received {received}.")]
    NotCallable { asset: String, received: String },

    #[error("Missing route in {record}. Unable to render page without a path")]
    MissingRoute { record: String },

    #[error("Render must return a string. Received {received}. (route {route})")]
    NonStringResult { route: String, received: String },

    #[error("Failed to write {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PrerenderError {
    /// Whether the error comes from the inputs (entry, module, routes, render
    /// contract) rather than from the output filesystem.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Output { .. })
    }
}

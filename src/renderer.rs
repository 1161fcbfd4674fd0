//! Render function capability and binding it from a compiled asset.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PrerenderError;
use crate::stats::CompiledRenderAsset;

/// What a render call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderValue {
    Html(String),
    /// Anything that is not a string, named the way JS `typeof` would.
    Other { type_name: String },
}

impl RenderValue {
    pub fn other(type_name: impl Into<String>) -> Self {
        Self::Other {
            type_name: type_name.into(),
        }
    }
}

impl From<String> for RenderValue {
    fn from(html: String) -> Self {
        Self::Html(html)
    }
}

impl From<&str> for RenderValue {
    fn from(html: &str) -> Self {
        Self::Html(html.to_string())
    }
}

impl From<Value> for RenderValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(html) => Self::Html(html),
            Value::Null => Self::other("object"),
            Value::Bool(_) => Self::other("boolean"),
            Value::Number(_) => Self::other("number"),
            Value::Array(_) | Value::Object(_) => Self::other("object"),
        }
    }
}

/// A bound render entry point: params in, page out.
///
/// One instance serves every route of a run concurrently, so implementations
/// must not keep per-route state.
#[async_trait]
pub trait RenderFunction: Send + Sync {
    async fn render(&self, params: Value) -> anyhow::Result<RenderValue>;
}

/// Result of evaluating a compiled render module.
pub enum RenderExport {
    Callable(Arc<dyn RenderFunction>),
    NotCallable { type_name: String },
}

impl fmt::Debug for RenderExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callable(_) => f.write_str("Callable"),
            Self::NotCallable { type_name } => f
                .debug_struct("NotCallable")
                .field("type_name", type_name)
                .finish(),
        }
    }
}

/// Turns emitted code into its render export.
#[async_trait]
pub trait ModuleEvaluator: Send + Sync {
    async fn evaluate(&self, asset: &CompiledRenderAsset) -> anyhow::Result<RenderExport>;
}

/// Evaluate `asset` and insist on a callable export.
pub async fn bind_renderer(
    evaluator: &dyn ModuleEvaluator,
    asset: &CompiledRenderAsset,
) -> Result<Arc<dyn RenderFunction>, PrerenderError> {
    let export = evaluator
        .evaluate(asset)
        .await
        .map_err(|source| PrerenderError::Evaluate {
            asset: asset.to_string(),
            source,
        })?;

    match export {
        RenderExport::Callable(render) => Ok(render),
        RenderExport::NotCallable { type_name } => Err(PrerenderError::NotCallable {
            asset: asset.to_string(),
            received: type_name,
        }),
    }
}

//! Bundling results and render entry resolution.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PrerenderError;

/// Extensions accepted as an evaluable render bundle.
const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs"];

/// Output manifest of one bundling step (webpack-style stats JSON).
///
/// Only the fields the renderer needs are typed. Everything else is kept in
/// `extra` so a [`crate::StatsMapper`] can still read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,
    #[serde(default)]
    pub assets_by_chunk_name: BTreeMap<String, ChunkAssets>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Assets emitted for a chunk: a lone file name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkAssets {
    Single(String),
    Many(Vec<String>),
}

/// File name of the compiled render bundle, relative to the render
/// compilation's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompiledRenderAsset(String);

impl CompiledRenderAsset {
    pub fn new(file: impl Into<String>) -> Self {
        Self(file.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompiledRenderAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl BundleStats {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Chunk names in the manifest, sorted.
    pub fn chunk_names(&self) -> Vec<String> {
        self.assets_by_chunk_name.keys().cloned().collect()
    }
}

/// Find the compiled file backing `render_entry`.
///
/// A chunk that emitted several files (sourcemaps, extracted css) resolves to
/// its first script.
pub fn resolve_render_asset(
    stats: &BundleStats,
    render_entry: &str,
) -> Result<CompiledRenderAsset, PrerenderError> {
    let assets = stats
        .assets_by_chunk_name
        .get(render_entry)
        .ok_or_else(|| PrerenderError::UnknownRenderEntry {
            entry: render_entry.to_string(),
            available: stats.chunk_names(),
        })?;

    match assets {
        ChunkAssets::Single(file) => Ok(CompiledRenderAsset::new(file.clone())),
        ChunkAssets::Many(files) => files
            .iter()
            .find(|file| is_script(file))
            .map(|file| CompiledRenderAsset::new(file.clone()))
            .ok_or_else(|| PrerenderError::NoRenderAsset {
                entry: render_entry.to_string(),
                assets: files.clone(),
            }),
    }
}

fn is_script(file: &str) -> bool {
    SCRIPT_EXTENSIONS.iter().any(|ext| file.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> BundleStats {
        BundleStats::from_json(
            r#"{
                "publicPath": "/static/",
                "hash": "abc123",
                "assetsByChunkName": {
                    "main": "main.js",
                    "render": ["render.css", "render.js", "render.js.map"],
                    "styles": ["styles.css"]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parses_webpack_stats() {
        let stats = stats();
        assert_eq!(stats.public_path.as_deref(), Some("/static/"));
        assert_eq!(stats.extra.get("hash"), Some(&Value::from("abc123")));
        assert_eq!(stats.chunk_names(), vec!["main", "render", "styles"]);
    }

    #[test]
    fn test_resolves_single_asset() {
        let asset = resolve_render_asset(&stats(), "main").unwrap();
        assert_eq!(asset.as_str(), "main.js");
    }

    #[test]
    fn test_resolves_first_script_of_many() {
        let asset = resolve_render_asset(&stats(), "render").unwrap();
        assert_eq!(asset.as_str(), "render.js");
    }

    #[test]
    fn test_unknown_entry() {
        let err = resolve_render_asset(&stats(), "server").unwrap_err();
        match &err {
            PrerenderError::UnknownRenderEntry { entry, available } => {
                assert_eq!(entry, "server");
                assert_eq!(available, &vec!["main", "render", "styles"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("server"));
        assert!(err.to_string().contains("main,render,styles"));
    }

    #[test]
    fn test_chunk_without_script() {
        let err = resolve_render_asset(&stats(), "styles").unwrap_err();
        assert!(matches!(err, PrerenderError::NoRenderAsset { .. }));
    }

    #[test]
    fn test_empty_manifest() {
        let err = resolve_render_asset(&BundleStats::default(), "main").unwrap_err();
        assert_eq!(err.to_string(), "Unable to find renderEntry main in assets .");
    }
}

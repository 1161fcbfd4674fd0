//! Route inputs and the route -> output file mapping.
//!
//! ```text
//! /about          -> <render_dir>/about/index.html
//! /blog/post/     -> <render_dir>/blog/post/index.html
//! /               -> <render_dir>/index.html
//! /feed.html      -> <render_dir>/feed.html
//! ```

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PrerenderError;

const HTML_SUFFIX: &str = ".html";
const INDEX_FILE: &str = "index.html";

/// One entry of the route list: a bare path or a record carrying a `route`
/// path plus arbitrary render-time fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteSpec {
    Path(String),
    Record(Map<String, Value>),
}

impl From<&str> for RouteSpec {
    fn from(route: &str) -> Self {
        Self::Path(route.to_string())
    }
}

impl From<String> for RouteSpec {
    fn from(route: String) -> Self {
        Self::Path(route)
    }
}

impl From<Map<String, Value>> for RouteSpec {
    fn from(record: Map<String, Value>) -> Self {
        Self::Record(record)
    }
}

/// A normalized route: `route` is guaranteed to be a string and is also
/// present in `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteData {
    route: String,
    fields: Map<String, Value>,
}

impl RouteSpec {
    pub fn normalize(&self) -> Result<RouteData, PrerenderError> {
        match self {
            Self::Path(route) => {
                let mut fields = Map::new();
                fields.insert("route".to_string(), Value::String(route.clone()));
                Ok(RouteData {
                    route: route.clone(),
                    fields,
                })
            }
            Self::Record(record) => match record.get("route") {
                Some(Value::String(route)) => Ok(RouteData {
                    route: route.clone(),
                    fields: record.clone(),
                }),
                _ => Err(PrerenderError::MissingRoute {
                    record: Value::Object(record.clone()).to_string(),
                }),
            },
        }
    }
}

impl RouteData {
    pub fn route(&self) -> &str {
        &self.route
    }

    /// All route fields, `route` included.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn output_path(&self, render_dir: &Path) -> PathBuf {
        output_path(render_dir, &self.route)
    }
}

/// Destination file for `route` under `render_dir`.
///
/// Routes ending in `.html` name the file directly, anything else is treated
/// as a directory holding an `index.html`.
pub fn output_path(render_dir: &Path, route: &str) -> PathBuf {
    let base = join_route(render_dir, route);
    if route.ends_with(HTML_SUFFIX) {
        base
    } else {
        base.join(INDEX_FILE)
    }
}

/// Join a URL-style route onto `render_dir`.
///
/// The route is never treated as absolute, and `..` cannot climb above
/// `render_dir`. A backslash is a separator only where the platform says so.
fn join_route(render_dir: &Path, route: &str) -> PathBuf {
    let mut segments: Vec<&str> = Vec::new();
    for segment in route.split(|c: char| c == '/' || std::path::is_separator(c)) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut path = render_dir.to_path_buf();
    for segment in segments {
        // Drive prefixes and the like would reset the join.
        if matches!(Path::new(segment).components().next(), Some(Component::Normal(_))) {
            path.push(segment);
        }
    }
    path
}

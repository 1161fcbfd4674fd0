//! Guards on render params before they enter the isolate.
//!
//! Route records are arbitrary JSON, so a key like `__proto__` could reach
//! `Object.prototype` through a careless spread in the render bundle.

use anyhow::{anyhow, Result};
use serde_json::Value;

/// Maximum nesting of objects/arrays in render params
const MAX_DEPTH: usize = 32;

/// Keys that can reach an object's prototype chain
const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Reject params carrying prototype keys or nested deeper than `MAX_DEPTH`.
///
/// The error names the offending location, e.g. `params.meta.__proto__`.
pub fn check_params(params: &Value) -> Result<()> {
    let mut path = vec!["params".to_string()];
    check(params, &mut path)
}

fn check(value: &Value, path: &mut Vec<String>) -> Result<()> {
    // `path` holds the root segment too
    if path.len() > MAX_DEPTH + 1 {
        return Err(anyhow!(
            "Render params nested deeper than {} levels at {}",
            MAX_DEPTH,
            path.join(".")
        ));
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                if FORBIDDEN_KEYS.contains(&key.as_str()) {
                    return Err(anyhow!("Forbidden key in render params: {}", path.join(".")));
                }
                check(child, path)?;
                path.pop();
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                check(child, path)?;
                path.pop();
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

//! Route + stats -> render parameters.

use serde_json::{Map, Value};

use crate::route::RouteData;
use crate::stats::BundleStats;

/// Derives extra render parameters for a route from both bundling results.
///
/// Must be synchronous and free of route-visible side effects: one mapper is
/// shared by every concurrent route render.
pub trait StatsMapper: Send + Sync {
    fn map(
        &self,
        route: &RouteData,
        client_stats: &BundleStats,
        render_stats: &BundleStats,
    ) -> Map<String, Value>;
}

impl<F> StatsMapper for F
where
    F: Fn(&RouteData, &BundleStats, &BundleStats) -> Map<String, Value> + Send + Sync,
{
    fn map(
        &self,
        route: &RouteData,
        client_stats: &BundleStats,
        render_stats: &BundleStats,
    ) -> Map<String, Value> {
        self(route, client_stats, render_stats)
    }
}

/// Exposes the client bundle's assets so the render module can emit
/// `<script>`/`<link>` tags.
///
/// ```text
/// { "clientAssets": { "main": "main.3f2a.js", ... }, "publicPath": "/" }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatsMapper;

impl StatsMapper for DefaultStatsMapper {
    fn map(
        &self,
        _route: &RouteData,
        client_stats: &BundleStats,
        _render_stats: &BundleStats,
    ) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "clientAssets".to_string(),
            serde_json::to_value(&client_stats.assets_by_chunk_name)
                .unwrap_or_else(|_| Value::Object(Map::new())),
        );
        params.insert(
            "publicPath".to_string(),
            Value::String(client_stats.public_path.clone().unwrap_or_else(|| "/".to_string())),
        );
        params
    }
}

/// Build the object handed to the render function.
///
/// Mapper output goes in first and the route's own fields are laid over it,
/// so a route field always wins over a mapper field of the same name.
pub fn merge_params(
    mapper: &dyn StatsMapper,
    route: &RouteData,
    client_stats: &BundleStats,
    render_stats: &BundleStats,
) -> Value {
    let mut params = mapper.map(route, client_stats, render_stats);
    for (key, value) in route.fields() {
        params.insert(key.clone(), value.clone());
    }
    Value::Object(params)
}

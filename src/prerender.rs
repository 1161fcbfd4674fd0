//! Render orchestration: one render call and one written file per route.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::PrerenderError;
use crate::output::{emit, OutputFileSystem};
use crate::params::{merge_params, DefaultStatsMapper, StatsMapper};
use crate::renderer::{bind_renderer, ModuleEvaluator, RenderFunction, RenderValue};
use crate::route::RouteSpec;
use crate::stats::{resolve_render_asset, BundleStats, CompiledRenderAsset};

/// Options for a prerender run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrerenderOptions {
    /// Chunk name of the bundle exporting the render function
    pub render_entry: String,
    /// Root directory for every written page
    pub render_directory: PathBuf,
    /// Emit per-route progress records at info level
    pub verbose: bool,
    /// Maximum number of routes in flight (None = all at once)
    pub concurrency: Option<NonZeroUsize>,
}

impl Default for PrerenderOptions {
    fn default() -> Self {
        Self {
            render_entry: String::from("main"),
            render_directory: PathBuf::from("dist"),
            verbose: false,
            concurrency: None,
        }
    }
}

/// How a single route ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// The render call failed and `message` was written in place of the page.
    Diagnostic { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub route: String,
    pub output_path: PathBuf,
    pub outcome: RenderOutcome,
}

/// Per-route reports of a completed run, in route input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerenderSummary {
    pub routes: Vec<RouteReport>,
}

impl PrerenderSummary {
    /// Routes whose page body is an error message.
    pub fn diagnostics(&self) -> impl Iterator<Item = &RouteReport> {
        self.routes
            .iter()
            .filter(|report| matches!(report.outcome, RenderOutcome::Diagnostic { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics().next().is_none()
    }
}

/// Renders a route list through a compiled render bundle.
pub struct Prerenderer {
    options: PrerenderOptions,
    render_stats: Arc<BundleStats>,
    client_stats: Arc<BundleStats>,
    evaluator: Arc<dyn ModuleEvaluator>,
    output: Arc<dyn OutputFileSystem>,
    mapper: Arc<dyn StatsMapper>,
}

/// Everything a route render needs once the render function is bound.
struct BoundRender<'a> {
    prerenderer: &'a Prerenderer,
    asset: CompiledRenderAsset,
    render: Arc<dyn RenderFunction>,
}

impl Prerenderer {
    pub fn new(
        options: PrerenderOptions,
        render_stats: BundleStats,
        client_stats: BundleStats,
        evaluator: impl ModuleEvaluator + 'static,
        output: impl OutputFileSystem + 'static,
    ) -> Self {
        Self {
            options,
            render_stats: Arc::new(render_stats),
            client_stats: Arc::new(client_stats),
            evaluator: Arc::new(evaluator),
            output: Arc::new(output),
            mapper: Arc::new(DefaultStatsMapper),
        }
    }

    /// Replace the default parameter mapper.
    pub fn with_mapper(mut self, mapper: impl StatsMapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    /// Render every route and write its page.
    ///
    /// Errors thrown by the render function are written into the page,
    /// reported on stderr (through the global `tracing` subscriber when one is
    /// installed) and returned as [`RenderOutcome::Diagnostic`]. An unknown render entry, a
    /// non-callable render export, a route without a path, a non-string
    /// render result or a failed write aborts the run.
    pub async fn run(&self, routes: &[RouteSpec]) -> Result<PrerenderSummary, PrerenderError> {
        let bound = self.bind().await?;

        let limit = self
            .options
            .concurrency
            .map(NonZeroUsize::get)
            .unwrap_or(routes.len())
            .max(1);

        let mut reports: Vec<(usize, RouteReport)> = stream::iter(routes.iter().enumerate())
            .map(|(index, spec)| {
                let bound = &bound;
                async move { bound.render_route(spec).await.map(|report| (index, report)) }
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;

        reports.sort_by_key(|(index, _)| *index);
        Ok(PrerenderSummary {
            routes: reports.into_iter().map(|(_, report)| report).collect(),
        })
    }

    async fn bind(&self) -> Result<BoundRender<'_>, PrerenderError> {
        let asset = resolve_render_asset(&self.render_stats, &self.options.render_entry)?;
        if self.options.verbose {
            info!(render_file = %asset, "Render file");
        }

        let render = bind_renderer(self.evaluator.as_ref(), &asset).await?;
        if self.options.verbose {
            info!("Renderer created");
        }

        Ok(BoundRender {
            prerenderer: self,
            asset,
            render,
        })
    }
}

impl BoundRender<'_> {
    async fn render_route(&self, spec: &RouteSpec) -> Result<RouteReport, PrerenderError> {
        let options = &self.prerenderer.options;
        let route = spec.normalize()?;
        if options.verbose {
            let data = serde_json::Value::Object(route.fields().clone());
            info!(route = %data, "Starting render");
        }

        let output_path = route.output_path(&options.render_directory);
        let params = merge_params(
            self.prerenderer.mapper.as_ref(),
            &route,
            &self.prerenderer.client_stats,
            &self.prerenderer.render_stats,
        );

        let html = match self.render.render(params).await {
            Ok(RenderValue::Html(html)) => html,
            Ok(RenderValue::Other { type_name }) => {
                return Err(PrerenderError::NonStringResult {
                    route: route.route().to_string(),
                    received: type_name,
                });
            }
            Err(err) => {
                report_render_error(&self.asset, route.route(), &err);
                let message = err.to_string();
                self.emit(&output_path, &message).await?;
                return Ok(RouteReport {
                    route: route.route().to_string(),
                    output_path,
                    outcome: RenderOutcome::Diagnostic { message },
                });
            }
        };

        self.emit(&output_path, &html).await?;
        if options.verbose {
            info!("Successfully created asset {}", output_path.display());
        }

        Ok(RouteReport {
            route: route.route().to_string(),
            output_path,
            outcome: RenderOutcome::Rendered,
        })
    }

    async fn emit(&self, path: &Path, content: &str) -> Result<(), PrerenderError> {
        emit(self.prerenderer.output.as_ref(), path, content).await
    }
}

fn render_error_message(asset: &CompiledRenderAsset, err: &anyhow::Error) -> String {
    format!("An error occurred rendering {asset}. See below error.\n{err:?}")
}

/// Render errors always reach stderr, with or without a log subscriber.
fn report_render_error(asset: &CompiledRenderAsset, route: &str, err: &anyhow::Error) {
    let message = render_error_message(asset, err);
    if tracing::dispatcher::has_been_set() {
        error!(asset = %asset, route, "{}", message);
    } else {
        eprintln!("{message}");
    }
}

//! # SSR Prerender
//!
//! Static prerendering for bundled server renderers: resolve the render entry
//! in a bundle's stats, bind its render function, call it once per route and
//! write the HTML to `<render_dir>/<route>/index.html` (or `<route>` itself when
//! the route already ends in `.html`).
//!
//! ## Failure model
//!
//! - **Hard errors** ([`PrerenderError`]) abort the run: unknown render entry,
//!   non-callable render export, a route without a path, a render result that
//!   is not a string, a failed write.
//! - **Render errors** thrown by the render function are absorbed per route:
//!   the error text is written in place of the page and the route is reported
//!   as [`RenderOutcome::Diagnostic`] in the returned [`PrerenderSummary`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ssr_prerender::{
//!     BundleStats, DiskOutput, JsModuleEvaluator, JsRendererConfig, PrerenderOptions,
//!     Prerenderer, RouteSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let render_stats = BundleStats::from_json(&std::fs::read_to_string("build/render/stats.json")?)?;
//!     let client_stats = BundleStats::from_json(&std::fs::read_to_string("build/client/stats.json")?)?;
//!
//!     let evaluator = JsModuleEvaluator::spawn(JsRendererConfig {
//!         bundle_dir: "build/render".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//!     let prerenderer = Prerenderer::new(
//!         PrerenderOptions {
//!             render_entry: "render".into(),
//!             render_directory: "public".into(),
//!             ..Default::default()
//!         },
//!         render_stats,
//!         client_stats,
//!         evaluator,
//!         DiskOutput,
//!     );
//!
//!     let summary = prerenderer
//!         .run(&[RouteSpec::from("/"), RouteSpec::from("/feed.html")])
//!         .await?;
//!     for failed in summary.diagnostics() {
//!         eprintln!("{} rendered with errors", failed.route);
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod js;
mod loader;
mod output;
mod params;
mod prerender;
mod renderer;
mod route;
mod runtime;
mod sanitize;
mod stats;
pub mod telemetry;

pub use error::PrerenderError;
pub use js::JsModuleEvaluator;
pub use loader::SandboxedLoader;
pub use output::{emit, DiskOutput, OutputFileSystem};
pub use params::{merge_params, DefaultStatsMapper, StatsMapper};
pub use prerender::{PrerenderOptions, PrerenderSummary, Prerenderer, RenderOutcome, RouteReport};
pub use renderer::{bind_renderer, ModuleEvaluator, RenderExport, RenderFunction, RenderValue};
pub use route::{output_path, RouteData, RouteSpec};
pub use runtime::{ConsoleOutput, JsRendererConfig};
pub use sanitize::check_params;
pub use stats::{resolve_render_asset, BundleStats, ChunkAssets, CompiledRenderAsset};

//! JavaScript render bundles evaluated in a deno_core isolate.
//!
//! A V8 isolate cannot leave the thread that created it, so the isolate lives
//! on its own worker thread and serves render requests from a channel.
//! Requests are handled one at a time; concurrent route renders queue up in
//! the channel. The worker exits when the evaluator and every render function
//! it handed out have been dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::renderer::{ModuleEvaluator, RenderExport, RenderFunction, RenderValue};
use crate::runtime::{self, ConsoleOutput, JsRendererConfig};
use crate::sanitize::check_params;
use crate::stats::CompiledRenderAsset;

type Reply<T> = oneshot::Sender<anyhow::Result<T>>;

enum Job {
    Inspect {
        entry: PathBuf,
        reply: Reply<String>,
    },
    Render {
        entry: PathBuf,
        params: Value,
        reply: Reply<RenderValue>,
    },
}

#[derive(Clone)]
struct IsolateChannel {
    jobs: mpsc::UnboundedSender<Job>,
}

impl IsolateChannel {
    async fn request<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> anyhow::Result<T> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(job(reply))
            .map_err(|_| anyhow!("render isolate has shut down"))?;
        response
            .await
            .map_err(|_| anyhow!("render isolate dropped the request"))?
    }
}

/// Evaluates render bundles emitted into [`JsRendererConfig::bundle_dir`].
///
/// The render function is the module's default export, or its `render`
/// export when there is no default.
pub struct JsModuleEvaluator {
    bundle_dir: PathBuf,
    channel: IsolateChannel,
}

impl JsModuleEvaluator {
    /// Start the isolate thread and wait until the isolate is ready.
    pub async fn spawn(config: JsRendererConfig) -> anyhow::Result<Self> {
        let (jobs, queue) = mpsc::unbounded_channel();
        let (ready, started) = oneshot::channel();
        let bundle_dir = config.bundle_dir.clone();

        thread::Builder::new()
            .name("prerender-isolate".to_string())
            .spawn(move || serve(config, queue, ready))
            .context("failed to spawn render isolate thread")?;

        started
            .await
            .map_err(|_| anyhow!("render isolate exited during startup"))??;

        Ok(Self {
            bundle_dir,
            channel: IsolateChannel { jobs },
        })
    }
}

#[async_trait]
impl ModuleEvaluator for JsModuleEvaluator {
    async fn evaluate(&self, asset: &CompiledRenderAsset) -> anyhow::Result<RenderExport> {
        let entry = self.bundle_dir.join(asset.as_str());
        let type_name = self
            .channel
            .request(|reply| Job::Inspect {
                entry: entry.clone(),
                reply,
            })
            .await?;

        if type_name != "function" {
            return Ok(RenderExport::NotCallable { type_name });
        }

        Ok(RenderExport::Callable(Arc::new(JsRenderFunction {
            entry,
            channel: self.channel.clone(),
        })))
    }
}

struct JsRenderFunction {
    entry: PathBuf,
    channel: IsolateChannel,
}

#[async_trait]
impl RenderFunction for JsRenderFunction {
    async fn render(&self, params: Value) -> anyhow::Result<RenderValue> {
        check_params(&params)?;
        let entry = self.entry.clone();
        self.channel
            .request(|reply| Job::Render {
                entry,
                params,
                reply,
            })
            .await
    }
}

/// Worker thread body: own the isolate and serve jobs until every sender is gone.
fn serve(
    config: JsRendererConfig,
    mut queue: mpsc::UnboundedReceiver<Job>,
    ready: oneshot::Sender<anyhow::Result<()>>,
) {
    // One extra worker so render watchdogs fire while this thread is inside V8
    let executor = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(executor) => executor,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };

    executor.block_on(async move {
        let mut isolate = match runtime::create_runtime(&config) {
            Ok(isolate) => isolate,
            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }
        debug!(bundle_dir = %config.bundle_dir.display(), "render isolate ready");

        while let Some(job) = queue.recv().await {
            match job {
                Job::Inspect { entry, reply } => {
                    let result =
                        runtime::inspect_export(&mut isolate, &entry, config.timeout_ms).await;
                    forward_console(runtime::take_console(&mut isolate), "<module init>");
                    let _ = reply.send(result);
                }
                Job::Render {
                    entry,
                    params,
                    reply,
                } => {
                    let result =
                        runtime::execute_render(&mut isolate, &entry, &params, config.timeout_ms)
                            .await;
                    let route = params.get("route").and_then(Value::as_str).unwrap_or("");
                    forward_console(runtime::take_console(&mut isolate), route);
                    let _ = reply.send(result);
                }
            }
        }

        debug!("render isolate shutting down");
    });
}

fn forward_console(console: ConsoleOutput, route: &str) {
    if console.is_empty() {
        return;
    }
    for line in console.logs {
        debug!(target: "ssr_prerender::console", route, "{}", line);
    }
    for line in console.warns {
        warn!(target: "ssr_prerender::console", route, "{}", line);
    }
    for line in console.errors {
        error!(target: "ssr_prerender::console", route, "{}", line);
    }
}

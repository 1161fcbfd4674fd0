//! Render isolate - runs the compiled render bundle in a sandboxed V8 isolate.
//!
//! The isolate only provides what a server render bundle needs:
//! - console.log/info/debug/warn/error (captured per render, not printed)
//! - Module loading from the render bundle directory only
//! - No fs, net, env, or other system access
//!
//! Every call into the isolate is terminated once it runs past `timeout_ms` or
//! nears `max_heap_size`; either surfaces as an error for that call only.

use crate::loader::SandboxedLoader;
use crate::renderer::RenderValue;
use anyhow::{anyhow, Error};
use deno_core::{op2, JsRuntime, ModuleSpecifier, OpState, PollEventLoopOptions, RuntimeOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Console output captured while a render ran
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.warns.is_empty() && self.errors.is_empty()
    }
}

// ============================================================================
// Console Ops
// ============================================================================

#[op2(fast)]
fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

deno_core::extension!(
    prerender_runtime,
    ops = [op_console_log, op_console_warn, op_console_error],
    esm_entry_point = "ext:prerender_runtime/bootstrap.js",
    esm = ["ext:prerender_runtime/bootstrap.js" = "src/bootstrap.js"],
);

/// Configuration for the render isolate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsRendererConfig {
    /// Output directory of the render compilation (only this dir is loadable)
    pub bundle_dir: PathBuf,
    /// Maximum heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for a single render in milliseconds (default: 30000ms, None = unlimited)
    pub timeout_ms: Option<u64>,
}

impl Default for JsRendererConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("./build/render"),
            max_heap_size: Some(64 * 1024 * 1024),
            timeout_ms: Some(30_000),
        }
    }
}

/// Wire format of the bootstrap helpers. Exactly one field is set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Completion {
    html: Option<String>,
    type_of: Option<String>,
    error: Option<String>,
}

/// Set by the near-heap-limit callback when it terminated a script.
#[derive(Debug, Clone)]
struct HeapGuard {
    exceeded: Arc<AtomicBool>,
    limit: usize,
}

/// Create a sandboxed isolate for the render bundle
pub fn create_runtime(config: &JsRendererConfig) -> Result<JsRuntime, Error> {
    let loader = SandboxedLoader::new(&config.bundle_dir)?;

    let create_params = config
        .max_heap_size
        .map(|max_bytes| deno_core::v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![prerender_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    if let Some(limit) = config.max_heap_size {
        let guard = HeapGuard {
            exceeded: Arc::new(AtomicBool::new(false)),
            limit,
        };
        let exceeded = guard.exceeded.clone();
        let isolate_handle = runtime.v8_isolate().thread_safe_handle();

        // Terminate the running script and grant headroom so V8 can unwind
        // instead of aborting the process
        runtime.add_near_heap_limit_callback(move |current, initial| {
            warn!(
                current_mb = current / (1024 * 1024),
                initial_mb = initial / (1024 * 1024),
                "render isolate near heap limit, terminating"
            );
            exceeded.store(true, Ordering::SeqCst);
            isolate_handle.terminate_execution();
            current * 2
        });
        runtime.op_state().borrow_mut().put(guard);
    }

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());

    Ok(runtime)
}

/// `typeof` of the render export of `entry` (default export, else `render`).
///
/// Importing runs the module's top level, so it is bounded by `timeout_ms` and
/// the heap limit like a render.
pub async fn inspect_export(
    runtime: &mut JsRuntime,
    entry: &Path,
    timeout_ms: Option<u64>,
) -> Result<String, Error> {
    let specifier = module_specifier(entry)?;
    let code = format!(
        "globalThis.__prerender_inspect__({})",
        serde_json::to_string(specifier.as_str())?
    );

    match guarded_call(runtime, code, timeout_ms).await? {
        Completion {
            type_of: Some(type_name),
            ..
        } => Ok(type_name),
        Completion {
            error: Some(message),
            ..
        } => Err(anyhow!(message)),
        other => Err(anyhow!("Unexpected inspect completion: {:?}", other)),
    }
}

/// Call the render export of `entry` with `props`.
///
/// Errors thrown by the render function come back as `Err` carrying the JS
/// `String(error)` text.
pub async fn execute_render(
    runtime: &mut JsRuntime,
    entry: &Path,
    props: &serde_json::Value,
    timeout_ms: Option<u64>,
) -> Result<RenderValue, Error> {
    let specifier = module_specifier(entry)?;
    let code = format!(
        "globalThis.__prerender_render__({}, {})",
        serde_json::to_string(specifier.as_str())?,
        serde_json::to_string(props)?
    );

    match guarded_call(runtime, code, timeout_ms).await? {
        Completion {
            html: Some(html), ..
        } => Ok(RenderValue::Html(html)),
        Completion {
            type_of: Some(type_name),
            ..
        } => Ok(RenderValue::Other { type_name }),
        Completion {
            error: Some(message),
            ..
        } => Err(anyhow!(message)),
        other => Err(anyhow!("Unexpected render completion: {:?}", other)),
    }
}

/// [`call`] under the timeout watchdog and the heap guard.
///
/// A script terminated by either comes back as an error naming the limit, and
/// the isolate is made usable again for the next call.
async fn guarded_call(
    runtime: &mut JsRuntime,
    code: String,
    timeout_ms: Option<u64>,
) -> Result<Completion, Error> {
    let isolate_handle = runtime.v8_isolate().thread_safe_handle();
    let heap_guard = runtime.op_state().borrow().try_borrow::<HeapGuard>().cloned();
    let timed_out = Arc::new(AtomicBool::new(false));

    // Runs on the runtime's worker thread, the isolate thread is busy in V8
    let watchdog = timeout_ms.map(|ms| {
        let timed_out = timed_out.clone();
        let isolate_handle = isolate_handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            timed_out.store(true, Ordering::SeqCst);
            isolate_handle.terminate_execution();
        })
    });

    let result = call(runtime, code).await;
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    let heap_exceeded = heap_guard
        .as_ref()
        .is_some_and(|guard| guard.exceeded.swap(false, Ordering::SeqCst));
    let timed_out = timed_out.load(Ordering::SeqCst);
    if !heap_exceeded && !timed_out {
        return result;
    }

    // The isolate stays unusable until termination is cancelled
    isolate_handle.cancel_terminate_execution();
    if result.is_ok() {
        return result;
    }
    match (heap_guard, timeout_ms) {
        (Some(guard), _) if heap_exceeded => Err(anyhow!(
            "Render exceeded the heap limit of {}MB",
            guard.limit / (1024 * 1024)
        )),
        (_, Some(ms)) => Err(anyhow!("Render timed out after {}ms", ms)),
        _ => result,
    }
}

/// Drain the console output captured since the last call.
pub fn take_console(runtime: &mut JsRuntime) -> ConsoleOutput {
    let state = runtime.op_state();
    let mut state = state.borrow_mut();
    let output = std::mem::take(state.borrow_mut::<ConsoleOutput>());
    output
}

fn module_specifier(entry: &Path) -> Result<ModuleSpecifier, Error> {
    let entry_path = entry
        .canonicalize()
        .map_err(|e| anyhow!("Invalid render module '{}': {}", entry.display(), e))?;

    ModuleSpecifier::from_file_path(&entry_path)
        .map_err(|_| anyhow!("Failed to create module specifier for '{}'", entry_path.display()))
}

/// Run a bootstrap helper to completion and decode its JSON completion.
async fn call(runtime: &mut JsRuntime, code: String) -> Result<Completion, Error> {
    let global = runtime.execute_script("<prerender>", code)?;

    // Drives dynamic imports and the render promise
    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await?;

    let json = {
        let scope = &mut runtime.handle_scope();
        let local = deno_core::v8::Local::new(scope, &global);

        match deno_core::v8::Local::<deno_core::v8::Promise>::try_from(local) {
            Ok(promise) => match promise.state() {
                deno_core::v8::PromiseState::Fulfilled => {
                    promise.result(scope).to_rust_string_lossy(scope)
                }
                deno_core::v8::PromiseState::Rejected => {
                    let exception = promise.result(scope);
                    return Err(anyhow!("{}", exception.to_rust_string_lossy(scope)));
                }
                deno_core::v8::PromiseState::Pending => {
                    return Err(anyhow!("Render function returned unresolved promise"));
                }
            },
            Err(_) => local.to_rust_string_lossy(scope),
        }
    };

    serde_json::from_str(&json).map_err(|e| anyhow!("Malformed completion from render isolate: {}", e))
}

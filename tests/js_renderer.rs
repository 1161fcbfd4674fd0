//! End-to-end runs through the V8 render isolate.

use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use ssr_prerender::{
    BundleStats, DiskOutput, JsModuleEvaluator, JsRendererConfig, PrerenderError,
    PrerenderOptions, Prerenderer, RenderOutcome, RouteSpec,
};
use tempfile::{tempdir, TempDir};

struct Site {
    dir: TempDir,
}

impl Site {
    /// A build with `render.mjs` as the `main` render chunk.
    fn with_bundle(source: &str) -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("server/chunks")).unwrap();
        fs::write(dir.path().join("server/render.mjs"), source).unwrap();
        Self { dir }
    }

    fn with_chunk(self, name: &str, source: &str) -> Self {
        fs::write(self.dir.path().join("server/chunks").join(name), source).unwrap();
        self
    }

    fn bundle_dir(&self) -> PathBuf {
        self.dir.path().join("server")
    }

    fn page(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join("public").join(relative)).unwrap()
    }

    async fn prerenderer(&self, timeout_ms: Option<u64>) -> Prerenderer {
        self.configured(
            JsRendererConfig {
                timeout_ms,
                ..Default::default()
            },
            None,
        )
        .await
    }

    async fn configured(
        &self,
        renderer: JsRendererConfig,
        concurrency: Option<NonZeroUsize>,
    ) -> Prerenderer {
        let evaluator = JsModuleEvaluator::spawn(JsRendererConfig {
            bundle_dir: self.bundle_dir(),
            ..renderer
        })
        .await
        .unwrap();

        Prerenderer::new(
            PrerenderOptions {
                render_entry: "main".to_string(),
                render_directory: self.dir.path().join("public"),
                concurrency,
                ..Default::default()
            },
            BundleStats::from_json(
                r#"{"assetsByChunkName":{"main":["render.mjs","render.mjs.map"]}}"#,
            )
            .unwrap(),
            BundleStats::from_json(r#"{"publicPath":"/static/","assetsByChunkName":{"main":"main.js"}}"#)
                .unwrap(),
            evaluator,
            DiskOutput,
        )
    }
}

fn routes(json: &str) -> Vec<RouteSpec> {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn renders_default_export_per_route() {
    let site = Site::with_bundle(
        r#"
        export default async function render({ route, title, publicPath, clientAssets }) {
            const script = `${publicPath}${clientAssets.main}`;
            return `<title>${title ?? "untitled"}</title><main>${route}</main><script src="${script}"></script>`;
        }
        "#,
    );
    let prerenderer = site.prerenderer(None).await;

    let summary = prerenderer
        .run(&routes(r#"["/", {"route": "/about", "title": "About"}, "/feed.html"]"#))
        .await
        .unwrap();

    assert!(summary.is_clean());
    assert_eq!(
        site.page("about/index.html"),
        r#"<title>About</title><main>/about</main><script src="/static/main.js"></script>"#
    );
    assert_eq!(
        site.page("index.html"),
        r#"<title>untitled</title><main>/</main><script src="/static/main.js"></script>"#
    );
    assert!(site.page("feed.html").contains("<main>/feed.html</main>"));
}

#[tokio::test]
async fn falls_back_to_named_render_export_and_split_chunks() {
    let site = Site::with_bundle(
        r#"
        import { layout } from "./chunks/layout.js";
        export function render({ route }) {
            console.log("rendering", route);
            return layout(`<p>${route}</p>`);
        }
        "#,
    )
    .with_chunk(
        "layout.js",
        "export const layout = (body) => `<!doctype html><body>${body}</body>`;",
    );
    let prerenderer = site.prerenderer(None).await;

    prerenderer.run(&[RouteSpec::from("/docs")]).await.unwrap();

    assert_eq!(
        site.page("docs/index.html"),
        "<!doctype html><body><p>/docs</p></body>"
    );
}

#[tokio::test]
async fn thrown_error_becomes_page_content() {
    let site = Site::with_bundle(
        r#"
        export default function render({ route }) {
            if (route === "/broken") throw new Error("boom");
            return `<p>${route}</p>`;
        }
        "#,
    );
    let prerenderer = site.prerenderer(None).await;

    let summary = prerenderer
        .run(&routes(r#"["/broken", "/fine"]"#))
        .await
        .unwrap();

    assert_eq!(site.page("broken/index.html"), "Error: boom");
    assert_eq!(site.page("fine/index.html"), "<p>/fine</p>");
    let failed: Vec<_> = summary.diagnostics().map(|r| r.route.as_str()).collect();
    assert_eq!(failed, vec!["/broken"]);
}

#[tokio::test]
async fn non_string_result_aborts() {
    let site = Site::with_bundle("export default () => 42;");
    let prerenderer = site.prerenderer(None).await;

    let err = prerenderer.run(&[RouteSpec::from("/")]).await.unwrap_err();

    match err {
        PrerenderError::NonStringResult { received, .. } => assert_eq!(received, "number"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_function_export_is_rejected() {
    let site = Site::with_bundle("export default { title: 'not a renderer' };");
    let prerenderer = site.prerenderer(None).await;

    let err = prerenderer.run(&[RouteSpec::from("/")]).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Unable to find render function. File render.mjs. Received object."
    );
    assert!(!site.dir.path().join("public").exists());
}

#[tokio::test]
async fn module_outside_bundle_dir_fails_evaluation() {
    let site = Site::with_bundle(
        r#"
        import secret from "../secret.js";
        export default () => secret;
        "#,
    );
    fs::write(site.dir.path().join("secret.js"), "export default 'leak';").unwrap();
    let prerenderer = site.prerenderer(None).await;

    let err = prerenderer.run(&[RouteSpec::from("/")]).await.unwrap_err();

    assert!(matches!(err, PrerenderError::Evaluate { .. }), "{err}");
}

#[tokio::test]
async fn prototype_keys_in_route_are_a_render_diagnostic() {
    let site = Site::with_bundle("export default ({ route }) => route;");
    let prerenderer = site.prerenderer(None).await;

    let summary = prerenderer
        .run(&routes(r#"[{"route": "/x", "meta": {"__proto__": {"admin": true}}}]"#))
        .await
        .unwrap();

    assert!(matches!(
        summary.routes[0].outcome,
        RenderOutcome::Diagnostic { .. }
    ));
    assert_eq!(
        site.page("x/index.html"),
        "Forbidden key in render params: params.meta.__proto__"
    );
}

#[tokio::test]
async fn runaway_render_times_out() {
    let site = Site::with_bundle("export default () => { while (true) {} };");
    let prerenderer = site.prerenderer(Some(200)).await;

    let summary = prerenderer.run(&[RouteSpec::from("/spin")]).await.unwrap();

    assert_eq!(
        summary.routes[0].outcome,
        RenderOutcome::Diagnostic {
            message: "Render timed out after 200ms".to_string()
        }
    );
    assert_eq!(site.page("spin/index.html"), "Render timed out after 200ms");
}

#[tokio::test]
async fn isolate_recovers_after_timeout() {
    let site = Site::with_bundle(
        r#"
        export default ({ route }) => {
            if (route === "/spin") while (true) {}
            return `<p>${route}</p>`;
        };
        "#,
    );
    let prerenderer = site
        .configured(
            JsRendererConfig {
                timeout_ms: Some(200),
                ..Default::default()
            },
            NonZeroUsize::new(1),
        )
        .await;

    let summary = prerenderer
        .run(&routes(r#"["/spin", "/ok"]"#))
        .await
        .unwrap();

    assert_eq!(
        summary.routes[0].outcome,
        RenderOutcome::Diagnostic {
            message: "Render timed out after 200ms".to_string()
        }
    );
    assert_eq!(summary.routes[1].outcome, RenderOutcome::Rendered);
    assert_eq!(site.page("ok/index.html"), "<p>/ok</p>");
}

#[tokio::test]
async fn heap_exhaustion_is_a_route_diagnostic() {
    let site = Site::with_bundle(
        r#"
        export default ({ route }) => {
            if (route === "/hog") {
                const hoard = [];
                while (true) hoard.push(new Array(1e5).fill("x"));
            }
            return `<p>${route}</p>`;
        };
        "#,
    );
    let prerenderer = site
        .configured(
            JsRendererConfig {
                max_heap_size: Some(32 * 1024 * 1024),
                ..Default::default()
            },
            NonZeroUsize::new(1),
        )
        .await;

    let summary = prerenderer
        .run(&routes(r#"["/hog", "/ok"]"#))
        .await
        .unwrap();

    match &summary.routes[0].outcome {
        RenderOutcome::Diagnostic { message } => {
            assert_eq!(message, "Render exceeded the heap limit of 32MB")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(summary.routes[1].outcome, RenderOutcome::Rendered);
    assert_eq!(site.page("ok/index.html"), "<p>/ok</p>");
}

#[tokio::test]
async fn endless_module_body_times_out_during_evaluation() {
    let site = Site::with_bundle(
        r#"
        while (true) {}
        export default () => "unreachable";
        "#,
    );
    let prerenderer = site.prerenderer(Some(200)).await;

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        prerenderer.run(&[RouteSpec::from("/")]),
    )
    .await
    .expect("evaluation should be terminated by the render timeout");

    match result {
        Err(PrerenderError::Evaluate { source, .. }) => {
            assert_eq!(source.to_string(), "Render timed out after 200ms")
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!site.dir.path().join("public").exists());
}

#[tokio::test]
async fn missing_bundle_dir_fails_to_start() {
    let dir = tempdir().unwrap();
    let result = JsModuleEvaluator::spawn(JsRendererConfig {
        bundle_dir: dir.path().join("nope"),
        ..Default::default()
    })
    .await;

    let err = result.err().expect("spawn should fail");
    assert!(err.to_string().contains("not accessible"));
}

//! Development HTTP server.
//!
//! Serves pages rendered from templates with live reload. Two modes:
//!
//! - *convention* mode renders a `pages/` tree composed with layouts and
//!   partials;
//! - *context* mode renders the launcher-supplied render context (entry
//!   file + shared files) and swaps discovered page templates per URL.
//!
//! Shared state is held as immutable snapshots behind reader-writer locks;
//! the watcher thread swaps fresh snapshots and then notifies the SSE
//! reload channel, so request handlers only ever clone an `Arc`.

pub mod context;
pub mod fixtures;
pub mod nav;
pub mod reload;
pub mod watch;

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json, json};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::services::ServeDir;

use crate::config::{ENV_PREFIX, ServeConfig};
use crate::log;
use crate::render::base_name;
use crate::template::TemplateSet;
use crate::utils::text::env_map;
use context::ContextModel;
use fixtures::strip_template_context;
use nav::NavTree;
use reload::ReloadHub;

/// Client script injected into every rendered page.
const RELOAD_SCRIPT: &str = r#"<script>
(function() {
  const source = new EventSource('/__reload');
  source.onmessage = function(e) {
    if (e.data === 'reload') {
      window.location.reload();
    }
  };
  source.onerror = function() {
    setTimeout(function() {
      window.location.reload();
    }, 1000);
  };
})();
</script>"#;

/// Shared server state: configuration plus the rebuildable snapshots.
pub struct ServerState {
    pub cfg: ServeConfig,
    pub context_mode: bool,
    pub hub: ReloadHub,
    nav: RwLock<Arc<NavTree>>,
    context: RwLock<Arc<ContextModel>>,
    context_data: RwLock<Arc<Map<String, Json>>>,
}

impl ServerState {
    pub fn new(cfg: ServeConfig) -> Arc<Self> {
        let context_mode = cfg.context_mode();

        let state = Self {
            context_mode,
            nav: RwLock::new(Arc::new(NavTree::default())),
            context: RwLock::new(Arc::new(ContextModel::default())),
            context_data: RwLock::new(Arc::new(Map::new())),
            hub: ReloadHub::new(),
            cfg,
        };

        if context_mode {
            log!("serve"; "running in context mode (launcher render context)");
            state.rebuild_context();
            state.reload_context_data();
        } else {
            log!("serve"; "running in convention mode (pages/layouts/partials)");
            state.rebuild_nav();
        }
        Arc::new(state)
    }

    pub fn nav_snapshot(&self) -> Arc<NavTree> {
        self.nav.read().clone()
    }

    pub fn context_snapshot(&self) -> Arc<ContextModel> {
        self.context.read().clone()
    }

    pub fn context_data_snapshot(&self) -> Arc<Map<String, Json>> {
        self.context_data.read().clone()
    }

    /// Rebuild the convention-mode page tree and swap the snapshot.
    pub fn rebuild_nav(&self) {
        let tree = NavTree::build(&self.cfg.pages_dir, &self.cfg.index_file);
        *self.nav.write() = Arc::new(tree);
    }

    /// Re-classify and re-discover the context model and swap the snapshot.
    pub fn rebuild_context(&self) {
        let Some(entry) = &self.cfg.entry_file else {
            return;
        };
        let model = ContextModel::build(
            entry,
            &self.cfg.context_files,
            self.cfg.data_dir.as_deref(),
        );
        *self.context.write() = Arc::new(model);
    }

    /// Re-read the linked (or auto-discovered) context fixture.
    pub fn reload_context_data(&self) {
        let data = fixtures::discover_context_data(
            self.cfg.data_file.as_deref(),
            self.cfg.data_dir.as_deref(),
            self.cfg.entry_file.as_deref(),
        );
        *self.context_data.write() = Arc::new(data);
    }
}

/// Run the server: bind with port fallback, report readiness, serve.
pub async fn run(cfg: ServeConfig) -> Result<()> {
    let state = ServerState::new(cfg);

    match watch::spawn(state.clone()) {
        Ok(()) => log!("watch"; "watching for file changes"),
        Err(err) => log!("watch"; "file watcher not available: {err}"),
    }

    let listener = bind_with_fallback(state.cfg.port).await?;
    let port = listener.local_addr()?.port();

    // The launcher parses this exact line to learn the effective port.
    println!("SERVE_READY|port={port}");
    if port != state.cfg.port {
        log!("serve"; "port {} was busy, using {port}", state.cfg.port);
    }
    log!("serve"; "ready at http://localhost:{port}");

    let app = router(state);
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}

/// Try the configured port, then the next ten, then an OS-assigned port.
async fn bind_with_fallback(port: u16) -> Result<TcpListener> {
    for candidate in port..=port.saturating_add(10) {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", candidate)).await {
            return Ok(listener);
        }
    }
    TcpListener::bind(("127.0.0.1", 0)).await.with_context(|| {
        format!("no available port found (tried {port}-{} and OS assignment)", port.saturating_add(10))
    })
}

fn router(state: Arc<ServerState>) -> Router {
    let mut router = Router::new()
        .route("/favicon.ico", any(|| async { StatusCode::NOT_FOUND }))
        .route("/__reload", any(sse_handler));

    // Static roots: content root (context mode) or the configured static
    // dir (convention mode), both under /static/.
    if state.context_mode {
        if let Some(root) = state.cfg.content_root.as_ref().filter(|r| r.is_dir()) {
            log!("serve"; "serving /static/ from {}", root.display());
            router = router.nest_service("/static", ServeDir::new(root));
        }
        // An assets/ directory next to the entry file handles relative
        // asset references in templates.
        if let Some(entry) = &state.cfg.entry_file {
            let assets = entry.parent().unwrap_or(Path::new(".")).join("assets");
            if assets.is_dir() {
                log!("serve"; "serving /assets/ from {}", assets.display());
                router = router.nest_service("/assets", ServeDir::new(assets));
            }
        }
    } else if state.cfg.static_dir.is_dir() {
        log!("serve"; "serving /static/ from {}", state.cfg.static_dir.display());
        router = router.nest_service("/static", ServeDir::new(&state.cfg.static_dir));
    }

    router.fallback(page_handler).with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn sse_handler(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let inbox = state.hub.subscribe();
    let connected = tokio_stream::once(Ok(SseEvent::default().data("connected")));
    let reloads = ReceiverStream::new(inbox).map(|()| Ok(SseEvent::default().data("reload")));
    Sse::new(connected.chain(reloads))
}

/// Render failures surfaced by the page pipeline.
#[derive(Debug)]
enum PageError {
    NotFound,
    Internal(String),
}

async fn page_handler(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    let url_path = uri.path().to_string();
    log!("serve"; "GET {url_path}");

    let rendered = if state.context_mode {
        render_context_page(&state, &url_path)
    } else {
        render_convention_page(&state, &url_path)
    };

    match rendered {
        Ok(html) => {
            let html = inject_live_reload(&html);
            (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                html,
            )
                .into_response()
        }
        Err(PageError::NotFound) => (StatusCode::NOT_FOUND, "404 page not found").into_response(),
        Err(PageError::Internal(message)) => {
            log!("error"; "{message}");
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
    }
}

// ============================================================================
// Convention-mode rendering
// ============================================================================

fn render_convention_page(state: &ServerState, url_path: &str) -> Result<String, PageError> {
    let nav = state.nav_snapshot();
    let found = nav.find(url_path);

    let (template_file, slug, page_idx) = match found {
        Some((idx, slug)) => match nav.page(idx).file.clone() {
            Some(file) => (file, slug, Some(idx)),
            None => {
                // Directory node without an index file: fall through to
                // direct resolution.
                match resolve_template_path(&state.cfg, url_path) {
                    Some(file) => (file, slug, Some(idx)),
                    None => return Err(PageError::NotFound),
                }
            }
        },
        None => match resolve_template_path(&state.cfg, url_path) {
            Some(file) => (file, String::new(), None),
            None => return Err(PageError::NotFound),
        },
    };

    if !template_file.is_file() {
        return Err(PageError::NotFound);
    }

    let mut set = TemplateSet::new();
    for file in html_files(&state.cfg.layouts_dir) {
        set.parse_file(&file)
            .map_err(|e| PageError::Internal(format!("template error: {e}")))?;
    }
    for file in html_files(&state.cfg.partials_dir) {
        set.parse_file(&file)
            .map_err(|e| PageError::Internal(format!("template error: {e}")))?;
    }
    set.parse_file(&template_file)
        .map_err(|e| PageError::Internal(format!("template error: {e}")))?;

    // Render data: page, site tree, projected env, and per-page data.
    let (mut page_json, mut data) = match page_idx {
        Some(idx) => (nav.page_json(idx), nav.page(idx).data.clone()),
        None => (
            json!({
                "Path": url_path,
                "Title": "",
                "Order": 0,
                "Hidden": false,
                "Nav": null,
                "Children": [],
                "Data": {},
            }),
            Map::new(),
        ),
    };

    if !slug.is_empty()
        && let Some(slug_data) = load_slug_data(&template_file, &slug)
    {
        if let Some(title) = slug_data.get("title").and_then(Json::as_str)
            && let Some(obj) = page_json.as_object_mut()
        {
            obj.insert("Title".to_string(), Json::String(title.to_string()));
        }
        for (k, v) in slug_data {
            data.insert(k, v);
        }
    }

    let render_data = json!({
        "Page": page_json,
        "Site": nav.site_json(),
        "Env": env_map(ENV_PREFIX),
        "Dev": true,
        "Slug": slug,
        "Path": url_path,
        "Data": data,
    });

    let page_name = base_name(&template_file);
    match resolve_layout_name(&state.cfg) {
        Some(layout) => match set.execute(&layout, &render_data) {
            Ok(html) => Ok(html),
            Err(err) => {
                log!("serve"; "layout {layout:?} failed, rendering page directly: {err}");
                set.execute(&page_name, &render_data)
                    .map_err(|e| PageError::Internal(format!("render error: {e}")))
            }
        },
        None => set
            .execute(&page_name, &render_data)
            .map_err(|e| PageError::Internal(format!("render error: {e}"))),
    }
}

/// Direct filesystem resolution when the nav tree has no match: exact file,
/// nested index, then a dynamic-segment file in the parent directory.
fn resolve_template_path(cfg: &ServeConfig, url_path: &str) -> Option<PathBuf> {
    let clean = url_path.trim_matches('/');
    if clean.is_empty() {
        if cfg.index_file.is_empty() {
            return None;
        }
        let index = cfg.pages_dir.join(&cfg.index_file);
        return index.is_file().then_some(index);
    }

    let exact = cfg.pages_dir.join(format!("{clean}.html"));
    if exact.is_file() {
        return Some(exact);
    }

    let nested_index = cfg.pages_dir.join(clean).join("index.html");
    if nested_index.is_file() {
        return Some(nested_index);
    }

    let parent = match Path::new(clean).parent() {
        Some(p) => cfg.pages_dir.join(p),
        None => cfg.pages_dir.clone(),
    };
    let mut entries: Vec<PathBuf> = std::fs::read_dir(parent).ok()?.flatten().map(|e| e.path()).collect();
    entries.sort();
    entries.into_iter().find(|p| {
        p.is_file()
            && p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('_') && n.ends_with(".html"))
    })
}

/// The layout to execute: the configured file when present, else the first
/// `.html` in the layouts directory.
fn resolve_layout_name(cfg: &ServeConfig) -> Option<String> {
    if !cfg.layouts_dir.is_dir() {
        return None;
    }
    if !cfg.layout_file.is_empty() && cfg.layouts_dir.join(&cfg.layout_file).is_file() {
        return Some(cfg.layout_file.clone());
    }
    html_files(&cfg.layouts_dir)
        .first()
        .map(|p| base_name(p))
}

fn html_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("html"))
        .collect();
    files.sort();
    files
}

/// Data overlay for a captured dynamic slug: `<dir>/data/<slug>.json`, then
/// `<dir>/<slug>.json`.
fn load_slug_data(template_file: &Path, slug: &str) -> Option<Map<String, Json>> {
    let dir = template_file.parent()?;
    for candidate in [
        dir.join("data").join(format!("{slug}.json")),
        dir.join(format!("{slug}.json")),
    ] {
        if let Some(map) = fixtures::load_json_map(&candidate) {
            return Some(map);
        }
    }
    None
}

// ============================================================================
// Context-mode rendering
// ============================================================================

fn render_context_page(state: &ServerState, url_path: &str) -> Result<String, PageError> {
    let model = state.context_snapshot();

    let page = match model.find_page(url_path) {
        Some(page) => Some(page.clone()),
        None if url_path == "/" || url_path.is_empty() => model.root_fallback().cloned(),
        None => return Err(PageError::NotFound),
    };

    let mut set = TemplateSet::new();
    for shared in &model.shared {
        if !shared.is_file() {
            log!("serve"; "shared file not found: {}", shared.display());
            continue;
        }
        set.parse_file(shared).map_err(|e| {
            PageError::Internal(format!("template error in {}: {e}", base_name(shared)))
        })?;
    }
    if let Some(page) = &page {
        set.parse_file(&page.file).map_err(|e| {
            PageError::Internal(format!("template error in {}: {e}", base_name(&page.file)))
        })?;
    }

    // Layer the shared context data under the per-page fixture data,
    // omitting the metadata side-channel from both.
    let mut data = state.context_data_snapshot().as_ref().clone();
    strip_template_context(&mut data);
    if let Some(page) = &page
        && let Some(data_file) = &page.data_file
        && let Some(mut page_data) = fixtures::load_json_map(data_file)
    {
        strip_template_context(&mut page_data);
        for (k, v) in page_data {
            data.insert(k, v);
        }
    }

    data.insert("_pages".to_string(), Json::Array(model.nav_data(url_path)));
    data.insert(
        "_currentPath".to_string(),
        Json::String(url_path.to_string()),
    );

    let entry = state
        .cfg
        .entry_file
        .as_ref()
        .ok_or_else(|| PageError::Internal("no entry file configured".to_string()))?;
    set.execute(&base_name(entry), &Json::Object(data))
        .map_err(|e| PageError::Internal(format!("render error: {e}")))
}

// ============================================================================
// Live reload injection
// ============================================================================

/// Inject the reload client just before the closing `</body>` tag, or
/// append it when the document has none.
fn inject_live_reload(html: &str) -> String {
    let lowered = html.to_ascii_lowercase();
    match lowered.rfind("</body>") {
        Some(idx) => format!("{}{}\n{}", &html[..idx], RELOAD_SCRIPT, &html[idx..]),
        None => format!("{html}{RELOAD_SCRIPT}"),
    }
}

//! `weft dev` command implementation.
//!
//! Builds once, then rebuilds on file changes and serves the output
//! directory. Browsers connected to `/__weft/ws` reload after every
//! successful rebuild.
//!
//! ```text
//! notify ─▶ mpsc ─▶ RebuildScheduler ─▶ DevOrchestrator ─▶ broadcast ─▶ /__weft/ws
//!                   (debounce, single flight)  (invalidate, build, write)
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use weft_core::bundler::inject_before;
use weft_core::dev::{watch_sources, DevEvent, DevOrchestrator, RebuildScheduler};
use weft_core::{Bundler, Config};

const WS_PATH: &str = "/__weft/ws";
const CLIENT_PATH: &str = "/__weft/client.js";

/// Shared state of the server.
struct DevState {
    orchestrator: Arc<DevOrchestrator>,
    out_dir: PathBuf,
    html_file: String,
    live_reload: bool,
}

type AppState = Arc<DevState>;

/// Run the dev server until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let server = config.dev_server.clone();
    let bundler = Bundler::new(config).into_diagnostic()?;
    let root = bundler.config().root.clone();
    let out_dir = bundler.config().out_dir();
    let html_file = bundler.config().html.filename.clone();

    let orchestrator = Arc::new(DevOrchestrator::new(bundler));
    {
        let orchestrator = Arc::clone(&orchestrator);
        match tokio::task::spawn_blocking(move || orchestrator.initial_build())
            .await
            .into_diagnostic()?
        {
            Ok(result) => tracing::info!(
                modules = result.graph.len(),
                files = result.outputs.len(),
                "initial build finished"
            ),
            // Keep serving; the next change retries.
            Err(err) => tracing::error!(code = err.code(), "initial build failed: {err}"),
        }
    }

    let (change_tx, change_rx) = mpsc::channel::<Vec<PathBuf>>(64);
    let _watcher = watch_sources(&root, &out_dir, change_tx).into_diagnostic()?;
    let scheduler = RebuildScheduler::new(
        Arc::clone(&orchestrator),
        Duration::from_millis(server.debounce_ms),
    );
    tokio::spawn(scheduler.run(change_rx));

    let state = Arc::new(DevState {
        orchestrator,
        out_dir: out_dir.clone(),
        html_file,
        live_reload: server.live_reload,
    });

    let mut app = Router::new()
        .route("/", get(serve_document))
        .route(&format!("/{}", state.html_file), get(serve_document))
        .route(WS_PATH, get(reload_websocket))
        .route(CLIENT_PATH, get(serve_client))
        .fallback_service(ServeDir::new(&out_dir))
        .with_state(state);
    if server.compress {
        app = app.layer(CompressionLayer::new());
    }

    let host = if server.host == "localhost" {
        "127.0.0.1"
    } else {
        server.host.as_str()
    };
    let addr: SocketAddr = format!("{host}:{}", server.port)
        .parse()
        .into_diagnostic()?;

    println!();
    println!("  Dev server running at http://{}:{}", server.host, server.port);
    println!("  Serving {}", out_dir.display());
    if server.live_reload {
        println!("  Live reload enabled");
    }
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

/// Serve the host document, with the reload client injected when enabled.
async fn serve_document(State(state): State<AppState>) -> Response {
    let path = state.out_dir.join(&state.html_file);
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => {
            let html = if state.live_reload {
                let tag = format!("<script src=\"{CLIENT_PATH}\"></script>");
                inject_before(&html, "</body>", &tag)
            } else {
                html
            };
            Html(html).into_response()
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "No build output yet; check the terminal for build errors.",
        )
            .into_response(),
    }
}

/// Serve the live-reload client at `/__weft/client.js`.
async fn serve_client() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        client_script(),
    )
}

fn client_script() -> String {
    format!(
        r#"(function () {{
  var url = (location.protocol === "https:" ? "wss://" : "ws://") + location.host + "{WS_PATH}";
  function connect() {{
    var socket = new WebSocket(url);
    socket.onmessage = function (event) {{
      var msg = JSON.parse(event.data);
      if (msg.type === "reload") location.reload();
      else if (msg.type === "error") console.error("[weft] " + msg.message);
    }};
    socket.onclose = function () {{ setTimeout(connect, 1000); }};
  }}
  connect();
}})();
"#
    )
}

async fn reload_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_reload_socket(socket, state))
}

/// Forward rebuild events to one client until either side goes away.
async fn handle_reload_socket(socket: WebSocket, state: AppState) {
    let mut events = state.orchestrator.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                if !state.live_reload && matches!(event, DevEvent::Reload { .. }) {
                    continue;
                }
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

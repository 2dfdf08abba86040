use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde_json::json;
use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use ephys_link_server::bindings::binding_for;
use ephys_link_server::handlers::{self, ClientSlot};
use ephys_link_server::options::{Options, NO_ESTOP};
use ephys_link_server::platform::Platform;
use ephys_link_server::session::SessionGate;
use ephys_link_server::estop;

const DEFAULT_PORT: u16 = 3000;
const RELEASES_URL: &str = "https://api.github.com/repos/VirtualBrainLab/ephys-link/tags";

// ─── Global startup time (for uptime reporting) ──────────────────────────────
static STARTUP_MS: AtomicU64 = AtomicU64::new(0);

// ─── Health Endpoint ─────────────────────────────────────────────────────────
// GET /health → { status, version, uptimeSecs }

async fn health_check() -> axum::Json<serde_json::Value> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let startup = STARTUP_MS.load(Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_ms - startup) / 1000 } else { 0 };
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
    }))
}

// ─── Startup helpers ─────────────────────────────────────────────────────────

fn preamble() {
    println!("Ephys Link v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("This is the Ephys Link server window.");
    println!("You may safely leave it running in the background.");
    println!("To stop it, close this window or press CTRL + C.");
    println!();
}

/// Split a tag like "v1.2.3" into comparable numeric parts.
fn version_parts(tag: &str) -> Vec<u64> {
    tag.trim_start_matches(['v', 'V'])
        .split('.')
        .filter_map(|part| part.parse().ok())
        .collect()
}

async fn check_for_updates() {
    let client = reqwest::Client::new();
    let response = client
        .get(RELEASES_URL)
        .header("User-Agent", "ephys-link-server")
        .timeout(Duration::from_secs(10))
        .send()
        .await;

    let tags: Vec<serde_json::Value> = match response {
        Ok(response) => match response.json().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Unable to check for updates ({e}). Use -i to disable checks.");
                return;
            }
        },
        Err(e) => {
            warn!("Unable to check for updates ({e}). Use -i to disable checks.");
            return;
        }
    };

    if let Some(latest) = tags.first().and_then(|tag| tag["name"].as_str()) {
        if version_parts(latest) > version_parts(env!("CARGO_PKG_VERSION")) {
            info!("Update available: {latest} (current: v{})", env!("CARGO_PKG_VERSION"));
            info!("Download at: https://github.com/VirtualBrainLab/ephys-link/releases/latest");
        }
    }
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let startup_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    STARTUP_MS.store(startup_ms, Ordering::Relaxed);

    let options = Options::parse();

    // Logging
    let default_filter = if options.debug {
        "ephys_link_server=debug,socketioxide=warn"
    } else {
        "ephys_link_server=info,socketioxide=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    preamble();

    if options.use_proxy {
        error!(
            "Proxy mode ({}) is not supported by this build; run without --use-proxy",
            options.proxy_address
        );
        std::process::exit(1);
    }
    if options.background {
        info!("Background mode: skipping configuration window");
    }
    if !options.ignore_updates {
        tokio::spawn(check_for_updates());
    }

    // Platform binding selection; an unrecognized type is a startup error.
    let binding = match binding_for(&options.platform_type, options.mpm_port) {
        Some(binding) => binding,
        None => {
            error!("Unrecognized platform type: {}", options.platform_type);
            std::process::exit(1);
        }
    };
    info!(
        "🔗 Ephys Link v{} starting — platform: {}",
        env!("CARGO_PKG_VERSION"),
        binding.display_name()
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let platform = Platform::new(binding, event_tx);
    let gate = Arc::new(SessionGate::new());
    let client: ClientSlot = Arc::new(RwLock::new(None));

    // Emergency-stop watcher
    if options.serial == NO_ESTOP {
        info!("Emergency stop disabled");
    } else {
        tokio::spawn(estop::start_estop_watcher(
            options.serial.clone(),
            platform.clone(),
        ));
    }

    // Build Socket.IO layer
    let (socket_layer, io) = SocketIo::builder().build_layer();

    handlers::spawn_event_pump(client.clone(), event_rx);

    let platform_sock = platform.clone();
    let gate_sock = gate.clone();
    let client_sock = client.clone();
    io.ns("/", move |socket: SocketRef| {
        let platform = platform_sock.clone();
        let gate = gate_sock.clone();
        let client = client_sock.clone();
        async move {
            handlers::on_connect(socket, platform, gate, client).await;
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(socket_layer)
        .layer(cors);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = format!("0.0.0.0:{port}");
    info!("🚀 Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("unable to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

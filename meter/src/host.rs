use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use serde_json::Value;

use powermeter_common::{
    respond, CalibrationProfile, Inbound, LatestPeriod, Level, PulseInput, PulseSampler,
    RuntimeConfig, WS_SUBPROTOCOL,
};

use crate::page;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_WS_PORT: u16 = 8081;
const DEFAULT_SIM_PERIOD_US: u32 = 40_000;
const SIM_PERIOD_STEP_US: u32 = 1_000;
const SAMPLER_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Stands in for the IR sensor: a roller whose period wanders in a small
/// sawtooth around `base_period_us`. A zero base simulates a stopped roller.
struct SimulatedRoller {
    base_period_us: u32,
    tick: u32,
}

impl SimulatedRoller {
    fn new(base_period_us: u32) -> Self {
        Self {
            base_period_us,
            tick: 0,
        }
    }

    fn current_period_us(&self) -> u32 {
        self.base_period_us
            .saturating_add((self.tick % 8) * SIM_PERIOD_STEP_US)
    }
}

impl PulseInput for SimulatedRoller {
    fn pulse_width(&mut self, level: Level, timeout_us: u32) -> Option<u32> {
        if self.base_period_us == 0 {
            thread::sleep(Duration::from_micros(timeout_us.into()));
            return None;
        }

        let period = self.current_period_us();
        let width = match level {
            Level::High => period / 2,
            Level::Low => {
                self.tick = self.tick.wrapping_add(1);
                period - period / 2
            }
        };

        if width > timeout_us {
            thread::sleep(Duration::from_micros(timeout_us.into()));
            return None;
        }

        thread::sleep(Duration::from_micros(width.into()));
        Some(width)
    }
}

#[derive(Clone)]
struct ConfigStore {
    runtime_path: Arc<PathBuf>,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("POWERMETER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.powermeter"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self, base: RuntimeConfig) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => layer_runtime_config(base, &raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(base),
            Err(err) => Err(err.into()),
        }
    }
}

/// Host builds bind unprivileged ports unless told otherwise.
fn host_defaults() -> RuntimeConfig {
    let mut runtime = RuntimeConfig::default();
    runtime.network.http_port = DEFAULT_HTTP_PORT;
    runtime.network.ws_port = DEFAULT_WS_PORT;
    runtime
}

/// Overlays a stored `runtime.json` onto `base`; keys the file leaves out
/// keep their base value.
fn layer_runtime_config(base: RuntimeConfig, raw: &[u8]) -> anyhow::Result<RuntimeConfig> {
    let overlay: Value = serde_json::from_slice(raw).context("runtime.json is not valid JSON")?;
    let mut merged = serde_json::to_value(base)?;
    merge_json(&mut merged, overlay);
    serde_json::from_value(merged).context("runtime.json does not match the runtime config")
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store
        .load_runtime_config(host_defaults())
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config from store: {err:#}");
            host_defaults()
        });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let http_port = runtime.network.http_port;
    let ws_port = runtime.network.ws_port;
    let sim_period_us = std::env::var("POWERMETER_SIM_PERIOD_US")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_SIM_PERIOD_US);

    info!(
        "profile `{}`, phase timeout {} us, policy {:?}",
        runtime.profile.as_str(),
        runtime.phase_timeout_us(),
        runtime.sampler.timeout_policy
    );

    let latest = LatestPeriod::new();
    spawn_sampler(&runtime, latest.clone(), SimulatedRoller::new(sim_period_us))?;

    info!(
        "service discovery for `{}.local` is only available in ESP32 builds",
        runtime.network.hostname
    );

    let page = Arc::new(page::render(
        runtime.profile,
        ws_port,
        runtime.monitor.sampling_interval_ms,
    ));
    let http_app = page_router(page);
    let ws_app = ws_router(latest);

    let http_addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let ws_addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], ws_port));
    let http_listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind page server at {http_addr}"))?;
    let ws_listener = TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("failed to bind websocket server at {ws_addr}"))?;

    info!("page server listening on http://{http_addr}");
    info!("websocket server listening on ws://{ws_addr}");

    tokio::try_join!(
        async {
            axum::serve(http_listener, http_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("page server failed")
        },
        async {
            axum::serve(ws_listener, ws_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("websocket server failed")
        },
    )?;

    info!("meter stopped");
    Ok(())
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(value) = env("POWERMETER_PROFILE") {
        match value.parse::<CalibrationProfile>() {
            Ok(profile) => runtime.profile = profile,
            Err(err) => warn!("ignoring POWERMETER_PROFILE: {err}"),
        }
    }

    for (key, port) in [
        ("POWERMETER_HTTP_PORT", &mut runtime.network.http_port),
        ("POWERMETER_WS_PORT", &mut runtime.network.ws_port),
    ] {
        let Some(value) = env(key) else {
            continue;
        };
        match value.trim().parse::<u16>() {
            Ok(parsed) => *port = parsed,
            Err(err) => warn!("ignoring {key}: {err}"),
        }
    }
}

fn spawn_sampler<P>(runtime: &RuntimeConfig, latest: LatestPeriod, input: P) -> anyhow::Result<()>
where
    P: PulseInput + Send + 'static,
{
    let mut sampler = PulseSampler::new(
        input,
        runtime.phase_timeout_us(),
        runtime.sampler.timeout_policy,
        latest,
    );

    thread::Builder::new()
        .name("pulse-sampler".to_string())
        .spawn(move || {
            let mut last_report = Instant::now();
            loop {
                let period = sampler.sample();
                if last_report.elapsed() >= SAMPLER_REPORT_INTERVAL {
                    let stats = sampler.stats();
                    info!(
                        "latest period {} us ({} samples, {} timed-out phases)",
                        period.as_micros(),
                        stats.samples,
                        stats.timed_out_phases
                    );
                    last_report = Instant::now();
                }
            }
        })
        .context("failed to spawn sampler thread")?;

    Ok(())
}

fn page_router(page: Arc<String>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .layer(TraceLayer::new_for_http())
        .with_state(page)
}

fn ws_router(latest: LatestPeriod) -> Router {
    Router::new()
        .route("/", get(handle_ws_upgrade))
        .with_state(latest)
}

async fn handle_index(State(page): State<Arc<String>>) -> impl IntoResponse {
    Html(page.as_str().to_owned())
}

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(latest): State<LatestPeriod>,
) -> impl IntoResponse {
    ws.protocols([WS_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_ws_client(socket, latest))
}

async fn handle_ws_client(mut socket: WebSocket, latest: LatestPeriod) {
    info!("websocket client connected");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket receive error: {err}");
                break;
            }
        };

        let inbound = match &message {
            Message::Text(text) => Inbound::Text(text.as_str()),
            Message::Binary(payload) => Inbound::Binary(payload.as_ref()),
            Message::Close(_) => Inbound::Closed,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let period = latest.load();
        let Some(reply) = respond(inbound, period) else {
            break;
        };

        match inbound {
            Inbound::Text(text) => debug!("period request `{text}` -> {} us", period.as_micros()),
            Inbound::Binary(payload) => debug!("echoing {} byte(s)", payload.len()),
            Inbound::Closed => {}
        }

        if let Err(err) = socket
            .send(Message::Binary(reply.as_bytes().to_vec().into()))
            .await
        {
            warn!("websocket send error: {err}");
            break;
        }
    }

    info!("websocket client disconnected");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

//! Pathfinder MPM HTTP controller simulator.
//!
//! Speaks the controller's wire protocol: `GET /` reports the probe array,
//! `PUT /` accepts `ProbeStepMode`, `ProbeMotion`, `ProbeInsertion`, and
//! `ProbeStop` commands keyed by the probe's index in the fixed id
//! alphabet. Probes move linearly at a step-mode-dependent rate; positions
//! are computed lazily from elapsed time, so the simulator has no tick
//! task.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use link_types::MPM_PROBE_IDS;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Stage speed in coarse step mode (mm/s).
pub const COARSE_RATE: f64 = 4.0;
/// Stage speed in fine step mode (mm/s).
pub const FINE_RATE: f64 = 0.5;

struct SimProbe {
    id: String,
    start: [f64; 3],
    target: [f64; 3],
    started: Instant,
    /// mm/s; zero means the stage is holding position.
    rate: f64,
    fine_step_mode: bool,
    polar: f64,
    pitch: f64,
    shank_orientation: f64,
    shank_count: u32,
}

impl SimProbe {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            start: [7.5, 7.5, 7.5],
            target: [7.5, 7.5, 7.5],
            started: Instant::now(),
            rate: 0.0,
            fine_step_mode: false,
            polar: 0.0,
            pitch: 30.0,
            shank_orientation: 0.0,
            shank_count: 1,
        }
    }

    fn position(&self, now: Instant) -> [f64; 3] {
        let distance = self
            .start
            .iter()
            .zip(self.target)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        if self.rate <= 0.0 || distance == 0.0 {
            return self.start;
        }
        let travelled = now.duration_since(self.started).as_secs_f64() * self.rate;
        let fraction = (travelled / distance).min(1.0);
        [
            self.start[0] + (self.target[0] - self.start[0]) * fraction,
            self.start[1] + (self.target[1] - self.start[1]) * fraction,
            self.start[2] + (self.target[2] - self.start[2]) * fraction,
        ]
    }

    fn freeze(&mut self, now: Instant) {
        let here = self.position(now);
        self.start = here;
        self.target = here;
        self.rate = 0.0;
    }

    fn begin_move(&mut self, now: Instant, target: [f64; 3], rate: f64) {
        self.start = self.position(now);
        self.target = target;
        self.started = now;
        self.rate = rate;
    }
}

pub struct Simulator {
    posterior_angle: f64,
    probes: Vec<SimProbe>,
}

impl Simulator {
    /// Seed `probe_count` probes with the first ids of the alphabet.
    pub fn new(probe_count: usize, posterior_angle: f64) -> Self {
        let probes = MPM_PROBE_IDS
            .iter()
            .take(probe_count.min(MPM_PROBE_IDS.len()))
            .map(|id| SimProbe::new(id))
            .collect();
        Self {
            posterior_angle,
            probes,
        }
    }

    fn snapshot(&self, now: Instant) -> Value {
        let probe_array: Vec<Value> = self
            .probes
            .iter()
            .map(|probe| {
                let [x, y, z] = probe.position(now);
                json!({
                    "Id": probe.id,
                    "Stage_X": x,
                    "Stage_Y": y,
                    "Stage_Z": z,
                    "Polar": probe.polar,
                    "Pitch": probe.pitch,
                    "ShankOrientation": probe.shank_orientation,
                    "ShankCount": probe.shank_count,
                })
            })
            .collect();
        json!({
            "PosteriorAngle": self.posterior_angle,
            "ProbeArray": probe_array,
        })
    }

    fn probe_mut(&mut self, command: &Value) -> Option<&mut SimProbe> {
        let index = command["Probe"].as_u64()? as usize;
        let id = MPM_PROBE_IDS.get(index)?;
        self.probes.iter_mut().find(|probe| probe.id == *id)
    }

    fn apply(&mut self, command: &Value, now: Instant) {
        match command["PutId"].as_str() {
            Some("ProbeStepMode") => {
                let fine = command["StepMode"].as_i64().unwrap_or(0) == 1;
                if let Some(probe) = self.probe_mut(command) {
                    probe.fine_step_mode = fine;
                }
            }
            Some("ProbeMotion") => {
                let target = [
                    command["X"].as_f64().unwrap_or(0.0),
                    command["Y"].as_f64().unwrap_or(0.0),
                    command["Z"].as_f64().unwrap_or(0.0),
                ];
                if let Some(probe) = self.probe_mut(command) {
                    let rate = if probe.fine_step_mode { FINE_RATE } else { COARSE_RATE };
                    probe.begin_move(now, target, rate);
                    debug!("probe {}: motion to {target:?} at {rate} mm/s", probe.id);
                }
            }
            Some("ProbeInsertion") => {
                let distance_mm = command["Distance"].as_f64().unwrap_or(0.0) / 1_000.0;
                let rate_mm_s = command["Rate"].as_f64().unwrap_or(0.0) / 60_000.0;
                if let Some(probe) = self.probe_mut(command) {
                    let here = probe.position(now);
                    let target = [here[0], here[1], here[2] - distance_mm];
                    probe.begin_move(now, target, rate_mm_s);
                    debug!("probe {}: insertion to Z {} at {rate_mm_s} mm/s", probe.id, target[2]);
                }
            }
            Some("ProbeStop") => {
                if let Some(probe) = self.probe_mut(command) {
                    probe.freeze(now);
                    debug!("probe {}: stopped", probe.id);
                }
            }
            other => warn!("Ignoring unknown PutId: {other:?}"),
        }
    }
}

pub type SharedSimulator = Arc<Mutex<Simulator>>;

pub fn shared(simulator: Simulator) -> SharedSimulator {
    Arc::new(Mutex::new(simulator))
}

// ── HTTP surface ──────────────────────────────────────────────────────────────

async fn get_state(State(simulator): State<SharedSimulator>) -> Json<Value> {
    Json(simulator.lock().await.snapshot(Instant::now()))
}

async fn put_command(State(simulator): State<SharedSimulator>, body: String) -> StatusCode {
    match serde_json::from_str::<Value>(&body) {
        Ok(command) => {
            simulator.lock().await.apply(&command, Instant::now());
            StatusCode::OK
        }
        Err(e) => {
            warn!("Malformed command: {e}");
            StatusCode::BAD_REQUEST
        }
    }
}

pub fn router(simulator: SharedSimulator) -> Router {
    Router::new()
        .route("/", get(get_state).put(put_command))
        .with_state(simulator)
}

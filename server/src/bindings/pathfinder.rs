//! New Scale Pathfinder MPM binding.
//!
//! Pathfinder exposes an HTTP controller: `GET /` reports every probe,
//! `PUT /` accepts movement commands keyed by the probe's index in the
//! fixed id alphabet. Moves are fire-and-forget on the controller side, so
//! completion is watched with the polling engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use link_types::{normalize_yaw, scalar_mm_to_um, Vec3, Vec4, MPM_PROBE_IDS};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::bindings::PlatformBinding;
use crate::error::{LinkError, LinkResult};
use crate::polling::{watch_scalar, watch_vector, Outcome, PollSettings};

const DIMENSIONS: Vec4 = Vec4::splat(15.0);
const MOVEMENT_TOLERANCE: f64 = 0.01;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const UNCHANGED_COUNTER_LIMIT: u32 = 10;

/// Above this speed (mm/s) the stage is driven in coarse step mode.
const COARSE_SPEED_THRESHOLD: f64 = 0.1;
/// Insertions are capped at this rate (µm/min) regardless of the request.
const INSERTION_SPEED_LIMIT: f64 = 9_000.0;

/// Controller step mode for a requested speed: 0 = coarse, 1 = fine.
/// Coarse engages strictly above the threshold.
fn step_mode(speed: f64) -> u8 {
    if speed > COARSE_SPEED_THRESHOLD {
        0
    } else {
        1
    }
}

// ── Controller wire format ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ControllerState {
    #[serde(rename = "PosteriorAngle", default)]
    posterior_angle: f64,
    #[serde(rename = "ProbeArray")]
    probe_array: Vec<ProbeData>,
}

#[derive(Debug, Deserialize)]
struct ProbeData {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Stage_X")]
    stage_x: f64,
    #[serde(rename = "Stage_Y")]
    stage_y: f64,
    #[serde(rename = "Stage_Z")]
    stage_z: f64,
    #[serde(rename = "Polar", default)]
    polar: f64,
    #[serde(rename = "Pitch", default)]
    pitch: f64,
    #[serde(rename = "ShankOrientation", default)]
    shank_orientation: f64,
    #[serde(rename = "ShankCount", default)]
    shank_count: u32,
}

// ── Binding ───────────────────────────────────────────────────────────────────

pub struct PathfinderBinding {
    url: String,
    client: reqwest::Client,
    /// Per-probe stop flags; the controller's ProbeStop command does not
    /// interrupt our watch loop on its own.
    stop_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl PathfinderBinding {
    pub fn new(port: u16) -> Self {
        Self::with_url(format!("http://localhost:{port}"))
    }

    pub fn with_url(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            stop_flags: Mutex::new(HashMap::new()),
        }
    }

    fn probe_index(&self, manipulator_id: &str) -> LinkResult<usize> {
        MPM_PROBE_IDS
            .iter()
            .position(|id| *id == manipulator_id)
            .ok_or_else(|| LinkError::InvalidId(manipulator_id.to_string()))
    }

    async fn stop_flag(&self, manipulator_id: &str) -> Arc<AtomicBool> {
        let mut flags = self.stop_flags.lock().await;
        flags
            .entry(manipulator_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    async fn query(&self) -> LinkResult<ControllerState> {
        let response = self.client.get(&self.url).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    async fn probe_data(&self, manipulator_id: &str) -> LinkResult<ProbeData> {
        self.query()
            .await?
            .probe_array
            .into_iter()
            .find(|probe| probe.id == manipulator_id)
            .ok_or_else(|| LinkError::NotConnected(manipulator_id.to_string()))
    }

    async fn put(&self, command: serde_json::Value) -> LinkResult<()> {
        self.client
            .put(&self.url)
            .json(&command)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: POLL_INTERVAL,
            unchanged_limit: UNCHANGED_COUNTER_LIMIT,
            tolerance: MOVEMENT_TOLERANCE,
        }
    }
}

#[async_trait]
impl PlatformBinding for PathfinderBinding {
    fn display_name(&self) -> &'static str {
        "Pathfinder MPM Control v2.8.8+"
    }

    fn cli_name(&self) -> &'static str {
        "pathfinder-mpm"
    }

    fn is_valid_id(&self, id: &str) -> bool {
        MPM_PROBE_IDS.contains(&id)
    }

    async fn get_manipulators(&self) -> LinkResult<Vec<String>> {
        Ok(self
            .query()
            .await?
            .probe_array
            .into_iter()
            .map(|probe| probe.id)
            .collect())
    }

    async fn get_axes_count(&self) -> LinkResult<u32> {
        Ok(3)
    }

    async fn get_dimensions(&self) -> LinkResult<Vec4> {
        Ok(DIMENSIONS)
    }

    async fn get_position(&self, manipulator_id: &str) -> LinkResult<Vec4> {
        let probe = self.probe_data(manipulator_id).await?;
        // Wait for the stage to stabilize before trusting the read.
        sleep(POLL_INTERVAL).await;
        Ok(Vec4::new(
            probe.stage_x,
            probe.stage_y,
            probe.stage_z,
            probe.stage_z,
        ))
    }

    async fn get_angles(&self, manipulator_id: &str) -> LinkResult<Vec3> {
        let state = self.query().await?;
        let probe = state
            .probe_array
            .iter()
            .find(|probe| probe.id == manipulator_id)
            .ok_or_else(|| LinkError::NotConnected(manipulator_id.to_string()))?;
        // Polar is reported relative to the rig; subtract the rig's
        // posterior angle to get yaw in the unified frame.
        Ok(Vec3::new(
            normalize_yaw(probe.polar - state.posterior_angle),
            probe.pitch,
            probe.shank_orientation,
        ))
    }

    async fn get_shank_count(&self, manipulator_id: &str) -> LinkResult<u32> {
        Ok(self.probe_data(manipulator_id).await?.shank_count)
    }

    fn movement_tolerance(&self) -> f64 {
        MOVEMENT_TOLERANCE
    }

    async fn set_position(
        &self,
        manipulator_id: &str,
        target: Vec4,
        speed: f64,
    ) -> LinkResult<Vec4> {
        let index = self.probe_index(manipulator_id)?;
        let stop_flag = self.stop_flag(manipulator_id).await;
        stop_flag.store(false, Ordering::SeqCst);

        self.put(json!({
            "PutId": "ProbeStepMode",
            "Probe": index,
            "StepMode": step_mode(speed),
        }))
        .await?;

        self.put(json!({
            "PutId": "ProbeMotion",
            "Probe": index,
            "Absolute": 1,
            "Stereotactic": 0,
            "AxisMask": 7,
            "X": target.x,
            "Y": target.y,
            "Z": target.z,
        }))
        .await?;

        let stopped = {
            let stop_flag = stop_flag.clone();
            move || stop_flag.load(Ordering::SeqCst)
        };
        let (_, outcome) = watch_vector(target, self.poll_settings(), stopped, move || {
            self.get_position(manipulator_id)
        })
        .await?;
        if outcome == Outcome::Stuck {
            debug!("probe {manipulator_id}: stopped advancing; reporting final position");
        }

        self.get_position(manipulator_id).await
    }

    async fn set_depth(&self, manipulator_id: &str, depth: f64, speed: f64) -> LinkResult<f64> {
        let index = self.probe_index(manipulator_id)?;
        let stop_flag = self.stop_flag(manipulator_id).await;
        stop_flag.store(false, Ordering::SeqCst);

        let current = self.get_position(manipulator_id).await?.w;
        self.put(json!({
            "PutId": "ProbeInsertion",
            "Probe": index,
            "Distance": scalar_mm_to_um(current - depth),
            "Rate": f64::min(scalar_mm_to_um(speed) * 60.0, INSERTION_SPEED_LIMIT),
        }))
        .await?;

        let stopped = {
            let stop_flag = stop_flag.clone();
            move || stop_flag.load(Ordering::SeqCst)
        };
        let (_, outcome) = watch_scalar(depth, self.poll_settings(), stopped, move || async move {
            self.get_position(manipulator_id).await.map(|position| position.w)
        })
        .await?;
        if outcome == Outcome::Stuck {
            debug!("probe {manipulator_id}: insertion stopped advancing; reporting final depth");
        }

        Ok(self.get_position(manipulator_id).await?.w)
    }

    async fn stop(&self, manipulator_id: &str) -> LinkResult<()> {
        let index = self.probe_index(manipulator_id)?;
        self.put(json!({
            "PutId": "ProbeStop",
            "Probe": index,
        }))
        .await?;
        self.stop_flag(manipulator_id).await.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn platform_to_unified(&self, platform: Vec4) -> Vec4 {
        // unified   <-  platform
        // +x        <-  -x
        // +y        <-  +z
        // +z        <-  +y
        // +w        <-  -w
        Vec4::new(
            DIMENSIONS.x - platform.x,
            platform.z,
            platform.y,
            DIMENSIONS.w - platform.w,
        )
    }

    fn unified_to_platform(&self, unified: Vec4) -> Vec4 {
        // platform  <-  unified
        // +x        <-  -x
        // +y        <-  +z
        // +z        <-  +y
        // +w        <-  -w
        Vec4::new(
            DIMENSIONS.x - unified.x,
            unified.z,
            unified.y,
            DIMENSIONS.w - unified.w,
        )
    }
}

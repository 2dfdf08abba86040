//! Platform bindings.
//!
//! A binding is the vendor-specific adapter between the broker and one
//! manipulator platform. The broker never sees vendor details: it holds an
//! `Arc<dyn PlatformBinding>` and speaks millimeters in platform space,
//! leaving axis conventions to the conversion pair.
//!
//! Two implementation families exist. Blocking-SDK platforms hand the
//! target to a native call and await its completion event ([`fake`] models
//! this family). Polling-HTTP platforms issue a begin-move request to an
//! external controller and watch progress with the polling engine
//! ([`pathfinder`]).

pub mod fake;
pub mod pathfinder;

use std::sync::Arc;

use async_trait::async_trait;
use link_types::{Vec3, Vec4};

use crate::error::LinkResult;

/// Capability set a manipulator platform must provide.
///
/// Binding calls may fail with a typed error; the platform facade guards
/// every call and folds failures into the response envelope, so bindings
/// do not need to catch their own errors.
#[async_trait]
pub trait PlatformBinding: Send + Sync {
    /// Full display name of the platform.
    fn display_name(&self) -> &'static str;

    /// Name used to select the platform with the `--type` flag.
    fn cli_name(&self) -> &'static str;

    /// Whether `id` belongs to the platform's manipulator id alphabet.
    /// This is a shape check only; connectivity is checked against
    /// [`get_manipulators`](Self::get_manipulators).
    fn is_valid_id(&self, id: &str) -> bool;

    /// Live list of manipulators currently attached to the platform.
    async fn get_manipulators(&self) -> LinkResult<Vec<String>>;

    /// Number of axes on the platform's manipulators (3 or 4).
    async fn get_axes_count(&self) -> LinkResult<u32>;

    /// Travel bounds of the manipulators (mm). Also the box used for the
    /// reflection half of the coordinate conversion pair.
    async fn get_dimensions(&self) -> LinkResult<Vec4>;

    /// Current position in platform space (mm). For 3-axis hardware, `w`
    /// mirrors the axis parallel to the probe.
    async fn get_position(&self, manipulator_id: &str) -> LinkResult<Vec4>;

    /// Current angles in (yaw, pitch, roll) degrees. Platforms without
    /// pose readout fail with an unsupported-operation error.
    async fn get_angles(&self, manipulator_id: &str) -> LinkResult<Vec3>;

    /// Number of shanks on the probe.
    async fn get_shank_count(&self, manipulator_id: &str) -> LinkResult<u32>;

    /// Distance within which a final position counts as "reached" and
    /// between polls counts as "not moving" (mm).
    fn movement_tolerance(&self) -> f64;

    /// Move to `target` (platform space, mm) at `speed` (mm/s) and return
    /// the final position once the platform reports the move settled.
    async fn set_position(&self, manipulator_id: &str, target: Vec4, speed: f64)
        -> LinkResult<Vec4>;

    /// Move the depth stage to `depth` (platform space, mm) at `speed`
    /// (mm/s) and return the final depth.
    async fn set_depth(&self, manipulator_id: &str, depth: f64, speed: f64) -> LinkResult<f64>;

    /// Stop a manipulator. Best-effort: in-flight moves settle on their
    /// own call path.
    async fn stop(&self, manipulator_id: &str) -> LinkResult<()>;

    /// Run the platform's calibration routine. Platforms that do not
    /// require calibration keep the backward-compatible bypass.
    async fn calibrate(&self, manipulator_id: &str) -> LinkResult<()> {
        let _ = manipulator_id;
        Ok(())
    }

    /// Axis permutation (plus optional per-axis reflection) from platform
    /// space into unified space. Exact inverse of
    /// [`unified_to_platform`](Self::unified_to_platform) on the
    /// dimension box.
    fn platform_to_unified(&self, platform: Vec4) -> Vec4;

    /// Axis permutation (plus optional per-axis reflection) from unified
    /// space into platform space.
    fn unified_to_platform(&self, unified: Vec4) -> Vec4;
}

/// Resolve a `--type` value to a binding instance.
pub fn binding_for(cli_name: &str, mpm_port: u16) -> Option<Arc<dyn PlatformBinding>> {
    match cli_name {
        "fake" => Some(Arc::new(fake::FakeBinding::new())),
        "pathfinder-mpm" => Some(Arc::new(pathfinder::PathfinderBinding::new(mpm_port))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_selection_by_cli_name() {
        assert_eq!(binding_for("fake", 8080).unwrap().cli_name(), "fake");
        assert_eq!(
            binding_for("pathfinder-mpm", 8080).unwrap().cli_name(),
            "pathfinder-mpm"
        );
        assert!(binding_for("ump-4", 8080).is_none());
    }
}

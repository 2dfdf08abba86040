//! # link-types
//!
//! Shared geometry and wire types for the Ephys Link manipulator broker.
//!
//! These types are used by:
//! - `server`: the Socket.IO motion broker and its platform bindings
//! - `mpm-simulator`: the Pathfinder MPM HTTP controller simulator
//! - Rust clients driving experiments against the broker
//!
//! ## Coordinate Conventions
//!
//! - **Unified space**: left-handed Cartesian frame shared by every
//!   platform, plus a depth axis `w` pointing from the base of the probe
//!   to its tip. Millimeters.
//! - **Platform space**: the vendor's native axis convention. Each binding
//!   converts with a pure axis permutation plus optional per-axis
//!   reflection `v -> dim - v`.
//! - Angles are `(yaw, pitch, roll)` in degrees, yaw normalized to
//!   `[0, 360)`.
//!
//! ## Wire Convention
//!
//! Every response carries an `error` string; `""` means success. Clients
//! branch on `error != ""` rather than on transport-level failures.

use serde::{Deserialize, Serialize};

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Four-axis position in millimeters: three translational axes plus the
/// depth axis `w` along the probe shaft.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec4 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Vec4 {
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Uniform box dimensions, e.g. a 20 mm travel range on every axis.
    pub const fn splat(v: f64) -> Self {
        Self::new(v, v, v, v)
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn is_finite(self) -> bool {
        self.to_array().iter().all(|a| a.is_finite())
    }

    /// True when every axis is within `tolerance` of `other`.
    pub fn within(self, other: Vec4, tolerance: f64) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// True when the three translational axes are within `tolerance` of
    /// `other`, ignoring depth. The Pathfinder move watch compares only
    /// the stage axes because `w` mirrors one of them.
    pub fn within_xyz(self, other: Vec4, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }

    /// True when every axis lies inside `[0, dim]` of the travel box.
    pub fn inside(self, dimensions: Vec4) -> bool {
        self.to_array()
            .iter()
            .zip(dimensions.to_array())
            .all(|(v, d)| (0.0..=d).contains(v))
    }

    pub fn mm_to_um(self) -> Vec4 {
        Vec4::new(
            self.x * 1_000.0,
            self.y * 1_000.0,
            self.z * 1_000.0,
            self.w * 1_000.0,
        )
    }

    pub fn um_to_mm(self) -> Vec4 {
        Vec4::new(
            self.x / 1_000.0,
            self.y / 1_000.0,
            self.z / 1_000.0,
            self.w / 1_000.0,
        )
    }
}

/// Manipulator pose in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// Rotation about the vertical axis, normalized to `[0, 360)`.
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Vec3 {
    pub const fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }
}

/// Fold an angle in degrees into `[0, 360)`.
pub fn normalize_yaw(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

// ── Unit conversions ──────────────────────────────────────────────────────────

pub fn scalar_mm_to_um(mm: f64) -> f64 {
    mm * 1_000.0
}

pub fn scalar_um_to_mm(um: f64) -> f64 {
    um / 1_000.0
}

// ── Pathfinder MPM sub-protocol ───────────────────────────────────────────────

/// Probe id alphabet of the Pathfinder MPM HTTP controller. Commands are
/// keyed by the index of the probe's id in this list.
pub const MPM_PROBE_IDS: [&str; 40] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z", "AA", "AB", "AC", "AD", "AE", "AF", "AG", "AH", "AI", "AJ",
    "AK", "AL", "AM", "AN",
];

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPositionRequest {
    pub manipulator_id: String,
    /// Target in unified space (mm).
    pub position: Vec4,
    /// Speed in mm/s.
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDepthRequest {
    pub manipulator_id: String,
    /// Target depth in unified space (mm).
    pub depth: f64,
    /// Speed in mm/s.
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsideBrainRequest {
    pub manipulator_id: String,
    pub inside: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCanWriteRequest {
    pub manipulator_id: String,
    pub can_write: bool,
    /// Lease duration in hours; `0` grants indefinitely.
    pub hours: f64,
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Static identity of the connected platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub name: String,
    pub cli_name: String,
    pub axes_count: u32,
    /// Travel bounds of every manipulator on the platform (mm).
    pub dimensions: Vec4,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetManipulatorsResponse {
    pub manipulators: Vec<String>,
    pub error: String,
}

impl GetManipulatorsResponse {
    pub fn ok(manipulators: Vec<String>) -> Self {
        Self {
            manipulators,
            error: String::new(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            manipulators: Vec::new(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionalResponse {
    pub position: Vec4,
    pub error: String,
}

impl PositionalResponse {
    pub fn ok(position: Vec4) -> Self {
        Self {
            position,
            error: String::new(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            position: Vec4::default(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AngularResponse {
    pub angles: Vec3,
    pub error: String,
}

impl AngularResponse {
    pub fn ok(angles: Vec3) -> Self {
        Self {
            angles,
            error: String::new(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            angles: Vec3::default(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShankCountResponse {
    pub shank_count: u32,
    pub error: String,
}

impl ShankCountResponse {
    pub fn ok(shank_count: u32) -> Self {
        Self {
            shank_count,
            error: String::new(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            shank_count: 0,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveToDepthResponse {
    pub depth: f64,
    pub error: String,
}

impl DriveToDepthResponse {
    pub fn ok(depth: f64) -> Self {
        Self {
            depth,
            error: String::new(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            depth: 0.0,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BooleanStateResponse {
    pub state: bool,
    pub error: String,
}

impl BooleanStateResponse {
    pub fn ok(state: bool) -> Self {
        Self {
            state,
            error: String::new(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            state: false,
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_respects_tolerance_on_every_axis() {
        let a = Vec4::new(1.0, 2.0, 3.0, 4.0);
        let b = Vec4::new(1.0005, 2.0, 3.0, 4.0);
        assert!(a.within(b, 0.001));
        assert!(!a.within(b, 0.0001));

        let far_depth = Vec4::new(1.0, 2.0, 3.0, 5.0);
        assert!(!a.within(far_depth, 0.001));
        assert!(a.within_xyz(far_depth, 0.001));
    }

    #[test]
    fn inside_is_a_closed_box() {
        let dims = Vec4::splat(20.0);
        assert!(Vec4::new(0.0, 20.0, 10.0, 0.0).inside(dims));
        assert!(!Vec4::new(-0.001, 0.0, 0.0, 0.0).inside(dims));
        assert!(!Vec4::new(0.0, 20.001, 0.0, 0.0).inside(dims));
    }

    #[test]
    fn unit_conversions_round_trip() {
        let v = Vec4::new(1.5, 0.0, 20.0, 3.25);
        assert_eq!(v.mm_to_um().um_to_mm(), v);
        assert_eq!(scalar_mm_to_um(9.0), 9_000.0);
        assert_eq!(scalar_um_to_mm(250.0), 0.25);
    }

    #[test]
    fn yaw_normalization_wraps_into_range() {
        assert_eq!(normalize_yaw(-90.0), 270.0);
        assert_eq!(normalize_yaw(360.0), 0.0);
        assert_eq!(normalize_yaw(725.0), 5.0);
    }

    #[test]
    fn wire_field_names_are_stable() {
        let request: SetPositionRequest = serde_json::from_value(serde_json::json!({
            "manipulator_id": "1",
            "position": { "x": 1.0, "y": 2.0, "z": 3.0, "w": 4.0 },
            "speed": 0.5,
        }))
        .unwrap();
        assert_eq!(request.manipulator_id, "1");
        assert_eq!(request.position, Vec4::new(1.0, 2.0, 3.0, 4.0));

        let response = serde_json::to_value(PositionalResponse::ok(request.position)).unwrap();
        assert_eq!(response["position"]["w"], 4.0);
        assert_eq!(response["error"], "");
    }

    #[test]
    fn empty_error_denotes_success() {
        assert_eq!(BooleanStateResponse::ok(true).error, "");
        let failed = BooleanStateResponse::err("Write disabled");
        assert!(!failed.state);
        assert_eq!(failed.error, "Write disabled");
    }
}

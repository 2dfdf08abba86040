//! Platform facade.
//!
//! Stateless over the registry: every operation looks up the proxy, walks
//! the admission gates, converts between unified and platform space at the
//! boundary, and folds any failure into the response DTO's `error` field.
//! Binding errors never escape as panics or raw errors; the transport
//! always gets a well-formed DTO.

use std::collections::HashMap;
use std::sync::Arc;

use link_types::{
    BooleanStateResponse, DriveToDepthResponse, GetManipulatorsResponse, PlatformInfo,
    PositionalResponse, SetCanWriteRequest, SetDepthRequest, SetPositionRequest,
    ShankCountResponse, Vec4,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::bindings::PlatformBinding;
use crate::error::{LinkError, LinkResult};
use crate::manipulator::{Manipulator, ServerEvent};

pub struct Platform {
    binding: Arc<dyn PlatformBinding>,
    manipulators: RwLock<HashMap<String, Arc<Manipulator>>>,
    events: UnboundedSender<ServerEvent>,
}

fn validate_speed(speed: f64) -> LinkResult<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(LinkError::InvalidRequest(format!(
            "speed must be positive, got {speed}"
        )))
    }
}

impl Platform {
    pub fn new(
        binding: Arc<dyn PlatformBinding>,
        events: UnboundedSender<ServerEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            binding,
            manipulators: RwLock::new(HashMap::new()),
            events,
        })
    }

    async fn proxy(&self, manipulator_id: &str) -> LinkResult<Arc<Manipulator>> {
        self.manipulators
            .read()
            .await
            .get(manipulator_id)
            .cloned()
            .ok_or_else(|| LinkError::NotRegistered(manipulator_id.to_string()))
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    pub async fn get_platform_info(&self) -> PlatformInfo {
        let axes_count = self.binding.get_axes_count().await.unwrap_or_else(|e| {
            warn!("Getting axes count: {e}");
            0
        });
        let dimensions = self.binding.get_dimensions().await.unwrap_or_else(|e| {
            warn!("Getting dimensions: {e}");
            Vec4::default()
        });
        PlatformInfo {
            name: self.binding.display_name().to_string(),
            cli_name: self.binding.cli_name().to_string(),
            axes_count,
            dimensions,
        }
    }

    pub async fn get_manipulators(&self) -> GetManipulatorsResponse {
        match self.binding.get_manipulators().await {
            Ok(manipulators) => GetManipulatorsResponse::ok(manipulators),
            Err(e) => {
                error!("Getting manipulators: {e}");
                GetManipulatorsResponse::err(e)
            }
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    pub async fn register_manipulator(&self, manipulator_id: &str) -> String {
        match self.try_register(manipulator_id).await {
            Ok(()) => {
                info!("Registered manipulator {manipulator_id}");
                String::new()
            }
            Err(e) => {
                error!("Registering manipulator {manipulator_id}: {e}");
                e.to_string()
            }
        }
    }

    async fn try_register(&self, manipulator_id: &str) -> LinkResult<()> {
        if self.manipulators.read().await.contains_key(manipulator_id) {
            return Err(LinkError::AlreadyRegistered(manipulator_id.to_string()));
        }
        if !self.binding.is_valid_id(manipulator_id) {
            return Err(LinkError::InvalidId(manipulator_id.to_string()));
        }
        let attached = self.binding.get_manipulators().await?;
        if !attached.iter().any(|id| id == manipulator_id) {
            return Err(LinkError::NotConnected(manipulator_id.to_string()));
        }

        let mut manipulators = self.manipulators.write().await;
        if manipulators.contains_key(manipulator_id) {
            return Err(LinkError::AlreadyRegistered(manipulator_id.to_string()));
        }
        manipulators.insert(manipulator_id.to_string(), Manipulator::new(manipulator_id));
        Ok(())
    }

    pub async fn unregister_manipulator(&self, manipulator_id: &str) -> String {
        match self.try_unregister(manipulator_id).await {
            Ok(()) => {
                info!("Unregistered manipulator {manipulator_id}");
                String::new()
            }
            Err(e) => {
                error!("Unregistering manipulator {manipulator_id}: {e}");
                e.to_string()
            }
        }
    }

    async fn try_unregister(&self, manipulator_id: &str) -> LinkResult<()> {
        let manipulator = self.proxy(manipulator_id).await?;
        manipulator.cancel_moves();
        if let Err(e) = self.binding.stop(manipulator_id).await {
            warn!("Stopping manipulator {manipulator_id} during unregister: {e}");
        }
        manipulator.clear_lease().await;
        self.manipulators.write().await.remove(manipulator_id);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub async fn get_position(&self, manipulator_id: &str) -> PositionalResponse {
        match self.try_get_position(manipulator_id).await {
            Ok(position) => PositionalResponse::ok(position),
            Err(e) => {
                error!("Getting position of manipulator {manipulator_id}: {e}");
                PositionalResponse::err(e)
            }
        }
    }

    async fn try_get_position(&self, manipulator_id: &str) -> LinkResult<Vec4> {
        self.proxy(manipulator_id).await?;
        let platform_position = self.binding.get_position(manipulator_id).await?;
        Ok(self.binding.platform_to_unified(platform_position))
    }

    pub async fn get_angles(&self, manipulator_id: &str) -> link_types::AngularResponse {
        let result = async {
            self.proxy(manipulator_id).await?;
            self.binding.get_angles(manipulator_id).await
        }
        .await;
        match result {
            Ok(angles) => link_types::AngularResponse::ok(angles),
            Err(e) => {
                error!("Getting angles of manipulator {manipulator_id}: {e}");
                link_types::AngularResponse::err(e)
            }
        }
    }

    pub async fn get_shank_count(&self, manipulator_id: &str) -> ShankCountResponse {
        let result = async {
            self.proxy(manipulator_id).await?;
            self.binding.get_shank_count(manipulator_id).await
        }
        .await;
        match result {
            Ok(shank_count) => ShankCountResponse::ok(shank_count),
            Err(e) => {
                error!("Getting shank count of manipulator {manipulator_id}: {e}");
                ShankCountResponse::err(e)
            }
        }
    }

    // ── Motion ────────────────────────────────────────────────────────────────

    pub async fn set_position(&self, request: SetPositionRequest) -> PositionalResponse {
        match self.try_set_position(&request).await {
            Ok(position) => PositionalResponse::ok(position),
            Err(e) => {
                error!(
                    "Moving manipulator {} to {:?}: {e}",
                    request.manipulator_id, request.position
                );
                PositionalResponse::err(e)
            }
        }
    }

    async fn try_set_position(&self, request: &SetPositionRequest) -> LinkResult<Vec4> {
        let manipulator = self.proxy(&request.manipulator_id).await?;
        if !manipulator.can_write().await {
            return Err(LinkError::WriteDisabled);
        }
        validate_speed(request.speed)?;
        if !request.position.is_finite() {
            return Err(LinkError::InvalidRequest(
                "target position must be finite".to_string(),
            ));
        }

        // Inside the brain only the depth axis of the target is effective,
        // so only it is bound-checked.
        let inside_brain = manipulator.inside_brain();
        let dimensions = self.binding.get_dimensions().await?;
        if inside_brain {
            if !(0.0..=dimensions.w).contains(&request.position.w) {
                return Err(LinkError::InvalidRequest(format!(
                    "target depth {} is outside the platform dimensions",
                    request.position.w
                )));
            }
        } else if !request.position.inside(dimensions) {
            return Err(LinkError::InvalidRequest(format!(
                "target {:?} is outside the platform dimensions {:?}",
                request.position, dimensions
            )));
        }

        let target_platform = self.binding.unified_to_platform(request.position);
        let guard = manipulator.admit_move().await?;

        let result = if inside_brain {
            // Inside the brain only the depth axis may move; route the
            // request through the depth stage and read back the pose.
            match self
                .binding
                .set_depth(&request.manipulator_id, target_platform.w, request.speed)
                .await
            {
                Ok(_) => self.binding.get_position(&request.manipulator_id).await,
                Err(e) => Err(e),
            }
        } else {
            self.binding
                .set_position(&request.manipulator_id, target_platform, request.speed)
                .await
        };

        let final_platform = guard.settle(result)?;
        Ok(self.binding.platform_to_unified(final_platform))
    }

    pub async fn set_depth(&self, request: SetDepthRequest) -> DriveToDepthResponse {
        match self.try_set_depth(&request).await {
            Ok(depth) => DriveToDepthResponse::ok(depth),
            Err(e) => {
                error!(
                    "Driving manipulator {} to depth {}: {e}",
                    request.manipulator_id, request.depth
                );
                DriveToDepthResponse::err(e)
            }
        }
    }

    async fn try_set_depth(&self, request: &SetDepthRequest) -> LinkResult<f64> {
        let manipulator = self.proxy(&request.manipulator_id).await?;
        if !manipulator.can_write().await {
            return Err(LinkError::WriteDisabled);
        }
        validate_speed(request.speed)?;
        let dimensions = self.binding.get_dimensions().await?;
        if !request.depth.is_finite() || !(0.0..=dimensions.w).contains(&request.depth) {
            return Err(LinkError::InvalidRequest(format!(
                "target depth {} is outside the platform dimensions",
                request.depth
            )));
        }

        let platform_depth = self
            .binding
            .unified_to_platform(Vec4::new(0.0, 0.0, 0.0, request.depth))
            .w;
        let guard = manipulator.admit_move().await?;
        let result = self
            .binding
            .set_depth(&request.manipulator_id, platform_depth, request.speed)
            .await;
        let final_platform_depth = guard.settle(result)?;
        Ok(self
            .binding
            .platform_to_unified(Vec4::new(0.0, 0.0, 0.0, final_platform_depth))
            .w)
    }

    // ── State flags ───────────────────────────────────────────────────────────

    pub async fn set_inside_brain(
        &self,
        request: link_types::InsideBrainRequest,
    ) -> BooleanStateResponse {
        match self.proxy(&request.manipulator_id).await {
            Ok(manipulator) => {
                manipulator.set_inside_brain(request.inside);
                info!(
                    "Manipulator {} inside-brain: {}",
                    request.manipulator_id, request.inside
                );
                BooleanStateResponse::ok(request.inside)
            }
            Err(e) => {
                error!(
                    "Setting inside-brain on manipulator {}: {e}",
                    request.manipulator_id
                );
                BooleanStateResponse::err(e)
            }
        }
    }

    pub async fn set_can_write(&self, request: SetCanWriteRequest) -> BooleanStateResponse {
        let result = async {
            if !request.hours.is_finite() || request.hours < 0.0 {
                return Err(LinkError::InvalidRequest(format!(
                    "lease hours must be non-negative, got {}",
                    request.hours
                )));
            }
            let manipulator = self.proxy(&request.manipulator_id).await?;
            manipulator
                .set_can_write(request.can_write, request.hours, self.events.clone())
                .await;
            Ok(request.can_write)
        }
        .await;
        match result {
            Ok(state) => {
                info!(
                    "Manipulator {} can-write: {state} (hours: {})",
                    request.manipulator_id, request.hours
                );
                BooleanStateResponse::ok(state)
            }
            Err(e) => {
                error!(
                    "Setting can-write on manipulator {}: {e}",
                    request.manipulator_id
                );
                BooleanStateResponse::err(e)
            }
        }
    }

    // ── Calibration ───────────────────────────────────────────────────────────

    pub async fn calibrate(&self, manipulator_id: &str) -> String {
        let result = async {
            let manipulator = self.proxy(manipulator_id).await?;
            if !manipulator.can_write().await {
                return Err(LinkError::WriteDisabled);
            }
            self.binding.calibrate(manipulator_id).await
        }
        .await;
        match result {
            Ok(()) => String::new(),
            Err(e) => {
                error!("Calibrating manipulator {manipulator_id}: {e}");
                e.to_string()
            }
        }
    }

    // ── Stop ──────────────────────────────────────────────────────────────────

    pub async fn stop(&self, manipulator_id: &str) -> String {
        match self.try_stop(manipulator_id).await {
            Ok(()) => String::new(),
            Err(e) => {
                error!("Stopping manipulator {manipulator_id}: {e}");
                e.to_string()
            }
        }
    }

    async fn try_stop(&self, manipulator_id: &str) -> LinkResult<()> {
        let manipulator = self.proxy(manipulator_id).await?;
        manipulator.cancel_moves();
        if let Err(e) = self.binding.stop(manipulator_id).await {
            warn!("Binding stop for manipulator {manipulator_id}: {e}");
        }
        manipulator.clear_lease().await;
        info!("Stopped manipulator {manipulator_id}");
        Ok(())
    }

    pub async fn stop_all(&self) -> BooleanStateResponse {
        let manipulators: Vec<Arc<Manipulator>> =
            self.manipulators.read().await.values().cloned().collect();

        // Invalidate every queue before touching hardware so no queued
        // move slips in between per-manipulator stops.
        for manipulator in &manipulators {
            manipulator.cancel_moves();
        }

        let mut all_stopped = true;
        for manipulator in &manipulators {
            if let Err(e) = self.binding.stop(manipulator.id()).await {
                warn!("Binding stop for manipulator {}: {e}", manipulator.id());
                all_stopped = false;
            }
            manipulator.clear_lease().await;
        }

        if all_stopped {
            BooleanStateResponse::ok(true)
        } else {
            BooleanStateResponse::err("Failed to stop one or more manipulators")
        }
    }

    /// Session teardown: stop everything, revoke every lease, clear the
    /// registry.
    pub async fn reset(&self) {
        let response = self.stop_all().await;
        if !response.error.is_empty() {
            warn!("Reset: {}", response.error);
        }
        self.manipulators.write().await.clear();
        info!("Platform reset: registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::fake::FakeBinding;
    use tokio::sync::mpsc;

    fn test_platform() -> Arc<Platform> {
        let (events, _rx) = mpsc::unbounded_channel();
        Platform::new(Arc::new(FakeBinding::new()), events)
    }

    #[tokio::test]
    async fn register_unregister_round_trip() {
        let platform = test_platform();
        assert_eq!(platform.register_manipulator("1").await, "");
        assert_eq!(
            platform.register_manipulator("1").await,
            "Manipulator 1 already registered"
        );
        assert_eq!(platform.unregister_manipulator("1").await, "");
        assert_eq!(
            platform.unregister_manipulator("1").await,
            "Manipulator 1 not registered"
        );
    }

    #[tokio::test]
    async fn register_rejects_ids_outside_the_alphabet() {
        let platform = test_platform();
        assert_eq!(
            platform.register_manipulator("9").await,
            "Invalid manipulator ID: 9"
        );
        assert_eq!(
            platform.register_manipulator("not-a-number").await,
            "Invalid manipulator ID: not-a-number"
        );
    }

    #[tokio::test]
    async fn operations_require_registration() {
        let platform = test_platform();
        let response = platform.get_position("3").await;
        assert_eq!(response.error, "Manipulator 3 not registered");

        let response = platform
            .set_position(SetPositionRequest {
                manipulator_id: "3".into(),
                position: Vec4::splat(1.0),
                speed: 1.0,
            })
            .await;
        assert_eq!(response.error, "Manipulator 3 not registered");
    }

    #[tokio::test]
    async fn moves_require_a_write_lease() {
        let platform = test_platform();
        platform.register_manipulator("1").await;
        let response = platform
            .set_position(SetPositionRequest {
                manipulator_id: "1".into(),
                position: Vec4::splat(1.0),
                speed: 1.0,
            })
            .await;
        assert_eq!(response.error, "Write disabled");
    }

    #[tokio::test]
    async fn move_requests_are_bound_checked() {
        let platform = test_platform();
        platform.register_manipulator("1").await;
        platform
            .set_can_write(SetCanWriteRequest {
                manipulator_id: "1".into(),
                can_write: true,
                hours: 0.0,
            })
            .await;

        let zero_speed = platform
            .set_position(SetPositionRequest {
                manipulator_id: "1".into(),
                position: Vec4::splat(1.0),
                speed: 0.0,
            })
            .await;
        assert!(zero_speed.error.starts_with("Invalid request"));

        let outside = platform
            .set_position(SetPositionRequest {
                manipulator_id: "1".into(),
                position: Vec4::new(0.0, 0.0, 0.0, 25.0),
                speed: 1.0,
            })
            .await;
        assert!(outside.error.starts_with("Invalid request"));

        let bad_depth = platform
            .set_depth(SetDepthRequest {
                manipulator_id: "1".into(),
                depth: f64::NAN,
                speed: 1.0,
            })
            .await;
        assert!(bad_depth.error.starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn platform_info_reports_the_binding() {
        let platform = test_platform();
        let info = platform.get_platform_info().await;
        assert_eq!(info.cli_name, "fake");
        assert_eq!(info.axes_count, 4);
        assert_eq!(info.dimensions, Vec4::splat(20.0));
    }
}

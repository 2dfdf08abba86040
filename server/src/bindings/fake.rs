//! Simulated manipulator platform.
//!
//! Eight virtual 4-axis manipulators that move linearly at the commanded
//! speed. The move call hands the target to a simulated drive and awaits
//! its completion event, the same shape as a vendor-SDK platform; a stop
//! interrupts the drive, freezes the stage where it was, and surfaces the
//! dedicated interruption error.

use std::collections::HashMap;

use async_trait::async_trait;
use link_types::{Vec3, Vec4};
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::bindings::PlatformBinding;
use crate::error::{LinkError, LinkResult};

const MANIPULATOR_COUNT: usize = 8;
const DIMENSIONS: Vec4 = Vec4::splat(20.0);
const MOVEMENT_TOLERANCE: f64 = 0.001;

struct FakeManipulator {
    position: Vec4,
    angles: Vec3,
    /// Bumped by `stop`; an in-flight drive watches for the change.
    interrupt: watch::Sender<u64>,
}

pub struct FakeBinding {
    manipulators: Mutex<HashMap<String, FakeManipulator>>,
}

impl FakeBinding {
    pub fn new() -> Self {
        // One probe per 45° of yaw, steep pairs first, matching the rig
        // layout the client-side demos expect.
        let angles = [
            Vec3::new(90.0, 60.0, 0.0),
            Vec3::new(270.0, 60.0, 0.0),
            Vec3::new(180.0, 60.0, 0.0),
            Vec3::new(0.0, 60.0, 0.0),
            Vec3::new(45.0, 30.0, 0.0),
            Vec3::new(315.0, 30.0, 0.0),
            Vec3::new(135.0, 30.0, 0.0),
            Vec3::new(225.0, 30.0, 0.0),
        ];
        let manipulators = (0..MANIPULATOR_COUNT)
            .map(|index| {
                (
                    index.to_string(),
                    FakeManipulator {
                        position: Vec4::default(),
                        angles: angles[index],
                        interrupt: watch::channel(0).0,
                    },
                )
            })
            .collect();
        Self {
            manipulators: Mutex::new(manipulators),
        }
    }

    async fn with_manipulator<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut FakeManipulator) -> T,
    ) -> LinkResult<T> {
        let mut manipulators = self.manipulators.lock().await;
        manipulators
            .get_mut(id)
            .map(f)
            .ok_or_else(|| LinkError::NotConnected(id.to_string()))
    }
}

impl Default for FakeBinding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformBinding for FakeBinding {
    fn display_name(&self) -> &'static str {
        "Fake Manipulator"
    }

    fn cli_name(&self) -> &'static str {
        "fake"
    }

    fn is_valid_id(&self, id: &str) -> bool {
        id.parse::<usize>()
            .map(|index| index < MANIPULATOR_COUNT)
            .unwrap_or(false)
    }

    async fn get_manipulators(&self) -> LinkResult<Vec<String>> {
        Ok((0..MANIPULATOR_COUNT).map(|index| index.to_string()).collect())
    }

    async fn get_axes_count(&self) -> LinkResult<u32> {
        Ok(4)
    }

    async fn get_dimensions(&self) -> LinkResult<Vec4> {
        Ok(DIMENSIONS)
    }

    async fn get_position(&self, manipulator_id: &str) -> LinkResult<Vec4> {
        self.with_manipulator(manipulator_id, |m| m.position).await
    }

    async fn get_angles(&self, manipulator_id: &str) -> LinkResult<Vec3> {
        self.with_manipulator(manipulator_id, |m| m.angles).await
    }

    async fn get_shank_count(&self, _manipulator_id: &str) -> LinkResult<u32> {
        Ok(1)
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
        let (start, mut interrupted) = self
            .with_manipulator(manipulator_id, |m| (m.position, m.interrupt.subscribe()))
            .await?;
        // Only interrupts raised after this point cancel this move.
        let _ = interrupted.borrow_and_update();

        let distance = start
            .to_array()
            .iter()
            .zip(target.to_array())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);
        let duration = Duration::from_secs_f64(distance / speed);
        let started = Instant::now();
        debug!(
            "fake manipulator {manipulator_id}: moving {distance:.3} mm over {:.2} s",
            duration.as_secs_f64()
        );

        tokio::select! {
            _ = sleep(duration) => {
                self.with_manipulator(manipulator_id, |m| m.position = target).await?;
                Ok(target)
            }
            _ = interrupted.changed() => {
                // Freeze the stage where the drive was interrupted.
                let fraction = if duration.is_zero() {
                    1.0
                } else {
                    (started.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0)
                };
                let frozen = Vec4::new(
                    start.x + (target.x - start.x) * fraction,
                    start.y + (target.y - start.y) * fraction,
                    start.z + (target.z - start.z) * fraction,
                    start.w + (target.w - start.w) * fraction,
                );
                self.with_manipulator(manipulator_id, |m| m.position = frozen).await?;
                Err(LinkError::MovementInterrupted(format!(
                    "manipulator {manipulator_id} was stopped at {frozen:?}"
                )))
            }
        }
    }

    async fn set_depth(&self, manipulator_id: &str, depth: f64, speed: f64) -> LinkResult<f64> {
        let mut target = self.get_position(manipulator_id).await?;
        target.w = depth;
        let finish = self.set_position(manipulator_id, target, speed).await?;
        Ok(finish.w)
    }

    async fn stop(&self, manipulator_id: &str) -> LinkResult<()> {
        self.with_manipulator(manipulator_id, |m| {
            m.interrupt.send_modify(|generation| *generation += 1);
        })
        .await
    }

    fn platform_to_unified(&self, platform: Vec4) -> Vec4 {
        platform
    }

    fn unified_to_platform(&self, unified: Vec4) -> Vec4 {
        unified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn move_settles_at_the_target() {
        let binding = FakeBinding::new();
        let target = Vec4::new(1.0, 2.0, 3.0, 4.0);
        let finish = binding.set_position("1", target, 1.0).await.unwrap();
        assert_eq!(finish, target);
        assert_eq!(binding.get_position("1").await.unwrap(), target);
    }

    #[tokio::test(start_paused = true)]
    async fn depth_move_changes_only_w() {
        let binding = FakeBinding::new();
        binding
            .set_position("2", Vec4::new(5.0, 5.0, 5.0, 5.0), 10.0)
            .await
            .unwrap();
        let depth = binding.set_depth("2", 7.0, 1.0).await.unwrap();
        assert_eq!(depth, 7.0);
        assert_eq!(
            binding.get_position("2").await.unwrap(),
            Vec4::new(5.0, 5.0, 5.0, 7.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_an_in_flight_move() {
        let binding = std::sync::Arc::new(FakeBinding::new());
        let mover = binding.clone();
        let handle = tokio::spawn(async move {
            mover.set_position("0", Vec4::splat(10.0), 0.5).await
        });
        // Let the drive start before interrupting it.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        binding.stop("0").await.unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(LinkError::MovementInterrupted(_))));
        // The stage froze somewhere short of the target.
        let frozen = binding.get_position("0").await.unwrap();
        assert!(frozen.x < 10.0);
    }

    #[tokio::test]
    async fn unknown_manipulator_is_not_connected() {
        let binding = FakeBinding::new();
        assert!(matches!(
            binding.get_position("9").await,
            Err(LinkError::NotConnected(_))
        ));
        assert!(!binding.is_valid_id("9"));
        assert!(binding.is_valid_id("7"));
    }
}

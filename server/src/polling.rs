//! Progress-polling movement engine.
//!
//! Platforms that command a move by issuing a request to an external
//! controller cannot block on a completion event; they watch the position
//! converge instead. The loop terminates when the target is within
//! tolerance, when a stop was requested, or when the position stops
//! changing for `unchanged_limit` consecutive polls (a stalled stage never
//! reports completion on its own).

use std::future::Future;
use std::time::Duration;

use link_types::Vec4;

use crate::error::LinkResult;

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Delay between position samples.
    pub interval: Duration,
    /// Consecutive unchanged samples before the move counts as stuck.
    pub unchanged_limit: u32,
    /// Movement tolerance of the binding (mm).
    pub tolerance: f64,
}

/// Why the watch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Final position within tolerance of the target.
    Reached,
    /// Position unchanged for `unchanged_limit` polls short of the target.
    Stuck,
    /// A stop request ended the watch.
    Stopped,
}

/// Watch the three translational axes converge on `target`. Returns the
/// last sampled position and the reason the loop ended. Depth is excluded
/// from the comparison because on 3-axis hardware it mirrors a stage axis.
pub async fn watch_vector<C, S, Fut>(
    target: Vec4,
    settings: PollSettings,
    mut stopped: C,
    mut sample: S,
) -> LinkResult<(Vec4, Outcome)>
where
    C: FnMut() -> bool,
    S: FnMut() -> Fut,
    Fut: Future<Output = LinkResult<Vec4>>,
{
    let mut current = sample().await?;
    let mut previous = current;
    let mut unchanged = 0u32;

    while !stopped()
        && !current.within_xyz(target, settings.tolerance)
        && unchanged < settings.unchanged_limit
    {
        tokio::time::sleep(settings.interval).await;
        current = sample().await?;

        if current.within_xyz(previous, settings.tolerance) {
            unchanged += 1;
        } else {
            unchanged = 0;
            previous = current;
        }
    }

    let outcome = if stopped() {
        Outcome::Stopped
    } else if current.within_xyz(target, settings.tolerance) {
        Outcome::Reached
    } else {
        Outcome::Stuck
    };
    Ok((current, outcome))
}

/// Scalar variant of [`watch_vector`] for depth-only moves.
pub async fn watch_scalar<C, S, Fut>(
    target: f64,
    settings: PollSettings,
    mut stopped: C,
    mut sample: S,
) -> LinkResult<(f64, Outcome)>
where
    C: FnMut() -> bool,
    S: FnMut() -> Fut,
    Fut: Future<Output = LinkResult<f64>>,
{
    let mut current = sample().await?;
    let mut previous = current;
    let mut unchanged = 0u32;

    while !stopped()
        && (current - target).abs() > settings.tolerance
        && unchanged < settings.unchanged_limit
    {
        tokio::time::sleep(settings.interval).await;
        current = sample().await?;

        if (current - previous).abs() <= settings.tolerance {
            unchanged += 1;
        } else {
            unchanged = 0;
            previous = current;
        }
    }

    let outcome = if stopped() {
        Outcome::Stopped
    } else if (current - target).abs() <= settings.tolerance {
        Outcome::Reached
    } else {
        Outcome::Stuck
    };
    Ok((current, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(100),
            unchanged_limit: 10,
            tolerance: 0.01,
        }
    }

    fn advancing_sampler(step: f64, limit: f64) -> impl FnMut() -> std::future::Ready<LinkResult<Vec4>> {
        let mut z = 0.0;
        move || {
            z = (z + step).min(limit);
            std::future::ready(Ok(Vec4::new(0.0, 0.0, z, z)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_when_position_converges() {
        let target = Vec4::new(0.0, 0.0, 1.0, 1.0);
        let (finish, outcome) = watch_vector(target, settings(), || false, advancing_sampler(0.25, 1.0))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reached);
        assert!(finish.within_xyz(target, 0.01));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_after_unchanged_limit_polls() {
        let target = Vec4::new(0.0, 0.0, 5.0, 5.0);
        // Stalls at z = 1.0, far short of the target.
        let (finish, outcome) = watch_vector(target, settings(), || false, advancing_sampler(0.5, 1.0))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Stuck);
        assert_eq!(finish.z, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_resets_the_unchanged_counter() {
        // Pauses for 8 polls (below the limit of 10) then resumes; the
        // counter must reset and the move must still reach the target.
        let mut poll = 0u32;
        let sample = move || {
            poll += 1;
            let z = match poll {
                0..=2 => 0.1 * f64::from(poll),
                3..=10 => 0.3,
                _ => (0.3 + 0.2 * f64::from(poll - 10)).min(1.0),
            };
            std::future::ready(Ok(Vec4::new(0.0, 0.0, z, z)))
        };
        let target = Vec4::new(0.0, 0.0, 1.0, 1.0);
        let (_, outcome) = watch_vector(target, settings(), || false, sample).await.unwrap();
        assert_eq!(outcome, Outcome::Reached);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_ends_the_watch() {
        let mut polls = 0u32;
        let stopped = move || {
            polls += 1;
            polls > 3
        };
        let target = Vec4::new(0.0, 0.0, 10.0, 10.0);
        let (_, outcome) = watch_vector(target, settings(), stopped, advancing_sampler(0.05, 10.0))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn scalar_watch_tracks_depth_only() {
        let mut depth = 0.0;
        let sample = move || {
            depth = f64::min(depth + 0.5, 2.0);
            std::future::ready(Ok(depth))
        };
        let (finish, outcome) = watch_scalar(2.0, settings(), || false, sample).await.unwrap();
        assert_eq!(outcome, Outcome::Reached);
        assert!((finish - 2.0).abs() <= 0.01);
    }
}

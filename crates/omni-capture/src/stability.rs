//! Scroll-until-stable loop.
//!
//! Used both to load a whole session list (measure: item count) and to load a
//! single session's history (measure: scroll height).

use std::future::Future;

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    /// Consecutive probes without growth before the target counts as stable.
    pub stable_checks: u32,
    pub max_rounds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityOutcome {
    pub rounds: u32,
    /// Largest measurement seen.
    pub last: Option<u64>,
    /// False when the target vanished or the round limit was hit.
    pub converged: bool,
}

/// Runs `probe` until its measurement stops growing.
///
/// The probe performs one scroll-wait-measure step and returns `None` when the
/// target is gone. Never runs more than `max_rounds` probes.
pub async fn stabilize<F, Fut>(policy: &StabilityPolicy, mut probe: F) -> StabilityOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<u64>>,
{
    let mut last: Option<u64> = None;
    let mut unchanged = 0u32;
    let mut rounds = 0u32;

    while rounds < policy.max_rounds {
        rounds += 1;
        let Some(measured) = probe().await else {
            return StabilityOutcome {
                rounds,
                last,
                converged: false,
            };
        };
        trace!(rounds, measured, "stability probe");

        match last {
            Some(previous) if measured <= previous => unchanged += 1,
            _ => {
                last = Some(measured);
                unchanged = 0;
            }
        }

        if unchanged >= policy.stable_checks {
            return StabilityOutcome {
                rounds,
                last,
                converged: true,
            };
        }
    }

    StabilityOutcome {
        rounds,
        last,
        converged: false,
    }
}

//! Provider selection: closest fit for a set of constraints.
//!
//! Flow:  enabled → cost → power budget → capabilities (relaxable) → accuracy rank
//!
//! Cost and power are hard filters. Capabilities are dropped when no survivor
//! has them all. Accuracy prefers the closest class at or above the request
//! and falls back to the most accurate survivor below it.

use std::cmp::Reverse;

use super::types::{ProviderConstraints, ProviderDescriptor, TrackingError};
use tracing::debug;

/// Options for provider selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions {
    /// Ignore providers the host reports as disabled.
    pub enabled_only: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self { enabled_only: true }
    }
}

/// Pick the best provider (enabled providers only).
pub fn select(
    constraints: &ProviderConstraints,
    available: &[ProviderDescriptor],
) -> Result<ProviderDescriptor, TrackingError> {
    select_with_options(constraints, available, &SelectOptions::default())
}

/// Pick the best provider with explicit options.
pub fn select_with_options(
    constraints: &ProviderConstraints,
    available: &[ProviderDescriptor],
    opts: &SelectOptions,
) -> Result<ProviderDescriptor, TrackingError> {
    let survivors: Vec<&ProviderDescriptor> = available
        .iter()
        .filter(|p| !opts.enabled_only || p.enabled)
        .filter(|p| constraints.allows_cost || !p.monetary_cost)
        .filter(|p| constraints.power_budget.allows(p.power))
        .collect();

    if survivors.is_empty() {
        debug!(
            available = available.len(),
            budget = ?constraints.power_budget,
            "no provider passed cost/power filters"
        );
        return Err(TrackingError::NoProviderAvailable);
    }

    let capable: Vec<&ProviderDescriptor> = survivors
        .iter()
        .copied()
        .filter(|p| satisfies_capabilities(constraints, p))
        .collect();
    let ranked = if capable.is_empty() { survivors } else { capable };

    // min_by_key keeps the first minimum, so ties go to declaration order.
    let wanted = constraints.horizontal_accuracy;
    let best = ranked
        .iter()
        .filter(|p| p.accuracy >= wanted)
        .min_by_key(|p| (p.accuracy, p.power))
        .or_else(|| ranked.iter().min_by_key(|p| (Reverse(p.accuracy), p.power)))
        .ok_or(TrackingError::NoProviderAvailable)?;

    Ok((*best).clone())
}

fn satisfies_capabilities(c: &ProviderConstraints, p: &ProviderDescriptor) -> bool {
    (!c.requires_altitude || p.supports_altitude)
        && (!c.requires_bearing || p.supports_bearing)
        && (!c.requires_speed || p.supports_speed)
}

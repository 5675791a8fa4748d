//! Quality policy: quality tier → provider constraints.

use super::types::{AccuracyClass, PowerBudget, ProviderConstraints, QualityTier};

/// Resolve a quality tier into concrete provider constraints.
pub fn resolve(tier: QualityTier) -> ProviderConstraints {
    let (accuracy, power_budget) = match tier {
        QualityTier::LowPower => (AccuracyClass::Coarse, PowerBudget::Low),
        QualityTier::Balanced => (AccuracyClass::Medium, PowerBudget::Medium),
        QualityTier::HighAccuracy => (AccuracyClass::Fine, PowerBudget::Unconstrained),
    };

    ProviderConstraints {
        horizontal_accuracy: accuracy,
        vertical_accuracy: accuracy,
        power_budget,
        requires_altitude: false,
        requires_bearing: false,
        requires_speed: false,
        allows_cost: false,
    }
}

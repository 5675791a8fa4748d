//! Core types for the tracking subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Caller-facing accuracy/power tradeoff, chosen at start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    LowPower,
    Balanced,
    HighAccuracy,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [Self::LowPower, Self::Balanced, Self::HighAccuracy];
}

impl Default for QualityTier {
    fn default() -> Self { Self::Balanced }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowPower => write!(f, "low_power"),
            Self::Balanced => write!(f, "balanced"),
            Self::HighAccuracy => write!(f, "high_accuracy"),
        }
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "low_power" | "low" => Ok(Self::LowPower),
            "balanced" => Ok(Self::Balanced),
            "high_accuracy" | "high" => Ok(Self::HighAccuracy),
            _ => Err(format!(
                "Unknown tier '{}'. Use 'low_power', 'balanced' or 'high_accuracy'.",
                s
            )),
        }
    }
}

/// Accuracy class, ordered from least to most accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyClass {
    Coarse,
    Medium,
    Fine,
}

/// Power draw of a provider, ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerClass {
    Low,
    Medium,
    High,
}

/// How much power a session may spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerBudget {
    Low,
    Medium,
    Unconstrained,
}

impl PowerBudget {
    pub fn allows(self, power: PowerClass) -> bool {
        match self {
            Self::Low => power == PowerClass::Low,
            Self::Medium => power <= PowerClass::Medium,
            Self::Unconstrained => true,
        }
    }
}

/// Concrete constraints derived from a [`QualityTier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderConstraints {
    pub horizontal_accuracy: AccuracyClass,
    pub vertical_accuracy: AccuracyClass,
    pub power_budget: PowerBudget,
    pub requires_altitude: bool,
    pub requires_bearing: bool,
    pub requires_speed: bool,
    pub allows_cost: bool,
}

/// One positioning source available on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub accuracy: AccuracyClass,
    pub power: PowerClass,
    #[serde(default)]
    pub monetary_cost: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub supports_altitude: bool,
    #[serde(default)]
    pub supports_bearing: bool,
    #[serde(default)]
    pub supports_speed: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    /// An enabled, free provider with no optional capabilities.
    pub fn new(name: impl Into<String>, accuracy: AccuracyClass, power: PowerClass) -> Self {
        Self {
            name: name.into(),
            accuracy,
            power,
            monetary_cost: false,
            enabled: true,
            supports_altitude: false,
            supports_bearing: false,
            supports_speed: false,
        }
    }

    pub fn with_cost(mut self, monetary_cost: bool) -> Self {
        self.monetary_cost = monetary_cost;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_capabilities(mut self, altitude: bool, bearing: bool, speed: bool) -> Self {
        self.supports_altitude = altitude;
        self.supports_bearing = bearing;
        self.supports_speed = speed;
        self
    }
}

/// Request parameters handed to the platform with every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    /// Desired interval between updates; 0 means as fast as the provider delivers.
    pub interval_ms: u64,
    /// Longest the platform may batch updates before delivering them.
    pub max_update_delay_ms: u64,
    /// Stop after this many delivered updates.
    pub max_updates: Option<u64>,
    /// Stop once the session has been active this long.
    pub duration_ms: Option<u64>,
}

impl Default for UpdateRequest {
    fn default() -> Self {
        Self {
            interval_ms: 0,
            max_update_delay_ms: 0,
            max_updates: None,
            duration_ms: None,
        }
    }
}

impl UpdateRequest {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }
}

/// A raw position sample as produced by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a session ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    MaxUpdatesReached,
    DurationElapsed,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxUpdatesReached => write!(f, "maximum number of updates reached"),
            Self::DurationElapsed => write!(f, "session duration elapsed"),
        }
    }
}

/// What the consumer receives. Provider loss and session completion travel
/// on the same channel as updates and are always followed by `Idle`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackingEvent {
    Update(PositionSample),
    ProviderLost { provider: String, reason: String },
    Finished { provider: String, reason: FinishReason },
}

/// Lifecycle state of the tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Idle,
    Starting,
    Active,
    Stopping,
    /// Terminal state after `destroy()`.
    Released,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Active => write!(f, "Active"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Released => write!(f, "Released"),
        }
    }
}

impl Default for TrackingState {
    fn default() -> Self { Self::Idle }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: TrackingState,
    pub tier: Option<QualityTier>,
    pub selected_provider: Option<ProviderDescriptor>,
    pub presence_active: bool,
    pub delivered: u64,
}

/// Synchronous errors of the caller API. None of them is fatal; every
/// failure leaves the service idle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("No positioning provider satisfies the requested constraints")]
    NoProviderAvailable,
    #[error("Tracking is already running")]
    AlreadyRunning,
    #[error("Tracking is not running")]
    NotRunning,
    #[error("Provider '{provider}' was lost: {reason}")]
    ProviderLost { provider: String, reason: String },
    #[error("Could not subscribe to provider '{provider}': {reason}")]
    SubscriptionFailed { provider: String, reason: String },
    #[error("Start was cancelled by a concurrent stop")]
    Cancelled,
    #[error("The tracking service has been destroyed")]
    Released,
}

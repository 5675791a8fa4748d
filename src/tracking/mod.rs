//! Location tracking subsystem.
//!
//! Resolves a quality tier into provider constraints, selects a provider,
//! and runs the start/stop lifecycle with a presence signal raised for as
//! long as a session is live.

pub mod platform;
pub mod policy;
pub mod presence;
pub mod selector;
pub mod service;
pub mod simulated;
pub mod types;

pub use platform::{CancelToken, LocationPlatform, PlatformError, SubscriptionHandle, UpdateSink};
pub use presence::{ForegroundNotice, LogNotificationHost, NotificationHost, PresenceHandle, PresenceSignal};
pub use service::{ServiceSettings, TrackingService};
pub use simulated::SimulatedPlatform;
pub use types::{
    AccuracyClass, FinishReason, PositionSample, PowerBudget, PowerClass, ProviderConstraints,
    ProviderDescriptor, QualityTier, SessionSnapshot, TrackingError, TrackingEvent, TrackingState,
    UpdateRequest,
};

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ServiceConfig;
use crate::tracking::{
    ForegroundNotice, LogNotificationHost, PositionSample, QualityTier, ServiceSettings,
    SimulatedPlatform, TrackingEvent, TrackingService,
};
use crate::tracking::selector::SelectOptions;

/// Most recent sample and the most recent non-sample event.
#[derive(Default)]
pub struct LastSeen {
    pub sample: Option<PositionSample>,
    pub event: Option<TrackingEvent>,
}

pub struct AppState {
    pub service: TrackingService,
    pub default_tier: QualityTier,
    pub select: SelectOptions,
    pub last: Arc<Mutex<LastSeen>>,
}

impl AppState {
    /// Service over the simulated platform, with a consumer that records
    /// what the server reports under `/api/last`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let platform = Arc::new(SimulatedPlatform::from_config(config));
        let presence = Arc::new(ForegroundNotice::new(LogNotificationHost, config.presence.clone()));
        let settings = ServiceSettings::from(config);
        let select = settings.select;
        let service = TrackingService::with_settings(platform, presence, settings);

        let last = Arc::new(Mutex::new(LastSeen::default()));
        let recorder = last.clone();
        service.on_update(move |event| {
            let mut seen = recorder.lock().unwrap_or_else(PoisonError::into_inner);
            match event {
                TrackingEvent::Update(sample) => seen.sample = Some(sample),
                other => seen.event = Some(other),
            }
        });

        Self { service, default_tier: config.default_tier, select, last }
    }
}

//! Tracking service: session lifecycle and update forwarding.
//!
//! Lifecycle:  Idle → Starting → Active → Stopping → Idle
//!             Starting/Active → Idle on failure, any → Released on destroy
//!
//! Every transition happens under the session mutex. Samples are forwarded
//! while that mutex is held, so once `stop()` has moved the session out of
//! `Active` no further sample can reach the consumer. Platform calls that may
//! block (`subscribe`, `unsubscribe`) run with the mutex released.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use super::platform::{CancelToken, Delivery, LocationPlatform, SubscriptionHandle, UpdateSink};
use super::policy;
use super::presence::{PresenceHandle, PresenceSignal};
use super::selector::{self, SelectOptions};
use super::types::{
    FinishReason, PositionSample, ProviderDescriptor, QualityTier, SessionSnapshot, TrackingError,
    TrackingEvent, TrackingState, UpdateRequest,
};
use crate::config::ServiceConfig;

/// Receives every event of the current session.
///
/// Runs on the platform's delivery thread while the session lock is held:
/// it must return promptly and must not call back into the service.
pub type Consumer = Arc<dyn Fn(TrackingEvent) + Send + Sync>;

/// Service settings derived from [`ServiceConfig`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub status_text: String,
    pub request: UpdateRequest,
    pub select: SelectOptions,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for ServiceSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            status_text: config.status_text.clone(),
            request: config.request.clone(),
            select: SelectOptions { enabled_only: config.enabled_only },
        }
    }
}

#[derive(Default)]
struct TrackingSession {
    state: TrackingState,
    tier: Option<QualityTier>,
    /// Chosen provider while the subscription is being set up.
    pending_provider: Option<ProviderDescriptor>,
    selected_provider: Option<ProviderDescriptor>,
    presence_active: bool,
    presence: Option<PresenceHandle>,
    subscription: Option<SubscriptionHandle>,
    cancel: Option<CancelToken>,
    /// Wakes the duration timer early once the session is torn down.
    deadline: Option<CancelToken>,
    /// Bumped on every start; sinks of older sessions are ignored.
    generation: u64,
    /// False while a start is inside `subscribe`.
    start_settled: bool,
    /// Provider failure reported before `subscribe` returned.
    lost_while_starting: Option<String>,
    started_at: Option<Instant>,
    delivered: u64,
    consumer: Option<Consumer>,
}

impl TrackingSession {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            tier: self.tier,
            selected_provider: self.selected_provider.clone(),
            presence_active: self.presence_active,
            delivered: self.delivered,
        }
    }

    fn invariants_hold(&self) -> bool {
        let live = matches!(self.state, TrackingState::Starting | TrackingState::Active);
        let selected = matches!(self.state, TrackingState::Active | TrackingState::Stopping);
        self.presence_active == live && self.selected_provider.is_some() == selected
    }
}

struct Shared {
    me: Weak<Shared>,
    platform: Arc<dyn LocationPlatform>,
    presence: Arc<dyn PresenceSignal>,
    settings: ServiceSettings,
    session: Mutex<TrackingSession>,
    /// Signalled when a start settles or a teardown completes.
    changed: Condvar,
}

/// The background tracking service.
///
/// Safe to share between threads (wrap it in an `Arc`); dropping it
/// destroys the session.
pub struct TrackingService {
    shared: Arc<Shared>,
}

impl TrackingService {
    pub fn new(platform: Arc<dyn LocationPlatform>, presence: Arc<dyn PresenceSignal>) -> Self {
        Self::with_settings(platform, presence, ServiceSettings::default())
    }

    pub fn with_settings(
        platform: Arc<dyn LocationPlatform>,
        presence: Arc<dyn PresenceSignal>,
        settings: ServiceSettings,
    ) -> Self {
        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            platform,
            presence,
            settings,
            session: Mutex::new(TrackingSession::default()),
            changed: Condvar::new(),
        });
        Self { shared }
    }

    /// Register the consumer, replacing any previous one.
    pub fn on_update<F>(&self, consumer: F)
    where
        F: Fn(TrackingEvent) + Send + Sync + 'static,
    {
        self.shared.lock().consumer = Some(Arc::new(consumer));
    }

    pub fn status(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Providers currently offered by the platform.
    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.shared.platform.list_providers()
    }

    /// Start tracking at the given quality.
    ///
    /// Blocks while the platform sets up the subscription. A concurrent
    /// `stop()` cancels the start, which then reports `Cancelled`.
    pub fn start(&self, tier: QualityTier) -> Result<SessionSnapshot, TrackingError> {
        let shared = &self.shared;
        let constraints = policy::resolve(tier);

        let (provider, generation, cancel) = {
            let mut s = shared.lock();
            let state = s.state;
            match state {
                TrackingState::Idle => {}
                TrackingState::Released => return Err(TrackingError::Released),
                state => {
                    debug!(%state, %tier, "start ignored, session already running");
                    return Err(TrackingError::AlreadyRunning);
                }
            }

            let available = shared.platform.list_providers();
            let provider = selector::select_with_options(&constraints, &available, &shared.settings.select)
                .map_err(|e| {
                    warn!(%tier, available = available.len(), "no provider for requested quality");
                    e
                })?;

            let status = format!("{} via {}", shared.settings.status_text, provider.name);
            let cancel = CancelToken::new();
            s.generation += 1;
            s.state = TrackingState::Starting;
            s.tier = Some(tier);
            s.pending_provider = Some(provider.clone());
            s.presence = Some(shared.presence.activate(&status));
            s.presence_active = true;
            s.cancel = Some(cancel.clone());
            s.start_settled = false;
            s.lost_while_starting = None;
            s.delivered = 0;
            debug_assert!(s.invariants_hold());
            (provider, s.generation, cancel)
        };

        info!(%tier, provider = %provider.name, "starting location tracking");

        let sink = UpdateSink::new(shared.me.clone() as Weak<dyn Delivery>, generation);
        let result = shared.platform.subscribe(&provider, &shared.settings.request, sink, &cancel);

        let mut s = shared.lock();
        if s.state != TrackingState::Starting {
            // A stop took over and is waiting for this start to settle.
            drop(s);
            if let Ok(handle) = result {
                shared.platform.unsubscribe(handle);
            }
            let mut s = shared.lock();
            s.start_settled = true;
            shared.changed.notify_all();
            info!(provider = %provider.name, "start cancelled by stop");
            return Err(TrackingError::Cancelled);
        }

        let lost = s.lost_while_starting.take();
        let failure = match (result, lost) {
            (Ok(handle), None) => {
                s.subscription = Some(handle);
                s.selected_provider = s.pending_provider.take();
                s.state = TrackingState::Active;
                s.started_at = Some(Instant::now());
                s.cancel = None;
                s.start_settled = true;
                shared.arm_deadline(&mut s, generation);
                debug_assert!(s.invariants_hold());
                info!(provider = %provider.name, "location tracking active");
                return Ok(s.snapshot());
            }
            (Ok(handle), Some(reason)) => {
                s.state = TrackingState::Stopping;
                s.presence_active = false;
                s.selected_provider = s.pending_provider.take();
                drop(s);
                shared.platform.unsubscribe(handle);
                s = shared.lock();
                TrackingError::ProviderLost { provider: provider.name.clone(), reason }
            }
            (Err(e), _) => TrackingError::SubscriptionFailed {
                provider: provider.name.clone(),
                reason: e.to_string(),
            },
        };

        warn!(provider = %provider.name, error = %failure, "start failed");
        s.presence_active = false;
        s.pending_provider = None;
        shared.finish_teardown(&mut s);
        s.start_settled = true;
        shared.changed.notify_all();
        Err(failure)
    }

    /// Stop tracking. Blocks until the subscription is gone and the
    /// presence signal is down.
    pub fn stop(&self) -> Result<(), TrackingError> {
        let shared = &self.shared;
        let mut s = shared.lock();
        let state = s.state;
        match state {
            TrackingState::Idle => Err(TrackingError::NotRunning),
            TrackingState::Released => Err(TrackingError::Released),
            TrackingState::Stopping => {
                let _s = shared.wait_while(s, |s| s.state == TrackingState::Stopping);
                Ok(())
            }
            TrackingState::Starting => {
                info!("stopping during start, cancelling subscription");
                s.state = TrackingState::Stopping;
                s.presence_active = false;
                s.selected_provider = s.pending_provider.take();
                if let Some(cancel) = &s.cancel {
                    cancel.cancel();
                }
                debug_assert!(s.invariants_hold());
                let mut s = shared.wait_while(s, |s| !s.start_settled);
                shared.finish_teardown(&mut s);
                shared.changed.notify_all();
                Ok(())
            }
            TrackingState::Active => {
                info!(delivered = s.delivered, "stopping location tracking");
                s.state = TrackingState::Stopping;
                s.presence_active = false;
                let subscription = s.subscription.take();
                debug_assert!(s.invariants_hold());
                drop(s);
                shared.complete_teardown(subscription);
                Ok(())
            }
        }
    }

    /// Stop if running and release the service for good. Safe from any state.
    pub fn destroy(&self) {
        loop {
            {
                let mut s = self.shared.lock();
                let state = s.state;
                match state {
                    TrackingState::Released => return,
                    TrackingState::Idle => {
                        s.state = TrackingState::Released;
                        s.consumer = None;
                        s.tier = None;
                        self.shared.changed.notify_all();
                        info!("tracking service released");
                        return;
                    }
                    _ => {}
                }
            }
            let _ = self.stop();
        }
    }
}

impl Drop for TrackingService {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackingSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while<'a>(
        &self,
        guard: MutexGuard<'a, TrackingSession>,
        condition: impl FnMut(&mut TrackingSession) -> bool,
    ) -> MutexGuard<'a, TrackingSession> {
        self.changed
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Last step of every teardown: drop the presence signal and go idle.
    fn finish_teardown(&self, s: &mut TrackingSession) {
        if let Some(deadline) = s.deadline.take() {
            deadline.cancel();
        }
        if let Some(handle) = s.presence.take() {
            self.presence.deactivate(handle);
        }
        s.state = TrackingState::Idle;
        s.presence_active = false;
        s.selected_provider = None;
        s.pending_provider = None;
        s.subscription = None;
        s.cancel = None;
        s.started_at = None;
        s.tier = None;
        debug_assert!(s.invariants_hold());
    }

    /// End the session once the requested duration has passed, even if the
    /// provider goes quiet.
    fn arm_deadline(&self, s: &mut TrackingSession, generation: u64) {
        let Some(limit) = self.settings.request.duration() else {
            return;
        };
        let token = CancelToken::new();
        let wake = token.clone();
        let me = self.me.clone();
        let spawned = thread::Builder::new()
            .name("tracker-deadline".into())
            .spawn(move || {
                if wake.wait_timeout(limit) {
                    return;
                }
                if let Some(shared) = me.upgrade() {
                    shared.expire(generation);
                }
            });
        match spawned {
            Ok(_) => s.deadline = Some(token),
            Err(e) => warn!(error = %e, "cannot spawn deadline thread, duration checked on delivery only"),
        }
    }

    fn expire(&self, generation: u64) {
        let s = self.lock();
        if s.generation != generation || s.state != TrackingState::Active {
            return;
        }
        let provider = s
            .selected_provider
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        info!(%provider, "session duration elapsed");
        let reason = FinishReason::DurationElapsed;
        self.end_session(s, TrackingEvent::Finished { provider, reason });
    }

    /// Unsubscribe (lock released), then finish under the lock.
    fn complete_teardown(&self, subscription: Option<SubscriptionHandle>) {
        if let Some(handle) = subscription {
            self.platform.unsubscribe(handle);
        }
        let mut s = self.lock();
        self.finish_teardown(&mut s);
        self.changed.notify_all();
        info!("location tracking stopped");
    }

    /// Leave `Active` on the service's own initiative and tell the consumer why.
    /// The subscription is torn down on a separate thread because the
    /// caller is the platform's delivery thread.
    fn end_session(&self, mut s: MutexGuard<'_, TrackingSession>, event: TrackingEvent) {
        s.state = TrackingState::Stopping;
        s.presence_active = false;
        let subscription = s.subscription.take();
        debug_assert!(s.invariants_hold());
        if let Some(consumer) = s.consumer.clone() {
            consumer(event);
        }
        drop(s);

        let me = self.me.clone();
        let spawned = thread::Builder::new()
            .name("tracker-teardown".into())
            .spawn(move || {
                if let Some(shared) = me.upgrade() {
                    shared.complete_teardown(subscription);
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "cannot spawn teardown thread, tearing down inline");
            self.complete_teardown(subscription);
        }
    }
}

impl Delivery for Shared {
    fn deliver(&self, generation: u64, sample: PositionSample) -> bool {
        let mut s = self.lock();
        if s.generation != generation || s.state != TrackingState::Active {
            trace!(state = %s.state, "sample dropped, session not active");
            return false;
        }

        let provider = s
            .selected_provider
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();

        if let (Some(limit), Some(started)) = (self.settings.request.duration(), s.started_at) {
            if started.elapsed() >= limit {
                info!(%provider, "session duration elapsed");
                let reason = FinishReason::DurationElapsed;
                self.end_session(s, TrackingEvent::Finished { provider, reason });
                return false;
            }
        }

        if let Some(max) = self.settings.request.max_updates {
            if s.delivered >= max {
                info!(%provider, delivered = s.delivered, "update limit reached");
                let reason = FinishReason::MaxUpdatesReached;
                self.end_session(s, TrackingEvent::Finished { provider, reason });
                return false;
            }
        }

        s.delivered += 1;
        if let Some(consumer) = s.consumer.clone() {
            consumer(TrackingEvent::Update(sample));
        }

        if let Some(max) = self.settings.request.max_updates {
            if s.delivered >= max {
                info!(%provider, delivered = s.delivered, "update limit reached");
                let reason = FinishReason::MaxUpdatesReached;
                self.end_session(s, TrackingEvent::Finished { provider, reason });
            }
        }
        true
    }

    fn fail(&self, generation: u64, reason: String) {
        let mut s = self.lock();
        if s.generation != generation {
            return;
        }
        let state = s.state;
        match state {
            TrackingState::Starting => {
                warn!(%reason, "provider lost while subscribing");
                s.lost_while_starting = Some(reason);
            }
            TrackingState::Active => {
                let provider = s
                    .selected_provider
                    .as_ref()
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                warn!(%provider, %reason, "provider lost, stopping");
                self.end_session(s, TrackingEvent::ProviderLost { provider, reason });
            }
            _ => {}
        }
    }
}

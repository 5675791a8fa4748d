//! Simulated positioning platform.
//!
//! Each subscription runs an emitter thread that walks a circle around a
//! fixed origin. Used by the CLI, the control server, and tests; failures
//! and slow subscriptions can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, trace};

use super::platform::{CancelToken, LocationPlatform, PlatformError, SubscriptionHandle, UpdateSink};
use super::types::{AccuracyClass, PositionSample, ProviderDescriptor, UpdateRequest};
use crate::config::ServiceConfig;

const METERS_PER_DEGREE: f64 = 111_320.0;
const MIN_INTERVAL: Duration = Duration::from_millis(1);
const STEP_DEGREES: f64 = 10.0;
const TRACK_RADIUS_M: f64 = 50.0;

struct Emitter {
    stop: CancelToken,
    thread: Option<JoinHandle<()>>,
}

pub struct SimulatedPlatform {
    providers: Mutex<Vec<ProviderDescriptor>>,
    origin: (f64, f64),
    next_id: AtomicU64,
    emitters: Mutex<HashMap<u64, Emitter>>,
    fail_after: Mutex<Option<u64>>,
    subscribe_delay: Mutex<Option<Duration>>,
}

impl SimulatedPlatform {
    pub fn new(providers: Vec<ProviderDescriptor>, origin: (f64, f64)) -> Self {
        Self {
            providers: Mutex::new(providers),
            origin,
            next_id: AtomicU64::new(1),
            emitters: Mutex::new(HashMap::new()),
            fail_after: Mutex::new(None),
            subscribe_delay: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.providers.clone(), config.origin)
    }

    /// New subscriptions report provider loss after `n` samples.
    pub fn set_fail_after(&self, n: Option<u64>) {
        *lock(&self.fail_after) = n;
    }

    /// New subscriptions take this long to come up (cancellable).
    pub fn set_subscribe_delay(&self, delay: Option<Duration>) {
        *lock(&self.subscribe_delay) = delay;
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.emitters).len()
    }
}

impl LocationPlatform for SimulatedPlatform {
    fn list_providers(&self) -> Vec<ProviderDescriptor> {
        lock(&self.providers).clone()
    }

    fn subscribe(
        &self,
        provider: &ProviderDescriptor,
        request: &UpdateRequest,
        sink: UpdateSink,
        cancel: &CancelToken,
    ) -> Result<SubscriptionHandle, PlatformError> {
        let known = lock(&self.providers)
            .iter()
            .any(|p| p.name == provider.name && p.enabled);
        if !known {
            return Err(PlatformError::Unavailable(provider.name.clone()));
        }

        let delay = *lock(&self.subscribe_delay);
        if let Some(delay) = delay {
            if cancel.wait_timeout(delay) {
                return Err(PlatformError::Cancelled);
            }
        }
        if cancel.is_cancelled() {
            return Err(PlatformError::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stop = CancelToken::new();
        let walk = Walk {
            provider: provider.clone(),
            origin: self.origin,
            radius_m: TRACK_RADIUS_M,
            interval: request.interval().max(MIN_INTERVAL),
            fail_after: *lock(&self.fail_after),
        };

        let emitter_stop = stop.clone();
        let thread = thread::Builder::new()
            .name(format!("sim-{}", provider.name))
            .spawn(move || walk.run(&sink, &emitter_stop))
            .map_err(|e| PlatformError::Refused(e.to_string()))?;

        lock(&self.emitters).insert(id, Emitter { stop, thread: Some(thread) });
        debug!(id, provider = %provider.name, "simulated subscription started");
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let emitter = lock(&self.emitters).remove(&handle.0);
        let Some(mut emitter) = emitter else {
            return;
        };
        emitter.stop.cancel();
        if let Some(thread) = emitter.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
        debug!(id = handle.0, "simulated subscription stopped");
    }
}

impl Drop for SimulatedPlatform {
    fn drop(&mut self) {
        let ids: Vec<u64> = lock(&self.emitters).keys().copied().collect();
        for id in ids {
            self.unsubscribe(SubscriptionHandle(id));
        }
    }
}

struct Walk {
    provider: ProviderDescriptor,
    origin: (f64, f64),
    radius_m: f64,
    interval: Duration,
    fail_after: Option<u64>,
}

impl Walk {
    fn run(&self, sink: &UpdateSink, stop: &CancelToken) {
        let mut step = 0u64;
        while !stop.wait_timeout(self.interval) {
            if self.fail_after.is_some_and(|n| step >= n) {
                sink.fail(format!("{} provider disabled", self.provider.name));
                return;
            }
            if !sink.send(self.sample(step)) {
                trace!(step, "simulated sample not accepted");
            }
            step += 1;
        }
    }

    fn sample(&self, step: u64) -> PositionSample {
        let theta = (step as f64 * STEP_DEGREES).to_radians();
        let (lat, lon) = offset(
            self.origin,
            self.radius_m * theta.cos(),
            self.radius_m * theta.sin(),
        );
        let p = &self.provider;
        let arc_m = self.radius_m * STEP_DEGREES.to_radians();

        PositionSample {
            lat,
            lon,
            accuracy_m: accuracy_radius(p.accuracy),
            altitude_m: p.supports_altitude.then_some(25.0),
            bearing_deg: p
                .supports_bearing
                .then(|| (step as f64 * STEP_DEGREES + 90.0) % 360.0),
            speed_mps: p
                .supports_speed
                .then(|| arc_m / self.interval.as_secs_f64()),
            provider: p.name.clone(),
            timestamp: Utc::now(),
        }
    }
}

fn accuracy_radius(accuracy: AccuracyClass) -> f64 {
    match accuracy {
        AccuracyClass::Fine => 5.0,
        AccuracyClass::Medium => 30.0,
        AccuracyClass::Coarse => 500.0,
    }
}

/// Move `north_m`/`east_m` metres from `origin` (equirectangular).
pub fn offset(origin: (f64, f64), north_m: f64, east_m: f64) -> (f64, f64) {
    let (lat0, lon0) = origin;
    let lat = lat0 + north_m / METERS_PER_DEGREE;
    let lon = lon0 + east_m / (METERS_PER_DEGREE * lat0.to_radians().cos());
    (lat, lon)
}

/// Short-range distance in metres (equirectangular).
pub fn distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dy = (b.0 - a.0) * METERS_PER_DEGREE;
    let dx = (b.1 - a.1) * METERS_PER_DEGREE * a.0.to_radians().cos();
    (dx * dx + dy * dy).sqrt()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

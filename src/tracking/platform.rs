//! Host platform seam: provider listing, subscriptions, and the sink the
//! platform pushes samples into.

use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::Duration;

use super::types::{PositionSample, ProviderDescriptor, UpdateRequest};

/// Opaque identifier for an active provider subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Platform-side failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("Provider '{0}' is not available")]
    Unavailable(String),
    #[error("Subscription refused: {0}")]
    Refused(String),
    #[error("Subscription cancelled")]
    Cancelled,
}

/// The positioning services of the host.
///
/// Updates are push-based: `subscribe` hands the platform an [`UpdateSink`]
/// and the platform calls it from its own thread for as long as the
/// subscription lives. `unsubscribe` must not return while a sink call for
/// that subscription is still running on another thread, and no sink call
/// may start after it returns.
///
/// `subscribe` may block. Implementations should poll `cancel` and give up
/// with [`PlatformError::Cancelled`] once it fires; a handle returned after
/// cancellation is unsubscribed by the caller.
pub trait LocationPlatform: Send + Sync {
    fn list_providers(&self) -> Vec<ProviderDescriptor>;

    fn subscribe(
        &self,
        provider: &ProviderDescriptor,
        request: &UpdateRequest,
        sink: UpdateSink,
        cancel: &CancelToken,
    ) -> Result<SubscriptionHandle, PlatformError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Receiving end of a sink, implemented by the tracking service.
pub(crate) trait Delivery: Send + Sync {
    /// Returns false when the session no longer accepts samples.
    fn deliver(&self, generation: u64, sample: PositionSample) -> bool;
    fn fail(&self, generation: u64, reason: String);
}

/// Where a platform pushes samples for one subscription.
///
/// Holds only a weak reference to the service, so a sink kept alive by a
/// misbehaving platform does not keep the service alive.
#[derive(Clone)]
pub struct UpdateSink {
    target: Weak<dyn Delivery>,
    generation: u64,
}

impl UpdateSink {
    pub(crate) fn new(target: Weak<dyn Delivery>, generation: u64) -> Self {
        Self { target, generation }
    }

    /// Push one sample. Returns false if it was dropped because the session
    /// is not active.
    pub fn send(&self, sample: PositionSample) -> bool {
        match self.target.upgrade() {
            Some(target) => target.deliver(self.generation, sample),
            None => false,
        }
    }

    /// Report that the provider became unusable.
    pub fn fail(&self, reason: impl Into<String>) {
        if let Some(target) = self.target.upgrade() {
            target.fail(self.generation, reason.into());
        }
    }
}

impl std::fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSink")
            .field("generation", &self.generation)
            .finish()
    }
}

/// One-shot cancellation flag that blocking code can wait on.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`, waking early on cancellation.
    /// Returns true if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

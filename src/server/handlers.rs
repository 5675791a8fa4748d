use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tracing::info;

use crate::tracking::{
    policy, selector, PositionSample, ProviderDescriptor, QualityTier, SessionSnapshot,
    TrackingError, TrackingEvent,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

/// JSON error reply: `{"error": "...", "code": 409}`.
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "code": self.status.as_u16(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<TrackingError> for ApiError {
    fn from(e: TrackingError) -> Self {
        let status = match e {
            TrackingError::NoProviderAvailable => StatusCode::SERVICE_UNAVAILABLE,
            TrackingError::AlreadyRunning
            | TrackingError::NotRunning
            | TrackingError::Cancelled => StatusCode::CONFLICT,
            TrackingError::Released => StatusCode::GONE,
            TrackingError::ProviderLost { .. } | TrackingError::SubscriptionFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, e.to_string())
    }
}

/// Run a blocking service call off the async workers.
async fn blocking<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> Result<T, TrackingError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from)
}

// ─── GET /api/status ─────────────────────────────────────────────

pub async fn status(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.service.status())
}

// ─── POST /api/start ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StartQuery {
    pub tier: Option<String>,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StartQuery>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let begun = Instant::now();
    let tier = match params.tier.as_deref() {
        Some(t) => t
            .parse::<QualityTier>()
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?,
        None => state.default_tier,
    };

    let snapshot = blocking(state, move |s| s.service.start(tier)).await?;

    info!(
        "POST /api/start tier={} -> {} ({:.1}ms)",
        tier,
        snapshot
            .selected_provider
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or("-"),
        begun.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(Json(snapshot))
}

// ─── POST /api/stop ──────────────────────────────────────────────

pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<SessionSnapshot>, ApiError> {
    let begun = Instant::now();
    let snapshot = blocking(state, |s| {
        s.service.stop()?;
        Ok(s.service.status())
    })
    .await?;

    info!(
        "POST /api/stop -> {} ({:.1}ms)",
        snapshot.state,
        begun.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(Json(snapshot))
}

// ─── GET /api/providers ──────────────────────────────────────────

#[derive(Serialize)]
pub struct TierChoice {
    pub tier: QualityTier,
    pub provider: Option<String>,
}

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderDescriptor>,
    pub selection: Vec<TierChoice>,
}

pub async fn providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    let providers = state.service.providers();
    let selection = QualityTier::ALL
        .iter()
        .map(|&tier| TierChoice {
            tier,
            provider: selector::select_with_options(&policy::resolve(tier), &providers, &state.select)
                .ok()
                .map(|p| p.name),
        })
        .collect();
    Json(ProvidersResponse { providers, selection })
}

// ─── GET /api/last ───────────────────────────────────────────────

#[derive(Serialize)]
pub struct LastResponse {
    pub sample: Option<PositionSample>,
    pub event: Option<TrackingEvent>,
}

pub async fn last(State(state): State<Arc<AppState>>) -> Json<LastResponse> {
    let seen = state.last.lock().unwrap_or_else(PoisonError::into_inner);
    Json(LastResponse {
        sample: seen.sample.clone(),
        event: seen.event.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::tracking::TrackingState;
    use std::time::Duration;
    use tempfile::TempDir;

    fn status_of(e: TrackingError) -> StatusCode {
        ApiError::from(e).status
    }

    fn test_state() -> (Arc<AppState>, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = ServiceConfig::default();
        cfg.request.interval_ms = 5;
        cfg.save_to(&path).unwrap();

        let cfg = ServiceConfig::load_from(&path).unwrap();
        (Arc::new(AppState::from_config(&cfg)), dir)
    }

    async fn post_start(state: &Arc<AppState>, tier: Option<&str>) -> Result<SessionSnapshot, StatusCode> {
        let query = StartQuery { tier: tier.map(str::to_string) };
        match start(State(state.clone()), Query(query)).await {
            Ok(Json(snapshot)) => Ok(snapshot),
            Err(e) => Err(e.status),
        }
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(TrackingError::NoProviderAvailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_of(TrackingError::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(status_of(TrackingError::NotRunning), StatusCode::CONFLICT);
        assert_eq!(status_of(TrackingError::Cancelled), StatusCode::CONFLICT);
        assert_eq!(status_of(TrackingError::Released), StatusCode::GONE);
        assert_eq!(
            status_of(TrackingError::ProviderLost { provider: "gps".into(), reason: "off".into() }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(TrackingError::SubscriptionFailed { provider: "gps".into(), reason: "x".into() }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_tier() {
        let (state, _dir) = test_state();
        assert_eq!(post_start(&state, Some("bogus")).await, Err(StatusCode::BAD_REQUEST));
        assert_eq!(state.service.status().state, TrackingState::Idle);
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let (state, _dir) = test_state();

        let snap = post_start(&state, Some("balanced")).await.unwrap();
        assert_eq!(snap.state, TrackingState::Active);
        assert_eq!(snap.selected_provider.map(|p| p.name).as_deref(), Some("fused"));
        assert!(snap.presence_active);

        assert_eq!(post_start(&state, None).await, Err(StatusCode::CONFLICT));

        let Json(stopped) = match stop(State(state.clone())).await {
            Ok(json) => json,
            Err(e) => panic!("stop failed: {} {}", e.status, e.message),
        };
        assert_eq!(stopped.state, TrackingState::Idle);
        assert!(!stopped.presence_active);

        let again = stop(State(state.clone())).await.err().map(|e| e.status);
        assert_eq!(again, Some(StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn test_last_holds_latest_sample() {
        let (state, _dir) = test_state();
        post_start(&state, Some("high_accuracy")).await.unwrap();

        let mut seen = None;
        for _ in 0..200 {
            let Json(recorded) = last(State(state.clone())).await;
            if recorded.sample.is_some() {
                seen = recorded.sample;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sample = seen.expect("no sample recorded");
        assert_eq!(sample.provider, "fused");
        assert!(sample.altitude_m.is_some());

        tokio::task::spawn_blocking({
            let state = state.clone();
            move || state.service.destroy()
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_providers_lists_selection_per_tier() {
        let (state, _dir) = test_state();
        let Json(resp) = providers(State(state.clone())).await;

        assert_eq!(resp.providers.len(), 4);
        let chosen: Vec<_> = resp
            .selection
            .iter()
            .map(|c| (c.tier, c.provider.as_deref()))
            .collect();
        assert_eq!(
            chosen,
            vec![
                (QualityTier::LowPower, Some("network")),
                (QualityTier::Balanced, Some("fused")),
                (QualityTier::HighAccuracy, Some("fused")),
            ]
        );
    }

    #[tokio::test]
    async fn test_router_builds_with_state() {
        let (state, _dir) = test_state();
        let _app = super::super::build_router(state);
    }
}

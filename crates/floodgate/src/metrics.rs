use crate::antispam::AntiSpam;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Captcha switch state, read and written by the admin API.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptchaSetting {
    /// Whether captchas are enforced.
    pub enabled: bool,
}

/// Shared readiness state.
#[derive(Clone)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct AdminState {
    antispam: Arc<AntiSpam>,
    health: HealthState,
}

/// Admin and probe routes, without `/metrics`.
pub fn admin_router(antispam: Arc<AntiSpam>, health: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/captcha", get(get_captcha).put(put_captcha))
        .route("/antispam/reset/:ip", post(reset_handler))
        .with_state(AdminState { antispam, health })
}

/// Installs the Prometheus recorder and serves `/metrics` plus the admin
/// routes on `addr`.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or binding the
/// HTTP server fails.
pub async fn start_admin_server(
    addr: SocketAddr,
    antispam: Arc<AntiSpam>,
    health: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = admin_router(antispam, health).route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("admin server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness check handler - returns 200 if ready, 503 if not.
async fn ready_handler(State(state): State<AdminState>) -> (StatusCode, Json<ReadyResponse>) {
    if state.health.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

async fn get_captcha(State(state): State<AdminState>) -> Json<CaptchaSetting> {
    Json(CaptchaSetting {
        enabled: state.antispam.switch().is_enabled(),
    })
}

async fn put_captcha(
    State(state): State<AdminState>,
    Json(setting): Json<CaptchaSetting>,
) -> Json<CaptchaSetting> {
    state.antispam.switch().set(setting.enabled);
    tracing::info!(enabled = setting.enabled, "captcha enforcement changed");
    Json(setting)
}

/// Called once a source has solved its captcha out of band.
async fn reset_handler(State(state): State<AdminState>, Path(ip): Path<String>) -> StatusCode {
    state.antispam.reset_score(&ip);
    tracing::debug!(ip = %ip, "score reset");
    StatusCode::NO_CONTENT
}

/// Point-in-time gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("floodgate_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("floodgate_connections_active").decrement(1.0);
    }

    /// Set the number of sources the registry currently tracks.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_tracked_sources(count: usize) {
        metrics::gauge!("floodgate_tracked_sources").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record a client action with the given outcome label.
    pub fn actions_total(outcome: &'static str) {
        metrics::counter!("floodgate_actions_total", "outcome" => outcome).increment(1);
    }

    /// Add to the delivered captcha frames counter.
    pub fn challenges_sent_total(delivered: usize) {
        metrics::counter!("floodgate_challenges_sent_total").increment(delivered as u64);
    }

    /// Increment the failed notification counter with the given reason label.
    pub fn notifications_failed_total(reason: &'static str) {
        metrics::counter!("floodgate_notifications_failed_total", "reason" => reason)
            .increment(1);
    }

    /// Increment the spam detection counter.
    pub fn spam_detected_total() {
        metrics::counter!("floodgate_spam_detected_total").increment(1);
    }

    /// Add to the swept sources counter.
    pub fn sweep_removed_total(removed: usize) {
        metrics::counter!("floodgate_sweep_removed_total").increment(removed as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antispam::ChallengeSwitch;
    use crate::feeds::Feeds;
    use crate::registry::Registry;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    fn antispam(enabled: bool) -> Arc<AntiSpam> {
        Arc::new(AntiSpam::new(
            Arc::new(Registry::new()),
            ChallengeSwitch::new(enabled),
            Arc::new(Feeds::default()),
        ))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = admin_router(antispam(true), HealthState::new());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[test]
    fn default_health_state_is_ready() {
        assert!(HealthState::default().is_ready());
    }

    #[tokio::test]
    async fn ready_reflects_health_state() {
        let health = HealthState::new();
        health.set_ready(false);
        let app = admin_router(antispam(true), health);

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["ready"], false);
    }

    #[tokio::test]
    async fn captcha_switch_round_trips_through_http() {
        let antispam = antispam(false);
        let app = admin_router(antispam.clone(), HealthState::new());

        let response = app
            .clone()
            .oneshot(Request::get("/captcha").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["enabled"], false);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/captcha")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"enabled":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(antispam.switch().is_enabled());
    }

    #[tokio::test]
    async fn reset_endpoint_restores_posting() {
        let antispam = antispam(true);
        let _ = antispam.increment_score("9.9.9.9", Duration::from_secs(5 * 60));
        assert!(!antispam.can_post("9.9.9.9"));

        let app = admin_router(antispam.clone(), HealthState::new());
        let response = app
            .oneshot(
                Request::post("/antispam/reset/9.9.9.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(antispam.can_post("9.9.9.9"));
    }
}

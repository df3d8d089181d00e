//! HTTP service for alert webhooks and on-demand investigations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::{AlertIntake, AlertmanagerPayload};
use crate::evidence::{BackendHealth, ClusterEvidence};
use crate::playbook::PlaybookView;
use crate::report::{Finding, ReportComposer};
use crate::scheduler::{InvestigationError, Investigator};

/// Reports whether the evidence backends answer.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health(&self) -> BackendHealth;
}

#[async_trait]
impl HealthProbe for ClusterEvidence {
    async fn health(&self) -> BackendHealth {
        ClusterEvidence::health(self).await
    }
}

/// Shared server state.
pub struct ServerState {
    investigator: Investigator,
    probe: Arc<dyn HealthProbe>,
    composer: ReportComposer,
    notifier: Arc<notify::Notifier>,
    playbooks: Vec<PlaybookView>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ServerState {
    #[must_use]
    pub fn new(
        investigator: Investigator,
        probe: Arc<dyn HealthProbe>,
        composer: ReportComposer,
        notifier: Arc<notify::Notifier>,
    ) -> Self {
        let playbooks = investigator
            .library()
            .describe(&investigator.settings().log_labels);
        Self {
            investigator,
            probe,
            composer,
            notifier,
            playbooks,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Token cancelled when the server begins shutting down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel in-flight investigations and wait for them to unwind.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/alerts", post(alerts_handler))
        .route("/api/investigate", post(investigate_handler))
        .route("/api/playbooks", get(playbooks_handler))
        .route("/api/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and serve until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> Result<()> {
    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Sentinel listening on {addr}");

    let token = state.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await
        .context("server error")?;

    state.drain().await;
    info!("Sentinel stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct AlertsAccepted {
    status: &'static str,
    received: usize,
    skipped: usize,
    investigations: Vec<Uuid>,
}

/// Alertmanager webhook. Each firing alert gets its own investigation task.
async fn alerts_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<AlertmanagerPayload>,
) -> impl IntoResponse {
    let received = payload.alerts.len();
    let alerts = payload.firing_alerts();
    info!(
        received,
        firing = alerts.len(),
        group_status = %payload.status,
        "Received alert webhook"
    );

    if state.shutdown.is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(AlertsAccepted {
                status: "shutting_down",
                received,
                skipped: received,
                investigations: Vec::new(),
            }),
        );
    }

    let mut investigations = Vec::with_capacity(alerts.len());
    for alert in alerts {
        investigations.push(alert.id);
        let task_state = Arc::clone(&state);
        state.tasks.spawn(async move {
            let cancel = task_state.shutdown.child_token();
            match task_state.investigator.investigate(&alert, &cancel).await {
                Ok(finding) => deliver(&task_state, &finding).await,
                Err(InvestigationError::Cancelled) => {
                    debug!(alert = %alert.id, "Investigation cancelled, discarding");
                }
            }
        });
    }

    (
        StatusCode::ACCEPTED,
        Json(AlertsAccepted {
            status: "accepted",
            received,
            skipped: received - investigations.len(),
            investigations,
        }),
    )
}

async fn deliver(state: &ServerState, finding: &Finding) {
    let report = state.composer.render(finding);
    info!(
        investigation = %finding.id,
        severity = %finding.severity,
        "Finding ready\n{report}"
    );

    let event = state.composer.notify_event(finding);
    for (channel, result) in state.notifier.notify_and_wait(event).await {
        if let Err(e) = result {
            warn!(channel, investigation = %finding.id, error = %e, "Finding delivery failed");
        }
    }
}

#[derive(Debug, Serialize)]
struct InvestigateResponse {
    finding: Finding,
    report: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Structured intake, investigated synchronously.
async fn investigate_handler(
    State(state): State<Arc<ServerState>>,
    Json(intake): Json<AlertIntake>,
) -> axum::response::Response {
    let alert = intake.into_alert();
    info!(alert = %alert.id, kind = %alert.kind, "Investigation requested");

    let cancel = state.shutdown.child_token();
    match state.investigator.investigate(&alert, &cancel).await {
        Ok(finding) => {
            let report = state.composer.render(&finding);
            (StatusCode::OK, Json(InvestigateResponse { finding, report })).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn playbooks_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.playbooks.clone())
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    backends: BackendHealth,
    budget: usize,
    notify_channels: usize,
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let backends = state.probe.health().await;
    let status = if backends.all_healthy() {
        "healthy"
    } else {
        "degraded"
    };

    Json(StatusResponse {
        status,
        backends,
        budget: state.investigator.settings().budget,
        notify_channels: state.notifier.channel_count(),
    })
}

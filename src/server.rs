//! `POST /webhook/sendgrid` and `GET /health` (spec.md §6).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use sgarchive_config::Config;
use sgarchive_ingest::Ingestor;
use sgarchive_objectstore::ObjectStore;
use sgarchive_paths::PathCodec;
use sgarchive_runstatus::RunStatusStore;
use sgarchive_schema::{Event, WireEvent};
use sgarchive_webhook::{VerificationOutcome, WebhookVerifier};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const TIMESTAMP_HEADER: &str = "X-Twilio-Email-Event-Webhook-Timestamp";
const SIGNATURE_HEADER: &str = "X-Twilio-Email-Event-Webhook-Signature";

struct AppState<S: ObjectStore> {
    ingestor: Ingestor<S>,
    verifier: WebhookVerifier,
    store: Arc<S>,
    paths: PathCodec,
}

pub async fn serve<S: ObjectStore + 'static>(
    listen: &str,
    config: Config,
    store: Arc<S>,
    paths: PathCodec,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let allowed_skew = chrono::Duration::from_std(config.webhook.allowed_skew)
        .unwrap_or(sgarchive_webhook::DEFAULT_ALLOWED_SKEW);
    let verifier = WebhookVerifier::new(
        config.webhook.verification_key.as_deref(),
        allowed_skew,
        config.webhook.max_body_bytes,
    )?;

    let state = Arc::new(AppState {
        ingestor: Ingestor::new(Arc::clone(&store), paths.clone()),
        verifier,
        store,
        paths,
    });

    let app = Router::new()
        .route("/webhook/sendgrid", post(webhook::<S>))
        .route("/health", get(health::<S>))
        .with_state(state);

    let addr: SocketAddr = listen.parse()?;
    info!(%addr, "listening for webhook traffic");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn webhook<S: ObjectStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    if body.len() > state.verifier.max_body_bytes() {
        warn!(len = body.len(), "webhook body exceeds the configured size cap");
        return StatusCode::PAYLOAD_TOO_LARGE;
    }

    let timestamp = header_str(&headers, TIMESTAMP_HEADER);
    let signature = header_str(&headers, SIGNATURE_HEADER);

    match state.verifier.verify(&body, timestamp, signature, Utc::now()) {
        VerificationOutcome::Verified => {}
        VerificationOutcome::NotConfigured => {
            warn!("webhook verification key not configured, rejecting");
            return StatusCode::UNAUTHORIZED;
        }
        VerificationOutcome::Failed => {
            warn!("webhook signature verification failed");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let wire_events: Vec<WireEvent> = match serde_json::from_slice(&body) {
        Ok(events) => events,
        Err(error) => {
            warn!(%error, "malformed webhook JSON body");
            return StatusCode::BAD_REQUEST;
        }
    };
    let events: Vec<Event> = wire_events.into_iter().map(Event::from).collect();

    match state.ingestor.ingest(events, Utc::now()).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(error) => {
            error!(%error, "failed to store raw event file");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Process liveness plus the last known compaction run's `endTime`/
/// `errorCount`, when a run document exists (SPEC_FULL.md §3, enriching
/// spec.md §6's bare `{status, timestamp}`).
async fn health<S: ObjectStore>(State(state): State<Arc<AppState<S>>>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let mut body = serde_json::json!({
        "status": "ok",
        "timestamp": now.to_rfc3339(),
    });

    match RunStatusStore::<S>::load(&state.store, &state.paths).await {
        Ok(Some(run)) => {
            body["lastRun"] = serde_json::json!({
                "endTime": run.end_time,
                "errorCount": run.error_count,
            });
        }
        Ok(None) => {}
        Err(error) => warn!(%error, "failed to load run status for health check"),
    }

    Json(body)
}

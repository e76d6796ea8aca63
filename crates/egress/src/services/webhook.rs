//! Webhook delivery service.
//!
//! Delivers event payloads to subscriber URLs with HMAC-SHA256 signatures.
//! Every delivery goes through the resolving validator and the safe
//! executor, reads at most [`MAX_RESPONSE_BODY_BYTES`] of the response and
//! never returns an error: the outcome is always a
//! [`WebhookDeliveryResult`], so one bad endpoint cannot abort a batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue, InvalidHeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, ExecuteError, ValidationError};
use crate::executor::{OutboundRequest, RequestOptions, SafeRequestExecutor};
use crate::validate::Validator;

/// Hard deadline for one delivery.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Maximum response body bytes kept per delivery.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1000;

pub const EVENT_HEADER: &str = "x-webhook-event";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Event name used by [`WebhookDeliveryService::ping`].
pub const PING_EVENT: &str = "ping";

pub const DEFAULT_USER_AGENT: &str = "Egress-Webhook/1.0";

/// A subscriber endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub active: bool,
}

impl WebhookTarget {
    /// An active target with no subscriptions and no secret.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: Uuid::now_v7(),
            name: url.clone(),
            url,
            events: Vec::new(),
            secret: None,
            active: true,
        }
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.active && self.events.iter().any(|e| e == event)
    }
}

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The JSON request body sent for an event.
pub fn build_envelope(event: &str, payload: &serde_json::Value, timestamp_ms: i64) -> String {
    serde_json::json!({
        "event": event,
        "payload": payload,
        "timestamp": timestamp_ms,
    })
    .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub enum WebhookDeliveryResult {
    Success {
        response_status: u16,
        response_body: String,
    },
    Failed(DeliveryFailure),
}

/// Why a delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryFailure {
    /// The destination did not pass validation; nothing was sent.
    #[error(transparent)]
    Rejected(ValidationError),

    /// The destination answered with a non-2xx, non-redirect status.
    #[error("HTTP {response_status}: {status_text}")]
    HttpStatus {
        response_status: u16,
        status_text: String,
        response_body: String,
    },

    #[error(transparent)]
    Transport(ExecuteError),

    #[error("failed to sign payload: {0}")]
    Signing(String),
}

impl DeliveryFailure {
    /// The taxonomy entry, if this failure has one. Signing failures do not.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DeliveryFailure::Rejected(e) => Some(e.kind()),
            DeliveryFailure::HttpStatus {
                response_status, ..
            } => Some(ErrorKind::HttpError(*response_status)),
            DeliveryFailure::Transport(e) => Some(e.kind()),
            DeliveryFailure::Signing(_) => None,
        }
    }
}

impl WebhookDeliveryResult {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            WebhookDeliveryResult::Success { .. } => DeliveryStatus::Success,
            WebhookDeliveryResult::Failed(_) => DeliveryStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == DeliveryStatus::Success
    }

    pub fn response_status(&self) -> Option<u16> {
        match self {
            WebhookDeliveryResult::Success {
                response_status, ..
            }
            | WebhookDeliveryResult::Failed(DeliveryFailure::HttpStatus {
                response_status, ..
            }) => Some(*response_status),
            WebhookDeliveryResult::Failed(DeliveryFailure::Transport(ExecuteError::Redirect {
                status,
                ..
            })) => Some(*status),
            WebhookDeliveryResult::Failed(_) => None,
        }
    }

    pub fn response_body(&self) -> Option<&str> {
        match self {
            WebhookDeliveryResult::Success { response_body, .. }
            | WebhookDeliveryResult::Failed(DeliveryFailure::HttpStatus { response_body, .. }) => {
                Some(response_body)
            }
            WebhookDeliveryResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            WebhookDeliveryResult::Success { .. } => None,
            WebhookDeliveryResult::Failed(failure) => Some(failure.to_string()),
        }
    }

    pub fn failure(&self) -> Option<&DeliveryFailure> {
        match self {
            WebhookDeliveryResult::Success { .. } => None,
            WebhookDeliveryResult::Failed(failure) => Some(failure),
        }
    }
}

/// One delivery of one event to one target. A retry is a new attempt.
#[derive(Debug)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub target_id: Uuid,
    pub event: String,
    pub attempted_at: DateTime<Utc>,
    pub result: WebhookDeliveryResult,
}

impl DeliveryAttempt {
    pub fn to_record(&self) -> DeliveryRecord {
        DeliveryRecord {
            id: self.id,
            target_id: self.target_id,
            event: self.event.clone(),
            status: self.result.status(),
            response_status: self.result.response_status(),
            response_body: self.result.response_body().map(str::to_string),
            error: self.result.error(),
            attempted_at: self.attempted_at,
        }
    }
}

/// Flat, serializable view of a [`DeliveryAttempt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub target_id: Uuid,
    pub event: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Persists delivery attempts (execution logs).
#[async_trait]
pub trait DeliveryRecorder: Send + Sync {
    async fn record(&self, attempt: &DeliveryAttempt, request_payload: &str) -> anyhow::Result<()>;
}

/// Recorder that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

#[async_trait]
impl DeliveryRecorder for NoopRecorder {
    async fn record(&self, _attempt: &DeliveryAttempt, _request_payload: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Webhook delivery over the safe executor.
#[derive(Clone)]
pub struct WebhookDeliveryService {
    validator: Validator,
    executor: SafeRequestExecutor,
    user_agent: HeaderValue,
    recorder: Arc<dyn DeliveryRecorder>,
    shutdown: CancellationToken,
}

impl WebhookDeliveryService {
    pub fn new(validator: Validator, executor: SafeRequestExecutor) -> Self {
        Self {
            validator,
            executor,
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
            recorder: Arc::new(NoopRecorder),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Result<Self, InvalidHeaderValue> {
        self.user_agent = HeaderValue::from_str(user_agent)?;
        Ok(self)
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn DeliveryRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Cancelling `shutdown` cancels every in-flight delivery. Each delivery
    /// gets its own child token, so deliveries never cancel each other.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Deliver `payload` to `url`.
    ///
    /// Validation failures are returned before anything is sent. With a
    /// non-empty `secret` the payload is signed; without one it is sent
    /// unsigned and a warning is logged.
    pub async fn deliver(
        &self,
        url: &str,
        payload: &str,
        event: &str,
        secret: Option<&str>,
    ) -> WebhookDeliveryResult {
        debug!(url = %url, event = %event, "validating webhook destination");
        let destination = match self.validator.validate_resolved(url).await {
            Ok(destination) => destination,
            Err(e) => {
                warn!(url = %url, error = %e, "webhook destination rejected");
                return WebhookDeliveryResult::Failed(DeliveryFailure::Rejected(e));
            }
        };

        let event_value = match HeaderValue::from_str(event) {
            Ok(value) => value,
            Err(e) => {
                return WebhookDeliveryResult::Failed(DeliveryFailure::Transport(
                    ExecuteError::Request(format!("invalid event name: {e}")),
                ));
            }
        };

        let mut request = OutboundRequest::post(payload.as_bytes().to_vec())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(USER_AGENT, self.user_agent.clone())
            .header(HeaderName::from_static(EVENT_HEADER), event_value);

        debug!(url = %url, event = %event, "signing webhook payload");
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => {
                let signature = sign_payload(secret, payload.as_bytes())
                    .map_err(|e| e.to_string())
                    .and_then(|sig| HeaderValue::try_from(sig).map_err(|e| e.to_string()));
                match signature {
                    Ok(value) => {
                        request = request.header(HeaderName::from_static(SIGNATURE_HEADER), value);
                    }
                    Err(e) => return WebhookDeliveryResult::Failed(DeliveryFailure::Signing(e)),
                }
            }
            None => {
                warn!(url = %url, "delivering webhook without HMAC signature: no secret configured");
            }
        }

        debug!(url = %url, ip = %destination.resolved_ip(), "sending webhook");
        let options =
            RequestOptions::with_timeout(WEBHOOK_TIMEOUT).cancel_with(self.shutdown.child_token());
        let mut response = match self.executor.execute(destination, request, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, event = %event, error = %e, "webhook delivery failed");
                return WebhookDeliveryResult::Failed(DeliveryFailure::Transport(e));
            }
        };

        let status = response.status();
        let mut captured = Vec::with_capacity(MAX_RESPONSE_BODY_BYTES);
        if let Err(e) = response
            .read_capped(MAX_RESPONSE_BODY_BYTES, &mut captured)
            .await
        {
            debug!(
                url = %url,
                captured = captured.len(),
                error = %e,
                "failed to read webhook response body"
            );
        }
        let response_body = sanitize_body(&captured);

        if status.is_success() {
            info!(url = %url, event = %event, status = status.as_u16(), "webhook delivered");
            WebhookDeliveryResult::Success {
                response_status: status.as_u16(),
                response_body,
            }
        } else {
            warn!(url = %url, event = %event, status = status.as_u16(), "webhook delivery failed");
            WebhookDeliveryResult::Failed(DeliveryFailure::HttpStatus {
                response_status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                response_body,
            })
        }
    }

    /// Deliver `event` to every active target subscribed to it.
    ///
    /// Targets are processed one after another. Each delivery runs in its
    /// own task: a panic is logged and the remaining targets still get
    /// their delivery. Dropping the returned future aborts the delivery in
    /// flight and skips the rest.
    pub async fn dispatch(
        &self,
        targets: &[WebhookTarget],
        event: &str,
        payload: &serde_json::Value,
    ) -> Vec<DeliveryAttempt> {
        let request_payload = build_envelope(event, payload, Utc::now().timestamp_millis());
        let mut attempts = Vec::new();

        for target in targets.iter().filter(|t| t.subscribes_to(event)) {
            let service = self.clone();
            let owned_target = target.clone();
            let owned_event = event.to_string();
            let owned_payload = request_payload.clone();

            let handle = tokio::spawn(async move {
                service
                    .attempt(&owned_target, &owned_event, &owned_payload)
                    .await
            });
            let _abort = AbortOnDrop(handle.abort_handle());

            match handle.await {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => error!(target = %target.id, event = %event, error = %e, "webhook delivery panicked"),
            }
        }

        if !attempts.is_empty() {
            debug!(event = %event, attempts = attempts.len(), "dispatched webhooks");
        }
        attempts
    }

    /// Send a test event to `target`, regardless of its subscriptions.
    pub async fn ping(&self, target: &WebhookTarget) -> DeliveryAttempt {
        let payload = serde_json::json!({ "message": "Test webhook delivery" });
        let request_payload = build_envelope(PING_EVENT, &payload, Utc::now().timestamp_millis());
        self.attempt(target, PING_EVENT, &request_payload).await
    }

    /// Send a previously built request body again, as a new attempt.
    pub async fn redeliver(
        &self,
        target: &WebhookTarget,
        event: &str,
        request_payload: &str,
    ) -> DeliveryAttempt {
        self.attempt(target, event, request_payload).await
    }

    async fn attempt(
        &self,
        target: &WebhookTarget,
        event: &str,
        request_payload: &str,
    ) -> DeliveryAttempt {
        let attempted_at = Utc::now();
        let result = self
            .deliver(&target.url, request_payload, event, target.secret.as_deref())
            .await;

        let attempt = DeliveryAttempt {
            id: Uuid::now_v7(),
            target_id: target.id,
            event: event.to_string(),
            attempted_at,
            result,
        };

        if let Err(e) = self.recorder.record(&attempt, request_payload).await {
            error!(target = %target.id, attempt = %attempt.id, error = %e, "failed to record webhook delivery");
        }

        attempt
    }
}

/// Aborts a spawned delivery when its caller goes away.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl std::fmt::Debug for WebhookDeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDeliveryService")
            .field("validator", &self.validator)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Decode captured bytes for storage.
///
/// Control characters other than `\n`, `\r` and `\t` are stripped, and the
/// result is cut to [`MAX_RESPONSE_BODY_BYTES`] on a char boundary.
fn sanitize_body(captured: &[u8]) -> String {
    let mut body: String = String::from_utf8_lossy(captured)
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    if body.len() > MAX_RESPONSE_BODY_BYTES {
        let mut cut = MAX_RESPONSE_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

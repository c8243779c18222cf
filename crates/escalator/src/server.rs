//! HTTP surface: the notification API and Twilio webhooks
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /v1/notifications` | submit a plan |
//! | `GET /v1/notifications` | list running plans |
//! | `DELETE /v1/notifications/:plan_id` | stop a plan |
//! | `POST /sms/reply` | inbound text reply |
//! | `POST /:plan_id/digits` | key pressed during a call |
//! | `GET\|POST /:plan_id/twiml/:action` | call script |
//! | `POST /:plan_id/callback` | delivery status callback |

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use escalation_engine::{
    Acknowledgments, EngineError, EngineHandle, KeypressOutcome, Plan, PlanId, ReplyOutcome,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::twilio::TwilioClient;
use crate::twiml;

const ACK_CONFIRMATION: &str = "Your acknowledgment has been received. Thanks!";
const ACK_NOT_RECOGNIZED: &str = "Sorry, that response was not recognized. \
     Please reply with the code from the notification you received.";

/// Everything a request handler needs
pub struct AppState {
    pub engine: EngineHandle,
    pub acks: Acknowledgments,
    pub twilio: Arc<TwilioClient>,
}

impl AppState {
    pub fn new(engine: EngineHandle, twilio: Arc<TwilioClient>) -> Self {
        Self {
            acks: Acknowledgments::new(engine.clone()),
            engine,
            twilio,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}

pub type SharedState = Arc<AppState>;

/// Handler failures, rendered as `{"error": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),

    #[error("No active notification for {0}")]
    NotFound(PlanId),

    #[error("Unknown call script {0:?}")]
    UnknownScript(String),

    #[error("Failed to render call script: {0}")]
    Script(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Engine(EngineError::InvalidPlan { .. }) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Engine(EngineError::DuplicatePlan { .. }) => StatusCode::CONFLICT,
            Self::Engine(EngineError::Stopped) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) | Self::UnknownScript(_) => StatusCode::NOT_FOUND,
            Self::Script(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Notification API
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub uuid: PlanId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveNotification {
    pub uuid: PlanId,
    pub recipient: String,
    pub message: String,
    pub steps: usize,
}

async fn create_notification(
    State(state): State<SharedState>,
    Json(plan): Json<Plan>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let uuid = state.engine.submit(plan).await?;
    Ok((StatusCode::ACCEPTED, Json(CreatedResponse { uuid })))
}

async fn list_notifications(State(state): State<SharedState>) -> Json<Vec<ActiveNotification>> {
    let registry = state.engine.registry();
    let active = registry
        .active_plans()
        .into_iter()
        .filter_map(|id| registry.plan(id))
        .map(|plan| ActiveNotification {
            uuid: plan.id,
            recipient: plan.recipient.clone(),
            message: plan.message.clone(),
            steps: plan.steps.len(),
        })
        .collect();
    Json(active)
}

async fn delete_notification(
    State(state): State<SharedState>,
    Path(plan_id): Path<PlanId>,
) -> Result<StatusCode, ApiError> {
    info!(%plan_id, "Stop requested over the API");
    state.engine.stop(plan_id).await?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Twilio webhooks
// ============================================================================

#[derive(Debug, Deserialize)]
struct SmsReplyForm {
    #[serde(rename = "From", default)]
    from: String,
    #[serde(rename = "Body", default)]
    body: String,
}

async fn sms_reply(
    State(state): State<SharedState>,
    Form(form): Form<SmsReplyForm>,
) -> Result<StatusCode, ApiError> {
    if form.from.is_empty() {
        return Err(ApiError::BadRequest("'From' was not provided".to_string()));
    }

    let outcome = state.acks.handle_reply(&form.from, &form.body).await?;
    let reply = match outcome {
        ReplyOutcome::Acknowledged(_) | ReplyOutcome::Stale(_) => ACK_CONFIRMATION,
        ReplyOutcome::Unrecognized => ACK_NOT_RECOGNIZED,
    };

    // Answer the webhook without waiting on Twilio
    let twilio = Arc::clone(&state.twilio);
    tokio::spawn(async move {
        if let Err(e) = twilio.send_plain(&form.from, reply).await {
            warn!(to = %form.from, error = %e, "Failed to send reply text");
        }
    });

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DigitsForm {
    #[serde(rename = "Digits", default)]
    digits: String,
    #[serde(rename = "CallSid", default)]
    call_sid: String,
}

async fn digits(
    State(state): State<SharedState>,
    Path(plan_id): Path<PlanId>,
    Form(form): Form<DigitsForm>,
) -> Result<StatusCode, ApiError> {
    match state.acks.handle_keypress(plan_id, &form.digits).await? {
        KeypressOutcome::NoInput => Ok(StatusCode::OK),
        KeypressOutcome::UnknownPlan => Err(ApiError::NotFound(plan_id)),
        KeypressOutcome::Acknowledged => {
            if form.call_sid.is_empty() {
                return Ok(StatusCode::OK);
            }
            let twilio = Arc::clone(&state.twilio);
            let url = twilio.callback_url(plan_id, "twiml/acknowledged");
            tokio::spawn(async move {
                if let Err(e) = twilio.redirect_call(&form.call_sid, &url).await {
                    warn!(%plan_id, call_sid = %form.call_sid, error = %e, "Failed to redirect call");
                }
            });
            Ok(StatusCode::OK)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScriptQuery {
    step: Option<usize>,
}

async fn call_script(
    State(state): State<SharedState>,
    Path((plan_id, action)): Path<(PlanId, String)>,
    Query(query): Query<ScriptQuery>,
) -> Result<Response, ApiError> {
    let xml = match action.as_str() {
        "notify" => {
            let plan = state
                .engine
                .registry()
                .plan(plan_id)
                .ok_or(ApiError::NotFound(plan_id))?;
            let message = match query.step {
                Some(step) => plan.message_for(step),
                None => plan.message.as_str(),
            };
            let gather_action = state.twilio.callback_url(plan_id, "digits");
            twiml::notify_script(message, &gather_action)
        }
        "acknowledged" => twiml::acknowledged_script(),
        _ => return Err(ApiError::UnknownScript(action.clone())),
    }
    .map_err(|e| ApiError::Script(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, "text/xml")], xml).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct StatusForm {
    #[serde(rename = "MessageStatus")]
    message_status: Option<String>,
    #[serde(rename = "CallStatus")]
    call_status: Option<String>,
    #[serde(rename = "ErrorCode")]
    error_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub uuid: String,
    pub message: String,
}

async fn status_callback(
    Path(uuid): Path<String>,
    form: Option<Form<StatusForm>>,
) -> Json<CallbackResponse> {
    let status = form.map(|Form(status)| status).unwrap_or_default();
    info!(
        plan_id = %uuid,
        message_status = status.message_status.as_deref().unwrap_or("-"),
        call_status = status.call_status.as_deref().unwrap_or("-"),
        error_code = status.error_code.as_deref().unwrap_or("-"),
        "Status callback"
    );
    Json(CallbackResponse {
        uuid,
        message: "Callback received".to_string(),
    })
}

/// Build the service router
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/v1/notifications",
            post(create_notification).get(list_notifications),
        )
        .route("/v1/notifications/:plan_id", delete(delete_notification))
        .route("/sms/reply", post(sms_reply))
        .route("/:plan_id/digits", post(digits))
        .route("/:plan_id/twiml/:action", get(call_script).post(call_script))
        .route("/:plan_id/callback", post(status_callback))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(%addr, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use escalation_engine::{
        ContactBook, ContactMethod, Engine, EngineConfig, EscalationEvent, EventFilter, Step,
        StopReason,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::twilio::TwilioConfig;

    const RECIPIENT: &str = "+15550001111";

    fn state() -> SharedState {
        let engine = Engine::spawn(&EngineConfig::default(), ContactBook::new());
        let config = TwilioConfig {
            // Nothing listens here; outbound texts fail fast and are logged
            api_base_url: "http://127.0.0.1:9/Accounts/".to_string(),
            account_sid: "AC123".to_string(),
            ..TwilioConfig::default()
        };
        let twilio = TwilioClient::new(config, "https://alerts.example.com")
            .unwrap()
            .shared();
        AppState::new(engine, twilio).shared()
    }

    fn plan() -> Plan {
        Plan::new(
            RECIPIENT,
            "db-01 is down",
            vec![
                Step::once(ContactMethod::SendMessage, Duration::from_secs(600)),
                Step::repeating(ContactMethod::PlaceCall, Duration::from_secs(600))
                    .with_message("db-01 is still down"),
            ],
        )
    }

    async fn send(state: &SharedState, request: Request<Body>) -> (StatusCode, String) {
        let response = router(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn wait_inactive(state: &SharedState, id: PlanId) {
        for _ in 0..100 {
            if !state.engine.is_active(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("plan {} still active", id);
    }

    #[tokio::test]
    async fn test_create_and_list_notifications() {
        let state = state();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/notifications")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&plan()).unwrap()))
            .unwrap();

        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let created: CreatedResponse = serde_json::from_str(&body).unwrap();
        assert!(state.engine.is_active(created.uuid));

        let (status, body) = send(
            &state,
            Request::get("/v1/notifications").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let active: Vec<ActiveNotification> = serde_json::from_str(&body).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].uuid, created.uuid);
        assert_eq!(active[0].recipient, RECIPIENT);
        assert_eq!(active[0].steps, 2);
    }

    #[tokio::test]
    async fn test_create_invalid_plan_is_bad_request() {
        let state = state();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/notifications")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"recipient": "+15550001111", "message": "x", "steps": []}"#,
            ))
            .unwrap();

        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("plan has no steps"));
        assert!(state.engine.active_plans().is_empty());
    }

    #[tokio::test]
    async fn test_create_plan_with_unbounded_interval_is_bad_request() {
        let state = state();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/notifications")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"recipient": "+15550001111", "message": "x",
                    "steps": [{"method": "place_call", "notify_every_secs": 18446744073709551615}]}"#,
            ))
            .unwrap();

        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("notify_every"));
        assert!(state.engine.active_plans().is_empty());
    }

    #[tokio::test]
    async fn test_delete_notification() {
        let state = state();
        let id = state.engine.submit(plan()).await.unwrap();
        let mut stopped = state
            .engine
            .events()
            .subscribe_filtered(EventFilter::new().plan(id).types(vec!["plan_stopped"]));

        let request = Request::delete(format!("/v1/notifications/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_inactive(&state, id).await;
        match stopped.recv().await.unwrap() {
            EscalationEvent::PlanStopped { reason, .. } => assert_eq!(reason, StopReason::Stopped),
            other => panic!("unexpected event {:?}", other),
        }

        // Deleting again is accepted and ignored
        let request = Request::delete(format!("/v1/notifications/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_sms_reply_acknowledges() {
        let state = state();
        let id = state.engine.submit(plan()).await.unwrap();
        state
            .engine
            .registry()
            .remember(RECIPIENT, "4821".parse().unwrap(), id);

        let (status, _) = send(&state, form("/sms/reply", "From=%2B15550001111&Body=4821")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        wait_inactive(&state, id).await;
        assert_eq!(state.engine.registry().pending_conversations(), 0);
    }

    #[tokio::test]
    async fn test_sms_reply_unrecognized_and_missing_sender() {
        let state = state();
        let id = state.engine.submit(plan()).await.unwrap();
        state
            .engine
            .registry()
            .remember(RECIPIENT, "4821".parse().unwrap(), id);

        let (status, _) = send(&state, form("/sms/reply", "From=%2B15550001111&Body=ok")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.engine.is_active(id));
        assert_eq!(state.engine.registry().pending_conversations(), 1);

        let (status, body) = send(&state, form("/sms/reply", "Body=4821")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("From"));
        assert!(state.engine.is_active(id));
    }

    #[tokio::test]
    async fn test_digits() {
        let state = state();
        let id = state.engine.submit(plan()).await.unwrap();

        let (status, _) = send(
            &state,
            form(&format!("/{}/digits", PlanId::new()), "Digits=1&CallSid=CA01"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&state, form(&format!("/{}/digits", id), "CallSid=CA01")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.engine.is_active(id));

        let (status, _) = send(
            &state,
            form(&format!("/{}/digits", id), "Digits=7&CallSid=CA01"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        wait_inactive(&state, id).await;
    }

    #[tokio::test]
    async fn test_call_scripts() {
        let state = state();
        let id = state.engine.submit(plan()).await.unwrap();

        let response = router(Arc::clone(&state))
            .oneshot(
                Request::get(format!("/{}/twiml/notify?step=1", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let xml = String::from_utf8(body.to_vec()).unwrap();
        assert!(xml.contains("db-01 is still down"));
        assert!(xml.contains(&format!(
            r#"action="https://alerts.example.com/{}/digits""#,
            id
        )));

        // Without a step the plan message is read
        let (status, xml) = send(&state, form(&format!("/{}/twiml/notify", id), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(xml.contains(">db-01 is down<"));

        let (status, xml) = send(
            &state,
            form(&format!("/{}/twiml/acknowledged", id), ""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(xml.contains("acknowledged"));

        let (status, _) = send(
            &state,
            Request::get(format!("/{}/twiml/notify", PlanId::new()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &state,
            Request::get(format!("/{}/twiml/dance", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_callback() {
        let state = state();
        let id = PlanId::new();

        let (status, body) = send(
            &state,
            form(&format!("/{}/callback", id), "MessageStatus=delivered"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: CallbackResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.uuid, id.to_string());
        assert_eq!(response.message, "Callback received");
    }
}

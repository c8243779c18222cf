//! Twilio REST transport
//!
//! Text messages and voice calls go out as form-encoded POSTs against the
//! account's `Messages.json` / `Calls.json` resources. `SmsContact` and
//! `VoiceContact` plug the client into the engine's `ContactBook`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use escalation_engine::{
    Attempt, Contact, ContactBook, ContactMethod, ContactOutcome, PlanId, TransportError,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

/// Twilio answers with small JSON documents; anything past this is dropped
const MAX_RESPONSE_BYTES: usize = 20 * 1024;

const DEFAULT_API_BASE_URL: &str = "https://api.twilio.com/2010-04-01/Accounts/";

/// Seconds Twilio lets a call ring before giving up
const CALL_RING_TIMEOUT: &str = "20";

/// Twilio account settings
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    /// Accounts endpoint, including the trailing slash
    pub api_base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    /// Caller id for texts and calls
    pub from_number: String,
    #[serde(rename = "request_timeout_secs", deserialize_with = "secs")]
    pub request_timeout: Duration,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("api_base_url", &self.api_base_url)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn secs<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
}

/// Response to a `Messages.json` POST (only the fields we read)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageResponse {
    pub sid: Option<String>,
    pub to: Option<String>,
    pub from: Option<String>,
    pub body: Option<String>,
    pub status: Option<String>,
    pub num_segments: Option<String>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Response to a `Calls.json` POST
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallResponse {
    pub sid: Option<String>,
    pub to: Option<String>,
    pub from: Option<String>,
    pub status: Option<String>,
}

/// Thin client over the Twilio REST API
pub struct TwilioClient {
    http: reqwest::Client,
    config: TwilioConfig,
    /// Public base URL Twilio calls back into, without trailing slash
    callback_base: String,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig, callback_base: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            callback_base: callback_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// `{callback_base}/{plan_id}/{path}`
    pub fn callback_url(&self, plan_id: PlanId, path: &str) -> String {
        format!("{}/{}/{}", self.callback_base, plan_id, path)
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}{}/{}",
            self.config.api_base_url, self.config.account_sid, resource
        )
    }

    /// Send a text. With a `plan_id`, Twilio reports delivery status to the
    /// plan's callback endpoint.
    pub async fn send_message(
        &self,
        to: &str,
        body: &str,
        plan_id: Option<PlanId>,
    ) -> Result<MessageResponse, TransportError> {
        let mut form = vec![
            ("From", self.config.from_number.clone()),
            ("To", to.to_string()),
            ("Body", body.to_string()),
        ];
        if let Some(id) = plan_id {
            form.push(("StatusCallback", self.callback_url(id, "callback")));
        }

        let response: MessageResponse = self.post_form("Messages.json", &form).await?;
        debug!(to, sid = ?response.sid, status = ?response.status, "Message accepted");
        Ok(response)
    }

    /// Send a text that expects no acknowledgment
    pub async fn send_plain(&self, to: &str, body: &str) -> Result<MessageResponse, TransportError> {
        self.send_message(to, body, None).await
    }

    /// Place a call that fetches its script from the plan's `twiml/notify`
    /// endpoint; `step` selects which step's message is read. Answering
    /// machines are hung up on.
    pub async fn place_call(
        &self,
        to: &str,
        plan_id: PlanId,
        step: usize,
    ) -> Result<CallResponse, TransportError> {
        let script = format!("twiml/notify?step={}", step);
        let form = vec![
            ("From", self.config.from_number.clone()),
            ("To", to.to_string()),
            ("Url", self.callback_url(plan_id, &script)),
            ("IfMachine", "Hangup".to_string()),
            ("Timeout", CALL_RING_TIMEOUT.to_string()),
        ];

        let response: CallResponse = self.post_form("Calls.json", &form).await?;
        debug!(to, sid = ?response.sid, status = ?response.status, "Call queued");
        Ok(response)
    }

    /// Point a live call at a different script
    pub async fn redirect_call(&self, call_sid: &str, url: &str) -> Result<CallResponse, TransportError> {
        let form = vec![("Url", url.to_string())];
        self.post_form(&format!("Calls/{}.json", call_sid), &form)
            .await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        resource: &str,
        form: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let mut response = self
            .http
            .post(self.resource_url(resource))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        // The provider has answered, so a broken body no longer means the
        // attempt went undelivered
        let status = response.status();
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?
        {
            let room = MAX_RESPONSE_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_RESPONSE_BYTES {
                break;
            }
        }

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        parse_response(&body)
    }
}

fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}

/// Text body carrying the acknowledgment instructions
pub fn message_with_code(message: &str, code: &str) -> String {
    format!("{} - Reply with \"{}\" to acknowledge", message, code)
}

/// `SendMessage` capability
pub struct SmsContact {
    client: Arc<TwilioClient>,
}

impl SmsContact {
    pub fn new(client: Arc<TwilioClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Contact for SmsContact {
    async fn perform(&self, attempt: &Attempt) -> Result<ContactOutcome, TransportError> {
        let body = match &attempt.ack_code {
            Some(code) => message_with_code(&attempt.content, code.as_str()),
            None => attempt.content.clone(),
        };
        info!(plan_id = %attempt.plan_id, to = %attempt.recipient, "Sending SMS");

        let response = self
            .client
            .send_message(&attempt.recipient, &body, Some(attempt.plan_id))
            .await?;
        Ok(ContactOutcome {
            provider_ref: response.sid,
            status: response.status,
        })
    }
}

/// `PlaceCall` capability
pub struct VoiceContact {
    client: Arc<TwilioClient>,
}

impl VoiceContact {
    pub fn new(client: Arc<TwilioClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Contact for VoiceContact {
    async fn perform(&self, attempt: &Attempt) -> Result<ContactOutcome, TransportError> {
        info!(plan_id = %attempt.plan_id, to = %attempt.recipient, "Placing call");

        let response = self
            .client
            .place_call(&attempt.recipient, attempt.plan_id, attempt.step)
            .await?;
        Ok(ContactOutcome {
            provider_ref: response.sid,
            status: response.status,
        })
    }
}

/// Contact book wired to Twilio for both methods
pub fn contact_book(client: &Arc<TwilioClient>) -> ContactBook {
    ContactBook::new()
        .with(
            ContactMethod::SendMessage,
            Arc::new(SmsContact::new(Arc::clone(client))),
        )
        .with(
            ContactMethod::PlaceCall,
            Arc::new(VoiceContact::new(Arc::clone(client))),
        )
}

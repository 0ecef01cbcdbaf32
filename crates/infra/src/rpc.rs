//! Outbound clients: tenant back-check, tenant callback, vendor sends.
//!
//! Tenants register a `service_name`; a [`ServiceRegistry`] resolves it to a
//! base URL (the stand-in for service discovery). All HTTP implementations
//! are JSON-over-POST with per-request timeouts. In-memory doubles back the
//! tests and the self-contained dev wiring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::{Channel, CoreError, CoreResult, Notification, SendStatus};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a tenant-registered service name to a base URL.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, service_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.services.insert(service_name.into(), base_url.into());
        self
    }

    pub fn resolve(&self, service_name: &str) -> CoreResult<&str> {
        self.services
            .get(service_name)
            .map(String::as_str)
            .ok_or_else(|| CoreError::external(format!("unknown service {service_name:?}")))
    }
}

/// Outcome of a tenant back-check probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Unknown,
    Commit,
    Cancel,
}

/// Probes a tenant for the outcome of a PREPARE-state transaction.
#[async_trait]
pub trait TxCheckClient: Send + Sync {
    async fn check(&self, service_name: &str, key: &str) -> CoreResult<CheckStatus>;
}

/// Request body delivered to the tenant's callback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub notification_id: i64,
    pub original: CallbackOriginalRequest,
    pub result: CallbackResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackOriginalRequest {
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: Channel,
    pub template_id: i64,
    pub template_params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResult {
    pub notification_id: i64,
    pub status: SendStatus,
}

impl CallbackRequest {
    pub fn from_notification(n: &Notification) -> Self {
        Self {
            notification_id: n.id,
            original: CallbackOriginalRequest {
                key: n.key.clone(),
                receivers: n.receivers.clone(),
                channel: n.channel,
                template_id: n.template.id,
                template_params: n.template.params.clone(),
            },
            result: CallbackResult {
                notification_id: n.id,
                status: n.status,
            },
        }
    }
}

/// Delivers send outcomes to tenants. Returns the tenant's business-level
/// acceptance (`true` = handled, no retry needed).
#[async_trait]
pub trait CallbackClient: Send + Sync {
    async fn handle_notification_result(
        &self,
        service_name: &str,
        request: &CallbackRequest,
    ) -> CoreResult<bool>;
}

/// What a channel hands the vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSendRequest {
    pub receivers: Vec<String>,
    pub signature: String,
    pub provider_template_id: String,
    pub params: HashMap<String, String>,
    /// Decrypted only for this call.
    pub api_key: String,
    pub api_secret: String,
}

/// Per-receiver vendor verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSendResponse {
    pub statuses: Vec<VendorReceiverStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorReceiverStatus {
    pub receiver: String,
    pub code: String,
    pub message: String,
}

impl VendorSendResponse {
    /// Success iff every receiver reports `OK` (case-insensitive).
    pub fn all_ok(&self) -> bool {
        !self.statuses.is_empty()
            && self.statuses.iter().all(|s| s.code.eq_ignore_ascii_case("OK"))
    }
}

/// Vendor transport; one instance per vendor endpoint shape.
#[async_trait]
pub trait VendorClient: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        request: &VendorSendRequest,
    ) -> CoreResult<VendorSendResponse>;
}

#[derive(Debug, Serialize)]
struct CheckRequestBody<'a> {
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckResponseBody {
    status: CheckStatus,
}

/// HTTP back-check client.
#[derive(Clone)]
pub struct HttpTxCheckClient {
    client: reqwest::Client,
    registry: ServiceRegistry,
}

impl HttpTxCheckClient {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            registry,
        }
    }
}

#[async_trait]
impl TxCheckClient for HttpTxCheckClient {
    async fn check(&self, service_name: &str, key: &str) -> CoreResult<CheckStatus> {
        let base = self.registry.resolve(service_name)?;
        let response = self
            .client
            .post(format!("{base}/check"))
            .json(&CheckRequestBody { key })
            .send()
            .await
            .map_err(|e| CoreError::external(format!("back-check {service_name}: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::external(format!(
                "back-check {service_name}: http {}",
                response.status()
            )));
        }
        let body: CheckResponseBody = response
            .json()
            .await
            .map_err(|e| CoreError::external(format!("back-check {service_name}: {e}")))?;
        Ok(body.status)
    }
}

#[derive(Debug, Deserialize)]
struct CallbackResponseBody {
    success: bool,
}

/// HTTP callback client.
#[derive(Clone)]
pub struct HttpCallbackClient {
    client: reqwest::Client,
    registry: ServiceRegistry,
}

impl HttpCallbackClient {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            registry,
        }
    }
}

#[async_trait]
impl CallbackClient for HttpCallbackClient {
    async fn handle_notification_result(
        &self,
        service_name: &str,
        request: &CallbackRequest,
    ) -> CoreResult<bool> {
        let base = self.registry.resolve(service_name)?;
        let response = self
            .client
            .post(format!("{base}/handle-notification-result"))
            .json(request)
            .send()
            .await
            .map_err(|e| CoreError::external(format!("callback {service_name}: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::external(format!(
                "callback {service_name}: http {}",
                response.status()
            )));
        }
        let body: CallbackResponseBody = response
            .json()
            .await
            .map_err(|e| CoreError::external(format!("callback {service_name}: {e}")))?;
        Ok(body.success)
    }
}

/// HTTP vendor client (JSON POST to the provider endpoint).
#[derive(Clone)]
pub struct HttpVendorClient {
    client: reqwest::Client,
}

impl HttpVendorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpVendorClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VendorClient for HttpVendorClient {
    async fn send(
        &self,
        endpoint: &str,
        request: &VendorSendRequest,
    ) -> CoreResult<VendorSendResponse> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| CoreError::external(format!("vendor {endpoint}: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::external(format!(
                "vendor {endpoint}: http {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| CoreError::external(format!("vendor {endpoint}: {e}")))
    }
}

/// Scripted back-check double: answers from a fixed sequence, repeating the
/// last entry once exhausted.
pub struct ScriptedTxCheckClient {
    answers: Vec<CoreResult<CheckStatus>>,
    calls: AtomicUsize,
}

impl ScriptedTxCheckClient {
    pub fn new(answers: Vec<CoreResult<CheckStatus>>) -> Self {
        Self {
            answers,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxCheckClient for ScriptedTxCheckClient {
    async fn check(&self, _service_name: &str, _key: &str) -> CoreResult<CheckStatus> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = call.min(self.answers.len().saturating_sub(1));
        self.answers
            .get(idx)
            .cloned()
            .unwrap_or(Ok(CheckStatus::Unknown))
    }
}

/// Recording callback double with a configurable verdict.
#[derive(Default)]
pub struct RecordingCallbackClient {
    pub accept: bool,
    requests: Mutex<Vec<CallbackRequest>>,
}

impl RecordingCallbackClient {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CallbackRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CallbackClient for RecordingCallbackClient {
    async fn handle_notification_result(
        &self,
        _service_name: &str,
        request: &CallbackRequest,
    ) -> CoreResult<bool> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(self.accept)
    }
}

/// Vendor double that reports `OK` for every receiver (or a scripted
/// failure code).
pub struct StaticVendorClient {
    code: String,
    calls: AtomicUsize,
}

impl StaticVendorClient {
    pub fn ok() -> Self {
        Self {
            code: "OK".into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorClient for StaticVendorClient {
    async fn send(
        &self,
        _endpoint: &str,
        request: &VendorSendRequest,
    ) -> CoreResult<VendorSendResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(VendorSendResponse {
            statuses: request
                .receivers
                .iter()
                .map(|r| VendorReceiverStatus {
                    receiver: r.clone(),
                    code: self.code.clone(),
                    message: String::new(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ok_is_case_insensitive_and_rejects_partial_failures() {
        let ok = VendorSendResponse {
            statuses: vec![
                VendorReceiverStatus { receiver: "a".into(), code: "ok".into(), message: String::new() },
                VendorReceiverStatus { receiver: "b".into(), code: "OK".into(), message: String::new() },
            ],
        };
        assert!(ok.all_ok());

        let partial = VendorSendResponse {
            statuses: vec![
                VendorReceiverStatus { receiver: "a".into(), code: "OK".into(), message: String::new() },
                VendorReceiverStatus { receiver: "b".into(), code: "THROTTLED".into(), message: String::new() },
            ],
        };
        assert!(!partial.all_ok());

        let empty = VendorSendResponse { statuses: vec![] };
        assert!(!empty.all_ok());
    }

    #[test]
    fn registry_resolves_known_services_only() {
        let registry = ServiceRegistry::new().register("order-service", "http://orders.internal");
        assert_eq!(registry.resolve("order-service").unwrap(), "http://orders.internal");
        assert!(registry.resolve("missing").is_err());
    }

    #[tokio::test]
    async fn scripted_check_client_repeats_the_last_answer() {
        let client = ScriptedTxCheckClient::new(vec![
            Ok(CheckStatus::Unknown),
            Ok(CheckStatus::Commit),
        ]);
        assert_eq!(client.check("s", "k").await.unwrap(), CheckStatus::Unknown);
        assert_eq!(client.check("s", "k").await.unwrap(), CheckStatus::Commit);
        assert_eq!(client.check("s", "k").await.unwrap(), CheckStatus::Commit);
        assert_eq!(client.calls(), 3);
    }
}

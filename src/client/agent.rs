use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::client::fetch::{FetchSettings, OutgoingRequest, PaymentFetch, TransportResponse, X402Fetch};
use crate::client::payment::PaymentSigner;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::models::{
    attachment_file_name, BuilderMessage, ChatRequest, ChatResponse, EndpointBody, ModelMessage,
    PaymentInfo, RequestOptions, ResponseEnvelope, StoreDownload,
};

pub const BUILDER_PATH: &str = "/api/payment/builder";
pub const CHAT_PATH: &str = "/api/payment/chat";
pub const STORE_PATH: &str = "/api/payment/store";

/// HTTP client that pays for x402-gated endpoints with its own wallet.
///
/// The identity is fixed at construction. Calls share nothing mutable, so a
/// single agent can serve any number of concurrent requests.
#[derive(Clone)]
pub struct X402Agent {
    address: String,
    fetch: Arc<dyn PaymentFetch>,
}

impl X402Agent {
    pub fn new(private_key: &str) -> AgentResult<Self> {
        Self::with_settings(private_key, &FetchSettings::default())
    }

    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        Self::with_settings(&config.private_key, &FetchSettings::from(config))
    }

    pub fn with_settings(private_key: &str, settings: &FetchSettings) -> AgentResult<Self> {
        let signer = Arc::new(load_signer(private_key)?);
        let address = signer.checksum_address();

        let fetch = X402Fetch::new(signer, settings)
            .map_err(|e| AgentError::Configuration(format!("{:#}", e)))?;

        tracing::info!("x402 agent initialized with wallet address: {}", address);

        Ok(Self {
            address,
            fetch: Arc::new(fetch),
        })
    }

    /// Uses a caller-supplied payment capability instead of the default x402 binding.
    pub fn with_fetch(private_key: &str, fetch: Arc<dyn PaymentFetch>) -> AgentResult<Self> {
        let signer = load_signer(private_key)?;

        Ok(Self {
            address: signer.checksum_address(),
            fetch,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn call_endpoint(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> AgentResult<ResponseEnvelope<Value>> {
        let (response, payment) = self.round_trip(url, &options).await?;

        let data = if options.parse_json {
            response.json_body().map_err(AgentError::request)?
        } else {
            Value::String(response.text_body())
        };

        Ok(ResponseEnvelope {
            data,
            payment,
            status: response.status.as_u16(),
            status_text: response.status_text(),
        })
    }

    pub async fn call_builder_endpoint(
        &self,
        base_url: &str,
    ) -> AgentResult<ResponseEnvelope<EndpointBody<BuilderMessage>>> {
        self.call_endpoint(&endpoint_url(base_url, BUILDER_PATH), RequestOptions::get())
            .await?
            .into_endpoint_body()
    }

    pub async fn call_chat_endpoint(
        &self,
        base_url: &str,
        messages: Vec<ModelMessage>,
    ) -> AgentResult<ResponseEnvelope<EndpointBody<ChatResponse>>> {
        let body = serde_json::to_value(ChatRequest { messages }).map_err(AgentError::request)?;

        self.call_endpoint(&endpoint_url(base_url, CHAT_PATH), RequestOptions::post_json(body))
            .await?
            .into_endpoint_body()
    }

    pub async fn call_store_endpoint(
        &self,
        base_url: &str,
    ) -> AgentResult<ResponseEnvelope<StoreDownload>> {
        let (response, payment) = self
            .round_trip(&endpoint_url(base_url, STORE_PATH), &RequestOptions::get())
            .await?;

        let status = response.status.as_u16();
        let status_text = response.status_text();
        let download = StoreDownload {
            file_name: response
                .header("content-disposition")
                .and_then(attachment_file_name),
            content_type: response.header("content-type").map(str::to_string),
            bytes: response.body,
        };

        Ok(ResponseEnvelope {
            data: download,
            payment,
            status,
            status_text,
        })
    }

    /// Writes a summary of `envelope` to the log.
    pub fn log_response<T: Serialize>(&self, envelope: &ResponseEnvelope<T>, label: Option<&str>) {
        let label = label.unwrap_or("Response");
        let data = serde_json::to_string_pretty(&envelope.data)
            .unwrap_or_else(|e| format!("<unserializable: {}>", e));
        let payment = &envelope.payment;

        tracing::info!("=== {} ===", label);
        tracing::info!("Status: {} {}", envelope.status, envelope.status_text);
        tracing::info!("Data: {}", data);

        if payment.is_present() {
            tracing::info!(
                tx_hash = payment.tx_hash.as_deref().unwrap_or("-"),
                amount = payment.amount.as_deref().unwrap_or("-"),
                recipient = payment.recipient.as_deref().unwrap_or("-"),
                chain_id = payment.chain_id,
                "Payment settled"
            );
            if let Some(raw) = &payment.raw {
                tracing::debug!(raw = ?raw, "Raw payment response");
            }
        } else {
            tracing::info!("Payment: none");
        }
    }

    async fn round_trip(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> AgentResult<(TransportResponse, PaymentInfo)> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("x402_call", %request_id, method = %options.method, url);

        async {
            let request = OutgoingRequest::build(url, options).map_err(AgentError::request)?;

            let response = self
                .fetch
                .sign_and_pay(request)
                .await
                .map_err(AgentError::request)?;

            let payment = response.payment_info().map_err(AgentError::request)?;

            tracing::debug!(
                status = response.status.as_u16(),
                paid = payment.is_present(),
                "Call completed"
            );

            Ok::<_, AgentError>((response, payment))
        }
        .instrument(span)
        .await
    }
}

fn load_signer(private_key: &str) -> AgentResult<PaymentSigner> {
    if !private_key.starts_with("0x") {
        return Err(AgentError::Configuration(
            "Private key must start with 0x".to_string(),
        ));
    }

    PaymentSigner::new(private_key).map_err(|e| AgentError::Configuration(format!("{:#}", e)))
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;

    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    /// Returns the same canned response for every request and records what it saw.
    struct StaticFetch {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
        seen: Mutex<Vec<OutgoingRequest>>,
    }

    impl StaticFetch {
        fn new(status: StatusCode, body: Value) -> Self {
            Self {
                status,
                headers: HeaderMap::new(),
                body: serde_json::to_vec(&body).unwrap(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn with_payment(mut self, payment: Value) -> Self {
            let encoded = STANDARD.encode(serde_json::to_vec(&payment).unwrap());
            self.headers
                .insert("x-payment-response", HeaderValue::from_str(&encoded).unwrap());
            self
        }

        fn last_request(&self) -> OutgoingRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl PaymentFetch for StaticFetch {
        async fn sign_and_pay(&self, request: OutgoingRequest) -> anyhow::Result<TransportResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(TransportResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: self.body.clone(),
            })
        }
    }

    struct FailingFetch(&'static str);

    #[async_trait]
    impl PaymentFetch for FailingFetch {
        async fn sign_and_pay(&self, _request: OutgoingRequest) -> anyhow::Result<TransportResponse> {
            Err(anyhow!(self.0))
        }
    }

    fn agent_with(fetch: Arc<dyn PaymentFetch>) -> X402Agent {
        X402Agent::with_fetch(HARDHAT_KEY, fetch).unwrap()
    }

    fn settled_payment() -> Value {
        json!({
            "txHash": "0xabc",
            "amount": "10000000000000",
            "recipient": "0x5678",
            "chainId": 84532
        })
    }

    #[test]
    fn address_is_deterministic() {
        let a = X402Agent::new(HARDHAT_KEY).unwrap();
        let b = X402Agent::new(HARDHAT_KEY).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address(), "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    }

    #[test]
    fn unprefixed_key_is_a_configuration_error() {
        let key = HARDHAT_KEY.trim_start_matches("0x");
        let err = X402Agent::new(key).err().unwrap();
        assert!(err.is_configuration());

        let fetch = Arc::new(FailingFetch("unused"));
        assert!(X402Agent::with_fetch(key, fetch).err().unwrap().is_configuration());
    }

    #[test]
    fn unparseable_key_is_a_configuration_error() {
        assert!(X402Agent::new("0x1234").err().unwrap().is_configuration());
    }

    #[tokio::test]
    async fn builder_endpoint_returns_payment_metadata() {
        let fetch = Arc::new(
            StaticFetch::new(StatusCode::OK, json!({ "message": "ok" }))
                .with_payment(settled_payment()),
        );
        let agent = agent_with(fetch.clone());

        let envelope = agent.call_builder_endpoint("http://x").await.unwrap();

        assert_eq!(envelope.data.parsed().unwrap().message, "ok");
        assert_eq!(envelope.payment.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(envelope.payment.amount.as_deref(), Some("10000000000000"));
        assert_eq!(envelope.payment.recipient.as_deref(), Some("0x5678"));
        assert_eq!(envelope.payment.chain_id, Some(84532));
        assert_eq!(envelope.status, 200);
        assert_eq!(envelope.status_text, "OK");

        let request = fetch.last_request();
        assert_eq!(request.method, reqwest::Method::GET);
        assert_eq!(request.url.as_str(), "http://x/api/payment/builder");
    }

    #[tokio::test]
    async fn builder_endpoint_matches_generic_call() {
        let fetch = Arc::new(
            StaticFetch::new(StatusCode::OK, json!({ "message": "same" }))
                .with_payment(settled_payment()),
        );
        let agent = agent_with(fetch);

        let via_builder = agent.call_builder_endpoint("http://x").await.unwrap();
        let via_generic = agent
            .call_endpoint("http://x/api/payment/builder", RequestOptions::get())
            .await
            .unwrap()
            .into_endpoint_body::<BuilderMessage>()
            .unwrap();

        assert_eq!(via_builder, via_generic);
    }

    #[tokio::test]
    async fn missing_payment_header_leaves_payment_empty() {
        let fetch = Arc::new(StaticFetch::new(StatusCode::NOT_FOUND, json!({ "error": "gone" })));
        let agent = agent_with(fetch);

        let envelope = agent
            .call_endpoint("http://x/missing", RequestOptions::get())
            .await
            .unwrap();

        assert_eq!(envelope.payment, PaymentInfo::default());
        assert!(envelope.payment.raw.is_none());
        assert_eq!(envelope.status, 404);
        assert_eq!(envelope.status_text, "Not Found");
        assert!(!envelope.is_success());
    }

    #[tokio::test]
    async fn payment_required_is_returned_not_raised() {
        let fetch = Arc::new(StaticFetch::new(
            StatusCode::PAYMENT_REQUIRED,
            json!({ "x402Version": 1, "error": "insufficient_funds", "accepts": [] }),
        ));
        let agent = agent_with(fetch);

        let envelope = agent
            .call_endpoint("http://x/api/payment/builder", RequestOptions::get())
            .await
            .unwrap();

        assert_eq!(envelope.status, 402);
        assert_eq!(envelope.data["error"], "insufficient_funds");
    }

    #[tokio::test]
    async fn typed_helpers_return_non_success_envelopes() {
        let fetch = Arc::new(StaticFetch::new(
            StatusCode::PAYMENT_REQUIRED,
            json!({ "x402Version": 1, "error": "insufficient_funds", "accepts": [] }),
        ));
        let agent = agent_with(fetch);

        let builder = agent.call_builder_endpoint("http://x").await.unwrap();
        assert_eq!(builder.status, 402);
        assert_eq!(builder.status_text, "Payment Required");
        assert!(builder.data.parsed().is_none());
        assert_eq!(builder.data.raw().unwrap()["error"], "insufficient_funds");

        let chat = agent
            .call_chat_endpoint("http://x", vec![ModelMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(chat.status, 402);
        assert_eq!(chat.data.raw().unwrap()["error"], "insufficient_funds");
    }

    #[tokio::test]
    async fn transport_failure_becomes_request_error() {
        let agent = agent_with(Arc::new(FailingFetch("connect ECONNREFUSED 127.0.0.1:3000")));

        let err = agent
            .call_endpoint("http://x/api/payment/builder", RequestOptions::get())
            .await
            .unwrap_err();

        assert!(err.is_request());
        assert!(err.to_string().contains("connect ECONNREFUSED 127.0.0.1:3000"));
    }

    #[tokio::test]
    async fn malformed_payment_header_is_fatal() {
        let mut fetch = StaticFetch::new(StatusCode::OK, json!({ "message": "ok" }));
        fetch
            .headers
            .insert("x-payment-response", HeaderValue::from_static("%%%"));
        let agent = agent_with(Arc::new(fetch));

        let err = agent.call_builder_endpoint("http://x").await.unwrap_err();
        assert!(err.is_request());
    }

    #[tokio::test]
    async fn json_body_sets_content_type_unless_provided() {
        let fetch = Arc::new(StaticFetch::new(StatusCode::OK, json!({})));
        let agent = agent_with(fetch.clone());

        agent
            .call_endpoint("http://x/echo", RequestOptions::post_json(json!({ "q": "hi" })))
            .await
            .unwrap();
        let request = fetch.last_request();
        assert_eq!(request.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(request.body.unwrap(), serde_json::to_vec(&json!({ "q": "hi" })).unwrap());

        agent
            .call_endpoint(
                "http://x/echo",
                RequestOptions::post_json(json!({ "q": "hi" })).header("Content-Type", "text/plain"),
            )
            .await
            .unwrap();
        let request = fetch.last_request();
        assert_eq!(request.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn text_mode_returns_raw_body() {
        let mut fetch = StaticFetch::new(StatusCode::OK, Value::Null);
        fetch.body = b"not json".to_vec();
        let agent = agent_with(Arc::new(fetch));

        let envelope = agent
            .call_endpoint("http://x/plain", RequestOptions::get().text_response())
            .await
            .unwrap();
        assert_eq!(envelope.data, Value::String("not json".to_string()));

        let err = agent
            .call_endpoint("http://x/plain", RequestOptions::get())
            .await
            .unwrap_err();
        assert!(err.is_request());
    }

    #[tokio::test]
    async fn chat_endpoint_posts_messages() {
        let reply = json!({
            "messages": [
                { "role": "user", "content": "hello" },
                { "role": "assistant", "content": "hi there" }
            ]
        });
        let fetch = Arc::new(StaticFetch::new(StatusCode::OK, reply));
        let agent = agent_with(fetch.clone());

        let envelope = agent
            .call_chat_endpoint("http://x/", vec![ModelMessage::user("hello")])
            .await
            .unwrap();

        let reply = envelope.data.parsed().unwrap();
        assert_eq!(reply.messages.len(), 2);
        assert_eq!(reply.messages[1].text(), Some("hi there"));

        let request = fetch.last_request();
        assert_eq!(request.method, reqwest::Method::POST);
        assert_eq!(request.url.as_str(), "http://x/api/payment/chat");
        let sent: Value = serde_json::from_slice(&request.body.unwrap()).unwrap();
        assert_eq!(sent, json!({ "messages": [{ "role": "user", "content": "hello" }] }));
    }

    #[tokio::test]
    async fn store_endpoint_returns_bytes_and_file_name() {
        let mut fetch = StaticFetch::new(StatusCode::OK, Value::Null)
            .with_payment(settled_payment());
        fetch.body = vec![0x25, 0x50, 0x44, 0x46];
        fetch.headers.insert(
            "content-disposition",
            HeaderValue::from_static("attachment; filename=\"guide.pdf\""),
        );
        fetch
            .headers
            .insert("content-type", HeaderValue::from_static("application/pdf"));
        let agent = agent_with(Arc::new(fetch));

        let envelope = agent.call_store_endpoint("http://x").await.unwrap();

        assert_eq!(envelope.data.file_name.as_deref(), Some("guide.pdf"));
        assert_eq!(envelope.data.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(envelope.data.bytes, b"%PDF".to_vec());
        assert_eq!(envelope.payment.tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn concurrent_calls_are_independent() {
        let fetch = Arc::new(StaticFetch::new(StatusCode::OK, json!({ "message": "ok" })));
        let agent = agent_with(fetch.clone());

        let calls = (0..8).map(|i| {
            let agent = agent.clone();
            async move { agent.call_endpoint(&format!("http://x/{}", i), RequestOptions::get()).await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.as_ref().map(|e| e.status == 200).unwrap_or(false)));
        assert_eq!(fetch.seen.lock().unwrap().len(), 8);
    }

    #[test]
    fn log_response_accepts_any_envelope() {
        let agent = agent_with(Arc::new(FailingFetch("unused")));
        let envelope = ResponseEnvelope {
            data: json!({ "message": "ok" }),
            payment: PaymentInfo::from_raw(settled_payment().as_object().unwrap().clone()),
            status: 200,
            status_text: "OK".to_string(),
        };

        agent.log_response(&envelope, Some("Builder"));
        agent.log_response(&envelope.map(|_| "text"), None);
    }
}

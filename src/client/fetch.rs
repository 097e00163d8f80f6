use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::types::U256;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, Method, StatusCode, Url,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::client::network::{chain_id_for, same_network};
use crate::client::payment::PaymentSigner;
use crate::config::{AgentConfig, DEFAULT_MAX_PAYMENT};
use crate::models::{
    PaymentInfo, PaymentRequired, PaymentRequirements, RequestBody, RequestOptions,
    PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};

/// A fully built HTTP request, ready to hand to a [`PaymentFetch`].
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl OutgoingRequest {
    pub fn build(url: &str, options: &RequestOptions) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            headers.insert(name, value);
        }

        let body = match &options.body {
            None => None,
            Some(RequestBody::Json(value)) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Some(serde_json::to_vec(value).context("Failed to serialize JSON body")?)
            }
            Some(RequestBody::Text(text)) => Some(text.clone().into_bytes()),
            Some(RequestBody::Bytes(bytes)) => Some(bytes.clone()),
        };

        Ok(Self {
            method: options.method.clone(),
            url,
            headers,
            body,
        })
    }
}

/// Final response of a (possibly paid) round-trip.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn status_text(&self) -> String {
        self.status.canonical_reason().unwrap_or_default().to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json_body(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).with_context(|| {
            format!("Failed to parse response body as JSON (status {})", self.status)
        })
    }

    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes `X-PAYMENT-RESPONSE`; an absent or blank header yields empty metadata.
    pub fn payment_info(&self) -> Result<PaymentInfo> {
        let Some(value) = self.headers.get(PAYMENT_RESPONSE_HEADER) else {
            return Ok(PaymentInfo::default());
        };

        let value = value
            .to_str()
            .context("Payment response header is not visible ASCII")?;
        if value.trim().is_empty() {
            return Ok(PaymentInfo::default());
        }

        PaymentInfo::from_header(value)
    }
}

/// Sends a request, settling any x402 payment challenge along the way.
#[async_trait]
pub trait PaymentFetch: Send + Sync {
    async fn sign_and_pay(&self, request: OutgoingRequest) -> Result<TransportResponse>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub network: String,
    /// Largest single payment, in the asset's atomic units.
    pub max_payment: u128,
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            network: "base-sepolia".to_string(),
            max_payment: DEFAULT_MAX_PAYMENT,
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&AgentConfig> for FetchSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            network: config.network.clone(),
            max_payment: config.max_payment,
            timeout: config.http_timeout,
        }
    }
}

/// reqwest-backed [`PaymentFetch`] speaking the x402 `exact` EVM scheme.
pub struct X402Fetch {
    client: Client,
    signer: Arc<PaymentSigner>,
    network: String,
    chain_id: u64,
    max_payment: U256,
}

impl X402Fetch {
    pub fn new(signer: Arc<PaymentSigner>, settings: &FetchSettings) -> Result<Self> {
        let chain_id = chain_id_for(&settings.network)
            .with_context(|| format!("Unsupported network: {}", settings.network))?;

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            signer,
            network: settings.network.clone(),
            chain_id,
            max_payment: U256::from(settings.max_payment),
        })
    }

    async fn send(
        &self,
        request: &OutgoingRequest,
        payment: Option<&str>,
    ) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        if let Some(payment) = payment {
            builder = builder
                .header(PAYMENT_HEADER, payment)
                .header("Access-Control-Expose-Headers", "X-PAYMENT-RESPONSE");
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("{} {} failed", request.method, request.url))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec();

        Ok(TransportResponse { status, headers, body })
    }

    fn select_requirements<'a>(
        &self,
        challenge: &'a PaymentRequired,
    ) -> Result<&'a PaymentRequirements> {
        let requirements = challenge
            .accepts
            .iter()
            .find(|r| r.scheme == "exact" && same_network(&r.network, &self.network))
            .with_context(|| {
                let offered: Vec<String> = challenge
                    .accepts
                    .iter()
                    .map(|r| format!("{}/{}", r.scheme, r.network))
                    .collect();
                format!(
                    "No exact payment option on {} (offered: [{}])",
                    self.network,
                    offered.join(", ")
                )
            })?;

        let amount = U256::from_dec_str(&requirements.max_amount_required).map_err(|e| {
            anyhow::anyhow!(
                "Invalid maxAmountRequired {}: {:?}",
                requirements.max_amount_required,
                e
            )
        })?;

        if amount > self.max_payment {
            bail!(
                "Payment amount {} exceeds maximum allowed {}",
                amount,
                self.max_payment
            );
        }

        Ok(requirements)
    }
}

#[async_trait]
impl PaymentFetch for X402Fetch {
    async fn sign_and_pay(&self, request: OutgoingRequest) -> Result<TransportResponse> {
        let initial = self.send(&request, None).await?;

        if initial.status != StatusCode::PAYMENT_REQUIRED {
            tracing::debug!("No payment required, status: {}", initial.status);
            return Ok(initial);
        }

        tracing::info!("Received 402 Payment Required from {}", request.url);

        let challenge = PaymentRequired::from_body(&initial.body)?;
        if let Some(reason) = &challenge.error {
            tracing::debug!("Challenge reason: {}", reason);
        }

        let requirements = match self.select_requirements(&challenge) {
            Ok(requirements) => requirements,
            Err(e) => {
                tracing::warn!("Refusing payment challenge: {:#}", e);
                return Err(e);
            }
        };

        let payment = self.signer.sign_payment(requirements, self.chain_id)?;
        let header = payment.to_header_value()?;

        tracing::info!("Retrying request with X-PAYMENT header");

        let paid = self.send(&request, Some(&header)).await?;

        tracing::info!("Paid request completed, status: {}", paid.status);

        Ok(paid)
    }
}

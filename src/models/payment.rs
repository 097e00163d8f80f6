use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const X402_VERSION: u8 = 1;

/// Request header carrying the signed payment on the retried request.
pub const PAYMENT_HEADER: &str = "x-payment";

/// Response header carrying settlement metadata.
pub const PAYMENT_RESPONSE_HEADER: &str = "x-payment-response";

/// Body of a `402 Payment Required` challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub pay_to: String,
    #[serde(default)]
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<TokenDomain>,
}

/// EIP-712 domain name/version of the token contract being paid with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDomain {
    pub name: String,
    pub version: String,
}

/// Signed payment sent back in the `X-PAYMENT` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: ExactEvmPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: String,
    pub authorization: Eip3009Authorization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: String,
}

impl PaymentRequired {
    pub fn from_body(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).context("Failed to parse 402 payment requirements")
    }
}

impl PaymentPayload {
    pub fn to_header_value(&self) -> Result<String> {
        let json = serde_json::to_vec(self).context("Failed to serialize payment payload")?;
        Ok(STANDARD.encode(json))
    }

    pub fn from_header_value(encoded: &str) -> Result<Self> {
        let json = STANDARD
            .decode(encoded.trim())
            .context("Payment header is not valid base64")?;
        serde_json::from_slice(&json).context("Failed to parse payment payload")
    }
}

/// Decodes an `X-PAYMENT-RESPONSE` header value (base64-encoded JSON object).
pub fn decode_payment_response(value: &str) -> Result<Map<String, Value>> {
    let bytes = STANDARD
        .decode(value.trim())
        .context("Payment response header is not valid base64")?;
    let json = String::from_utf8(bytes).context("Payment response header is not UTF-8")?;

    match serde_json::from_str::<Value>(&json).context("Payment response header is not JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("Payment response header must be a JSON object, got {}", other),
    }
}

/// Payment metadata attached to every response envelope.
///
/// `raw` is `None` when the response carried no payment header; the well-known
/// fields are then all `None` as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub tx_hash: Option<String>,
    pub amount: Option<String>,
    pub recipient: Option<String>,
    pub chain_id: Option<u64>,
    pub raw: Option<Map<String, Value>>,
}

impl PaymentInfo {
    pub fn from_raw(raw: Map<String, Value>) -> Self {
        Self {
            tx_hash: string_field(&raw, "txHash"),
            amount: string_field(&raw, "amount"),
            recipient: string_field(&raw, "recipient"),
            chain_id: raw.get("chainId").and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            }),
            raw: Some(raw),
        }
    }

    pub fn from_header(value: &str) -> Result<Self> {
        decode_payment_response(value).map(Self::from_raw)
    }

    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }
}

// Amounts can arrive as JSON numbers from some servers; render them as decimal strings.
fn string_field(raw: &Map<String, Value>, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

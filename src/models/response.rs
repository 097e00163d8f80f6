use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{AgentError, AgentResult};
use crate::models::PaymentInfo;

/// Result of a single agent call, returned whether or not a payment happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub data: T,
    pub payment: PaymentInfo,
    pub status: u16,
    pub status_text: String,
}

impl<T> ResponseEnvelope<T> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseEnvelope<U> {
        ResponseEnvelope {
            data: f(self.data),
            payment: self.payment,
            status: self.status,
            status_text: self.status_text,
        }
    }
}

/// Body of a typed endpoint call: the expected payload on 2xx, the raw JSON otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EndpointBody<T> {
    Parsed(T),
    Raw(Value),
}

impl<T> EndpointBody<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            EndpointBody::Parsed(data) => Some(data),
            EndpointBody::Raw(_) => None,
        }
    }

    pub fn into_parsed(self) -> Option<T> {
        match self {
            EndpointBody::Parsed(data) => Some(data),
            EndpointBody::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&Value> {
        match self {
            EndpointBody::Parsed(_) => None,
            EndpointBody::Raw(value) => Some(value),
        }
    }
}

impl ResponseEnvelope<Value> {
    /// Decodes 2xx bodies into `T`; any other status keeps the body as raw JSON.
    pub fn into_endpoint_body<T: DeserializeOwned>(
        self,
    ) -> AgentResult<ResponseEnvelope<EndpointBody<T>>> {
        if self.is_success() {
            Ok(self.into_typed::<T>()?.map(EndpointBody::Parsed))
        } else {
            Ok(self.map(EndpointBody::Raw))
        }
    }

    pub fn into_typed<T: DeserializeOwned>(self) -> AgentResult<ResponseEnvelope<T>> {
        let ResponseEnvelope { data, payment, status, status_text } = self;
        let data = serde_json::from_value(data).map_err(|e| {
            AgentError::Request(format!("Unexpected response body (status {}): {}", status, e))
        })?;

        Ok(ResponseEnvelope { data, payment, status, status_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuilderMessage;
    use serde_json::json;

    fn envelope(data: Value, status: u16) -> ResponseEnvelope<Value> {
        ResponseEnvelope {
            data,
            payment: PaymentInfo::default(),
            status,
            status_text: "OK".to_string(),
        }
    }

    #[test]
    fn into_typed_keeps_transport_fields() {
        let typed = envelope(json!({ "message": "hello" }), 200)
            .into_typed::<BuilderMessage>()
            .unwrap();

        assert_eq!(typed.data.message, "hello");
        assert_eq!(typed.status, 200);
        assert!(typed.is_success());
    }

    #[test]
    fn into_typed_reports_shape_mismatch() {
        let err = envelope(json!({ "error": "nope" }), 402)
            .into_typed::<BuilderMessage>()
            .unwrap_err();

        assert!(err.is_request());
        assert!(err.to_string().contains("402"));
    }

    #[test]
    fn endpoint_body_keeps_error_payloads() {
        let rejected = envelope(json!({ "error": "insufficient_funds" }), 402)
            .into_endpoint_body::<BuilderMessage>()
            .unwrap();

        assert_eq!(rejected.status, 402);
        assert!(rejected.data.parsed().is_none());
        assert_eq!(rejected.data.raw().unwrap()["error"], "insufficient_funds");

        let accepted = envelope(json!({ "message": "hi" }), 200)
            .into_endpoint_body::<BuilderMessage>()
            .unwrap();
        assert_eq!(accepted.data.parsed().unwrap().message, "hi");
    }

    #[test]
    fn serializes_with_null_raw_payment() {
        let value = serde_json::to_value(envelope(json!("text"), 204)).unwrap();
        assert_eq!(value["payment"]["raw"], Value::Null);
        assert_eq!(value["statusText"], "OK");
    }
}

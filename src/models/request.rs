use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized to JSON; `Content-Type: application/json` is added unless set.
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// Per-call options for [`X402Agent::call_endpoint`](crate::client::X402Agent::call_endpoint).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    /// Decode the response as JSON (`true`) or return it as text.
    pub parse_json: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HashMap::new(),
            body: None,
            parse_json: true,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post_json(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(RequestBody::Json(body)),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn text_response(mut self) -> Self {
        self.parse_json = false;
        self
    }
}

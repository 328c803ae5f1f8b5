//! # HTTP Response
//!
//! Handler results, the JSON envelope and the outgoing response.
//!
//! Every JSON answer is wrapped as `{code, data, msg}`. Successful handler
//! values become `{code: 200, data: <value>, msg: "success"}` unless the
//! reply overrides the code or message; errors become
//! `{code: <code>, data: null, msg: <message>}`. Raw byte results skip the
//! envelope and are sent with the headers the handler supplied.

use crate::error::Error;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Envelope message for successful results
pub const SUCCESS_MESSAGE: &str = "success";

const JSON_CONTENT_TYPE: &str = "application/json";
const RAW_CONTENT_TYPE: &str = "application/octet-stream";

/// Value returned by a handler or a short-circuiting plugin
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Wrapped into the success envelope
    Json {
        /// Envelope `data`
        value: Value,
        /// Envelope `code`, 200 when unset
        code: Option<u16>,
        /// Envelope `msg`, `success` when unset
        msg: Option<String>,
        /// Extra response headers
        headers: HashMap<String, String>,
    },
    /// Sent as-is
    Raw {
        /// Response body
        bytes: Bytes,
        /// Response headers, `Content-Type` included
        headers: HashMap<String, String>,
    },
}

impl Reply {
    /// JSON result
    #[must_use]
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Json {
            value: value.into(),
            code: None,
            msg: None,
            headers: HashMap::new(),
        }
    }

    /// JSON result from any serializable value
    ///
    /// # Errors
    ///
    /// `Error::Json` when the value cannot be represented as JSON.
    pub fn json<T: Serialize>(value: &T) -> crate::error::Result<Self> {
        Ok(Self::value(serde_json::to_value(value)?))
    }

    /// Raw byte result (file download)
    #[must_use]
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::Raw {
            bytes: bytes.into(),
            headers: HashMap::new(),
        }
    }

    /// Add a response header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match &mut self {
            Self::Json { headers, .. } | Self::Raw { headers, .. } => {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        self
    }

    /// Override the success envelope `code`; raw results ignore it
    #[must_use]
    pub fn with_code(mut self, value: u16) -> Self {
        if let Self::Json { code, .. } = &mut self {
            *code = Some(value);
        }
        self
    }

    /// Override the success envelope `msg`; raw results ignore it
    #[must_use]
    pub fn with_msg(mut self, value: impl Into<String>) -> Self {
        if let Self::Json { msg, .. } = &mut self {
            *msg = Some(value.into());
        }
        self
    }

    /// Whether this is a raw byte result
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::value(value)
    }
}

/// Uniform JSON envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Result code
    pub code: u16,
    /// Payload, `null` on failure
    pub data: Value,
    /// Result message
    pub msg: String,
}

impl Envelope {
    /// Success envelope around `data`
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            code: 200,
            data,
            msg: SUCCESS_MESSAGE.to_string(),
        }
    }

    /// Failure envelope for an error
    #[must_use]
    pub fn failure(error: &Error) -> Self {
        Self {
            code: error.envelope_code(),
            data: Value::Null,
            msg: error.public_message(),
        }
    }

    fn to_bytes(&self) -> Bytes {
        // An envelope of JSON values always serializes.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}

/// Outgoing HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Bytes,
    /// Content type
    pub content_type: String,
    /// Response headers
    pub headers: HashMap<String, String>,
}

impl Response {
    /// Response for a handler or plugin result
    #[must_use]
    pub fn from_reply(reply: Reply) -> Self {
        match reply {
            Reply::Json {
                value,
                code,
                msg,
                headers,
            } => {
                let mut envelope = Envelope::success(value);
                if let Some(code) = code {
                    envelope.code = code;
                }
                if let Some(msg) = msg {
                    envelope.msg = msg;
                }
                Self::envelope(200, &envelope).with_headers(headers)
            }
            Reply::Raw { bytes, headers } => Self {
                status: 200,
                body: bytes,
                content_type: RAW_CONTENT_TYPE.to_string(),
                headers: HashMap::new(),
            }
            .with_headers(headers),
        }
    }

    /// Failure envelope response; the status mirrors the code when valid
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        let envelope = Envelope::failure(error);
        let status = StatusCode::from_u16(envelope.code).map_or(500, |status| status.as_u16());
        Self::envelope(status, &envelope)
    }

    fn envelope(status: u16, envelope: &Envelope) -> Self {
        Self {
            status,
            body: envelope.to_bytes(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            headers: HashMap::new(),
        }
    }

    fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        for (k, v) in headers {
            self.set_header(&k, &v);
        }
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers.insert(key.to_string(), value.to_string());
        }
    }

    /// Header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON, for assertions on envelopes
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Convert to hyper Response
    ///
    /// Headers that are not valid HTTP are dropped.
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            headers.insert(hyper::header::CONTENT_TYPE, value);
        }
        for (k, v) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }
        response
    }
}

/// Cross-origin headers attached to every response
#[derive(Debug, Clone, Copy, Default)]
pub struct Cors;

impl Cors {
    /// Allowed origin
    pub const ALLOW_ORIGIN: &'static str = "*";
    /// Allowed methods
    pub const ALLOW_METHODS: &'static str = "GET, POST, OPTIONS";
    /// Allowed and exposed headers
    pub const HEADERS: &'static str =
        "Content-Type, Content-Length, Content-Disposition, Token, X-Forwarded-For";

    /// Attach the CORS headers
    pub fn apply(self, response: &mut Response) {
        response.set_header("Access-Control-Allow-Origin", Self::ALLOW_ORIGIN);
        response.set_header("Access-Control-Allow-Methods", Self::ALLOW_METHODS);
        response.set_header("Access-Control-Allow-Headers", Self::HEADERS);
        response.set_header("Access-Control-Expose-Headers", Self::HEADERS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let resp = Response::from_reply(Reply::value(json!({"id": 1})));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(
            resp.json(),
            Some(json!({"code": 200, "data": {"id": 1}, "msg": "success"}))
        );
    }

    #[test]
    fn test_failure_envelope_defaults() {
        let err = Error::Database {
            message: "gone".to_string(),
        };
        let resp = Response::from_error(&err);
        assert_eq!(resp.status, 404);
        assert_eq!(
            resp.json(),
            Some(json!({"code": 404, "data": null, "msg": "Request Error"}))
        );
    }

    #[test]
    fn test_failure_status_follows_code() {
        let resp = Response::from_error(&Error::request(418, "teapot"));
        assert_eq!(resp.status, 418);
        assert_eq!(resp.json().unwrap()["msg"], json!("teapot"));
    }

    #[test]
    fn test_invalid_code_keeps_envelope() {
        let resp = Response::from_error(&Error::request(42, "odd"));
        assert_eq!(resp.status, 500);
        assert_eq!(resp.json().unwrap()["code"], json!(42));
    }

    #[test]
    fn test_raw_reply_skips_envelope() {
        let reply = Reply::raw(&b"PDF"[..])
            .with_header("Content-Type", "application/pdf")
            .with_header("Content-Disposition", "attachment; filename=a.pdf");
        assert!(reply.is_raw());

        let resp = Response::from_reply(reply);
        assert_eq!(&resp.body[..], b"PDF");
        assert_eq!(resp.content_type, "application/pdf");
        assert_eq!(
            resp.header("content-disposition"),
            Some("attachment; filename=a.pdf")
        );
    }

    #[test]
    fn test_success_envelope_overrides() {
        let resp =
            Response::from_reply(Reply::value(json!([1])).with_code(201).with_msg("created"));
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.json(),
            Some(json!({"code": 201, "data": [1], "msg": "created"}))
        );

        let resp = Response::from_reply(Reply::value(1).with_msg("done"));
        assert_eq!(
            resp.json(),
            Some(json!({"code": 200, "data": 1, "msg": "done"}))
        );

        let raw = Reply::raw("x").with_code(201);
        assert!(raw.is_raw());
    }

    #[test]
    fn test_json_reply_headers() {
        let resp = Response::from_reply(Reply::value("ok").with_header("X-Total", "3"));
        assert_eq!(resp.header("x-total"), Some("3"));
    }

    #[test]
    fn test_cors_headers() {
        let mut resp = Response::from_reply(Reply::value(json!(null)));
        Cors.apply(&mut resp);
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            resp.header("Access-Control-Allow-Methods"),
            Some("GET, POST, OPTIONS")
        );
        assert_eq!(
            resp.header("Access-Control-Expose-Headers"),
            Some(Cors::HEADERS)
        );
    }

    #[test]
    fn test_into_hyper() {
        let mut resp = Response::from_reply(Reply::value(1));
        resp.set_header("X-Request-Id", "abc");
        let hyper_resp = resp.into_hyper();
        assert_eq!(hyper_resp.status(), StatusCode::OK);
        assert_eq!(hyper_resp.headers()["x-request-id"], "abc");
        assert_eq!(hyper_resp.headers()["content-type"], "application/json");
    }
}

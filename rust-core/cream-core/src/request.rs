//! # HTTP Request
//!
//! Parsed request handed to plugins and the injection resolver.
//!
//! The body is collected once (bounded by the configured limit) and parsed
//! eagerly according to its content type:
//!
//! - `multipart/form-data`: text parts become fields, parts with a file
//!   name become [`UploadedFile`]s
//! - `application/x-www-form-urlencoded`: decoded like a query string
//! - anything else: parsed as JSON; an object becomes the field map
//!
//! A body that cannot be parsed leaves the field map empty.

use crate::error::{Error, Result};
use crate::json;
use crate::route::Method;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::HeaderMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// One uploaded multipart file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field the file was sent under
    pub field_name: String,
    /// Client-supplied file name
    pub filename: String,
    /// Declared content type, if any
    pub content_type: Option<String>,
    /// File contents
    pub bytes: Bytes,
}

impl UploadedFile {
    /// Create a file entry
    pub fn new(
        field_name: impl Into<String>,
        filename: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            filename: filename.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the file is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Incoming HTTP request with parsed query, fields and files
#[derive(Debug, Clone)]
pub struct Request {
    method: Option<Method>,
    method_name: String,
    path: String,
    query_string: Option<String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
    fields: Map<String, Value>,
    files: Vec<UploadedFile>,
    remote_addr: Option<SocketAddr>,
    /// Validated token claims, set by the bearer auth plugin
    pub claims: Option<Value>,
}

impl Request {
    /// Create a request by hand (tests, in-process dispatch)
    ///
    /// `path` may carry a query string.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        let query = parse_query_string(query_string.as_deref());

        Self {
            method: Some(method),
            method_name: method.to_string(),
            path,
            query_string,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            fields: Map::new(),
            files: Vec::new(),
            remote_addr: None,
            claims: None,
        }
    }

    /// Add a query entry
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a body field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Use a JSON body; an object also becomes the field map
    #[must_use]
    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = Bytes::from(body.to_string());
        if let Value::Object(map) = body {
            self.fields = map.clone();
        }
        self.set_header(CONTENT_TYPE.as_str(), "application/json");
        self
    }

    /// Attach an uploaded file
    #[must_use]
    pub fn with_file(mut self, file: UploadedFile) -> Self {
        self.files.push(file);
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set the peer address
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Create from a hyper request with a body size limit
    ///
    /// # Errors
    ///
    /// `Error::PayloadTooLarge` when the declared or actual body size exceeds
    /// `max_body_size`, `Error::Body` when the body stream fails.
    pub async fn from_hyper<B>(
        req: hyper::Request<B>,
        max_body_size: usize,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self>
    where
        B: Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let method = Method::from_hyper(req.method());
        let method_name = req.method().as_str().to_string();
        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let query = parse_query_string(query_string.as_deref());

        let headers = req.headers().clone();
        if let Some(declared) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if declared > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: declared,
                });
            }
        }

        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Body {
                reason: e.to_string(),
            })?
            .to_bytes();
        if body.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: body.len(),
            });
        }

        let mut request = Self {
            method,
            method_name,
            path,
            query_string,
            query,
            headers,
            body,
            fields: Map::new(),
            files: Vec::new(),
            remote_addr,
            claims: None,
        };
        request.parse_body().await;
        Ok(request)
    }

    async fn parse_body(&mut self) {
        if self.body.is_empty() {
            return;
        }
        let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or("").to_string();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        let parsed = match mime.as_str() {
            "multipart/form-data" => self.parse_multipart(&content_type).await,
            "application/x-www-form-urlencoded" => {
                let text = String::from_utf8_lossy(&self.body);
                self.fields = parse_query_string(Some(&text))
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Ok(())
            }
            _ => json::parse_object(&self.body).map(|map| self.fields = map),
        };

        if let Err(e) = parsed {
            debug!(path = %self.path, content_type = %content_type, error = %e, "body not parsed");
        }
    }

    async fn parse_multipart(&mut self, content_type: &str) -> Result<()> {
        let boundary = multer::parse_boundary(content_type).map_err(multipart_error)?;
        let body = self.body.clone();
        let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(ToString::to_string);
            let content_type = field.content_type().map(ToString::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;

            match filename {
                Some(filename) => self.files.push(UploadedFile {
                    field_name: name,
                    filename,
                    content_type,
                    bytes,
                }),
                None => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.fields.insert(name, Value::String(text));
                }
            }
        }
        Ok(())
    }

    /// Recognized HTTP method, `None` for extension methods
    #[must_use]
    pub const fn method(&self) -> Option<Method> {
        self.method
    }

    /// Method as sent by the client
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Request path (without query string)
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Replace the path (base path stripping)
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// One query entry
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// All query entries
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// One body field
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All body fields
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// First uploaded file sent under `field_name`
    #[must_use]
    pub fn file(&self, field_name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field_name == field_name)
    }

    /// All uploaded files, in arrival order
    #[must_use]
    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// All headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Client address: first `X-Forwarded-For` entry, else the peer
    #[must_use]
    pub fn client_ip(&self) -> Option<String> {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
    }
}

fn multipart_error(e: multer::Error) -> Error {
    Error::Body {
        reason: format!("multipart: {e}"),
    }
}

/// Parse query string into HashMap
///
/// Handles URL decoding and duplicate keys (last value wins).
pub(crate) fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent and `+` decoding; invalid UTF-8 is replaced
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let decoded = s
                    .get(i + 1..i + 3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 2;
                } else {
                    out.push(b'%');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use serde_json::json;

    fn hyper_request(content_type: &str, body: &'static [u8]) -> hyper::Request<Full<Bytes>> {
        hyper::Request::builder()
            .method("POST")
            .uri("/users/create?source=web")
            .header("content-type", content_type)
            .body(Full::new(Bytes::from_static(body)))
            .unwrap()
    }

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page"), Some(&"1".to_string()));
        assert_eq!(result.get("limit"), Some(&"10".to_string()));
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert!(parse_query_string(None).is_empty());
        assert!(parse_query_string(Some("")).is_empty());
    }

    #[test]
    fn test_parse_query_string_last_duplicate_wins() {
        let result = parse_query_string(Some("a=1&a=2&flag"));
        assert_eq!(result.get("a"), Some(&"2".to_string()));
        assert_eq!(result.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("50%"), "50%");
    }

    #[test]
    fn test_new_splits_query() {
        let req = Request::new(Method::Get, "/users/list?page=2");
        assert_eq!(req.path(), "/users/list");
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.method_name(), "GET");
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let req = Request::new(Method::Get, "/").with_remote_addr(addr);
        assert_eq!(req.client_ip().as_deref(), Some("10.0.0.1"));

        let req = req.with_header("X-Forwarded-For", "1.2.3.4, 10.0.0.1");
        assert_eq!(req.client_ip().as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn test_from_hyper_json_body() {
        let req = Request::from_hyper(
            hyper_request("application/json", br#"{"name": "amy", "age": 3}"#),
            1024,
            None,
        )
        .await
        .unwrap();

        assert_eq!(req.method(), Some(Method::Post));
        assert_eq!(req.query("source"), Some("web"));
        assert_eq!(req.field("name"), Some(&json!("amy")));
        assert_eq!(req.field("age"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_from_hyper_urlencoded_body() {
        let req = Request::from_hyper(
            hyper_request("application/x-www-form-urlencoded", b"name=John+Doe&x=1"),
            1024,
            None,
        )
        .await
        .unwrap();
        assert_eq!(req.field("name"), Some(&json!("John Doe")));
        assert_eq!(req.field("x"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn test_from_hyper_unparseable_body_is_ignored() {
        let req = Request::from_hyper(hyper_request("text/plain", b"hello"), 1024, None)
            .await
            .unwrap();
        assert!(req.fields().is_empty());
        assert_eq!(req.body(), b"hello");
    }

    #[tokio::test]
    async fn test_from_hyper_multipart_body() {
        let body: &'static [u8] = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
report\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello file\r\n\
--XYZ--\r\n";
        let req = Request::from_hyper(
            hyper_request("multipart/form-data; boundary=XYZ", body),
            4096,
            None,
        )
        .await
        .unwrap();

        assert_eq!(req.field("title"), Some(&json!("report")));
        let file = req.file("file").unwrap();
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&file.bytes[..], b"hello file");
    }

    #[tokio::test]
    async fn test_from_hyper_body_limit() {
        let err = Request::from_hyper(
            hyper_request("application/json", br#"{"name": "too long"}"#),
            4,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 4, .. }));
    }

    #[test]
    fn test_extension_method_has_no_route_method() {
        let mut req = Request::new(Method::Get, "/");
        req.method = Method::from_hyper(&hyper::Method::from_bytes(b"PURGE").unwrap());
        assert_eq!(req.method(), None);
    }
}

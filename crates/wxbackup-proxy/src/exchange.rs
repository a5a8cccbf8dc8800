//! Request/response correlation.
//!
//! A [`PendingRequest`] is captured when a request is intercepted and turned
//! into an [`Exchange`] once its response body is available. Rules read the
//! whole exchange and may replace the response body before it is forwarded.

use std::borrow::Cow;
use std::collections::HashMap;

use hyper::body::Bytes;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method};

/// Request half of an exchange, waiting for its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl PendingRequest {
    /// Captures a request.
    pub fn new(method: Method, url: impl Into<String>, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            url: url.into(),
            headers: flatten_headers(headers),
            body,
        }
    }

    /// Captures a request from its parts and collected body.
    pub fn from_parts(parts: &Parts, url: impl Into<String>, body: Bytes) -> Self {
        Self::new(parts.method.clone(), url, &parts.headers, body)
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pairs the request with its response body.
    pub fn complete(self, response_body: impl Into<Vec<u8>>) -> Exchange {
        Exchange {
            method: self.method,
            url: self.url,
            request_headers: self.headers,
            request_body: self.body,
            response_body: response_body.into(),
            response_headers: HashMap::new(),
            body_replaced: false,
        }
    }
}

/// One intercepted request/response pair.
#[derive(Debug, Clone)]
pub struct Exchange {
    method: Method,
    url: String,
    request_headers: HashMap<String, String>,
    request_body: Bytes,
    response_body: Vec<u8>,
    response_headers: HashMap<String, String>,
    body_replaced: bool,
}

impl Exchange {
    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request header by lowercase name.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Raw request body.
    pub fn request_body(&self) -> &[u8] {
        &self.request_body
    }

    /// Raw response body.
    pub fn response_body(&self) -> &[u8] {
        &self.response_body
    }

    /// Response body decoded as UTF-8, with invalid sequences replaced.
    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response_body)
    }

    /// Replaces the response body sent to the client.
    pub fn set_response_body(&mut self, body: impl Into<Vec<u8>>) {
        self.response_body = body.into();
        self.body_replaced = true;
    }

    /// Sets a response header; names are stored lowercase.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.response_headers
            .insert(name.to_ascii_lowercase(), value.into());
    }

    /// Headers set by rules.
    pub fn response_headers(&self) -> &HashMap<String, String> {
        &self.response_headers
    }

    /// Whether any rule replaced the response body.
    pub fn body_replaced(&self) -> bool {
        self.body_replaced
    }

    /// Consumes the exchange, returning the final response body.
    pub fn into_response_body(self) -> Vec<u8> {
        self.response_body
    }
}

/// Flattens a header map; repeated names keep the last value.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat = HashMap::with_capacity(headers.keys_len());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            flat.insert(name.as_str().to_string(), value.to_string());
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, ACCEPT, COOKIE};

    fn pending() -> PendingRequest {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));

        PendingRequest::new(
            Method::POST,
            "https://mp.weixin.qq.com/wx/front_end_logger",
            &headers,
            Bytes::from_static(b"{\"message\":\"hi\"}"),
        )
    }

    #[test]
    fn repeated_headers_keep_last_value() {
        let exchange = pending().complete(Vec::new());
        assert_eq!(exchange.request_header("cookie"), Some("b=2"));
        assert_eq!(exchange.request_header("Accept"), Some("text/html"));
    }

    #[test]
    fn complete_carries_request_fields() {
        let exchange = pending().complete(b"<html></html>".to_vec());

        assert_eq!(exchange.method(), &Method::POST);
        assert_eq!(exchange.url(), "https://mp.weixin.qq.com/wx/front_end_logger");
        assert_eq!(exchange.request_body(), b"{\"message\":\"hi\"}");
        assert_eq!(exchange.response_text(), "<html></html>");
        assert!(!exchange.body_replaced());
    }

    #[test]
    fn set_response_body_marks_replacement() {
        let mut exchange = pending().complete(b"old".to_vec());

        exchange.set_response_body("new");
        exchange.set_header("Content-Type", "text/plain");

        assert!(exchange.body_replaced());
        assert_eq!(exchange.response_body(), b"new");
        assert_eq!(
            exchange.response_headers().get("content-type").map(String::as_str),
            Some("text/plain")
        );
        assert_eq!(exchange.into_response_body(), b"new".to_vec());
    }

    #[test]
    fn lossy_text_for_invalid_utf8() {
        let exchange = pending().complete(vec![b'o', b'k', 0xff]);
        assert!(exchange.response_text().starts_with("ok"));
    }
}

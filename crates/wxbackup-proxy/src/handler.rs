//! HTTP handler correlating intercepted requests with their responses.
//!
//! A request to an intercepted host whose URL some rule matches is captured
//! as a [`PendingRequest`]; its response is collected, paired into an
//! [`Exchange`] and dispatched through the [`RuleEngine`] before being
//! forwarded. Requests under `/wx/` are answered by the rules themselves and
//! never reach the platform.

use std::collections::HashMap;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Request, Response},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;
use hyper::header::{
    HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HOST,
    TRANSFER_ENCODING,
};
use hyper::{HeaderMap, StatusCode, Uri};
use tracing::{debug, error, warn};

use crate::domains::InterceptHosts;
use crate::error::RuleError;
use crate::exchange::{Exchange, PendingRequest};
use crate::rules::RuleEngine;

/// Path prefix of endpoints answered by the proxy.
pub const LOCAL_PREFIX: &str = "/wx/";

fn bytes_to_body(bytes: impl Into<Bytes>) -> Body {
    Body::from(Full::new(bytes.into()))
}

/// HTTP handler for the MITM proxy.
///
/// hudsucker clones the handler for every request, so `pending` carries the
/// request half of one exchange from `handle_request` to `handle_response`.
#[derive(Clone, Debug)]
pub struct ProxyHandler {
    engine: Arc<RuleEngine>,
    hosts: Arc<InterceptHosts>,
    pending: Option<PendingRequest>,
}

impl ProxyHandler {
    /// Creates a handler dispatching to `engine` for traffic to `hosts`.
    pub fn new(engine: Arc<RuleEngine>, hosts: InterceptHosts) -> Self {
        Self {
            engine,
            hosts: Arc::new(hosts),
            pending: None,
        }
    }

    /// Runs the rule engine off the async executor.
    ///
    /// Rules read the database and may persist synchronously, so they run
    /// on the blocking pool. Returns `None` if the task panicked.
    async fn dispatch(
        &self,
        mut exchange: Exchange,
    ) -> Option<(Exchange, Result<usize, RuleError>)> {
        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || {
            let result = engine.handle(&mut exchange);
            (exchange, result)
        });

        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Rule dispatch task failed");
                None
            }
        }
    }

    /// Answers a `/wx/` request with whatever the matching rule wrote.
    async fn answer_locally(&self, pending: PendingRequest) -> Response<Body> {
        let url = pending.url().to_string();

        match self.dispatch(pending.complete(Vec::new())).await {
            Some((_, Ok(0))) => {
                debug!(url = %url, "No local endpoint");
                build_response(StatusCode::NOT_FOUND, &HashMap::new(), b"not found".to_vec())
            }
            Some((exchange, Ok(_))) => {
                let headers = exchange.response_headers().clone();
                build_response(StatusCode::OK, &headers, exchange.into_response_body())
            }
            Some((_, Err(e))) => {
                warn!(url = %url, error = %e, "Local endpoint failed");
                build_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &HashMap::new(),
                    e.to_string().into_bytes(),
                )
            }
            None => build_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &HashMap::new(),
                Vec::new(),
            ),
        }
    }

    /// Extracts host from request URI or Host header.
    fn extract_host(req: &Request<Body>) -> Option<String> {
        if let Some(host) = req.uri().host() {
            return Some(host.to_string());
        }

        req.headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    }
}

impl HttpHandler for ProxyHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        self.pending = None;

        let host = match Self::extract_host(&req) {
            Some(h) => h,
            None => return RequestOrResponse::Request(req),
        };
        if !self.hosts.contains(&host) {
            return RequestOrResponse::Request(req);
        }

        let (mut parts, body) = req.into_parts();
        // Responses must arrive as plain text for the rules to read them.
        parts.headers.remove(ACCEPT_ENCODING);

        let url = absolute_url(&parts.uri, &host);
        let local = parts.uri.path().starts_with(LOCAL_PREFIX);
        if !local && !self.engine.matches_any(&parts.method, &url) {
            return RequestOrResponse::Request(Request::from_parts(parts, body));
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(url = %url, "Failed to read request body: {}", e);
                return RequestOrResponse::Request(Request::from_parts(parts, Body::empty()));
            }
        };

        let pending = PendingRequest::from_parts(&parts, url, body.clone());
        if local {
            return RequestOrResponse::Response(self.answer_locally(pending).await);
        }

        debug!(method = %parts.method, url = %pending.url(), "Capturing exchange");
        self.pending = Some(pending);
        RequestOrResponse::Request(Request::from_parts(parts, bytes_to_body(body)))
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        let Some(pending) = self.pending.take() else {
            return res;
        };

        let encoded = res
            .headers()
            .get(CONTENT_ENCODING)
            .is_some_and(|v| !v.as_bytes().eq_ignore_ascii_case(b"identity"));
        if encoded {
            debug!(url = %pending.url(), "Skipping encoded response");
            return res;
        }

        let (mut parts, body) = res.into_parts();
        let original = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(url = %pending.url(), "Failed to read response body: {}", e);
                return Response::from_parts(parts, Body::empty());
            }
        };

        let url = pending.url().to_string();
        let final_body = match self.dispatch(pending.complete(original.to_vec())).await {
            Some((exchange, result)) => {
                if let Err(e) = result {
                    warn!(url = %url, error = %e, "Rule failed");
                }
                apply_headers(&mut parts.headers, exchange.response_headers());
                if exchange.body_replaced() {
                    Bytes::from(exchange.into_response_body())
                } else {
                    original
                }
            }
            None => original,
        };

        parts.headers.remove(TRANSFER_ENCODING);
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(final_body.len()));
        Response::from_parts(parts, bytes_to_body(final_body))
    }

    async fn should_intercept(&mut self, _ctx: &HttpContext, req: &Request<Body>) -> bool {
        req.uri()
            .host()
            .is_some_and(|host| self.hosts.contains(host))
    }
}

/// Full URL of an intercepted request; origin-form URIs are resolved
/// against `host` over https.
fn absolute_url(uri: &Uri, host: &str) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("https://{host}{path}")
}

/// Copies rule-set headers; invalid names or values are skipped.
fn apply_headers(target: &mut HeaderMap, headers: &HashMap<String, String>) {
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid response header"),
        }
    }
}

fn build_response(
    status: StatusCode,
    headers: &HashMap<String, String>,
    body: Vec<u8>,
) -> Response<Body> {
    let len = body.len();
    let mut res = Response::new(bytes_to_body(body));
    *res.status_mut() = status;
    apply_headers(res.headers_mut(), headers);
    res.headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(len));
    res
}

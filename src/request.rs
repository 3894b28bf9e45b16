use std::io::Read;
use std::net::SocketAddr;

use tiny_http::{
    Method,
    Request,
};

use log::debug;

use crate::error::ProxyResult;

const PUBLISH_SUFFIX: &str = ".well-known/netinfproto/publish";
const RETRIEVE_SUFFIX: &str = ".well-known/netinfproto/get";

/// What the proxy does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Publish,
    Retrieve,
    /// Not part of the naming protocol; forwarded unchanged.
    Opaque,
}

/// Classify a request by method and URL.
///
/// Only POST requests to the well-known publish and get endpoints are
/// handled by the proxy itself.
pub fn classify(method: &Method, url: &str) -> RequestKind {
    if *method != Method::Post {
        return RequestKind::Opaque;
    }
    if url.contains(PUBLISH_SUFFIX) {
        return RequestKind::Publish;
    }
    if url.contains(RETRIEVE_SUFFIX) {
        return RequestKind::Retrieve;
    }
    RequestKind::Opaque
}

/// An incoming request, fully received.
///
/// The body is owned by the request and travels with it to whichever worker
/// handles it.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote_addr: Option<SocketAddr>,
}

impl ProxyRequest {
    pub fn new(method: Method, url: &str) -> ProxyRequest {
        ProxyRequest {
            method,
            url: url.to_string(),
            headers: vec!(),
            body: vec!(),
            remote_addr: None,
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> ProxyRequest {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> ProxyRequest {
        self.body = body;
        self
    }

    /// Take over a `tiny_http` request, reading its whole body.
    pub fn from_http(req: &mut Request) -> ProxyResult<ProxyRequest> {
        let headers: Vec<(String, String)> = req.headers()
            .iter()
            .map(|h| (h.field.to_string(), h.value.to_string()))
            .collect();
        let mut body = match req.body_length() {
            Some(v) => Vec::with_capacity(v),
            None => vec!(),
        };
        req.as_reader().read_to_end(&mut body)?;
        debug!("received {} {} with {} bytes body", req.method(), req.url(), body.len());
        Ok(ProxyRequest {
            method: req.method().clone(),
            url: req.url().to_string(),
            headers,
            body,
            remote_addr: req.remote_addr().copied(),
        })
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn kind(&self) -> RequestKind {
        classify(&self.method, &self.url)
    }
}

#[cfg(test)]
mod tests {
    use tiny_http::Method;

    use super::{
        classify,
        ProxyRequest,
        RequestKind,
    };

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Method::Post, "/.well-known/netinfproto/publish"), RequestKind::Publish);
        assert_eq!(classify(&Method::Post, "http://proxy:8082/.well-known/netinfproto/get"), RequestKind::Retrieve);
        assert_eq!(classify(&Method::Get, "/.well-known/netinfproto/get"), RequestKind::Opaque);
        assert_eq!(classify(&Method::Put, "/.well-known/netinfproto/publish"), RequestKind::Opaque);
        assert_eq!(classify(&Method::Post, "/upload"), RequestKind::Opaque);
        assert_eq!(classify(&Method::Get, "http://example.com/"), RequestKind::Opaque);
    }

    #[test]
    fn test_header_lookup() {
        let r = ProxyRequest::new(Method::Post, "/")
            .with_header("content-type", "text/plain");
        assert_eq!(r.content_type(), Some("text/plain"));
        assert_eq!(r.header("Host"), None);
    }
}

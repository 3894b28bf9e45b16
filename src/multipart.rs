//! Minimal `multipart/form-data` codec.
//!
//! Parts are kept together with their raw bytes so that callers can either
//! use the parsed headers and body, or search the raw segment themselves.
use std::str::FromStr;

use mime::Mime;
use rand::distributions::Alphanumeric;
use rand::Rng;

use log::debug;

use crate::error::{
    ProxyError,
    ProxyResult,
};

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

pub(crate) fn find_bytes(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > hay.len() || hay.len() - from < needle.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let m = Mime::from_str(content_type).ok()?;
    if m.type_() != mime::MULTIPART || m.subtype() != mime::FORM_DATA {
        return None;
    }
    m.get_param(mime::BOUNDARY).map(|v| v.as_str().to_string())
}

/// Value of a `key=value` or `key="value"` parameter in a header value.
pub fn header_param(value: &str, key: &str) -> Option<String> {
    for p in value.split(';') {
        let (k, v) = match p.split_once('=') {
            Some(v) => v,
            None => continue,
        };
        if k.trim().eq_ignore_ascii_case(key) {
            let v = v.trim();
            let v = v.strip_prefix('"').unwrap_or(v);
            let v = v.strip_suffix('"').unwrap_or(v);
            return Some(v.to_string());
        }
    }
    None
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    headers: Vec<(String, String)>,
    raw: Vec<u8>,
    body_offset: usize,
}

impl Part {
    fn parse(raw: &[u8]) -> ProxyResult<Part> {
        let (header_bytes, body_offset) = if raw.starts_with(CRLF) {
            (&raw[..0], CRLF.len())
        } else {
            match find_bytes(raw, HEADER_END, 0) {
                Some(i) => (&raw[..i], i + HEADER_END.len()),
                None => {
                    return Err(ProxyError::MalformedRequest(String::from("multipart part has no header terminator")));
                },
            }
        };

        let header_str = String::from_utf8_lossy(header_bytes);
        let mut headers = vec!();
        for l in header_str.split("\r\n") {
            if l.is_empty() {
                continue;
            }
            match l.split_once(':') {
                Some((k, v)) => {
                    headers.push((k.trim().to_string(), v.trim().to_string()));
                },
                None => {
                    debug!("skipping malformed part header line {:?}", l);
                },
            }
        }

        Ok(Part {
            headers,
            raw: raw.to_vec(),
            body_offset,
        })
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_disposition(&self) -> Option<&str> {
        self.header("Content-Disposition")
    }

    /// Form field name from the content disposition.
    pub fn name(&self) -> Option<String> {
        self.content_disposition().and_then(|v| header_param(v, "name"))
    }

    pub fn filename(&self) -> Option<String> {
        self.content_disposition().and_then(|v| header_param(v, "filename"))
    }

    pub fn content_type(&self) -> Option<Mime> {
        self.header("Content-Type").and_then(|v| Mime::from_str(v).ok())
    }

    /// True when the part declares a text type or no type at all.
    pub fn is_text(&self) -> bool {
        match self.content_type() {
            Some(v) => v.type_() == mime::TEXT,
            None => true,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[self.body_offset..]
    }

    /// Headers and body as received, without the delimiter lines.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// First line of the body.
    pub fn first_line(&self) -> String {
        let b = self.body();
        let end = match find_bytes(b, CRLF, 0) {
            Some(i) => i,
            None => b.len(),
        };
        String::from_utf8_lossy(&b[..end]).to_string()
    }
}

/// Split `body` into its parts.
pub fn parse(body: &[u8], boundary: &str) -> ProxyResult<Vec<Part>> {
    if boundary.is_empty() {
        return Err(ProxyError::MalformedRequest(String::from("empty multipart boundary")));
    }
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut next_delimiter = CRLF.to_vec();
    next_delimiter.extend_from_slice(&delimiter);

    let mut pos = if body.starts_with(&delimiter) {
        0
    } else {
        match find_bytes(body, &next_delimiter, 0) {
            Some(i) => i + CRLF.len(),
            None => {
                return Err(ProxyError::MalformedRequest(String::from("multipart boundary not found")));
            },
        }
    };

    let mut parts = vec!();
    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            break;
        }
        let start = match find_bytes(body, CRLF, pos) {
            Some(i) => i + CRLF.len(),
            None => {
                return Err(ProxyError::MalformedRequest(String::from("truncated multipart delimiter line")));
            },
        };
        let end = match find_bytes(body, &next_delimiter, start) {
            Some(i) => i,
            None => {
                return Err(ProxyError::MalformedRequest(String::from("unterminated multipart body")));
            },
        };
        let part = Part::parse(&body[start..end])?;
        debug!("multipart part {:?} with {} bytes body", part.name(), part.body().len());
        parts.push(part);
        pos = end + CRLF.len();
    }
    Ok(parts)
}

/// Builds a `multipart/form-data` body.
pub struct FormBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl FormBuilder {
    pub fn new() -> FormBuilder {
        let boundary: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        FormBuilder::with_boundary(&boundary)
    }

    pub fn with_boundary(boundary: &str) -> FormBuilder {
        FormBuilder {
            boundary: boundary.to_string(),
            body: vec!(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn text(mut self, name: &str, value: &str) -> FormBuilder {
        let h = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
            self.boundary,
            name,
            );
        self.body.extend_from_slice(h.as_bytes());
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(CRLF);
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &Mime, data: &[u8]) -> FormBuilder {
        let h = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            name,
            filename,
            content_type,
            );
        self.body.extend_from_slice(h.as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(CRLF);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let t = format!("--{}--\r\n", self.boundary);
        self.body.extend_from_slice(t.as_bytes());
        self.body
    }
}

impl Default for FormBuilder {
    fn default() -> Self {
        FormBuilder::new()
    }
}

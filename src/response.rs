use tiny_http::{
    Header,
    Request,
    Response,
    StatusCode,
};

use log::{debug, warn, error};

/// Value of the `Server` header on responses the proxy produces itself.
pub fn server_header() -> (String, String) {
    let v = format!("niproxy/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"));
    (String::from("Server"), v)
}

/// An outgoing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn empty(status: u16) -> ProxyResponse {
        ProxyResponse {
            status,
            headers: vec!(),
            body: vec!(),
        }
    }

    pub fn with_content(status: u16, content_type: &str, body: Vec<u8>) -> ProxyResponse {
        ProxyResponse {
            status,
            headers: vec!((String::from("Content-Type"), content_type.to_string())),
            body,
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> ProxyResponse {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}

/// Send `r` as the response to `req`.
pub fn exec_response(req: Request, r: ProxyResponse) {
    let status = r.status;
    let mut res = Response::from_data(r.body);
    res = res.with_status_code(StatusCode(status));

    let mut have_server = false;
    for (k, v) in r.headers.iter() {
        if k.eq_ignore_ascii_case("Server") {
            have_server = true;
        }
        match Header::from_bytes(k.as_bytes(), v.as_bytes()) {
            Ok(h) => {
                res.add_header(h);
            },
            Err(_) => {
                warn!("dropping unrepresentable header {}", k);
            },
        }
    }
    if !have_server {
        let (k, v) = server_header();
        if let Ok(h) = Header::from_bytes(k.as_bytes(), v.as_bytes()) {
            res.add_header(h);
        }
    }

    match req.respond(res) {
        Ok(_) => {
            debug!("served response {}", status);
        },
        Err(e) => {
            error!("cannot send response: {}", e);
        },
    }
}

use std::io::Read;
use std::net::SocketAddr;
use std::time::Duration;

use tiny_http::Method;
use ureq::{
    Agent,
    AgentBuilder,
    ErrorKind,
};
use url::Url;

use log::{debug, info, error};

use crate::error::{
    ProxyError,
    ProxyResult,
};
use crate::request::ProxyRequest;
use crate::response::ProxyResponse;

const VIA_TOKEN: &str = "1.1 niproxy";

/// Headers that describe one connection and are never relayed.
const HOP_BY_HOP: [&str; 11] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "host",
];

fn is_hop_by_hop(key: &str) -> bool {
    HOP_BY_HOP.iter().any(|v| key.eq_ignore_ascii_case(v))
}

/// Re-issues requests that are not part of the naming protocol to their
/// original destination.
pub struct Forwarder {
    agent: Agent,
    local: Option<SocketAddr>,
}

impl Forwarder {
    /// `timeout` bounds every outbound request; `None` waits indefinitely.
    pub fn new(timeout: Option<Duration>) -> Forwarder {
        let mut b = AgentBuilder::new().redirects(0);
        if let Some(v) = timeout {
            b = b.timeout(v);
        }
        Forwarder {
            agent: b.build(),
            local: None,
        }
    }

    /// Refuse requests addressed to `addr`, the proxy's own listener.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Forwarder {
        self.local = Some(addr);
        self
    }

    /// Whether `target` resolves to the proxy's own listener.
    pub fn targets_self(&self, target: &Url) -> bool {
        let local = match self.local {
            Some(v) => v,
            None => {
                return false;
            },
        };
        if target.port_or_known_default() != Some(local.port()) {
            return false;
        }
        let addrs = match target.socket_addrs(|| None) {
            Ok(v) => v,
            Err(e) => {
                debug!("cannot resolve {}: {}", target, e);
                return false;
            },
        };
        let local_ip = local.ip();
        addrs.iter().any(|a| {
            let ip = a.ip();
            ip == local_ip
                || ip.is_unspecified()
                || (ip.is_loopback() && (local_ip.is_loopback() || local_ip.is_unspecified()))
        })
    }

    /// Where a request should be sent: its absolute URL if it has one,
    /// otherwise the path on the host named by the `Host` header.
    pub fn target(req: &ProxyRequest) -> ProxyResult<Url> {
        let s = if req.url.starts_with("http://") || req.url.starts_with("https://") {
            req.url.clone()
        } else {
            match req.header("Host") {
                Some(host) if !host.is_empty() => format!("http://{}{}", host, req.url),
                _ => {
                    return Err(ProxyError::BadTarget(req.url.clone()));
                },
            }
        };
        match Url::parse(&s) {
            Ok(v) if v.has_host() => Ok(v),
            _ => Err(ProxyError::BadTarget(s)),
        }
    }

    /// Send `req` upstream and relay the answer.
    ///
    /// Upstream error statuses are relayed like any other response; only
    /// failing to talk to the upstream at all is an error.
    pub fn forward(&self, req: &ProxyRequest) -> ProxyResult<ProxyResponse> {
        let mut via = String::from(VIA_TOKEN);
        if let Some(v) = req.header("Via") {
            if v.contains(VIA_TOKEN) {
                return Err(ProxyError::Forwarding(format!("forwarding loop for {}", &req.url)));
            }
            via = format!("{}, {}", v, VIA_TOKEN);
        }

        let target = Forwarder::target(req)?;
        if self.targets_self(&target) {
            return Err(ProxyError::Forwarding(format!("{} addresses the proxy itself", &target)));
        }
        debug!("serving as normal proxy for {} {}", req.method, &target);

        let mut outbound = self.agent.request_url(&req.method.to_string(), &target);
        for (k, v) in req.headers.iter() {
            if is_hop_by_hop(k) || k.eq_ignore_ascii_case("Via") {
                continue;
            }
            outbound = outbound.set(k, v);
        }
        outbound = outbound.set("Via", &via);

        let r = match req.method {
            Method::Get | Method::Head => outbound.call(),
            _ => outbound.send_bytes(&req.body),
        };
        let upstream = match r {
            Ok(v) => v,
            Err(ureq::Error::Status(code, v)) => {
                debug!("upstream {} answered {}", &target, code);
                v
            },
            Err(ureq::Error::Transport(e)) => {
                return match e.kind() {
                    ErrorKind::InvalidUrl | ErrorKind::UnknownScheme => {
                        Err(ProxyError::BadTarget(e.to_string()))
                    },
                    _ => {
                        error!("forwarding {} failed: {}", &target, e);
                        Err(ProxyError::Forwarding(e.to_string()))
                    },
                };
            },
        };

        let status = upstream.status();
        let mut headers = vec!();
        for k in upstream.headers_names() {
            if is_hop_by_hop(&k) {
                continue;
            }
            for v in upstream.all(&k) {
                headers.push((k.clone(), v.to_string()));
            }
        }

        let mut body = vec!();
        if let Err(e) = upstream.into_reader().read_to_end(&mut body) {
            error!("reading upstream body from {} failed: {}", &target, e);
            return Err(ProxyError::Forwarding(e.to_string()));
        }
        info!("forwarded {} {} -> {} ({} bytes)", req.method, &target, status, body.len());

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

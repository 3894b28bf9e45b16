use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tiny_http::Server;

use log::{debug, info, error};

use crate::arg::Settings;
use crate::dispatch::Dispatcher;
use crate::error::{
    ProxyError,
    ProxyResult,
};
use crate::request::ProxyRequest;
use crate::response::{
    exec_response,
    ProxyResponse,
};

/// How long a worker blocks waiting for a request before checking whether
/// it should stop.
const LISTEN_INTERVAL: Duration = Duration::from_millis(250);

/// Log a message when a worker thread ends.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        debug!("{}", self.0);
    }
}

/// The listening proxy: one `tiny_http` listener shared by a fixed number of
/// OS worker threads, each handling a request from receipt to response.
pub struct ProxyServer {
    cont: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    worker_count: usize,
    addr: Option<SocketAddr>,
    server: Option<Arc<Server>>,
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        let _g = ThreadGuard("server shutdown complete");
        let _ = self.shutdown();
    }
}

impl ProxyServer {
    /// Bind the listener. No request is served until [ProxyServer::serve].
    pub fn bind(settings: &Settings) -> ProxyResult<ProxyServer> {
        let listen = settings.listen_address();
        let server = match Server::http(&listen) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                error!("cannot listen on {}: {}", &listen, e);
                return Err(ProxyError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())));
            },
        };
        let addr = server.server_addr().to_ip();
        info!("listening on {:?}", addr);

        Ok(ProxyServer {
            cont: Arc::new(AtomicBool::new(true)),
            workers: Vec::with_capacity(settings.workers),
            worker_count: settings.workers,
            addr,
            server: Some(server),
        })
    }

    /// Spawn the workers handing requests to `dispatcher`.
    pub fn serve(&mut self, dispatcher: Arc<Dispatcher>) -> ProxyResult<()> {
        let server = match &self.server {
            Some(v) => v.clone(),
            None => {
                return Err(ProxyError::Io(io::Error::new(io::ErrorKind::NotConnected, "server is shut down")));
            },
        };
        for i in 0..self.worker_count {
            let server = server.clone();
            let dispatcher = dispatcher.clone();
            let cont = self.cont.clone();
            let h = thread::Builder::new()
                .name(format!("niproxy-worker-{}", i))
                .spawn(move || {
                    worker(server, dispatcher, cont)
                })?;
            self.workers.push(h);
        }
        info!("serving with {} workers", self.worker_count);
        Ok(())
    }

    /// The bound listening address.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Stop accepting requests and wait for all workers to finish.
    ///
    /// Returns an error if any worker thread panicked.
    pub fn shutdown(&mut self) -> ProxyResult<()> {
        let mut is_err = false;
        self.cont.store(false, Ordering::SeqCst);
        if let Some(v) = self.server.as_ref() {
            v.unblock();
        }
        while let Some(h) = self.workers.pop() {
            debug!("waiting on {} threads to close", self.workers.len() + 1);
            if h.join().is_err() {
                is_err = true;
            }
        }
        drop(self.server.take());
        if is_err {
            return Err(ProxyError::Io(io::Error::new(io::ErrorKind::Other, "worker thread panicked")));
        }
        Ok(())
    }
}

fn worker(server: Arc<Server>, dispatcher: Arc<Dispatcher>, cont: Arc<AtomicBool>) {
    let _g = ThreadGuard("worker thread has ended");

    while cont.load(Ordering::SeqCst) {
        let mut req = match server.recv_timeout(LISTEN_INTERVAL) {
            Ok(Some(v)) => v,
            Ok(None) => {
                continue;
            },
            Err(e) => {
                error!("receive failed: {}", e);
                break;
            },
        };

        let preq = match ProxyRequest::from_http(&mut req) {
            Ok(v) => v,
            Err(e) => {
                error!("cannot read request {} {}: {}", req.method(), req.url(), e);
                exec_response(req, ProxyResponse::empty(400));
                continue;
            },
        };
        debug!("request from {:?}", preq.remote_addr);

        let res = dispatcher.dispatch(preq);
        exec_response(req, res);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;
    use ureq::AgentBuilder;

    use super::ProxyServer;
    use crate::arg::Settings;
    use crate::cache::CacheStore;
    use crate::digest::{
        compute_digest,
        SHA256,
    };
    use crate::directory::Directory;
    use crate::dispatch::Dispatcher;
    use crate::forward::Forwarder;
    use crate::multipart::FormBuilder;

    fn start(settings: &Settings) -> ProxyServer {
        let cache = CacheStore::open(&settings.cache_root, settings.purge_cache).unwrap();
        let mut srv = ProxyServer::bind(settings).unwrap();
        let forwarder = Forwarder::new(settings.connection_timeout())
            .with_local_addr(srv.listen_addr().unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(Directory::new(settings.max_directory_size)),
            Arc::new(cache),
            forwarder,
            );
        srv.serve(Arc::new(dispatcher)).unwrap();
        srv
    }

    fn status_of(r: Result<ureq::Response, ureq::Error>) -> (u16, Vec<u8>, Option<String>) {
        let res = match r {
            Ok(v) => v,
            Err(ureq::Error::Status(_, v)) => v,
            Err(e) => {
                panic!("request failed: {}", e);
            },
        };
        let status = res.status();
        let server = res.header("Server").map(|v| v.to_string());
        let mut body = vec!();
        res.into_reader().read_to_end(&mut body).unwrap();
        (status, body, server)
    }

    #[test]
    fn test_publish_and_retrieve() {
        let _ = env_logger::builder().is_test(true).try_init();
        let d = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.host = String::from("127.0.0.1");
        settings.port = 0;
        settings.cache_root = d.path().join("cache");
        let mut srv = start(&settings);
        let base = format!("http://{}", srv.listen_addr().unwrap());

        let data = b"the quick brown fox";
        let name = format!("ni://example.com/sha-256;{}", compute_digest(data, SHA256).unwrap());
        let form = FormBuilder::new();
        let content_type = form.content_type();
        let body = form.file("octets", "fox.txt", &mime::APPLICATION_OCTET_STREAM, data)
            .text("URI", &name)
            .text("msgid", "1")
            .text("fullPut", "yes")
            .text("ext", "no extension")
            .finish();
        let r = ureq::post(&format!("{}/.well-known/netinfproto/publish", base))
            .set("Content-Type", &content_type)
            .send_bytes(&body);
        let (status, body, server) = status_of(r);
        assert_eq!(status, 200);
        assert!(body.is_empty());
        assert!(server.unwrap().starts_with("niproxy/"));

        let r = ureq::post(&format!("{}/.well-known/netinfproto/get", base))
            .send_form(&[("URI", name.as_str()), ("msgid", "2"), ("ext", "")]);
        let (status, body, _) = status_of(r);
        assert_eq!(status, 200);
        assert_eq!(body, data.to_vec());

        let r = ureq::post(&format!("{}/.well-known/netinfproto/get", base))
            .send_form(&[("URI", "ni://example.com/sha-256;nothere"), ("msgid", "3")]);
        let (status, _, server) = status_of(r);
        assert_eq!(status, 404);
        assert!(server.is_some());

        srv.shutdown().unwrap();
    }

    #[test]
    fn test_requests_to_self_do_not_exhaust_workers() {
        let d = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.host = String::from("127.0.0.1");
        settings.port = 0;
        settings.workers = 2;
        settings.cache_root = d.path().join("cache");
        let srv = start(&settings);
        let base = format!("http://{}", srv.listen_addr().unwrap());

        // each request names the proxy itself in its Host header
        let mut clients = vec!();
        for i in 0..settings.workers * 2 {
            let url = format!("{}/anything/{}", base, i);
            clients.push(thread::spawn(move || {
                let ua = AgentBuilder::new().timeout(Duration::from_secs(10)).build();
                status_of(ua.get(&url).call()).0
            }));
        }
        for c in clients {
            assert_eq!(c.join().unwrap(), 502);
        }

        let r = ureq::post(&format!("{}/.well-known/netinfproto/get", base))
            .timeout(Duration::from_secs(10))
            .send_form(&[("URI", "ni://example.com/sha-256;nothere"), ("msgid", "1")]);
        assert_eq!(status_of(r).0, 404);
    }
}

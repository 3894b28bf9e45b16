use std::path::Path;
use std::sync::Arc;

use url::form_urlencoded;

use log::{debug, info, warn, error};

use crate::cache::CacheStore;
use crate::digest::HashAlgorithm;
use crate::directory::{
    Directory,
    DirectoryEntry,
};
use crate::error::{
    ProxyError,
    ProxyResult,
};
use crate::forward::Forwarder;
use crate::multipart::boundary_from_content_type;
use crate::name::{
    extract_hash,
    Location,
};
use crate::record::decode_publish;
use crate::request::{
    ProxyRequest,
    RequestKind,
};
use crate::response::ProxyResponse;

const MULTIPART_MARKER: &str = "multipart/form-data";
const URLENCODED_MARKER: &str = "application/x-www-form-urlencoded";

/// Split a name into the (algorithm, hash value) pair that keys the directory.
pub fn name_key(name: &str) -> ProxyResult<(HashAlgorithm, String)> {
    let alg = HashAlgorithm::from_name(name)?;
    match extract_hash(name)? {
        Some(v) => Ok((alg, v)),
        None => Err(ProxyError::NotFound(format!("no hash value given in {}", name))),
    }
}

/// Routes each request to the publish or retrieve handler, or to the
/// forwarder.
pub struct Dispatcher {
    directory: Arc<Directory>,
    cache: Arc<CacheStore>,
    forwarder: Forwarder,
}

impl Dispatcher {
    pub fn new(directory: Arc<Directory>, cache: Arc<CacheStore>, forwarder: Forwarder) -> Dispatcher {
        Dispatcher {
            directory,
            cache,
            forwarder,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn dispatch(&self, req: ProxyRequest) -> ProxyResponse {
        match req.kind() {
            RequestKind::Publish => self.publish(&req),
            RequestKind::Retrieve => self.retrieve(&req),
            RequestKind::Opaque => self.forward(&req),
        }
    }

    fn publish(&self, req: &ProxyRequest) -> ProxyResponse {
        match self.process_publish(req) {
            Ok(_) => {
                info!("PUBLISH OK: {}", &req.url);
                ProxyResponse::empty(200)
            },
            Err(e) => {
                error!("PUBLISH ERROR: {}: {}", &req.url, e);
                ProxyResponse::empty(403)
            },
        }
    }

    fn process_publish(&self, req: &ProxyRequest) -> ProxyResult<()> {
        let content_type = match req.content_type() {
            Some(v) if v.contains(MULTIPART_MARKER) => v,
            v => {
                return Err(ProxyError::MalformedRequest(format!("publish is not multipart: {:?}", v)));
            },
        };
        let boundary = match boundary_from_content_type(content_type) {
            Some(v) => v,
            None => {
                return Err(ProxyError::MalformedRequest(String::from("no multipart boundary")));
            },
        };

        let record = decode_publish(&req.body, &boundary, &self.cache)?;
        let uri = match &record.uri {
            Some(v) => v,
            None => {
                return Err(ProxyError::MalformedRequest(String::from("no uri")));
            },
        };
        let (alg, hash) = name_key(uri)?;
        debug!("publish key {} {} msgid {:?}", alg, &hash, &record.msgid);
        self.directory.put(alg.tag(), &hash, record.loc)
    }

    fn retrieve(&self, req: &ProxyRequest) -> ProxyResponse {
        match self.process_retrieve(req) {
            Ok(v) => v,
            Err(ProxyError::MalformedRequest(e)) => {
                error!("GET ERROR (corrupted msg): {}", e);
                ProxyResponse::empty(403)
            },
            Err(e) => {
                error!("GET ERROR: {}", e);
                ProxyResponse::empty(404)
            },
        }
    }

    fn process_retrieve(&self, req: &ProxyRequest) -> ProxyResult<ProxyResponse> {
        match req.content_type() {
            Some(v) if v.contains(URLENCODED_MARKER) => {},
            v => {
                return Err(ProxyError::MalformedRequest(format!("wrong content type: {:?}", v)));
            },
        };

        let name = match form_urlencoded::parse(&req.body).find(|(k, _)| k.eq_ignore_ascii_case("URI")) {
            Some((_, v)) => v.into_owned(),
            None => {
                return Err(ProxyError::MalformedRequest(String::from("no URI field")));
            },
        };
        debug!("retrieve name {}", &name);

        let (alg, hash) = name_key(&name)?;
        let entry = match self.directory.get(alg.tag(), &hash) {
            Some(v) if !v.is_empty() => v,
            _ => {
                return Err(ProxyError::NotFound(format!("no mappings found for {}", &name)));
            },
        };

        match entry.first() {
            Some(Location::File(path)) => {
                let data = self.read_cached(path)?;
                info!("GET OK (ndo): {:?} {} bytes", path, data.len());
                Ok(ProxyResponse::with_content(200, "application/octet-stream", data))
            },
            _ => {
                let json = locations_json(&entry)?;
                info!("GET OK (locs): {}", String::from_utf8_lossy(&json));
                Ok(ProxyResponse::with_content(200, "application/json", json))
            },
        }
    }

    /// Read a cache file, refusing paths outside the cache root.
    fn read_cached(&self, path: &Path) -> ProxyResult<Vec<u8>> {
        let canon = match path.canonicalize() {
            Ok(v) => v,
            Err(e) => {
                return Err(ProxyError::NotFound(format!("{:?}: {}", path, e)));
            },
        };
        if !canon.starts_with(self.cache.root()) {
            warn!("refusing to serve {:?} outside cache root", &canon);
            return Err(ProxyError::NotFound(canon.to_string_lossy().to_string()));
        }
        self.cache.read(&canon)
    }

    fn forward(&self, req: &ProxyRequest) -> ProxyResponse {
        match self.forwarder.forward(req) {
            Ok(v) => v,
            Err(ProxyError::BadTarget(e)) => {
                error!("cannot forward {} {}: {}", req.method, &req.url, e);
                ProxyResponse::empty(400)
            },
            Err(e) => {
                error!("responding with HTTP 502 (gateway error) for {}: {}", &req.url, e);
                ProxyResponse::empty(502)
            },
        }
    }
}

fn locations_json(entry: &DirectoryEntry) -> ProxyResult<Vec<u8>> {
    serde_json::to_vec(&entry.to_strings())
        .map_err(|e| ProxyError::MalformedLocation(e.to_string()))
}

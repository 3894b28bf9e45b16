use std::fmt;
use std::io::Read;
use std::str::FromStr;

use sha2::{Sha256, Digest};

use log::debug;

use crate::error::{
    ProxyError,
    ProxyResult,
};

pub const SHA256: &str = "sha-256";
pub const SHA256_16: &str = "sha-256-16";

/// Hash algorithms a name may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// Full SHA-256 digest.
    Sha256,
    /// SHA-256 digest truncated to its first 2 bytes.
    Sha256_16,
}

impl HashAlgorithm {
    /// Tags in detection order.
    ///
    /// `sha-256` is a substring of `sha-256-16`, so the longer tag must be
    /// tried first or every truncated name would be read as a full one.
    pub const DETECTION_ORDER: [HashAlgorithm; 2] = [
        HashAlgorithm::Sha256_16,
        HashAlgorithm::Sha256,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => SHA256,
            HashAlgorithm::Sha256_16 => SHA256_16,
        }
    }

    /// Find the algorithm tag inside a name, returning the algorithm and the
    /// byte offset of the tag.
    pub fn locate(name: &str) -> ProxyResult<(HashAlgorithm, usize)> {
        let path_start = path_offset(name);
        for alg in HashAlgorithm::DETECTION_ORDER.iter() {
            if let Some(i) = name[path_start..].find(alg.tag()) {
                return Ok((*alg, path_start + i));
            }
        }
        Err(ProxyError::UnknownAlgorithm(name.to_string()))
    }

    /// Scan a name for a recognized algorithm tag.
    pub fn from_name(name: &str) -> ProxyResult<HashAlgorithm> {
        HashAlgorithm::locate(name).map(|(alg, _)| alg)
    }

    fn encode(&self, digest: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => {
                base64::encode_config(digest, base64::URL_SAFE_NO_PAD)
            },
            HashAlgorithm::Sha256_16 => {
                base64::encode_config(&digest[..2], base64::URL_SAFE_NO_PAD)
            },
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<HashAlgorithm, ProxyError> {
        match s {
            SHA256 => Ok(HashAlgorithm::Sha256),
            SHA256_16 => Ok(HashAlgorithm::Sha256_16),
            _ => Err(ProxyError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.tag())
    }
}

/// Offset where the path of a URI-like name begins, so that tags are never
/// matched inside a scheme or authority.
fn path_offset(name: &str) -> usize {
    match name.find("://") {
        Some(i) => {
            let authority_start = i + 3;
            match name[authority_start..].find('/') {
                Some(j) => authority_start + j,
                None => name.len(),
            }
        },
        None => 0,
    }
}

/// Compute the digest of `data` for the algorithm named by `algorithm`, encoded
/// URL-safe base64 without padding.
pub fn compute_digest(data: &[u8], algorithm: &str) -> ProxyResult<String> {
    let alg = HashAlgorithm::from_str(algorithm)?;
    let mut h = Sha256::new();
    h.update(data);
    let z = h.finalize();
    Ok(alg.encode(&z))
}

/// Same as [compute_digest] over the full contents of a reader.
pub fn compute_digest_reader(mut f: impl Read, alg: HashAlgorithm) -> ProxyResult<String> {
    let mut buf: [u8; 65535] = [0; 65535];
    let mut h = Sha256::new();
    let mut total_size: usize = 0;
    loop {
        let c = f.read(&mut buf[..])?;
        if c == 0 {
            break;
        }
        total_size += c;
        h.update(&buf[..c]);
    }
    let z = h.finalize();
    let hash = alg.encode(&z);
    debug!("have {} hash {} for {} bytes", alg, &hash, total_size);
    Ok(hash)
}

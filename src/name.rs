//! Names identify content by hash algorithm and hash value rather than by
//! location. Three surface forms are understood:
//!
//! * native: `ni://authority/sha-256;hashvalue[?query]`
//! * alternate: `nihttp://authority/sha-256;hashvalue`, which routes the
//!   lookup to `authority` itself
//! * well-known: `http://authority/.well-known/ni/sha-256/hashvalue[/...]`
//!
//! The publication directory is keyed by the compact `algorithm;hashvalue`
//! notation, so the same content published under different forms or
//! authorities resolves to the same entry.
use std::fmt;
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;

use url::Url;

use crate::digest::HashAlgorithm;
use crate::error::{
    ProxyError,
    ProxyResult,
};

pub const NATIVE_PREFIX: &str = "ni://";
pub const ALTERNATE_PREFIX: &str = "nihttp://";
pub const WELL_KNOWN_PREFIX: &str = "http://";
pub const WELL_KNOWN_PATH: &str = "/.well-known/ni/";
pub const RETRIEVE_PATH: &str = "/.well-known/netinfproto/get";
pub const PUBLISH_PATH: &str = "/.well-known/netinfproto/publish";

const FILE_PREFIX: &str = "file://";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameForm {
    Native,
    Alternate,
    WellKnown,
}

impl NameForm {
    /// Sniff the form of a name embedded anywhere in `text`.
    ///
    /// The alternate form is tested first, then native, then well-known.
    pub fn sniff(text: &str) -> Option<NameForm> {
        if text.contains(ALTERNATE_PREFIX) {
            return Some(NameForm::Alternate);
        }
        if text.contains(NATIVE_PREFIX) {
            return Some(NameForm::Native);
        }
        if text.contains(WELL_KNOWN_PREFIX) && text.contains(WELL_KNOWN_PATH) {
            return Some(NameForm::WellKnown);
        }
        None
    }

    /// Like [NameForm::sniff], but `text` must start with the name.
    pub fn detect(text: &str) -> Option<NameForm> {
        if text.starts_with(ALTERNATE_PREFIX) {
            return Some(NameForm::Alternate);
        }
        if text.starts_with(NATIVE_PREFIX) {
            return Some(NameForm::Native);
        }
        if text.starts_with(WELL_KNOWN_PREFIX) && text.contains(WELL_KNOWN_PATH) {
            return Some(NameForm::WellKnown);
        }
        None
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            NameForm::Native => NATIVE_PREFIX,
            NameForm::Alternate => ALTERNATE_PREFIX,
            NameForm::WellKnown => WELL_KNOWN_PREFIX,
        }
    }

    /// Separator between algorithm tag and hash value.
    pub fn separator(&self) -> char {
        match self {
            NameForm::WellKnown => '/',
            _ => ';',
        }
    }

    /// Character ending the hash value, if not the end of the string.
    fn terminator(&self) -> char {
        match self {
            NameForm::WellKnown => '/',
            _ => '?',
        }
    }
}

fn form_of(name: &str) -> NameForm {
    match NameForm::sniff(name) {
        Some(v) => v,
        None => NameForm::Native,
    }
}

/// Byte range of the hash token in `name`, including its leading separator.
fn hash_span(name: &str) -> ProxyResult<Option<(usize, usize, usize)>> {
    let (alg, off) = HashAlgorithm::locate(name)?;
    let form = form_of(name);
    let sep_start = off + alg.tag().len();
    if !name[sep_start..].starts_with(form.separator()) {
        return Ok(None);
    }
    let token_start = sep_start + 1;
    let token_end = match name[token_start..].find(form.terminator()) {
        Some(i) => token_start + i,
        None => name.len(),
    };
    if token_end == token_start {
        return Ok(None);
    }
    Ok(Some((sep_start, token_start, token_end)))
}

/// Insert `hash` after the algorithm tag of `name`.
pub fn insert_hash(name: &str, hash: &str) -> ProxyResult<String> {
    let (alg, off) = HashAlgorithm::locate(name)?;
    let split = off + alg.tag().len();
    let form = form_of(name);
    let mut s = String::with_capacity(name.len() + hash.len() + 1);
    s.push_str(&name[..split]);
    s.push(form.separator());
    s.push_str(hash);
    s.push_str(&name[split..]);
    Ok(s)
}

/// Remove the hash value and its separator from `name`. A name without a hash
/// value is returned unchanged.
pub fn remove_hash(name: &str) -> ProxyResult<String> {
    match hash_span(name)? {
        Some((sep_start, _, token_end)) => {
            let mut s = String::from(&name[..sep_start]);
            s.push_str(&name[token_end..]);
            Ok(s)
        },
        None => Ok(name.to_string()),
    }
}

/// The hash value carried by `name`, if any.
pub fn extract_hash(name: &str) -> ProxyResult<Option<String>> {
    let r = hash_span(name)?
        .map(|(_, token_start, token_end)| name[token_start..token_end].to_string());
    Ok(r)
}

/// Directory key notation for an (algorithm, value) pair.
pub fn compact_key(algorithm: &str, value: &str) -> String {
    format!("{};{}", algorithm, value)
}

/// Split a directory key back into (algorithm, value).
pub fn expand_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(';')
}

/// A parsed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NiName {
    pub form: NameForm,
    pub authority: String,
    pub algorithm: HashAlgorithm,
    pub hash: Option<String>,
    /// Query of a native name, without the `?`.
    pub query: Option<String>,
}

impl NiName {

    /// Parse the first name found in `text`.
    pub fn parse(text: &str) -> ProxyResult<NiName> {
        let form = match NameForm::sniff(text) {
            Some(v) => v,
            None => {
                return Err(ProxyError::MalformedLocation(text.to_string()));
            },
        };
        let start = match form {
            NameForm::WellKnown => text.find(WELL_KNOWN_PREFIX),
            _ => text.find(form.prefix()),
        };
        let s = match start {
            Some(i) => text[i..].trim_end(),
            None => {
                return Err(ProxyError::MalformedLocation(text.to_string()));
            },
        };

        let authority_start = form.prefix().len();
        let authority = match s[authority_start..].find('/') {
            Some(i) => &s[authority_start..authority_start + i],
            None => {
                return Err(ProxyError::MalformedLocation(s.to_string()));
            },
        };
        if authority.is_empty() && form == NameForm::WellKnown {
            return Err(ProxyError::MalformedLocation(s.to_string()));
        }

        let algorithm = HashAlgorithm::from_name(s)?;
        let hash = extract_hash(s)?;
        let query = match form {
            NameForm::WellKnown => None,
            _ => s.split_once('?').map(|(_, q)| q.to_string()),
        };

        Ok(NiName {
            form,
            authority: authority.to_string(),
            algorithm,
            hash,
            query,
        })
    }

    /// Compact directory key, or `None` if the name carries no hash value.
    pub fn directory_key(&self) -> Option<String> {
        self.hash.as_ref().map(|h| compact_key(self.algorithm.tag(), h))
    }

    fn hash_part(&self, sep: char) -> String {
        match &self.hash {
            Some(h) => format!("{}{}", sep, h),
            None => String::new(),
        }
    }

    pub fn to_native(&self) -> String {
        let mut s = format!(
            "{}{}/{}{}",
            NATIVE_PREFIX,
            self.authority,
            self.algorithm,
            self.hash_part(';'),
            );
        if let Some(q) = &self.query {
            s.push('?');
            s.push_str(q);
        }
        s
    }

    pub fn to_alternate(&self) -> String {
        format!(
            "{}{}/{}{}",
            ALTERNATE_PREFIX,
            self.authority,
            self.algorithm,
            self.hash_part(';'),
            )
    }

    pub fn to_well_known(&self) -> String {
        format!(
            "{}{}{}{}{}",
            WELL_KNOWN_PREFIX,
            self.authority,
            WELL_KNOWN_PATH,
            self.algorithm,
            self.hash_part('/'),
            )
    }

    /// Where a retrieve request for this name should be sent.
    pub fn retrieve_url(&self) -> Option<String> {
        if self.authority.is_empty() {
            return None;
        }
        Some(format!("http://{}{}", self.authority, RETRIEVE_PATH))
    }
}

impl fmt::Display for NiName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.form {
            NameForm::Native => self.to_native(),
            NameForm::Alternate => self.to_alternate(),
            NameForm::WellKnown => self.to_well_known(),
        };
        fmt.write_str(&s)
    }
}

/// A place known to hold named content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A local cache file.
    File(PathBuf),
    /// A name in any of the three surface forms.
    Name(String),
    /// Any other absolute URL.
    Url(String),
}

impl Location {
    pub fn file(path: &Path) -> Location {
        Location::File(path.to_path_buf())
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Location::File(_))
    }
}

impl FromStr for Location {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Location, ProxyError> {
        let s = s.trim();
        if let Some(v) = s.strip_prefix(FILE_PREFIX) {
            if v.is_empty() {
                return Err(ProxyError::MalformedLocation(s.to_string()));
            }
            return Ok(Location::File(PathBuf::from(v)));
        }
        if NameForm::detect(s).is_some() {
            return Ok(Location::Name(s.to_string()));
        }
        match Url::parse(s) {
            Ok(v) if v.has_host() => Ok(Location::Url(s.to_string())),
            _ => Err(ProxyError::MalformedLocation(s.to_string())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(v) => write!(fmt, "{}{}", FILE_PREFIX, v.display()),
            Location::Name(v) => fmt.write_str(v),
            Location::Url(v) => fmt.write_str(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::str::FromStr;

    use super::{
        compact_key,
        expand_key,
        extract_hash,
        insert_hash,
        remove_hash,
        Location,
        NameForm,
        NiName,
    };
    use crate::digest::HashAlgorithm;
    use crate::error::ProxyError;

    #[test]
    fn test_hash_native() {
        let n = "ni://example.com/sha-256;abcd?ct=text/plain";
        assert_eq!(extract_hash(n).unwrap().unwrap(), "abcd");
        let stripped = remove_hash(n).unwrap();
        assert_eq!(stripped, "ni://example.com/sha-256?ct=text/plain");
        let restored = insert_hash(&stripped, "abcd").unwrap();
        assert_eq!(restored, n);
        assert_eq!(extract_hash(&insert_hash(&stripped, "efgh").unwrap()).unwrap().unwrap(), "efgh");
    }

    #[test]
    fn test_hash_well_known() {
        let n = "http://example.com/.well-known/ni/sha-256/abcd/foo";
        assert_eq!(extract_hash(n).unwrap().unwrap(), "abcd");
        let stripped = remove_hash(n).unwrap();
        assert_eq!(stripped, "http://example.com/.well-known/ni/sha-256/foo");

        let bare = "http://example.com/.well-known/ni/sha-256";
        let full = insert_hash(bare, "abcd").unwrap();
        assert_eq!(full, "http://example.com/.well-known/ni/sha-256/abcd");
        assert_eq!(remove_hash(&full).unwrap(), bare);
    }

    #[test]
    fn test_hash_alternate() {
        let bare = "nihttp://example.com/sha-256-16";
        let full = insert_hash(bare, "LCY").unwrap();
        assert_eq!(full, "nihttp://example.com/sha-256-16;LCY");
        assert_eq!(extract_hash(&full).unwrap().unwrap(), "LCY");
        assert_eq!(remove_hash(&full).unwrap(), bare);
    }

    #[test]
    fn test_hash_absent() {
        assert_eq!(extract_hash("ni://example.com/sha-256").unwrap(), None);
        assert_eq!(extract_hash("ni://example.com/sha-256;").unwrap(), None);
        assert_eq!(remove_hash("ni://example.com/sha-256").unwrap(), "ni://example.com/sha-256");
    }

    #[test]
    fn test_hash_unknown_algorithm() {
        match extract_hash("ni://example.com/md5;abcd") {
            Err(ProxyError::UnknownAlgorithm(_)) => {},
            r => {
                panic!("expected unknown algorithm, got {:?}", r);
            },
        }
    }

    #[test]
    fn test_key_notation() {
        let k = compact_key("sha-256", "abcd");
        assert_eq!(k, "sha-256;abcd");
        assert_eq!(expand_key(&k), Some(("sha-256", "abcd")));
        assert_eq!(expand_key("sha-256"), None);
    }

    #[test]
    fn test_name_conversion() {
        let n = NiName::parse("ni://example.com/sha-256;abcd?ct=x").unwrap();
        assert_eq!(n.form, NameForm::Native);
        assert_eq!(n.authority, "example.com");
        assert_eq!(n.algorithm, HashAlgorithm::Sha256);
        assert_eq!(n.query.as_deref(), Some("ct=x"));

        let wku = n.to_well_known();
        assert_eq!(wku, "http://example.com/.well-known/ni/sha-256/abcd");

        let back = NiName::parse(&wku).unwrap();
        assert_eq!(back.form, NameForm::WellKnown);
        assert_eq!(back.authority, n.authority);
        assert_eq!(back.algorithm, n.algorithm);
        assert_eq!(back.hash, n.hash);
        assert_eq!(back.to_native(), "ni://example.com/sha-256;abcd");

        let alt = n.to_alternate();
        assert_eq!(alt, "nihttp://example.com/sha-256;abcd");
        assert_eq!(NiName::parse(&alt).unwrap().directory_key(), n.directory_key());
        assert_eq!(back.retrieve_url().unwrap(), "http://example.com/.well-known/netinfproto/get");
    }

    #[test]
    fn test_name_key_ignores_authority() {
        let a = NiName::parse("ni://a.example.com/sha-256;abcd").unwrap();
        let b = NiName::parse("ni:///sha-256;abcd").unwrap();
        let c = NiName::parse("http://b.example.com/.well-known/ni/sha-256/abcd").unwrap();
        assert_eq!(a.directory_key().unwrap(), "sha-256;abcd");
        assert_eq!(a.directory_key(), b.directory_key());
        assert_eq!(a.directory_key(), c.directory_key());
    }

    #[test]
    fn test_name_sniff_order() {
        assert_eq!(NameForm::sniff("xx nihttp://h/sha-256;a"), Some(NameForm::Alternate));
        assert_eq!(NameForm::sniff("ni://h/sha-256;a"), Some(NameForm::Native));
        assert_eq!(NameForm::sniff("http://h/.well-known/ni/sha-256/a"), Some(NameForm::WellKnown));
        assert_eq!(NameForm::sniff("http://h/foo"), None);
        assert!(NiName::parse("http://h/foo").is_err());
    }

    #[test]
    fn test_location_classify() {
        let l = Location::from_str("file:///tmp/nicache/deadbeef").unwrap();
        assert_eq!(l, Location::File(PathBuf::from("/tmp/nicache/deadbeef")));
        assert_eq!(l.to_string(), "file:///tmp/nicache/deadbeef");

        let l = Location::from_str("ni://h/sha-256;abcd").unwrap();
        assert_eq!(l, Location::Name(String::from("ni://h/sha-256;abcd")));

        let l = Location::from_str("http://example.com/f").unwrap();
        assert_eq!(l, Location::Url(String::from("http://example.com/f")));
        assert_eq!(l.to_string(), "http://example.com/f");

        assert!(Location::from_str("not a location").is_err());
    }
}

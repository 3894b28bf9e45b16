use std::str::FromStr;

use log::{debug, info, warn, error};

use crate::cache::CacheStore;
use crate::directory::DirectoryEntry;
use crate::error::{
    ProxyError,
    ProxyResult,
};
use crate::multipart::{
    find_bytes,
    parse as parse_multipart,
    Part,
};
use crate::name::{
    Location,
    NameForm,
    WELL_KNOWN_PREFIX,
};

/// Form field name of the binary part.
pub const OCTETS_FIELD: &str = "octets";

const HEADER_END: &[u8] = b"\r\n\r\n";

/// A decoded publish request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRecord {
    pub uri: Option<String>,
    pub msgid: Option<String>,
    pub ext: Option<String>,
    pub full_put: Option<String>,
    pub loc: DirectoryEntry,
}

impl PublishRecord {
    pub fn is_full_put(&self) -> bool {
        match &self.full_put {
            Some(v) => v.eq_ignore_ascii_case("yes"),
            None => false,
        }
    }

    /// Mandatory fields are `uri` and `msgid`, plus locations unless the
    /// content itself is included.
    pub fn is_valid(&self) -> bool {
        if self.uri.is_none() || self.msgid.is_none() {
            return false;
        }
        self.is_full_put() || !self.loc.is_empty()
    }

    fn field_status(&self) -> String {
        let f = |present: bool| if present { "OK" } else { "null" };
        format!(
            "loc={},msgid={},uri={},ext={},fullPut={}",
            f(!self.loc.is_empty()),
            f(self.msgid.is_some()),
            f(self.uri.is_some()),
            f(self.ext.is_some()),
            f(self.full_put.is_some()),
            )
    }
}

/// How the binary part arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OctetsBody {
    /// Declared with a binary content type; the parsed body is the payload.
    Binary,
    /// Declared as text or undeclared; the payload is located in the raw part.
    TextEmbedded,
}

/// Extract the name from a `URI` field value.
///
/// Forms are tried in the order alternate, native, well-known. The query of a
/// native name is not part of the published name.
fn uri_value(data: &str) -> ProxyResult<String> {
    let form = match NameForm::sniff(data) {
        Some(v) => v,
        None => {
            return Err(ProxyError::MalformedLocation(data.to_string()));
        },
    };
    let start = match form {
        NameForm::WellKnown => data.find(WELL_KNOWN_PREFIX),
        _ => data.find(form.prefix()),
    };
    let s = match start {
        Some(i) => data[i..].trim(),
        None => {
            return Err(ProxyError::MalformedLocation(data.to_string()));
        },
    };
    let s = match form {
        NameForm::Native => s.split('?').next().unwrap_or(s),
        _ => s,
    };
    Ok(s.to_string())
}

/// Payload of a text-embedded binary part: everything after the blank line
/// following the `filename` parameter.
fn locate_embedded_file(raw: &[u8]) -> Option<&[u8]> {
    let filename_idx = find_bytes(raw, b"filename", 0)?;
    let start = find_bytes(raw, HEADER_END, filename_idx)? + HEADER_END.len();
    Some(&raw[start..])
}

fn octets_payload(part: &Part) -> (OctetsBody, &[u8]) {
    if !part.is_text() {
        return (OctetsBody::Binary, part.body());
    }
    match locate_embedded_file(part.raw()) {
        Some(v) => (OctetsBody::TextEmbedded, v),
        None => (OctetsBody::TextEmbedded, part.body()),
    }
}

fn is_loc_field(name: &str) -> bool {
    match name.get(..3) {
        Some(v) => v.eq_ignore_ascii_case("loc"),
        None => false,
    }
}

/// Assign a text field to the record. `loc*` values are collected unparsed in
/// `locs`, since they only matter when the content itself is not uploaded.
fn apply_field(record: &mut PublishRecord, locs: &mut Vec<String>, name: &str, part: &Part) -> ProxyResult<()> {
    let value = part.first_line();
    if name.eq_ignore_ascii_case("URI") {
        record.uri = Some(uri_value(&value)?);
    } else if name.eq_ignore_ascii_case("msgid") {
        record.msgid = Some(value);
    } else if name.eq_ignore_ascii_case("ext") {
        record.ext = Some(value);
    } else if name.eq_ignore_ascii_case("fullPut") {
        record.full_put = Some(value);
    } else if is_loc_field(name) {
        locs.push(value);
    } else {
        debug!("ignoring form field {}", name);
    }
    Ok(())
}

/// Decode a publish request body.
///
/// When the record asks for a full put, the binary part is stored in `cache`
/// and the record's only location becomes the cache file. A cache file that
/// already exists is kept and used as the payload.
pub fn decode_publish(body: &[u8], boundary: &str, cache: &CacheStore) -> ProxyResult<PublishRecord> {
    let parts = parse_multipart(body, boundary)?;

    let mut record = PublishRecord::default();
    let mut octets: Option<&Part> = None;
    let mut locs: Vec<String> = vec!();
    for part in parts.iter() {
        let name = match part.name() {
            Some(v) => v,
            None => {
                debug!("skipping part without name");
                continue;
            },
        };
        if name == OCTETS_FIELD {
            octets = Some(part);
            continue;
        }
        apply_field(&mut record, &mut locs, &name, part)?;
    }

    if record.is_full_put() {
        if !locs.is_empty() {
            debug!("ignoring {} locations of full put", locs.len());
        }
    } else {
        for v in locs.iter() {
            record.loc.add(Location::from_str(v)?);
        }
    }

    if !record.is_valid() {
        error!("form does not have all mandatory fields");
        debug!("form: {}", record.field_status());
        return Err(ProxyError::MalformedRequest(String::from("missing mandatory publish fields")));
    }

    if record.is_full_put() {
        let part = match octets {
            Some(v) => v,
            None => {
                return Err(ProxyError::MalformedRequest(String::from("full put without octets part")));
            },
        };
        let (typ, payload) = octets_payload(part);
        debug!("octets part is {:?} with {} bytes", typ, payload.len());

        let logical_name = match (part.filename(), &record.uri) {
            (Some(v), _) if !v.is_empty() => v,
            (_, Some(v)) => v.clone(),
            _ => {
                return Err(ProxyError::MalformedRequest(String::from("no name for cache file")));
            },
        };
        let path = cache.file_name(&logical_name);
        match cache.write(&path, payload) {
            Ok(c) => {
                info!("cached {} bytes for {} at {:?}", c, &logical_name, &path);
            },
            Err(ProxyError::AlreadyExists(v)) => {
                warn!("cache file {} exists, using it as payload for {}", v, &logical_name);
            },
            Err(ProxyError::NoData(_)) => {
                return Err(ProxyError::MalformedRequest(String::from("empty octets part")));
            },
            Err(e) => {
                return Err(e);
            },
        }
        let mut loc = DirectoryEntry::new();
        loc.add(Location::file(&path));
        record.loc = loc;
    }

    Ok(record)
}

#![crate_name = "niproxy"]

//! niproxy is an HTTP proxy that resolves and caches content named by its digest.
//!
//! A name carries an authority, a hash algorithm tag and the digest of the
//! content, in one of three surface forms:
//!
//! ``` ignore,
//! ni://example.com/sha-256;LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564
//! nihttp://example.com/sha-256;LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564
//! http://example.com/.well-known/ni/sha-256/LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564
//! ```
//!
//! All three forms of the same (algorithm, digest) refer to the same entry;
//! the authority is not part of the lookup.
//!
//! ## Publishing
//!
//! A `POST` to `/.well-known/netinfproto/publish` with a `multipart/form-data`
//! body registers locations for a name (`loc0`, `loc1`, ...), or, with
//! `fullPut=yes`, uploads the content itself in the `octets` part. Uploaded
//! content is stored in the cache directory and served from there.
//!
//! ## Retrieving
//!
//! A `POST` to `/.well-known/netinfproto/get` with an urlencoded `URI` field
//! returns the cached content as `application/octet-stream`, or the list of
//! known locations as a JSON array.
//!
//! ## Everything else
//!
//! Any other request is forwarded to its destination and the answer relayed
//! unchanged.
//!
//! ## Running the daemon
//!
//! The daemon listens on all addresses on port 8082 by default and caches to
//! `/tmp/nicache`, which is wiped at startup. See `niproxy --help` for options.
//! A helper tool `niproxy_send` publishes files and retrieves names.

/// Command line and file configuration.
pub mod arg;

/// Content cache on the local filesystem.
pub mod cache;

/// Digests in the encodings used inside names.
pub mod digest;

/// In-memory mapping from names to locations.
pub mod directory;

/// Routes requests to the protocol handlers.
pub mod dispatch;

/// Error type shared by all modules.
pub mod error;

/// Relays opaque requests upstream.
pub mod forward;

/// Parse and build `multipart/form-data` bodies.
pub mod multipart;

/// Name forms and locations.
pub mod name;

/// Decodes publish requests.
pub mod record;

/// Encapsulates an incoming remote request.
pub mod request;

/// Encapsulates an outgoing response to remote.
pub mod response;

/// Worker pool serving the listener.
pub mod server;

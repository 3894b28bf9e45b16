use std::collections::HashMap;

use parking_lot::RwLock;

use log::debug;

use crate::error::{
    ProxyError,
    ProxyResult,
};
use crate::name::{
    compact_key,
    Location,
};

/// The set of locations known for one name.
///
/// Members are unique. Insertion order is kept so the first location is well
/// defined, but carries no other meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    locations: Vec<Location>,
}

impl DirectoryEntry {
    pub fn new() -> DirectoryEntry {
        DirectoryEntry::default()
    }

    /// Add a location, returning false if it was already present.
    pub fn add(&mut self, location: Location) -> bool {
        if self.locations.contains(&location) {
            return false;
        }
        self.locations.push(location);
        true
    }

    pub fn remove(&mut self, location: &Location) -> bool {
        let l = self.locations.len();
        self.locations.retain(|v| v != location);
        l != self.locations.len()
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    pub fn first(&self) -> Option<&Location> {
        self.locations.first()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    /// String form of every location, in order.
    pub fn to_strings(&self) -> Vec<String> {
        self.locations.iter().map(|v| v.to_string()).collect()
    }
}

impl FromIterator<Location> for DirectoryEntry {
    fn from_iter<I: IntoIterator<Item = Location>>(iter: I) -> Self {
        let mut entry = DirectoryEntry::new();
        for v in iter {
            entry.add(v);
        }
        entry
    }
}

/// Publication directory mapping (algorithm, hash value) to locations.
///
/// Every operation takes the lock for its own duration only. Readers get a
/// copy of the entry, so they never observe a mutation in progress.
pub struct Directory {
    entries: RwLock<HashMap<String, DirectoryEntry>>,
    capacity: usize,
}

impl Directory {
    /// Directory holding at most `capacity` names.
    pub fn new(capacity: usize) -> Directory {
        Directory {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the entry for the key with `locations`.
    pub fn put(&self, algorithm: &str, value: &str, locations: DirectoryEntry) -> ProxyResult<()> {
        let k = compact_key(algorithm, value);
        let mut entries = self.entries.write();
        if !entries.contains_key(&k) && entries.len() >= self.capacity {
            return Err(ProxyError::DirectoryFull(self.capacity));
        }
        entries.insert(k.clone(), locations);
        debug!("successful put for {} key", &k);
        Ok(())
    }

    /// Merge one location into the entry for the key, creating it if absent.
    pub fn add_location(&self, algorithm: &str, value: &str, location: Location) -> ProxyResult<()> {
        let k = compact_key(algorithm, value);
        let mut entries = self.entries.write();
        if !entries.contains_key(&k) && entries.len() >= self.capacity {
            return Err(ProxyError::DirectoryFull(self.capacity));
        }
        entries.entry(k.clone())
            .or_default()
            .add(location);
        debug!("successful add for {} key", &k);
        Ok(())
    }

    /// Delete the entry for the key, returning it if there was one.
    pub fn remove(&self, algorithm: &str, value: &str) -> Option<DirectoryEntry> {
        let k = compact_key(algorithm, value);
        let r = self.entries.write().remove(&k);
        debug!("successful remove for {} key", &k);
        r
    }

    pub fn get(&self, algorithm: &str, value: &str) -> Option<DirectoryEntry> {
        let k = compact_key(algorithm, value);
        self.entries.read().get(&k).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    use super::{
        Directory,
        DirectoryEntry,
    };
    use crate::error::ProxyError;
    use crate::name::Location;

    fn url(s: &str) -> Location {
        Location::Url(s.to_string())
    }

    #[test]
    fn test_entry_unique() {
        let mut e = DirectoryEntry::new();
        assert!(e.add(url("http://a/")));
        assert!(!e.add(url("http://a/")));
        assert_eq!(e.len(), 1);
        assert!(e.remove(&url("http://a/")));
        assert!(e.is_empty());
    }

    #[test]
    fn test_put_add_remove() {
        let d = Directory::new(10);
        let e: DirectoryEntry = vec!(url("http://l1/"), url("http://l2/")).into_iter().collect();
        d.put("sha-256", "abcd", e.clone()).unwrap();
        assert_eq!(d.get("sha-256", "abcd").unwrap(), e);

        d.add_location("sha-256", "abcd", url("http://l3/")).unwrap();
        let r = d.get("sha-256", "abcd").unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.contains(&url("http://l1/")));
        assert!(r.contains(&url("http://l2/")));
        assert!(r.contains(&url("http://l3/")));

        d.remove("sha-256", "abcd");
        assert!(d.get("sha-256", "abcd").is_none());
    }

    #[test]
    fn test_put_replaces() {
        let d = Directory::new(10);
        d.put("sha-256", "abcd", vec!(url("http://l1/")).into_iter().collect()).unwrap();
        let f = Location::File(PathBuf::from("/tmp/x"));
        d.put("sha-256", "abcd", vec!(f.clone()).into_iter().collect()).unwrap();
        let r = d.get("sha-256", "abcd").unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.first().unwrap(), &f);
    }

    #[test]
    fn test_add_creates() {
        let d = Directory::new(10);
        d.add_location("sha-256-16", "LCY", url("http://l1/")).unwrap();
        assert_eq!(d.get("sha-256-16", "LCY").unwrap().len(), 1);
        assert!(d.get("sha-256", "LCY").is_none());
    }

    #[test]
    fn test_capacity() {
        let d = Directory::new(1);
        d.put("sha-256", "a", vec!(url("http://l1/")).into_iter().collect()).unwrap();
        // existing key can still be replaced
        d.put("sha-256", "a", vec!(url("http://l2/")).into_iter().collect()).unwrap();
        match d.put("sha-256", "b", vec!(url("http://l1/")).into_iter().collect()) {
            Err(ProxyError::DirectoryFull(1)) => {},
            r => {
                panic!("expected full directory, got {:?}", r);
            },
        }
        assert!(d.add_location("sha-256", "c", url("http://l1/")).is_err());
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_concurrent_put_get() {
        let d = Arc::new(Directory::new(10));
        let small: DirectoryEntry = vec!(url("http://a/"), url("http://b/")).into_iter().collect();
        let big: DirectoryEntry = (0..50).map(|i| url(&format!("http://h{}/", i))).collect();
        d.put("sha-256", "abcd", small.clone()).unwrap();

        let mut workers = vec!();
        for i in 0..4 {
            let d = d.clone();
            let small = small.clone();
            let big = big.clone();
            workers.push(thread::spawn(move || {
                for j in 0..500 {
                    if (i + j) % 2 == 0 {
                        d.put("sha-256", "abcd", big.clone()).unwrap();
                    } else {
                        d.put("sha-256", "abcd", small.clone()).unwrap();
                    }
                }
            }));
        }
        for _ in 0..4 {
            let d = d.clone();
            let small = small.clone();
            let big = big.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..500 {
                    let r = d.get("sha-256", "abcd").unwrap();
                    assert!(r == small || r == big);
                }
            }));
        }
        for w in workers {
            w.join().unwrap();
        }
    }
}

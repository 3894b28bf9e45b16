use std::fs::{
    create_dir_all,
    read,
    remove_dir_all,
    remove_file,
    OpenOptions,
};
use std::io::{
    ErrorKind,
    Read,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};

use sha2::{Sha256, Digest};

use log::{debug, info, error};

use crate::error::{
    ProxyError,
    ProxyResult,
};

/// Flat directory of cache files, each named by the SHA256 of the logical
/// name it was published under.
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {

    /// Open the cache at `root`, creating it if needed.
    ///
    /// With `purge`, any previous contents are removed first; the directory
    /// holding the only index to them does not survive restarts.
    pub fn open(root: &Path, purge: bool) -> ProxyResult<CacheStore> {
        if purge && root.exists() {
            info!("purging cache directory {:?}", root);
            remove_dir_all(root)?;
        }
        create_dir_all(root)?;
        let root = root.canonicalize()?;
        debug!("cache root is {:?}", root);
        Ok(CacheStore {
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache file for `logical_name`. Does not touch the disk.
    pub fn file_name(&self, logical_name: &str) -> PathBuf {
        let mut h = Sha256::new();
        h.update(logical_name.as_bytes());
        let z = h.finalize();
        self.root.join(hex::encode(z))
    }

    /// Write all of `data` to a new file at `path`.
    ///
    /// An existing file is never overwritten: the write fails with
    /// [ProxyError::AlreadyExists] and the file keeps its content. A reader
    /// yielding no bytes fails with [ProxyError::NoData] and creates nothing.
    pub fn write(&self, path: &Path, mut data: impl Read) -> ProxyResult<u64> {
        let path_str = path.to_string_lossy().to_string();
        if path.exists() {
            error!("cannot add a new cache file, file exists: {}", &path_str);
            return Err(ProxyError::AlreadyExists(path_str));
        }

        let mut buf: [u8; 65535] = [0; 65535];
        let mut c = data.read(&mut buf[..])?;
        if c == 0 {
            error!("no data to write to {}", &path_str);
            return Err(ProxyError::NoData(path_str));
        }

        let mut f = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                error!("cache file appeared while writing: {}", &path_str);
                return Err(ProxyError::AlreadyExists(path_str));
            },
            Err(e) => {
                return Err(e.into());
            },
        };

        let mut total_size: u64 = 0;
        loop {
            let r = f.write_all(&buf[..c]);
            if let Err(e) = r {
                error!("cannot write cache file {}: {}", &path_str, e);
                drop(f);
                let _ = remove_file(path);
                return Err(e.into());
            }
            total_size += c as u64;
            c = match data.read(&mut buf[..]) {
                Ok(v) => v,
                Err(e) => {
                    error!("cannot read data for cache file {}: {}", &path_str, e);
                    drop(f);
                    let _ = remove_file(path);
                    return Err(e.into());
                },
            };
            if c == 0 {
                break;
            }
        }

        debug!("wrote {} bytes to cache file {}", total_size, &path_str);
        Ok(total_size)
    }

    pub fn read(&self, path: &Path) -> ProxyResult<Vec<u8>> {
        match read(path) {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ProxyError::NotFound(path.to_string_lossy().to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a cache file.
    pub fn remove(&self, path: &Path) -> ProxyResult<()> {
        if !path.exists() {
            error!("cannot delete the cache file, file does not exist: {:?}", path);
            return Err(ProxyError::NotFound(path.to_string_lossy().to_string()));
        }
        remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{
        read,
        write,
    };
    use std::io;
    use std::io::Read;

    use tempfile::tempdir;

    use super::CacheStore;
    use crate::error::ProxyError;

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::Other, "short read"));
            }
            self.sent = true;
            buf[..3].copy_from_slice(b"foo");
            Ok(3)
        }
    }

    #[test]
    fn test_file_name() {
        let d = tempdir().unwrap();
        let cache = CacheStore::open(d.path(), false).unwrap();
        let p = cache.file_name("foo");
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae");
        assert_eq!(p.parent().unwrap(), cache.root());
        assert_eq!(cache.file_name("foo"), p);
    }

    #[test]
    fn test_write() {
        let d = tempdir().unwrap();
        let cache = CacheStore::open(d.path(), false).unwrap();
        let p = cache.file_name("f.bin");
        let c = cache.write(&p, &b"foobar"[..]).unwrap();
        assert_eq!(c, 6);
        assert_eq!(read(&p).unwrap(), b"foobar");
        assert_eq!(cache.read(&p).unwrap(), b"foobar");
    }

    #[test]
    fn test_write_no_overwrite() {
        let d = tempdir().unwrap();
        let cache = CacheStore::open(d.path(), false).unwrap();
        let p = cache.file_name("f.bin");
        cache.write(&p, &b"foo"[..]).unwrap();
        match cache.write(&p, &b"bar"[..]) {
            Err(ProxyError::AlreadyExists(_)) => {},
            r => {
                panic!("expected conflict, got {:?}", r);
            },
        }
        assert_eq!(read(&p).unwrap(), b"foo");
    }

    #[test]
    fn test_write_no_data() {
        let d = tempdir().unwrap();
        let cache = CacheStore::open(d.path(), false).unwrap();
        let p = cache.file_name("empty");
        match cache.write(&p, io::empty()) {
            Err(ProxyError::NoData(_)) => {},
            r => {
                panic!("expected no data, got {:?}", r);
            },
        }
        assert!(!p.exists());
    }

    #[test]
    fn test_write_short_read() {
        let d = tempdir().unwrap();
        let cache = CacheStore::open(d.path(), false).unwrap();
        let p = cache.file_name("broken");
        let r = cache.write(&p, FailingReader{ sent: false });
        assert!(r.is_err());
        assert!(!p.exists());
    }

    #[test]
    fn test_purge() {
        let d = tempdir().unwrap();
        let root = d.path().join("cache");
        let cache = CacheStore::open(&root, false).unwrap();
        let p = cache.file_name("foo");
        write(&p, b"foo").unwrap();

        let cache = CacheStore::open(&root, false).unwrap();
        assert!(cache.file_name("foo").is_file());

        let cache = CacheStore::open(&root, true).unwrap();
        assert!(!cache.file_name("foo").exists());
    }

    #[test]
    fn test_remove() {
        let d = tempdir().unwrap();
        let cache = CacheStore::open(d.path(), false).unwrap();
        let p = cache.file_name("foo");
        cache.write(&p, &b"foo"[..]).unwrap();
        cache.remove(&p).unwrap();
        assert!(!p.exists());
        match cache.read(&p) {
            Err(ProxyError::NotFound(_)) => {},
            r => {
                panic!("expected not found, got {:?}", r);
            },
        }
    }
}

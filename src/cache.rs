use crate::dest::sha1_hex;
use crate::error::KtError;
use crate::keytab::{self, Keytab};
use crate::persist::PrincipalStore;
use crate::secure;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Physical home of cached keytabs. The mapping from principal to its
/// current cache file lives with the persistence collaborator; this type
/// owns the files themselves.
#[derive(Debug)]
pub struct KeytabCache {
    cache_dir: Option<PathBuf>,
}

impl KeytabCache {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        KeytabCache { cache_dir }
    }

    /// The current cache file for `principal`, if one was ever recorded.
    pub fn lookup<S: PrincipalStore>(&self, store: &S, principal: &str) -> Option<PathBuf> {
        store.find(principal).and_then(|e| e.cached_keytab_path)
    }

    /// Write `kt` into the cache directory under a fresh name and lock the
    /// file down to the owner. The file name is salted with the current time
    /// purely so that repeated caching of the same principal never collides;
    /// it is not a security measure.
    ///
    /// An unset cache directory is a configuration fault, not a per-identity
    /// one.
    pub fn store(&self, principal: &str, kt: &Keytab) -> Result<PathBuf, KtError> {
        let Some(cache_dir) = &self.cache_dir else {
            error!("The keytab cache directory is not configured");
            return Err(KtError::CacheUnconfigured);
        };

        secure::create_private_dir(cache_dir)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| {
                error!(?err, "System clock is before the epoch");
                KtError::DoYouHaveATimeMachine
            })?
            .as_millis();

        let path = cache_dir.join(sha1_hex(&format!("{principal}{now}")));
        keytab::store(&path, kt)?;
        secure::enforce_owner_only(&path)?;

        Ok(path)
    }

    /// Record `new_path` as the principal's current cache file, handing back
    /// the path it displaces so the caller can unlink it.
    pub fn replace<S: PrincipalStore>(
        &self,
        store: &mut S,
        principal: &str,
        new_path: &Path,
    ) -> Option<PathBuf> {
        let mut entry = store.find(principal)?;
        let previous = entry.cached_keytab_path.replace(new_path.to_path_buf());
        store.update(entry);
        previous
    }

    /// Best-effort unlink of a cache file nothing points at any more. An
    /// orphan is a leak, not a correctness problem.
    pub fn discard(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            debug!(?err, ?path, "Failed to remove orphaned cache file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keytab::{KeytabEntry, KeytabKey};
    use crate::persist::MemoryPrincipalStore;
    use std::os::unix::fs::PermissionsExt;

    fn sample_keytab() -> Keytab {
        vec![KeytabEntry {
            principal: "hdfs@EXAMPLE.COM".parse().unwrap(),
            key: KeytabKey::Aes256CtsHmacSha196 { k: [7u8; 32] },
            timestamp: 1,
            kvno: 1,
        }]
    }

    #[test]
    fn test_store_unconfigured_is_fatal() {
        let cache = KeytabCache::new(None);
        assert_eq!(
            cache.store("hdfs@EXAMPLE.COM", &sample_keytab()),
            Err(KtError::CacheUnconfigured)
        );
    }

    #[test]
    fn test_store_creates_locked_down_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let cache = KeytabCache::new(Some(cache_dir.clone()));

        let kt = sample_keytab();
        let path = cache.store("hdfs@EXAMPLE.COM", &kt).unwrap();

        assert_eq!(path.parent(), Some(cache_dir.as_path()));
        let dir_mode = fs::metadata(&cache_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);

        assert_eq!(keytab::load(&path).unwrap(), kt);
    }

    #[test]
    fn test_store_twice_never_collides() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeytabCache::new(Some(dir.path().to_path_buf()));

        let a = cache.store("hdfs@EXAMPLE.COM", &sample_keytab()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = cache.store("hdfs@EXAMPLE.COM", &sample_keytab()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeytabCache::new(Some(dir.path().to_path_buf()));
        let mut store = MemoryPrincipalStore::new();

        // Unknown principals have no cache and replace records nothing.
        assert_eq!(cache.lookup(&store, "hdfs@EXAMPLE.COM"), None);
        assert_eq!(
            cache.replace(&mut store, "hdfs@EXAMPLE.COM", Path::new("/tmp/a")),
            None
        );
        assert_eq!(cache.lookup(&store, "hdfs@EXAMPLE.COM"), None);

        store.insert_principal("hdfs@EXAMPLE.COM", false);
        assert_eq!(
            cache.replace(&mut store, "hdfs@EXAMPLE.COM", Path::new("/tmp/a")),
            None
        );
        assert_eq!(
            cache.lookup(&store, "hdfs@EXAMPLE.COM"),
            Some(PathBuf::from("/tmp/a"))
        );

        let prev = cache.replace(&mut store, "hdfs@EXAMPLE.COM", Path::new("/tmp/b"));
        assert_eq!(prev, Some(PathBuf::from("/tmp/a")));
        assert_eq!(
            cache.lookup(&store, "hdfs@EXAMPLE.COM"),
            Some(PathBuf::from("/tmp/b"))
        );
    }

    #[test]
    fn test_discard_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeytabCache::new(Some(dir.path().to_path_buf()));

        let path = cache.store("hdfs@EXAMPLE.COM", &sample_keytab()).unwrap();
        cache.discard(&path);
        assert!(!path.exists());

        // Discarding a path that is already gone does not error.
        cache.discard(&path);
    }
}

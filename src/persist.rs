use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// What the durable store records per principal. The engine mutates only
/// `cached_keytab_path`; everything else is owned by whoever provisions the
/// principal in the first place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub principal: String,
    pub cached_keytab_path: Option<PathBuf>,
    pub service: bool,
}

/// The persistence collaborator. Real deployments back this with a database;
/// the engine only ever sees this trait.
pub trait PrincipalStore {
    /// The entry for a known principal, or `None` for one this store has
    /// never been told about. Unknown principals are never cached.
    fn find(&self, principal: &str) -> Option<CacheEntry>;

    fn update(&mut self, entry: CacheEntry);

    /// Whether `principal` has already been provisioned on `host` by a
    /// previous run.
    fn provisioned_on_host(&self, principal: &str, host: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    entries: BTreeMap<String, CacheEntry>,
    provisioned: BTreeSet<(String, String)>,
}

impl MemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_principal(&mut self, principal: &str, service: bool) {
        self.entries.insert(
            principal.to_string(),
            CacheEntry {
                principal: principal.to_string(),
                cached_keytab_path: None,
                service,
            },
        );
    }

    pub fn mark_provisioned(&mut self, principal: &str, host: &str) {
        self.provisioned
            .insert((principal.to_string(), host.to_string()));
    }
}

impl PrincipalStore for MemoryPrincipalStore {
    fn find(&self, principal: &str) -> Option<CacheEntry> {
        self.entries.get(principal).cloned()
    }

    fn update(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.principal.clone(), entry);
    }

    fn provisioned_on_host(&self, principal: &str, host: &str) -> bool {
        self.provisioned
            .contains(&(principal.to_string(), host.to_string()))
    }
}

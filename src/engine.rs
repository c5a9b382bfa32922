use crate::cache::KeytabCache;
use crate::dest;
use crate::error::KtError;
use crate::keytab::Keytab;
use crate::persist::PrincipalStore;
use crate::provider::KeytabProvider;
use crate::secure;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// One keytab delivery request: which host wants a keytab, where it will
/// finally live on that host, and whether the generated material may be
/// cached for reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub host: String,
    pub keytab_path: String,
    pub cachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The host directory under the data directory cannot be made to exist.
    DestinationUnavailable,
    /// No password and no cached keytab - there is nothing to materialize
    /// from.
    MissingCachedMaterial,
    /// The provider failed to generate, read, copy, or write keytab
    /// material.
    MaterializationFailed,
}

/// Per-identity result. Failures carry the message reported upward; hard
/// faults (`KtError`) are not represented here because they abort the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    Materialized,
    Skipped,
    Failed { kind: FailureKind, message: String },
}

/// Everything `process_identities` hands back to the caller. The last
/// failure message composes the reported failure text.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<IdentityOutcome>,
    pub last_failure: Option<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.last_failure.is_none()
    }
}

/// Materializes keytab files one identity at a time.
///
/// Each keytab lands in a host-specific directory under the data directory,
/// named by the SHA1 of its final destination path so that repeated requests
/// are easy to find and never collide:
///
/// ```text
///   data_directory
///   |- host1
///   |  |- 16a054404c8826cd604a27ac970e8cc4b9c7a3fa   (keytab file)
///   |  |- a3c09cae73406912e8c55296d1c85b674d24f576   (keytab file)
///   |- host2
///   |  |- ...
/// ```
///
/// An engine instance covers exactly one invocation: the visitation state
/// that suppresses duplicate work is in-memory only and is discarded with
/// the engine. Processing is strictly sequential.
pub struct MaterializeEngine<S, P> {
    data_dir: PathBuf,
    cache: KeytabCache,
    store: S,
    provider: P,
    visited: BTreeMap<String, BTreeSet<String>>,
}

impl<S: PrincipalStore, P: KeytabProvider> MaterializeEngine<S, P> {
    pub fn new(data_dir: PathBuf, cache: KeytabCache, store: S, provider: P) -> Self {
        MaterializeEngine {
            data_dir,
            cache,
            store,
            provider,
            visited: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Materialize the keytab for one identity record.
    ///
    /// `passwords` holds the secrets freshly created earlier in this run;
    /// a principal absent from it can only be satisfied from the cache.
    /// `kvnos` carries the matching key version numbers.
    ///
    /// Per-identity problems come back as `IdentityOutcome::Failed`;
    /// `KtError` is reserved for faults that invalidate the whole run.
    pub fn materialize(
        &mut self,
        identity: &Identity,
        principal: &str,
        passwords: &BTreeMap<String, String>,
        kvnos: &BTreeMap<String, u32>,
    ) -> Result<IdentityOutcome, KtError> {
        if identity.host.is_empty() || identity.keytab_path.is_empty() {
            debug!(
                "Identity record for {} names no host or keytab path, nothing to do",
                principal
            );
            return Ok(IdentityOutcome::Skipped);
        }

        let visitation_key = format!("{}|{}", identity.host, identity.keytab_path);
        if self
            .visited
            .get(principal)
            .is_some_and(|keys| keys.contains(&visitation_key))
        {
            debug!(
                "Skipping previously processed keytab for {} on host {}",
                principal, identity.host
            );
            return Ok(IdentityOutcome::Skipped);
        }

        let revisit = self.visited.contains_key(principal);
        let outcome = self.materialize_inner(identity, principal, revisit, passwords, kvnos)?;

        // Failures are recorded too - a failed attempt is not retried within
        // the same invocation.
        self.visited
            .entry(principal.to_string())
            .or_default()
            .insert(visitation_key);

        Ok(outcome)
    }

    /// Drive an ordered batch of `(principal, identity)` records. A failed
    /// identity does not stop the ones after it; only hard faults abort.
    pub fn process_identities(
        &mut self,
        records: &[(String, Identity)],
        passwords: &BTreeMap<String, String>,
        kvnos: &BTreeMap<String, u32>,
    ) -> Result<BatchReport, KtError> {
        let mut outcomes = Vec::with_capacity(records.len());
        let mut last_failure = None;

        for (principal, identity) in records {
            let outcome = self.materialize(identity, principal, passwords, kvnos)?;
            if let IdentityOutcome::Failed { message, .. } = &outcome {
                last_failure = Some(message.clone());
            }
            outcomes.push(outcome);
        }

        Ok(BatchReport {
            outcomes,
            last_failure,
        })
    }

    fn materialize_inner(
        &mut self,
        identity: &Identity,
        principal: &str,
        revisit: bool,
        passwords: &BTreeMap<String, String>,
        kvnos: &BTreeMap<String, u32>,
    ) -> Result<IdentityOutcome, KtError> {
        info!(
            "Creating keytab file for {} on host {}",
            principal, identity.host
        );

        let host_dir = self.data_dir.join(&identity.host);
        if !host_dir.exists() {
            match secure::create_private_dir(&host_dir) {
                Ok(()) => {}
                // Lockdown failures invalidate the run; a directory that
                // merely would not appear is handled below.
                Err(KtError::PermissionEnforcementFailed) => {
                    return Err(KtError::PermissionEnforcementFailed)
                }
                Err(err) => debug!(?err, ?host_dir, "Host directory could not be created"),
            }
        }

        if !host_dir.exists() {
            let message = format!(
                "Failed to create keytab file for {}, the container directory does not exist: {}",
                principal,
                host_dir.display()
            );
            error!("{}", message);
            return Ok(IdentityOutcome::Failed {
                kind: FailureKind::DestinationUnavailable,
                message,
            });
        }

        let destination = dest::resolve(&self.data_dir, &identity.host, &identity.keytab_path);

        match passwords.get(principal) {
            None => self.restore_from_cache(identity, principal, &destination),
            Some(password) => self.generate_or_reuse(
                identity,
                principal,
                password,
                kvnos.get(principal).copied(),
                revisit,
                &destination,
            ),
        }
    }

    /// No password was created for this principal in this run, so the only
    /// sources of truth are a prior provisioning of this host or the cache.
    fn restore_from_cache(
        &mut self,
        identity: &Identity,
        principal: &str,
        destination: &Path,
    ) -> Result<IdentityOutcome, KtError> {
        if self.store.provisioned_on_host(principal, &identity.host) {
            // The keytab must already be in place and we don't want to
            // regenerate it.
            debug!(
                "Skipping keytab file for {}, missing password indicates nothing to do",
                principal
            );
            return Ok(IdentityOutcome::Skipped);
        }

        let Some(cached) = self.cache.lookup(&self.store, principal) else {
            let message = format!(
                "Failed to create keytab for {}, missing cached file",
                principal
            );
            error!("{}", message);
            return Ok(IdentityOutcome::Failed {
                kind: FailureKind::MissingCachedMaterial,
                message,
            });
        };

        if let Err(err) = self.provider.copy_keytab(&cached, destination) {
            let message = format!(
                "Failed to create keytab file for {} - {:?}",
                principal, err
            );
            error!("{}", message);
            return Ok(IdentityOutcome::Failed {
                kind: FailureKind::MaterializationFailed,
                message,
            });
        }
        secure::enforce_owner_only(destination)?;

        debug!(
            "Successfully created keytab file for {} at {}",
            principal,
            destination.display()
        );
        Ok(IdentityOutcome::Materialized)
    }

    /// A password exists, so fresh material can be generated. Prefer the
    /// cached copy from an earlier identity of this principal in this run.
    fn generate_or_reuse(
        &mut self,
        identity: &Identity,
        principal: &str,
        password: &str,
        kvno: Option<u32>,
        revisit: bool,
        destination: &Path,
    ) -> Result<IdentityOutcome, KtError> {
        let mut keytab: Option<Keytab> = None;

        if revisit {
            // This principal was already materialized once this run, so its
            // keytab should be sitting in the cache.
            if let Some(cached) = self.cache.lookup(&self.store, principal) {
                match self.provider.read_keytab(&cached) {
                    Ok(kt) => keytab = Some(kt),
                    Err(err) => warn!(
                        "Failed to read the cached keytab for {}, recreating if possible - {:?}",
                        principal, err
                    ),
                }
            }
        }

        let keytab = match keytab {
            Some(kt) => kt,
            None => match self.provider.generate(principal, password, kvno) {
                Ok(kt) => {
                    // Not a service and marked cachable: keep a copy so the
                    // next host gets the same material instead of a fresh
                    // generation.
                    if let Some(entry) = self.store.find(principal) {
                        if !entry.service && identity.cachable {
                            let cached_path = self.cache.store(principal, &kt)?;
                            if let Some(previous) =
                                self.cache.replace(&mut self.store, principal, &cached_path)
                            {
                                self.cache.discard(&previous);
                            }
                        }
                    }
                    kt
                }
                Err(err) => {
                    let message = format!(
                        "Failed to create keytab file for {} - {:?}",
                        principal, err
                    );
                    error!("{}", message);
                    return Ok(IdentityOutcome::Failed {
                        kind: FailureKind::MaterializationFailed,
                        message,
                    });
                }
            },
        };

        if let Err(err) = self.provider.materialize(&keytab, destination) {
            let message = format!(
                "Failed to create keytab file for {} at {} - {:?}",
                principal,
                destination.display(),
                err
            );
            error!("{}", message);
            return Ok(IdentityOutcome::Failed {
                kind: FailureKind::MaterializationFailed,
                message,
            });
        }
        secure::enforce_owner_only(destination)?;

        debug!(
            "Successfully created keytab file for {} at {}",
            principal,
            destination.display()
        );
        Ok(IdentityOutcome::Materialized)
    }
}

use crate::crypto::{clamp_iter_count, derive_key_aes256_cts_hmac_sha1_96};
use crate::error::KtError;
use crate::keytab::{self, Keytab, KeytabEntry, KeytabKey, PrincipalName};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// The key-material boundary. The engine drives everything keytab-shaped
/// through this trait, so a KDC-backed implementation can replace the local
/// one without the engine noticing.
pub trait KeytabProvider {
    /// Produce keytab entries for `principal` from its password and key
    /// version number.
    fn generate(&self, principal: &str, password: &str, kvno: Option<u32>)
        -> Result<Keytab, KtError>;

    /// Write keytab entries to `dest`.
    fn materialize(&self, kt: &Keytab, dest: &Path) -> Result<(), KtError>;

    /// Read keytab entries back from a file.
    fn read_keytab(&self, path: &Path) -> Result<Keytab, KtError>;

    /// Reproduce the keytab at `src` verbatim at `dest`.
    fn copy_keytab(&self, src: &Path, dest: &Path) -> Result<(), KtError>;
}

/// Local provider that derives aes256-cts-hmac-sha1-96 keys from the
/// principal's password, the way the KDC would have.
#[derive(Debug, Default)]
pub struct DerivedKeyProvider;

impl KeytabProvider for DerivedKeyProvider {
    fn generate(
        &self,
        principal: &str,
        password: &str,
        kvno: Option<u32>,
    ) -> Result<Keytab, KtError> {
        let name: PrincipalName = principal.parse()?;
        let salt = name.salt();

        let k = derive_key_aes256_cts_hmac_sha1_96(
            password.as_bytes(),
            salt.as_bytes(),
            clamp_iter_count(None),
        )?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| {
                error!(?err, "System clock is before the epoch");
                KtError::DoYouHaveATimeMachine
            })?
            .as_secs() as u32;

        Ok(vec![KeytabEntry {
            principal: name,
            key: KeytabKey::Aes256CtsHmacSha196 { k },
            timestamp,
            kvno: kvno.unwrap_or(1),
        }])
    }

    fn materialize(&self, kt: &Keytab, dest: &Path) -> Result<(), KtError> {
        keytab::store(dest, kt)
    }

    fn read_keytab(&self, path: &Path) -> Result<Keytab, KtError> {
        keytab::load(path)
    }

    fn copy_keytab(&self, src: &Path, dest: &Path) -> Result<(), KtError> {
        let kt = keytab::load(src)?;
        keytab::store(dest, &kt)
    }
}

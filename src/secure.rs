use crate::error::KtError;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use tracing::{error, warn};

fn set_mode(path: &Path, mode: u32, what: &str) -> Result<(), KtError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|err| {
        warn!(?err, ?path, "Failed to set {}", what);
        KtError::PermissionEnforcementFailed
    })
}

/// Restrict `path` so that only the owning process user can read and write
/// it, and - for directories - search it. Applied in stages so a failure
/// names the access that could not be revoked. A missing path is a no-op:
/// anything we created is expected to exist by the time this is called, and
/// a racing removal leaves nothing to lock down.
pub fn enforce_owner_only(path: &Path) -> Result<(), KtError> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            warn!(?err, ?path, "Failed to inspect permissions");
            return Err(KtError::PermissionEnforcementFailed);
        }
    };

    let is_dir = meta.is_dir();
    let mut mode = meta.permissions().mode();

    mode = (mode & !0o444) | 0o400;
    set_mode(path, mode, "readable only by the owner")?;

    mode = (mode & !0o222) | 0o200;
    set_mode(path, mode, "writable only by the owner")?;

    mode &= !0o111;
    if is_dir {
        mode |= 0o100;
        set_mode(path, mode, "searchable only by the owner")?;
    } else {
        set_mode(path, mode, "not executable")?;
    }

    Ok(())
}

/// Create `dir` (and any missing parents) with mode 0700, locking the new
/// directory down to the owner. An existing directory is left as-is.
pub fn create_private_dir(dir: &Path) -> Result<(), KtError> {
    match fs::exists(dir) {
        Ok(true) => match dir.is_dir() {
            false => {
                error!(?dir, "Not a directory");
                Err(KtError::IoError)
            }
            true => Ok(()),
        },
        Ok(false) => {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .map_err(|e| {
                    error!(?e, ?dir, "Failed to create directory");
                    KtError::IoError
                })?;
            enforce_owner_only(dir)
        }
        Err(e) => {
            error!(?e, "Failed to check if path exists");
            Err(KtError::IoError)
        }
    }
}

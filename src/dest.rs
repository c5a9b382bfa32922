use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

pub(crate) fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Where a keytab destined for `keytab_path` on `host` is staged under the
/// data directory: a host subdirectory holding a file named by the SHA1 of
/// the destination path. The digest is a deterministic, filesystem-safe name
/// and nothing more - the destination path is not a secret.
///
/// ```text
///   data_directory
///   |- host1
///   |  |- 16a054404c8826cd604a27ac970e8cc4b9c7a3fa
///   |  |- a3c09cae73406912e8c55296d1c85b674d24f576
///   |- host2
///   |  |- ...
/// ```
pub fn resolve(data_dir: &Path, host: &str, keytab_path: &str) -> PathBuf {
    data_dir.join(host).join(sha1_hex(keytab_path))
}

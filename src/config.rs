use crate::engine::Identity;
use crate::persist::MemoryPrincipalStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::error;

fn default_kvno() -> u32 {
    1
}

/// A principal as the run manifest declares it. A missing password means the
/// secret was not created in this run, so the cache is the only source.
#[derive(Debug, Deserialize)]
pub struct PrincipalConfig {
    pub name: String,
    pub password: Option<String>,
    #[serde(default = "default_kvno")]
    pub kvno: u32,
    #[serde(default)]
    pub service: bool,
    /// Hosts this principal is already provisioned on from earlier runs.
    #[serde(default)]
    pub provisioned_hosts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdentityConfig {
    pub principal: String,
    pub host: String,
    pub keytab_path: String,
    #[serde(default)]
    pub cachable: bool,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub principal: Vec<PrincipalConfig>,
    #[serde(default)]
    pub identity: Vec<IdentityConfig>,
}

impl Config {
    pub fn parse<P: AsRef<Path>>(path: P) -> io::Result<Config> {
        let mut contents = String::new();
        let mut f = fs::File::open(&path)?;
        f.read_to_string(&mut contents)?;

        toml::from_str(&contents).map_err(|err| {
            error!(?err);
            io::Error::other("toml parse failure")
        })
    }
}

/// The engine inputs a manifest expands to: the seeded principal store, the
/// ordered identity records, and the password / key version maps.
#[derive(Debug)]
pub struct RunPlan {
    pub store: MemoryPrincipalStore,
    pub records: Vec<(String, Identity)>,
    pub passwords: BTreeMap<String, String>,
    pub kvnos: BTreeMap<String, u32>,
}

impl From<&Config> for RunPlan {
    fn from(config: &Config) -> Self {
        let mut store = MemoryPrincipalStore::new();
        let mut passwords = BTreeMap::new();
        let mut kvnos = BTreeMap::new();

        for p in &config.principal {
            store.insert_principal(&p.name, p.service);
            for host in &p.provisioned_hosts {
                store.mark_provisioned(&p.name, host);
            }
            if let Some(password) = &p.password {
                passwords.insert(p.name.clone(), password.clone());
            }
            kvnos.insert(p.name.clone(), p.kvno);
        }

        let records = config
            .identity
            .iter()
            .map(|i| {
                (
                    i.principal.clone(),
                    Identity {
                        host: i.host.clone(),
                        keytab_path: i.keytab_path.clone(),
                        cachable: i.cachable,
                    },
                )
            })
            .collect();

        RunPlan {
            store,
            records,
            passwords,
            kvnos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::PrincipalStore;

    const MANIFEST: &str = r#"
data_dir = "/var/lib/ktforge/data"
cache_dir = "/var/lib/ktforge/cache"

[[principal]]
name = "hdfs@EXAMPLE.COM"
password = "p@ss"
kvno = 2

[[principal]]
name = "smokeuser@EXAMPLE.COM"
provisioned_hosts = ["h1"]

[[principal]]
name = "nn/h1.example.com@EXAMPLE.COM"
password = "p@ss"
service = true

[[identity]]
principal = "hdfs@EXAMPLE.COM"
host = "h1"
keytab_path = "/etc/security/keytabs/hdfs.headless.keytab"
cachable = true

[[identity]]
principal = "nn/h1.example.com@EXAMPLE.COM"
host = "h1"
keytab_path = "/etc/security/keytabs/nn.service.keytab"
"#;

    #[test]
    fn test_parse_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, MANIFEST).unwrap();

        let config = Config::parse(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ktforge/data"));
        assert_eq!(config.principal.len(), 3);
        assert_eq!(config.identity.len(), 2);
        // Defaults.
        assert_eq!(config.principal[0].kvno, 2);
        assert_eq!(config.principal[1].kvno, 1);
        assert!(!config.identity[1].cachable);

        assert!(Config::parse(dir.path().join("absent")).is_err());
        fs::write(&path, "data_dir = 42").unwrap();
        assert!(Config::parse(&path).is_err());
    }

    #[test]
    fn test_run_plan_expansion() {
        let config: Config = toml::from_str(MANIFEST).unwrap();
        let plan = RunPlan::from(&config);

        assert_eq!(plan.records.len(), 2);
        assert_eq!(plan.records[0].0, "hdfs@EXAMPLE.COM");
        assert_eq!(plan.records[0].1.host, "h1");

        // Only principals with a password land in the password map.
        assert_eq!(plan.passwords.len(), 2);
        assert!(!plan.passwords.contains_key("smokeuser@EXAMPLE.COM"));
        assert_eq!(plan.kvnos["hdfs@EXAMPLE.COM"], 2);

        assert!(plan
            .store
            .provisioned_on_host("smokeuser@EXAMPLE.COM", "h1"));
        assert!(plan
            .store
            .find("nn/h1.example.com@EXAMPLE.COM")
            .unwrap()
            .service);
    }
}

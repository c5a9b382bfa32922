use crate::constants::{EncryptionType, PrincipalNameType, AES_256_KEY_LEN};
use crate::error::KtError;
use binrw::helpers::until_eof;
use binrw::io::{SeekFrom, TakeSeekExt};
use binrw::BinReaderExt;
use binrw::{binread, binwrite, BinWrite};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::error;

/// An evaluated principal name - the name components plus the realm, with all
/// host and cluster variables already substituted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrincipalName {
    pub components: Vec<String>,
    pub realm: String,
}

impl PrincipalName {
    /// The salt for string-to-key is the realm concatenated with the name
    /// components, no separators.
    pub fn salt(&self) -> String {
        let mut s = self.realm.clone();
        for c in &self.components {
            s.push_str(c);
        }
        s
    }

    fn name_type(&self) -> PrincipalNameType {
        if self.components.len() == 1 {
            PrincipalNameType::NtPrincipal
        } else {
            PrincipalNameType::NtSrvHst
        }
    }
}

impl FromStr for PrincipalName {
    type Err = KtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, realm) = s.rsplit_once('@').ok_or_else(|| {
            error!(principal = %s, "Principal name has no realm");
            KtError::PrincipalNameMissingRealm
        })?;

        if realm.is_empty() {
            error!(principal = %s, "Principal name has an empty realm");
            return Err(KtError::PrincipalNameMissingRealm);
        }

        let components: Vec<String> = name.split('/').map(str::to_string).collect();
        if components.iter().any(|c| c.is_empty()) {
            error!(principal = %s, "Principal name has an empty component");
            return Err(KtError::PrincipalNameInvalidComponents);
        }

        Ok(PrincipalName {
            components,
            realm: realm.to_string(),
        })
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

/// A key as it is carried in a keytab entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeytabKey {
    Aes256CtsHmacSha196 { k: [u8; AES_256_KEY_LEN] },
}

impl KeytabKey {
    pub fn k(&self) -> Vec<u8> {
        match self {
            KeytabKey::Aes256CtsHmacSha196 { k } => k.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub principal: PrincipalName,
    pub key: KeytabKey,
    pub timestamp: u32,
    pub kvno: u32,
}

pub type Keytab = Vec<KeytabEntry>;

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
struct Data {
    #[br(temp)]
    #[bw(try_calc(u16::try_from(value.len())))]
    value_len: u16,
    #[br(count = value_len)]
    value: Vec<u8>,
}

#[binwrite]
#[brw(big)]
#[derive(Clone, PartialEq, Eq)]
#[binread]
#[br(import { version: u8 })]
struct Principal {
    #[br(temp)]
    #[bw(try_calc(u16::try_from(components.len())))]
    components_count: u16,
    realm: Data,
    // components includes the realm in version 1
    #[br(count = if version == 1 { components_count - 1 } else { components_count })]
    components: Vec<Data>,
    #[br(if(version > 1))]
    name_type: Option<u32>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: Vec<_> = self
            .components
            .iter()
            .map(|x| String::from_utf8_lossy(x.value.as_slice()))
            .collect();
        let r = String::from_utf8_lossy(self.realm.value.as_slice());
        f.debug_struct("Principal")
            .field("components", &c)
            .field("realm", &r)
            .finish()
    }
}

impl From<&PrincipalName> for Principal {
    fn from(value: &PrincipalName) -> Self {
        Principal {
            realm: Data {
                value: value.realm.as_bytes().to_vec(),
            },
            components: value
                .components
                .iter()
                .map(|c| Data {
                    value: c.as_bytes().to_vec(),
                })
                .collect(),
            name_type: Some(value.name_type() as u32),
        }
    }
}

impl TryFrom<&Principal> for PrincipalName {
    type Error = KtError;

    fn try_from(value: &Principal) -> Result<Self, Self::Error> {
        if value.components.is_empty() {
            return Err(KtError::PrincipalNameInvalidComponents);
        }
        let realm = String::from_utf8_lossy(&value.realm.value).to_string();
        let components = value
            .components
            .iter()
            .map(|c| String::from_utf8_lossy(&c.value).to_string())
            .collect();
        Ok(PrincipalName { components, realm })
    }
}

#[binwrite]
#[brw(big)]
#[derive(Debug, Clone, PartialEq, Eq)]
#[binread]
#[br(import { version: u8, rlen: i32 })]
enum RecordData {
    #[br(pre_assert(rlen > 0))]
    Entry {
        #[br(args { version })]
        principal: Principal,
        timestamp: u32,
        key_version_u8: u8,
        enctype: u16,
        key: Data,
        // Only if 4 bytes remaining in the stream (field present from version 1.14)
        #[br(try)]
        key_version_u32: Option<u32>,
    },
    // A negative record length represents a "hole" in the file, it is, an entry that has
    // been invalidated. The length of the hole is the inverse of the record length.
    #[br(pre_assert(rlen <= 0))]
    Hole {
        #[br(count = rlen.abs())]
        pad: Vec<u8>,
    },
}

impl From<&KeytabEntry> for RecordData {
    fn from(value: &KeytabEntry) -> Self {
        RecordData::Entry {
            principal: (&value.principal).into(),
            // Seconds when the key was emitted to the keytab. Not 2038 safe.
            timestamp: value.timestamp,
            key_version_u8: value.kvno as u8,
            enctype: match value.key {
                KeytabKey::Aes256CtsHmacSha196 { .. } => {
                    EncryptionType::AES256_CTS_HMAC_SHA1_96 as u16
                }
            },
            key: Data {
                value: value.key.k(),
            },
            key_version_u32: Some(value.kvno),
        }
    }
}

impl TryFrom<&RecordData> for Option<KeytabEntry> {
    type Error = KtError;

    fn try_from(value: &RecordData) -> Result<Self, Self::Error> {
        match value {
            RecordData::Hole { pad: _ } => Ok(None),
            RecordData::Entry {
                principal,
                timestamp,
                key_version_u8,
                enctype: _,
                key,
                key_version_u32,
            } => {
                let e = KeytabEntry {
                    principal: principal.try_into()?,
                    timestamp: *timestamp,
                    key: KeytabKey::Aes256CtsHmacSha196 {
                        k: key
                            .value
                            .as_slice()
                            .try_into()
                            .map_err(|_| KtError::InvalidEncryptionKey)?,
                    },
                    kvno: match key_version_u32 {
                        Some(v) => *v,
                        None => (*key_version_u8) as u32,
                    },
                };
                Ok(Some(e))
            }
        }
    }
}

// Custom writer to seek back to fill the record length
#[binrw::writer(writer, endian)]
fn write_rdata(rdata: &RecordData) -> binrw::BinResult<()> {
    let start = writer.stream_position()?;
    rdata.write_options(writer, endian, ())?;
    let end = writer.stream_position()?;
    let rlen: i32 = end as i32 - start as i32;

    writer.seek(SeekFrom::Start(start - 4))?;
    rlen.write_options(writer, endian, ())?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[binwrite]
#[brw(big)]
#[derive(Debug, Clone, PartialEq, Eq)]
#[binread]
#[br(import { version: u8 })]
struct Record {
    #[br(temp)]
    #[bw(if (matches!(rdata, RecordData::Entry { .. })), calc = 0)]
    // This field is always written as 0, the custom rdata writer will seek back to fill it
    rlen: i32,
    #[br(map_stream = |s| s.take_seek(rlen.unsigned_abs() as u64), args { version, rlen })]
    #[bw(if (matches!(rdata, RecordData::Entry { .. })), write_with = write_rdata)]
    rdata: RecordData,
}

#[binread]
#[binwrite]
#[brw(big)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileKeytabV2 {
    #[br(parse_with = until_eof, args { version: 2 })]
    records: Vec<Record>,
}

#[binread]
#[binwrite]
#[brw(big, magic = 5u8)]
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileKeytab {
    #[brw(magic = 2u8)]
    V2(FileKeytabV2),
}

impl From<&Keytab> for FileKeytab {
    fn from(value: &Keytab) -> Self {
        let records: Vec<Record> = value
            .iter()
            .map(|x| {
                let rdata: RecordData = x.into();
                Record { rdata }
            })
            .collect();
        FileKeytab::V2(FileKeytabV2 { records })
    }
}

impl TryFrom<&FileKeytab> for Keytab {
    type Error = KtError;

    fn try_from(value: &FileKeytab) -> Result<Self, Self::Error> {
        match value {
            FileKeytab::V2(v2) => {
                let mut entries: Vec<KeytabEntry> = Vec::new();
                for record in &v2.records {
                    let entry: Option<KeytabEntry> = (&record.rdata).try_into()?;
                    if let Some(e) = entry {
                        entries.push(e);
                    }
                }
                Ok(entries)
            }
        }
    }
}

fn read(buffer: &[u8]) -> Result<FileKeytab, KtError> {
    let mut reader = binrw::io::Cursor::new(buffer);
    let keytab: FileKeytab = reader.read_type(binrw::Endian::Big).map_err(|err| {
        error!(?err, "Failed to unmarshall keytab buffer");
        KtError::BinRWError
    })?;
    Ok(keytab)
}

pub fn store(path: &Path, kt: &Keytab) -> Result<(), KtError> {
    let mut f = File::create(path).map_err(|io_err| {
        error!(?io_err, ?path, "Unable to create keytab file");
        KtError::IoError
    })?;

    let kt: FileKeytab = kt.into();
    kt.write(&mut f).map_err(|binrw_err| {
        error!(?binrw_err, ?path, "Unable to write keytab file");
        KtError::BinRWError
    })?;

    Ok(())
}

pub fn load(path: &Path) -> Result<Keytab, KtError> {
    let mut f = File::open(path).map_err(|io_err| {
        error!(?io_err, ?path, "Unable to open keytab file");
        KtError::IoError
    })?;

    let mut buffer = Vec::new();
    f.read_to_end(&mut buffer).map_err(|io_err| {
        error!(?io_err, ?path, "Unable to read keytab file");
        KtError::IoError
    })?;

    let fk: FileKeytab = read(&buffer)?;
    let k: Keytab = (&fk).try_into()?;
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinWrite;

    fn test_key() -> KeytabKey {
        let mut k = [0u8; AES_256_KEY_LEN];
        for (i, b) in k.iter_mut().enumerate() {
            *b = i as u8;
        }
        KeytabKey::Aes256CtsHmacSha196 { k }
    }

    fn headless_entry() -> KeytabEntry {
        KeytabEntry {
            principal: "hdfs@EXAMPLE.COM".parse().unwrap(),
            key: test_key(),
            timestamp: 0x66ffb9ce,
            kvno: 2,
        }
    }

    fn service_entry() -> KeytabEntry {
        KeytabEntry {
            principal: "nn/host1.example.com@EXAMPLE.COM".parse().unwrap(),
            key: test_key(),
            timestamp: 0x66ffb9ce,
            kvno: 1,
        }
    }

    #[test]
    fn test_principal_name_parse() {
        let p: PrincipalName = "hdfs@EXAMPLE.COM".parse().unwrap();
        assert_eq!(p.components, vec!["hdfs"]);
        assert_eq!(p.realm, "EXAMPLE.COM");
        assert_eq!(p.salt(), "EXAMPLE.COMhdfs");
        assert_eq!(p.to_string(), "hdfs@EXAMPLE.COM");

        let p: PrincipalName = "nn/host1.example.com@EXAMPLE.COM".parse().unwrap();
        assert_eq!(p.components, vec!["nn", "host1.example.com"]);
        assert_eq!(p.salt(), "EXAMPLE.COMnnhost1.example.com");

        assert_eq!(
            "no-realm-here".parse::<PrincipalName>(),
            Err(KtError::PrincipalNameMissingRealm)
        );
        assert_eq!(
            "hdfs@".parse::<PrincipalName>(),
            Err(KtError::PrincipalNameMissingRealm)
        );
        assert_eq!(
            "nn//host@EXAMPLE.COM".parse::<PrincipalName>(),
            Err(KtError::PrincipalNameInvalidComponents)
        );
    }

    #[test]
    fn test_keytab_write() {
        let expect = "0502000000460001000b4558414d504c452e434f4d0004686466730000000166ffb9ce0200120020000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f00000002";
        let expect = hex::decode(expect).expect("Failed to decode sample");

        let kt: Keytab = vec![headless_entry()];
        let fk: FileKeytab = (&kt).into();

        let mut c = std::io::Cursor::new(Vec::new());
        fk.write(&mut c).expect("Failed to write");

        assert_eq!(c.into_inner(), expect);
    }

    #[test]
    fn test_keytab_read_write_service_principal() {
        let buf = "0502000000570002000b4558414d504c452e434f4d00026e6e0011686f7374312e6578616d706c652e636f6d0000000366ffb9ce0100120020000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f00000001";
        let buf = hex::decode(buf).expect("Failed to decode sample");

        let fk = read(&buf).expect("Failed to read from buffer");
        let kt: Keytab = (&fk).try_into().expect("Failed to convert");
        assert_eq!(kt, vec![service_entry()]);

        let mut c = std::io::Cursor::new(Vec::new());
        fk.write(&mut c).expect("Failed to write");
        assert_eq!(c.into_inner(), buf);
    }

    #[test]
    fn test_keytab_read_skips_holes() {
        // Two entries with a 10 byte hole between them. The hole is dropped
        // on conversion and on rewrite.
        let buf = "0502000000460001000b4558414d504c452e434f4d0004686466730000000166ffb9ce0200120020000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f00000002fffffff600000000000000000000000000570002000b4558414d504c452e434f4d00026e6e0011686f7374312e6578616d706c652e636f6d0000000366ffb9ce0100120020000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f00000001";
        let buf = hex::decode(buf).expect("Failed to decode sample");

        let fk = read(&buf).expect("Failed to read from buffer");
        let FileKeytab::V2(v2) = &fk;
        assert_eq!(v2.records.len(), 3);
        assert!(matches!(v2.records[1].rdata, RecordData::Hole { .. }));

        let kt: Keytab = (&fk).try_into().expect("Failed to convert");
        assert_eq!(kt, vec![headless_entry(), service_entry()]);

        let mut c = std::io::Cursor::new(Vec::new());
        fk.write(&mut c).expect("Failed to write");
        // 4 bytes of hole length header plus 10 bytes of pad are gone.
        assert_eq!(c.into_inner().len(), buf.len() - 14);
    }

    #[test]
    fn test_keytab_store_load() {
        let dir = tempfile::tempdir().expect("Failed to create tempdir");
        let path = dir.path().join("hdfs.keytab");

        let kt: Keytab = vec![headless_entry(), service_entry()];
        store(&path, &kt).expect("Failed to store");

        let kt2 = load(&path).expect("Failed to load");
        assert_eq!(kt, kt2);
    }

    #[test]
    fn test_keytab_load_rejects_garbage() {
        let dir = tempfile::tempdir().expect("Failed to create tempdir");
        let path = dir.path().join("garbage.keytab");
        std::fs::write(&path, b"not a keytab").expect("Failed to write");

        assert_eq!(load(&path), Err(KtError::BinRWError));
        assert_eq!(load(&dir.path().join("absent")), Err(KtError::IoError));
    }
}

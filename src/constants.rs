pub(crate) const AES_256_KEY_LEN: usize = 32;
pub(crate) const AES_BLOCK_SIZE: usize = 16;

// RFC 3962 defines the default string-to-key iteration count as 4096. That
// number is far too low for modern hardware, but keytab material interops
// with clients that assume it, so it stays the default and lower values are
// clamped up to it.
pub(crate) const PBKDF2_SHA1_ITER: u32 = 4096;

// n-fold("kerberos") expanded to the AES block size, per RFC 3961 §5.1.
pub(crate) const N_FOLD_KERBEROS_16: [u8; AES_BLOCK_SIZE] = [
    0x6b, 0x65, 0x72, 0x62, 0x65, 0x72, 0x6f, 0x73, 0x7b, 0x9b, 0x5b, 0x2b, 0x93, 0x13, 0x2b, 0x93,
];

pub(crate) const IV_ZERO: [u8; AES_BLOCK_SIZE] = [0u8; AES_BLOCK_SIZE];

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum EncryptionType {
    AES128_CTS_HMAC_SHA1_96 = 17,
    AES256_CTS_HMAC_SHA1_96 = 18,
}

#[derive(Debug, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum PrincipalNameType {
    NtUnknown = 0,   /* Name type not known */
    NtPrincipal = 1, /* Just the name of the principal as in DCE, or for users */
    NtSrvInst = 2,   /* Service and other unique instance (krbtgt) */
    NtSrvHst = 3,    /* Service with host name as instance (telnet, rcommands) */
}

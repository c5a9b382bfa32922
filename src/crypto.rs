use crate::constants::*;
use crate::error::KtError;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::BlockEncryptMut;
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

type Aes256Block = GenericArray<u8, <aes::Aes256 as aes::cipher::BlockSizeUser>::BlockSize>;
type Aes256Key = GenericArray<u8, <aes::Aes256 as aes::cipher::KeySizeUser>::KeySize>;

/// Given a principal's passphrase and salt (the concatenation of the realm and
/// the principal name components), derive the aes256-cts-hmac-sha1-96 base key
/// that keytab entries carry. The iteration count is clamped up to the RFC3962
/// value of 0x1000 (4096) - values below that interop with nothing worth
/// talking to.
pub(crate) fn derive_key_aes256_cts_hmac_sha1_96(
    passphrase: &[u8],
    salt: &[u8],
    iter_count: u32,
) -> Result<[u8; AES_256_KEY_LEN], KtError> {
    let mut buf = [0u8; AES_256_KEY_LEN];
    pbkdf2_hmac::<Sha1>(passphrase, salt, iter_count, &mut buf);

    let mut dk_buf = [0u8; AES_256_KEY_LEN];
    dk_aes_256(&mut dk_buf, &buf);

    Ok(dk_buf)
}

fn dk_aes_256(out_buf: &mut [u8; AES_256_KEY_LEN], buf: &[u8; AES_256_KEY_LEN]) {
    let (lower, upper) = out_buf.split_at_mut(AES_BLOCK_SIZE);
    debug_assert!(lower.len() == AES_BLOCK_SIZE);
    debug_assert!(upper.len() == AES_BLOCK_SIZE);
    dk_encrypt_aes_256_cbc(buf.into(), &N_FOLD_KERBEROS_16.into(), lower.into());
    dk_encrypt_aes_256_cbc(buf.into(), (&*lower).into(), upper.into());
}

fn dk_encrypt_aes_256_cbc(key: &Aes256Key, plaintext: &Aes256Block, out_buf: &mut Aes256Block) {
    use aes::cipher::KeyIvInit;
    Aes256CbcEnc::new(key, &IV_ZERO.into()).encrypt_block_b2b_mut(plaintext, out_buf)
}

pub(crate) fn clamp_iter_count(iter_count: Option<u32>) -> u32 {
    iter_count
        .unwrap_or(PBKDF2_SHA1_ITER)
        .clamp(PBKDF2_SHA1_ITER, u32::MAX)
}

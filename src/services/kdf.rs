//! Legacy password-based key derivation.
//!
//! Stored books were encrypted with OpenSSL's `EVP_BytesToKey` using MD5 and a
//! single iteration. Changing anything here makes every stored CipherBlob
//! unreadable.

use md5::{Digest, Md5};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SALT_LEN: usize = 8;
pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// AES-256 key and CBC IV derived from a password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// `D_i = MD5(D_{i-1} || password || salt)`, concatenated until 48 bytes are
/// available; the first 32 are the key and the next 16 the IV.
pub fn evp_bytes_to_key(password: &[u8], salt: &[u8; SALT_LEN]) -> KeyMaterial {
    let mut material = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut block: Vec<u8> = Vec::new();

    while material.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(password);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        material.extend_from_slice(&block);
    }

    let mut out = KeyMaterial {
        key: [0u8; KEY_LEN],
        iv: [0u8; IV_LEN],
    };
    out.key.copy_from_slice(&material[..KEY_LEN]);
    out.iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);

    material.zeroize();
    block.zeroize();
    out
}

/// Key derivation used by the content codec.
pub fn derive(password: &[u8], salt: &[u8; SALT_LEN]) -> KeyMaterial {
    evp_bytes_to_key(password, salt)
}

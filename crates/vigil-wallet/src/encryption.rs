//! Label document keys and AES-256-GCM encryption.
//!
//! # Key chain
//! ```text
//! account_key         = Base58Check(HMAC-SHA256(master_key, xpub))
//! filename || password = HMAC-SHA512(account_key, 0123456789abcdeffedcba9876543210)
//! ```
//! The first half, hex-encoded plus `.mtdt`, names the document; the second
//! half is the AES key.
//!
//! # Wire format
//! ```text
//! nonce (12 bytes) || tag (16 bytes) || ciphertext
//! ```

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use vigil_core::address::base58check_encode;
use vigil_core::crypto::{hmac_sha256, hmac_sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::WalletError;

/// Fixed HMAC message of the labeling standard.
pub const METADATA_KEY_MESSAGE: [u8; 16] = [
    0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54, 0x32, 0x10,
];

/// Extension of label document filenames.
pub const METADATA_EXTENSION: &str = ".mtdt";

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// The device-provided secret all label keys derive from.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| WalletError::Encryption(format!("master key: {e}")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Per-account key string for `xpub`.
    pub fn account_key(&self, xpub: &str) -> String {
        base58check_encode(&hmac_sha256(&self.0, xpub.as_bytes()))
    }

    pub fn label_keys(&self, xpub: &str) -> LabelKeys {
        LabelKeys::from_account_key(&self.account_key(xpub))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Document filename and encryption key of one account.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LabelKeys {
    filename: String,
    password: [u8; 32],
}

impl LabelKeys {
    pub fn from_account_key(account_key: &str) -> Self {
        let mut digest = hmac_sha512(account_key.as_bytes(), &METADATA_KEY_MESSAGE);
        let mut password = [0u8; 32];
        password.copy_from_slice(&digest[32..]);
        let filename = format!("{}{METADATA_EXTENSION}", hex::encode(&digest[..32]));
        digest.zeroize();
        Self { filename, password }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn password(&self) -> &[u8; 32] {
        &self.password
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, WalletError> {
        encrypt(plaintext, &self.password)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        decrypt(data, &self.password)
    }
}

impl fmt::Debug for LabelKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelKeys")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Encrypt with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, WalletError> {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, key, &nonce)
}

fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, WalletError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| WalletError::Encryption(e.to_string()))?;
    // aes-gcm appends the tag; the document format wants it up front.
    let sealed = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + body.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(tag);
    out.extend_from_slice(body);
    Ok(out)
}

/// Decrypt `nonce || tag || ciphertext`. Any tag mismatch is an error.
pub fn decrypt(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, WalletError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(WalletError::Decryption(format!(
            "document too short: {} bytes",
            data.len()
        )));
    }
    let (nonce, rest) = data.split_at(NONCE_LEN);
    let (tag, body) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(body.len() + TAG_LEN);
    sealed.extend_from_slice(body);
    sealed.extend_from_slice(tag);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| WalletError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
        .map_err(|_| WalletError::Decryption("authentication failed".into()))
}

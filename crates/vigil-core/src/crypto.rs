//! Public-key-only hierarchical derivation (BIP-32) over secp256k1.
//!
//! Only non-hardened children can be derived: the core never holds private
//! key material, so the `HMAC-SHA512(chain_code, K || index)` path with a
//! point addition is the only one available.
//!
//! # Child derivation
//!
//! ```text
//! I        = HMAC-SHA512(chain_code, ser_compressed(K_par) || ser32(i))
//! IL, IR   = I[..32], I[32..]
//! K_child  = IL·G + K_par        (fails if IL >= n or the sum is infinity)
//! c_child  = IR
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use secp256k1::{PublicKey, Scalar, Secp256k1, VerifyOnly};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::address::{base58check_decode, base58check_encode};
use crate::constants::{HARDENED_OFFSET, Network};
use crate::error::KeyError;

static SECP: LazyLock<Secp256k1<VerifyOnly>> = LazyLock::new(Secp256k1::verification_only);

/// Serialized extended public key length (BIP-32).
const XPUB_LEN: usize = 78;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// SHA-256 applied twice.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(Sha256::digest(data)));
    out
}

/// RIPEMD-160 of SHA-256, the hash committed to by P2PKH and P2SH scripts.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(Sha256::digest(data)));
    out
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// A public key paired with its chain code.
///
/// Immutable and cheap to rebuild from stored bytes; never persisted as a
/// live object.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExtendedKey {
    public_key: PublicKey,
    chain_code: [u8; 32],
}

/// Serialization metadata carried by an xpub string alongside the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpubHeader {
    pub version: [u8; 4],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
}

impl ExtendedKey {
    /// Build a key from a compressed (or uncompressed) SEC1 point and chain code.
    pub fn from_bytes(public_key: &[u8], chain_code: [u8; 32]) -> Result<Self, KeyError> {
        let public_key =
            PublicKey::from_slice(public_key).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self {
            public_key,
            chain_code,
        })
    }

    /// Parse a Base58Check-serialized extended public key.
    ///
    /// The version prefix is reported but not enforced, so `xpub`, `ypub`
    /// and `tpub` strings are all accepted.
    pub fn from_xpub(xpub: &str) -> Result<(XpubHeader, Self), KeyError> {
        let raw = base58check_decode(xpub)
            .map_err(|e| KeyError::InvalidExtendedKey(e.to_string()))?;
        if raw.len() != XPUB_LEN {
            return Err(KeyError::InvalidExtendedKey(format!(
                "expected {XPUB_LEN} bytes, got {}",
                raw.len()
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&raw[0..4]);
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&raw[5..9]);
        let mut child = [0u8; 4];
        child.copy_from_slice(&raw[9..13]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&raw[13..45]);

        let header = XpubHeader {
            version,
            depth: raw[4],
            parent_fingerprint,
            child_number: u32::from_be_bytes(child),
        };
        Ok((header, Self::from_bytes(&raw[45..78], chain_code)?))
    }

    /// Serialize as a Base58Check extended public key.
    pub fn to_xpub(
        &self,
        network: Network,
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_number: u32,
    ) -> String {
        let mut raw = Vec::with_capacity(XPUB_LEN);
        raw.extend_from_slice(&network.xpub_version());
        raw.push(depth);
        raw.extend_from_slice(&parent_fingerprint);
        raw.extend_from_slice(&child_number.to_be_bytes());
        raw.extend_from_slice(&self.chain_code);
        raw.extend_from_slice(&self.public_key.serialize());
        base58check_encode(&raw)
    }

    /// Derive the non-hardened child at `index`.
    pub fn derive_child(&self, index: u32) -> Result<Self, KeyError> {
        if index >= HARDENED_OFFSET {
            return Err(KeyError::HardenedNotSupported(index));
        }

        let mut data = [0u8; 37];
        data[..33].copy_from_slice(&self.public_key.serialize());
        data[33..].copy_from_slice(&index.to_be_bytes());
        let i = hmac_sha512(&self.chain_code, &data);

        let mut il = [0u8; 32];
        il.copy_from_slice(&i[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&i[32..]);

        let tweak = Scalar::from_be_bytes(il).map_err(|_| KeyError::ScalarTooLarge)?;
        let public_key = self
            .public_key
            .add_exp_tweak(&SECP, &tweak)
            .map_err(|_| KeyError::PointAtInfinity)?;

        Ok(Self {
            public_key,
            chain_code,
        })
    }

    /// Derive along a sequence of non-hardened indices.
    pub fn derive_path(&self, path: &[u32]) -> Result<Self, KeyError> {
        path.iter().try_fold(*self, |key, &index| key.derive_child(index))
    }

    /// Compressed SEC1 encoding of the public point.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// First four bytes of HASH160 of the compressed key.
    pub fn fingerprint(&self) -> [u8; 4] {
        let h = hash160(&self.public_key_bytes());
        [h[0], h[1], h[2], h[3]]
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .field("chain_code", &hex::encode(self.chain_code))
            .finish()
    }
}

/// A BIP-32 derivation path such as `m/49'/0'/0'/1/7`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    /// Hardened account path `m/purpose'/coin'/account'`.
    pub fn account(purpose: u32, network: Network, account: u32) -> Self {
        Self(vec![
            purpose | HARDENED_OFFSET,
            network.coin_type() | HARDENED_OFFSET,
            account | HARDENED_OFFSET,
        ])
    }

    /// A new path with `index` appended.
    pub fn child(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for &index in &self.0 {
            if index >= HARDENED_OFFSET {
                write!(f, "/{}'", index - HARDENED_OFFSET)?;
            } else {
                write!(f, "/{index}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(KeyError::InvalidPath(s.to_string()));
        }
        let mut indices = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| KeyError::InvalidPath(s.to_string()))?;
            if index >= HARDENED_OFFSET {
                return Err(KeyError::InvalidPath(s.to_string()));
            }
            indices.push(if hardened { index | HARDENED_OFFSET } else { index });
        }
        Ok(Self(indices))
    }
}

//! Address encoding and output scripts.
//!
//! Accounts encode their receive and change keys either as legacy P2PKH
//! (`1...` on mainnet) or as P2SH-wrapped P2WPKH (`3...`). The choice is an
//! account-level policy selected by the `legacy` flag, never per address.
//!
//! Destination addresses may additionally be native segwit (bech32, v0),
//! which this module can turn into a scriptPubKey but never produces.

use crate::constants::Network;
use crate::crypto::{ExtendedKey, hash160};
use crate::error::AddressError;

const OP_0: u8 = 0x00;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// Encode `payload` (version byte included) with a 4-byte double-SHA256 checksum.
pub fn base58check_encode(payload: &[u8]) -> String {
    bs58::encode(payload).with_check().into_string()
}

/// Decode a Base58Check string, verifying and stripping the checksum.
pub fn base58check_decode(s: &str) -> Result<Vec<u8>, AddressError> {
    bs58::decode(s).with_check(None).into_vec().map_err(|e| match e {
        bs58::decode::Error::InvalidChecksum { .. } => AddressError::InvalidChecksum,
        other => AddressError::InvalidBase58(other.to_string()),
    })
}

/// The P2WPKH redeem script `OP_0 <20-byte key hash>` wrapped by P2SH accounts.
pub fn p2wpkh_redeem_script(public_key: &[u8; 33]) -> [u8; 22] {
    let mut script = [0u8; 22];
    script[0] = OP_0;
    script[1] = 0x14;
    script[2..].copy_from_slice(&hash160(public_key));
    script
}

/// Legacy pay-to-pubkey-hash address.
pub fn p2pkh_address(public_key: &[u8; 33], network: Network) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(network.p2pkh_version());
    payload.extend_from_slice(&hash160(public_key));
    base58check_encode(&payload)
}

/// Segwit-wrapped P2SH-P2WPKH address.
pub fn p2sh_p2wpkh_address(public_key: &[u8; 33], network: Network) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(network.p2sh_version());
    payload.extend_from_slice(&hash160(&p2wpkh_redeem_script(public_key)));
    base58check_encode(&payload)
}

/// Encode a derived key with the account's address policy.
pub fn encode_address(key: &ExtendedKey, legacy: bool, network: Network) -> String {
    let public_key = key.public_key_bytes();
    if legacy {
        p2pkh_address(&public_key, network)
    } else {
        p2sh_p2wpkh_address(&public_key, network)
    }
}

/// Build the scriptPubKey paying to `address`.
///
/// Accepts Base58Check P2PKH/P2SH addresses of either network and bech32
/// witness-v0 programs.
pub fn script_pubkey(address: &str) -> Result<Vec<u8>, AddressError> {
    let lower = address.to_ascii_lowercase();
    if lower.starts_with("bc1") || lower.starts_with("tb1") || lower.starts_with("bcrt1") {
        return witness_script_pubkey(address);
    }

    let payload = base58check_decode(address)?;
    if payload.len() != 21 {
        return Err(AddressError::InvalidLength(payload.len()));
    }
    let hash = &payload[1..];
    let version = payload[0];

    if version == Network::Mainnet.p2pkh_version() || version == Network::Testnet.p2pkh_version() {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
        script.extend_from_slice(hash);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Ok(script)
    } else if version == Network::Mainnet.p2sh_version()
        || version == Network::Testnet.p2sh_version()
    {
        let mut script = Vec::with_capacity(23);
        script.extend_from_slice(&[OP_HASH160, 0x14]);
        script.extend_from_slice(hash);
        script.push(OP_EQUAL);
        Ok(script)
    } else {
        Err(AddressError::UnknownVersion(version))
    }
}

fn witness_script_pubkey(address: &str) -> Result<Vec<u8>, AddressError> {
    let (_hrp, version, program) = bech32::segwit::decode(address)
        .map_err(|e| AddressError::InvalidBech32(e.to_string()))?;
    let version = version.to_u8();
    if version != 0 {
        return Err(AddressError::UnsupportedWitnessVersion(version));
    }
    if program.len() != 20 && program.len() != 32 {
        return Err(AddressError::InvalidLength(program.len()));
    }
    let mut script = Vec::with_capacity(2 + program.len());
    script.push(OP_0);
    script.push(program.len() as u8);
    script.extend_from_slice(&program);
    Ok(script)
}

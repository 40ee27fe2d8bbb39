//! Checksummed text encoding of ledger keys ("strkey").
//!
//! A strkey is `base32(version_byte || payload || crc16)` with no padding,
//! using the RFC 4648 uppercase alphabet. Account identifiers carry version
//! byte `6 << 3` and render as 56-character strings starting with `G`;
//! secret seeds carry `18 << 3` and start with `S`.

use thiserror::Error;

const VERSION_ACCOUNT_ID: u8 = 6 << 3; // 'G'
const VERSION_SEED: u8 = 18 << 3; // 'S'

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StrkeyError {
    #[error("invalid base32 character {0:?}")]
    InvalidCharacter(char),
    #[error("invalid strkey length {0}")]
    InvalidLength(usize),
    #[error("invalid strkey version byte {0:#x}")]
    InvalidVersionByte(u8),
    #[error("strkey checksum mismatch")]
    ChecksumMismatch,
}

/// Encodes a 32-byte public key as an account address (`G...`).
pub fn encode_account_id(key: &[u8; 32]) -> String {
    encode(VERSION_ACCOUNT_ID, key)
}

/// Decodes an account address back to its 32-byte public key.
pub fn decode_account_id(s: &str) -> Result<[u8; 32], StrkeyError> {
    decode(VERSION_ACCOUNT_ID, s)
}

/// Encodes a 32-byte raw seed as a secret seed string (`S...`).
pub fn encode_seed(raw: &[u8; 32]) -> String {
    encode(VERSION_SEED, raw)
}

/// Decodes a secret seed string back to its 32 raw bytes.
pub fn decode_seed(s: &str) -> Result<[u8; 32], StrkeyError> {
    decode(VERSION_SEED, s)
}

fn encode(version: u8, payload: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(version);
    data.extend_from_slice(payload);
    let crc = crc16_xmodem(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    base32_encode(&data)
}

fn decode(version: u8, s: &str) -> Result<[u8; 32], StrkeyError> {
    let data = base32_decode(s)?;
    if data.len() != 35 {
        return Err(StrkeyError::InvalidLength(s.len()));
    }
    let (body, crc_bytes) = data.split_at(33);
    let want = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16_xmodem(body) != want {
        return Err(StrkeyError::ChecksumMismatch);
    }
    if body[0] != version {
        return Err(StrkeyError::InvalidVersionByte(body[0]));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&body[1..]);
    Ok(key)
}

// CRC16 with the XModem polynomial 0x1021, zero initial value.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[(buffer >> bits) as usize & 0x1f] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[(buffer << (5 - bits)) as usize & 0x1f] as char);
    }
    out
}

fn base32_decode(s: &str) -> Result<Vec<u8>, StrkeyError> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in s.chars() {
        let value = ALPHABET
            .iter()
            .position(|&a| a as char == c)
            .ok_or(StrkeyError::InvalidCharacter(c))? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    // Leftover bits are encoder padding and must be zero.
    if bits > 0 && buffer & ((1 << bits) - 1) != 0 {
        return Err(StrkeyError::InvalidLength(s.len()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_round_trip() {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        let addr = encode_account_id(&key);
        assert_eq!(addr.len(), 56);
        assert!(addr.starts_with('G'));
        assert_eq!(decode_account_id(&addr).unwrap(), key);
    }

    #[test]
    fn seed_round_trip() {
        let raw = [7u8; 32];
        let seed = encode_seed(&raw);
        assert!(seed.starts_with('S'));
        assert_eq!(decode_seed(&seed).unwrap(), raw);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let addr = encode_account_id(&[42u8; 32]);
        let mut chars: Vec<char> = addr.chars().collect();
        // Flip one character in the payload region.
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        let bad: String = chars.into_iter().collect();
        assert!(decode_account_id(&bad).is_err());
    }

    #[test]
    fn wrong_version_byte_rejected() {
        let seed = encode_seed(&[9u8; 32]);
        assert_eq!(
            decode_account_id(&seed),
            Err(StrkeyError::InvalidVersionByte(VERSION_SEED))
        );
    }
}

//! Per-packet keystream engine.
//!
//! Payloads are encrypted with AES-128 in counter mode using a nonce
//! built from the packet id and sender id, so the receiver can
//! reconstruct the keystream from the clear-text header alone. Applying
//! the keystream is an XOR and therefore its own inverse.
//!
//! The nonce layout is an external protocol contract:
//!
//! ```text
//! 0..8    packet_id as u64 LE
//! 8..12   sender as u32 LE
//! 12..16  block counter, u32 BE, starting at 0, +1 per 16 bytes
//! ```
//!
//! There is no authentication tag at this layer: decrypting with the
//! wrong key silently yields garbage, and nothing here can detect it.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Symmetric channel keys are always 16 bytes.
pub const CHANNEL_KEY_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

/// Well-known key of the default public channel. A node with no
/// configured secret can still decode public traffic with this.
pub const DEFAULT_CHANNEL_KEY: [u8; CHANNEL_KEY_LEN] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69,
    0x01,
];

/// Channel hash of the default public channel.
pub const DEFAULT_CHANNEL_HASH: u8 = 0x08;

/// Channel hash used by routing/control traffic.
pub const CONTROL_CHANNEL_HASH: u8 = 0x00;

/// A channel key plus how much to trust it.
///
/// `Guessed` keys come from [`channel_key_for_hash`]'s last-byte
/// heuristic; treat them as a debug aid, never as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCandidate {
    /// The configured key applies to this channel hash as-is.
    Known([u8; CHANNEL_KEY_LEN]),
    /// Best-effort variant derived from a non-standard channel hash.
    Guessed([u8; CHANNEL_KEY_LEN]),
}

impl KeyCandidate {
    pub fn key(&self) -> &[u8; CHANNEL_KEY_LEN] {
        match self {
            KeyCandidate::Known(key) | KeyCandidate::Guessed(key) => key,
        }
    }

    pub fn is_guess(&self) -> bool {
        matches!(self, KeyCandidate::Guessed(_))
    }
}

/// Pick a key candidate for `channel_hash`, starting from the configured
/// base secret.
///
/// The two reserved hashes (default broadcast, routing/control) use the
/// base key unchanged. Any other hash replaces the last key byte with
/// `1 + (hash - DEFAULT_CHANNEL_HASH)`, mirroring how stock firmware
/// numbers its secondary channel keys. This is speculative key recovery:
/// with no authentication tag there is no way to confirm the guess, so
/// the result is labeled [`KeyCandidate::Guessed`].
pub fn channel_key_for_hash(base: &[u8; CHANNEL_KEY_LEN], channel_hash: u8) -> KeyCandidate {
    if channel_hash == DEFAULT_CHANNEL_HASH || channel_hash == CONTROL_CHANNEL_HASH {
        return KeyCandidate::Known(*base);
    }
    let mut key = *base;
    key[CHANNEL_KEY_LEN - 1] = 1u8.wrapping_add(channel_hash.wrapping_sub(DEFAULT_CHANNEL_HASH));
    KeyCandidate::Guessed(key)
}

/// Keystream state for one packet: the expanded round keys plus the
/// packet nonce.
///
/// Construct fresh per decrypt operation and drop afterwards. Reusing a
/// (key, sender, packet_id) triple across different plaintexts is a
/// keystream collision, which counter mode does not survive.
pub struct Keystream {
    cipher: Aes128,
    nonce: [u8; BLOCK_LEN],
}

impl Keystream {
    pub fn new(key: &[u8; CHANNEL_KEY_LEN], sender: u32, packet_id: u32) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            nonce: derive_nonce(sender, packet_id),
        }
    }

    /// XOR the keystream over `buf` in place.
    ///
    /// Works for any length including partial final blocks. Calling twice
    /// with the same state restores the original bytes.
    pub fn apply(&self, buf: &mut [u8]) {
        let mut counter: u32 = 0;
        for chunk in buf.chunks_mut(BLOCK_LEN) {
            let mut block = GenericArray::from(self.nonce);
            block.as_mut_slice()[12..16].copy_from_slice(&counter.to_be_bytes());
            self.cipher.encrypt_block(&mut block);
            for (byte, ks) in chunk.iter_mut().zip(block.as_slice()) {
                *byte ^= ks;
            }
            counter = counter.wrapping_add(1);
        }
    }
}

/// Build the 16-byte packet nonce. Bytes 12..16 are left zero for the
/// block counter.
pub fn derive_nonce(sender: u32, packet_id: u32) -> [u8; BLOCK_LEN] {
    let mut nonce = [0u8; BLOCK_LEN];
    nonce[0..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
    nonce[8..12].copy_from_slice(&sender.to_le_bytes());
    nonce
}

/// One-shot convenience over [`Keystream`].
pub fn apply_keystream(
    buf: &mut [u8],
    sender: u32,
    packet_id: u32,
    key: &[u8; CHANNEL_KEY_LEN],
) {
    Keystream::new(key, sender, packet_id).apply(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; CHANNEL_KEY_LEN] = [7u8; CHANNEL_KEY_LEN];

    #[test]
    fn nonce_layout() {
        let nonce = derive_nonce(0xAABB_CCDD, 0x1122_3344);
        assert_eq!(&nonce[0..8], &[0x44, 0x33, 0x22, 0x11, 0, 0, 0, 0]);
        assert_eq!(&nonce[8..12], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&nonce[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn apply_is_its_own_inverse() {
        let mut buf: Vec<u8> = (0u8..=200).collect();
        let original = buf.clone();
        apply_keystream(&mut buf, 99, 1234, &KEY);
        assert_ne!(buf, original);
        apply_keystream(&mut buf, 99, 1234, &KEY);
        assert_eq!(buf, original);
    }

    #[test]
    fn zero_buffer_round_trip() {
        // 20 bytes exercises a partial final block.
        let mut buf = [0u8; 20];
        apply_keystream(&mut buf, 1, 1, &KEY);
        assert!(buf.iter().any(|&b| b != 0), "cipher must actually alter data");
        apply_keystream(&mut buf, 1, 1, &KEY);
        assert_eq!(buf, [0u8; 20]);
    }

    #[test]
    fn empty_buffer_is_fine() {
        let mut buf = [0u8; 0];
        apply_keystream(&mut buf, 1, 1, &KEY);
    }

    #[test]
    fn keystream_differs_per_packet() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        apply_keystream(&mut a, 1, 1, &KEY);
        apply_keystream(&mut b, 1, 2, &KEY);
        assert_ne!(a, b);

        let mut c = [0u8; 32];
        apply_keystream(&mut c, 2, 1, &KEY);
        assert_ne!(a, c);
    }

    #[test]
    fn second_block_uses_next_counter() {
        // A 32-byte zero buffer yields the raw keystream; the two halves
        // must differ because the counter advanced.
        let mut buf = [0u8; 32];
        apply_keystream(&mut buf, 5, 5, &KEY);
        assert_ne!(buf[0..16], buf[16..32]);
    }

    #[test]
    fn reserved_hashes_use_base_key() {
        for hash in [DEFAULT_CHANNEL_HASH, CONTROL_CHANNEL_HASH] {
            let candidate = channel_key_for_hash(&KEY, hash);
            assert_eq!(candidate, KeyCandidate::Known(KEY));
            assert!(!candidate.is_guess());
        }
    }

    #[test]
    fn non_standard_hash_rewrites_last_byte() {
        let candidate = channel_key_for_hash(&KEY, 0x0A);
        assert!(candidate.is_guess());
        let key = candidate.key();
        assert_eq!(&key[..15], &KEY[..15]);
        // 1 + (0x0A - 0x08)
        assert_eq!(key[15], 3);
    }
}

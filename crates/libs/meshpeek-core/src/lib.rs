//! Passive decode pipeline for an open LoRa mesh protocol.
//!
//! A captured frame carries an unencrypted 16-byte routing header followed
//! by an AES-128-CTR encrypted application payload holding a
//! length-delimited binary record. The pipeline parses the header,
//! suppresses duplicates on (sender, packet id), reverses the keystream
//! over the payload region, and walks the decrypted bytes to recover typed
//! application fields.
//!
//! The node never retransmits; everything here is observation only.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod crypt;
pub mod header;
pub mod inspect;
pub mod scan;

pub use cache::{PacketCache, PacketIdentity};
pub use config::{CommandOutcome, ConfigError, DeviceConfig};
pub use crypt::{channel_key_for_hash, KeyCandidate, Keystream, DEFAULT_CHANNEL_KEY};
pub use header::{MeshHeader, BROADCAST_ADDR, HEADER_LEN};
pub use inspect::{
    DecodedPacket, Outcome, PacketInspector, PayloadContent, RxMetadata, MAX_PAYLOAD_LEN,
};

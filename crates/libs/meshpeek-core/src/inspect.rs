//! Packet inspection: header → dedup → decrypt → field decode.
//!
//! [`PacketInspector`] owns the duplicate cache and a reusable decrypt
//! arena, and turns one raw receive buffer into a structured
//! [`Outcome`]. Rendering the result is the presentation layer's job.

use log::{debug, trace};

use crate::buffer::ScratchBuffer;
use crate::cache::{PacketCache, PacketIdentity};
use crate::crypt::{
    channel_key_for_hash, KeyCandidate, Keystream, CHANNEL_KEY_LEN, CONTROL_CHANNEL_HASH,
    DEFAULT_CHANNEL_HASH,
};
use crate::header::{MeshHeader, HEADER_LEN};
use crate::scan::{Cursor, WireKind};

/// Largest payload the decrypt arena holds; longer frames decode in
/// degraded (truncated) form.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Application port numbers recognized in decoded payloads.
pub mod port {
    pub const TEXT: u32 = 1;
    pub const POSITION: u32 = 3;
    pub const NODEINFO: u32 = 4;
    pub const ROUTING: u32 = 5;
    pub const REPLY: u32 = 32;
    pub const TELEMETRY: u32 = 67;
    pub const STORE_FORWARD: u32 = 70;

    pub fn name(port: u32) -> Option<&'static str> {
        match port {
            TEXT => Some("TEXT"),
            POSITION => Some("POS"),
            NODEINFO => Some("NODEINF"),
            ROUTING => Some("ROUTING"),
            REPLY => Some("RPLY"),
            TELEMETRY => Some("TELEM"),
            STORE_FORWARD => Some("STORE_FORWARD"),
            _ => None,
        }
    }
}

/// Signal-quality readings from the radio, passed through for reporting
/// only; nothing here interprets them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RxMetadata {
    pub freq_error_hz: f32,
    pub rssi_dbm: f32,
    pub snr_db: f32,
}

/// GPS position, fixed-point degrees scaled by 1e7.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    pub altitude_m: Option<i32>,
}

impl Position {
    pub fn latitude(&self) -> Option<f64> {
        self.latitude_i.map(|v| f64::from(v) / 1e7)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.longitude_i.map(|v| f64::from(v) / 1e7)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceMetrics {
    pub battery_pct: Option<u32>,
    pub voltage_v: Option<f32>,
    pub channel_util_pct: Option<f32>,
    pub uptime_s: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvironmentMetrics {
    pub temperature_c: Option<f32>,
    pub relative_humidity_pct: Option<f32>,
    pub pressure_hpa: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub device: Option<DeviceMetrics>,
    pub environment: Option<EnvironmentMetrics>,
}

/// Node identity broadcast by its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
}

/// Decoded application payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadContent {
    Text(String),
    Position(Position),
    Telemetry(Telemetry),
    NodeInfo(NodeInfo),
}

/// Structured decode of one first-seen packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub header: MeshHeader,
    pub rx: Option<RxMetadata>,
    /// Which key decrypted the payload, and whether it was a guess.
    pub key: KeyCandidate,
    /// Decrypted payload bytes (clamped to [`MAX_PAYLOAD_LEN`]).
    pub payload: Vec<u8>,
    /// True when the frame's payload exceeded the decrypt arena and the
    /// tail was dropped; decoding continued on what fit.
    pub truncated: bool,
    /// Port number from the outer record, when present.
    pub port: Option<u32>,
    pub content: Option<PayloadContent>,
}

/// Per-packet result at the inspector boundary. All failures are local
/// to the offending frame; the pipeline keeps running.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Decoded(DecodedPacket),
    /// Seen before under (sender, packet id); decrypt and decode were
    /// skipped to save energy.
    Duplicate(MeshHeader),
    /// Frame shorter than the routing header.
    Malformed { len: usize },
}

/// The decode pipeline. Owns the duplicate cache and the decrypt arena;
/// single-writer, run-to-completion (callers serialize externally if the
/// surrounding system ever grows threads).
pub struct PacketInspector {
    cache: PacketCache,
    scratch: ScratchBuffer<MAX_PAYLOAD_LEN>,
}

impl PacketInspector {
    pub fn new(cache_capacity: usize) -> Self {
        Self { cache: PacketCache::new(cache_capacity), scratch: ScratchBuffer::new() }
    }

    /// Cache observability (degraded-mode detection, size reporting).
    pub fn cache(&self) -> &PacketCache {
        &self.cache
    }

    /// Run the full pipeline over one received frame.
    ///
    /// The frame itself is never mutated, so the raw bytes can still be
    /// re-emitted by the caller. `base_key` is the configured 16-byte
    /// channel secret; `rx` is attached to the report verbatim.
    pub fn inspect(
        &mut self,
        frame: &[u8],
        rx: Option<RxMetadata>,
        base_key: &[u8; CHANNEL_KEY_LEN],
    ) -> Outcome {
        if frame.len() < HEADER_LEN {
            debug!("frame too short: {} bytes", frame.len());
            return Outcome::Malformed { len: frame.len() };
        }

        let header = MeshHeader::parse(frame);
        trace!(
            "rx {:08x} -> {:08x} id {:08x} hash {:02x} len {}",
            header.from,
            header.dest,
            header.packet_id,
            header.channel_hash,
            frame.len()
        );

        let identity = PacketIdentity { sender: header.from, packet_id: header.packet_id };
        if self.cache.contains(identity) {
            debug!("duplicate {:08x}/{:08x}", header.from, header.packet_id);
            return Outcome::Duplicate(header);
        }
        self.cache.insert(identity);

        let key = channel_key_for_hash(base_key, header.channel_hash);
        if header.channel_hash != DEFAULT_CHANNEL_HASH
            && header.channel_hash != CONTROL_CHANNEL_HASH
        {
            debug!(
                "non-standard channel hash {:02x}, trying derived key",
                header.channel_hash
            );
        }

        let truncated = self.scratch.load_clamped(&frame[HEADER_LEN..]);
        Keystream::new(key.key(), header.from, header.packet_id)
            .apply(self.scratch.as_mut_slice());

        let (port, content) = decode_data(self.scratch.as_slice());

        Outcome::Decoded(DecodedPacket {
            header,
            rx,
            key,
            payload: self.scratch.as_slice().to_vec(),
            truncated,
            port,
            content,
        })
    }
}

/// Walk the top-level record: field 1 (varint) is the port number, field
/// 2 (length-delimited) the application payload, dispatched on the most
/// recently seen port. Everything else is skipped.
fn decode_data(payload: &[u8]) -> (Option<u32>, Option<PayloadContent>) {
    let mut cursor = Cursor::new(payload);
    let mut port = None;
    let mut content = None;

    while let Some((field, kind)) = cursor.read_tag() {
        match (field, kind) {
            (1, WireKind::Varint) => port = Some(cursor.read_varint()),
            (2, WireKind::LengthDelimited) => {
                let len = cursor.read_varint() as usize;
                let chunk = cursor.take(len);
                if let Some(decoded) = decode_app_payload(port, chunk) {
                    content = Some(decoded);
                }
            }
            _ => cursor.skip_field(kind),
        }
    }

    (port, content)
}

fn decode_app_payload(port: Option<u32>, bytes: &[u8]) -> Option<PayloadContent> {
    match port? {
        port::TEXT | port::REPLY => Some(PayloadContent::Text(printable_string(bytes))),
        port::POSITION => Some(PayloadContent::Position(decode_position(bytes))),
        port::TELEMETRY => Some(PayloadContent::Telemetry(decode_telemetry(bytes))),
        port::NODEINFO => Some(PayloadContent::NodeInfo(decode_node_info(bytes))),
        _ => None,
    }
}

/// Render bytes as displayable text: printable ASCII verbatim, NUL as a
/// visible `\0` marker, other control bytes as `.`, and high-bit bytes
/// passed through so multi-byte encodings survive (anything that fails
/// to form valid UTF-8 falls back to replacement characters).
fn printable_string(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x20..=0x7E => out.push(b),
            0x00 => out.extend_from_slice(b"\\0"),
            b if b >= 0x80 => out.push(b),
            _ => out.push(b'.'),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_position(bytes: &[u8]) -> Position {
    let mut cursor = Cursor::new(bytes);
    let mut position = Position::default();
    while let Some((field, kind)) = cursor.read_tag() {
        match (field, kind) {
            (1, WireKind::Fixed32) => {
                position.latitude_i = cursor.read_fixed32_le().map(i32::from_le_bytes);
            }
            (2, WireKind::Fixed32) => {
                position.longitude_i = cursor.read_fixed32_le().map(i32::from_le_bytes);
            }
            (3, WireKind::Varint) => {
                position.altitude_m = Some(cursor.read_varint() as i32);
            }
            _ => cursor.skip_field(kind),
        }
    }
    position
}

fn decode_telemetry(bytes: &[u8]) -> Telemetry {
    let mut cursor = Cursor::new(bytes);
    let mut telemetry = Telemetry::default();
    while let Some((field, kind)) = cursor.read_tag() {
        match (field, kind) {
            (2, WireKind::LengthDelimited) => {
                let len = cursor.read_varint() as usize;
                telemetry.device = Some(decode_device_metrics(cursor.take(len)));
            }
            (3, WireKind::LengthDelimited) => {
                let len = cursor.read_varint() as usize;
                telemetry.environment = Some(decode_environment_metrics(cursor.take(len)));
            }
            _ => cursor.skip_field(kind),
        }
    }
    telemetry
}

fn decode_device_metrics(bytes: &[u8]) -> DeviceMetrics {
    let mut cursor = Cursor::new(bytes);
    let mut metrics = DeviceMetrics::default();
    while let Some((field, kind)) = cursor.read_tag() {
        match (field, kind) {
            (1, WireKind::Varint) => metrics.battery_pct = Some(cursor.read_varint()),
            (2, WireKind::Fixed32) => {
                metrics.voltage_v = cursor.read_fixed32_le().map(f32::from_le_bytes);
            }
            (3, WireKind::Fixed32) => {
                metrics.channel_util_pct = cursor.read_fixed32_le().map(f32::from_le_bytes);
            }
            (5, WireKind::Varint) => metrics.uptime_s = Some(cursor.read_varint()),
            _ => cursor.skip_field(kind),
        }
    }
    metrics
}

fn decode_environment_metrics(bytes: &[u8]) -> EnvironmentMetrics {
    let mut cursor = Cursor::new(bytes);
    let mut metrics = EnvironmentMetrics::default();
    while let Some((field, kind)) = cursor.read_tag() {
        match (field, kind) {
            (1, WireKind::Fixed32) => {
                metrics.temperature_c = cursor.read_fixed32_le().map(f32::from_le_bytes);
            }
            (2, WireKind::Fixed32) => {
                metrics.relative_humidity_pct = cursor.read_fixed32_le().map(f32::from_le_bytes);
            }
            (3, WireKind::Fixed32) => {
                metrics.pressure_hpa = cursor.read_fixed32_le().map(f32::from_le_bytes);
            }
            _ => cursor.skip_field(kind),
        }
    }
    metrics
}

fn decode_node_info(bytes: &[u8]) -> NodeInfo {
    let mut cursor = Cursor::new(bytes);
    let mut info = NodeInfo::default();
    while let Some((field, kind)) = cursor.read_tag() {
        match (field, kind) {
            (1, WireKind::LengthDelimited) => {
                let len = cursor.read_varint() as usize;
                info.id = Some(printable_string(cursor.take(len)));
            }
            (2, WireKind::LengthDelimited) => {
                let len = cursor.read_varint() as usize;
                info.long_name = Some(printable_string(cursor.take(len)));
            }
            (3, WireKind::LengthDelimited) => {
                let len = cursor.read_varint() as usize;
                info.short_name = Some(printable_string(cursor.take(len)));
            }
            _ => cursor.skip_field(kind),
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(field: u32, kind: u8) -> u8 {
        ((field as u8) << 3) | kind
    }

    #[test]
    fn decode_text_record() {
        let mut record = vec![tag(1, 0), port::TEXT as u8, tag(2, 2), 5];
        record.extend_from_slice(b"hello");
        let (port_num, content) = decode_data(&record);
        assert_eq!(port_num, Some(port::TEXT));
        assert_eq!(content, Some(PayloadContent::Text("hello".into())));
    }

    #[test]
    fn payload_before_port_is_not_dispatched() {
        let mut record = vec![tag(2, 2), 2];
        record.extend_from_slice(b"hi");
        record.extend_from_slice(&[tag(1, 0), port::TEXT as u8]);
        let (port_num, content) = decode_data(&record);
        assert_eq!(port_num, Some(port::TEXT));
        assert_eq!(content, None);
    }

    #[test]
    fn unknown_port_records_number_only() {
        let mut record = vec![tag(1, 0), 77, tag(2, 2), 3];
        record.extend_from_slice(&[1, 2, 3]);
        let (port_num, content) = decode_data(&record);
        assert_eq!(port_num, Some(77));
        assert_eq!(content, None);
    }

    #[test]
    fn over_long_payload_length_clamps() {
        let mut record = vec![tag(1, 0), port::TEXT as u8, tag(2, 2), 200];
        record.extend_from_slice(b"abc");
        let (_, content) = decode_data(&record);
        assert_eq!(content, Some(PayloadContent::Text("abc".into())));
    }

    #[test]
    fn printable_policy() {
        assert_eq!(printable_string(b"ok 123"), "ok 123");
        assert_eq!(printable_string(&[0x00]), "\\0");
        assert_eq!(printable_string(&[0x07, 0x1F]), "..");
        // UTF-8 passes through unmodified.
        assert_eq!(printable_string("héllo".as_bytes()), "h\u{e9}llo");
        // A lone high-bit byte degrades to a replacement character.
        assert_eq!(printable_string(&[b'a', 0xC3]), "a\u{fffd}");
    }

    #[test]
    fn position_fields() {
        let mut body = vec![tag(1, 5)];
        body.extend_from_slice(&551234567i32.to_le_bytes());
        body.push(tag(2, 5));
        body.extend_from_slice(&(-373456789i32).to_le_bytes());
        body.push(tag(3, 0));
        body.push(120);

        let position = decode_position(&body);
        assert_eq!(position.latitude_i, Some(551234567));
        assert_eq!(position.longitude_i, Some(-373456789));
        assert_eq!(position.altitude_m, Some(120));
        assert!((position.latitude().unwrap() - 55.1234567).abs() < 1e-9);
    }

    #[test]
    fn position_short_fixed32_is_absent() {
        let body = [tag(1, 5), 0x01, 0x02];
        let position = decode_position(&body);
        assert_eq!(position.latitude_i, None);
    }

    #[test]
    fn position_skips_unknown_fields() {
        let body = [tag(7, 0), 9, tag(3, 0), 15];
        let position = decode_position(&body);
        assert_eq!(position.altitude_m, Some(15));
    }

    #[test]
    fn telemetry_device_metrics() {
        let mut device = vec![tag(1, 0), 87, tag(2, 5)];
        device.extend_from_slice(&3.97f32.to_le_bytes());
        device.push(tag(5, 0));
        device.extend_from_slice(&[0xC8, 0x01]); // 200

        let mut body = vec![tag(2, 2), device.len() as u8];
        body.extend_from_slice(&device);

        let telemetry = decode_telemetry(&body);
        let metrics = telemetry.device.unwrap();
        assert_eq!(metrics.battery_pct, Some(87));
        assert_eq!(metrics.voltage_v, Some(3.97));
        assert_eq!(metrics.channel_util_pct, None);
        assert_eq!(metrics.uptime_s, Some(200));
        assert_eq!(telemetry.environment, None);
    }

    #[test]
    fn telemetry_environment_metrics() {
        let mut env = vec![tag(1, 5)];
        env.extend_from_slice(&21.5f32.to_le_bytes());
        env.push(tag(3, 5));
        env.extend_from_slice(&1013.2f32.to_le_bytes());

        let mut body = vec![tag(3, 2), env.len() as u8];
        body.extend_from_slice(&env);

        let telemetry = decode_telemetry(&body);
        let metrics = telemetry.environment.unwrap();
        assert_eq!(metrics.temperature_c, Some(21.5));
        assert_eq!(metrics.relative_humidity_pct, None);
        assert_eq!(metrics.pressure_hpa, Some(1013.2));
    }

    #[test]
    fn node_info_strings() {
        let mut body = vec![tag(1, 2), 4];
        body.extend_from_slice(b"!abc");
        body.push(tag(2, 2));
        body.push(9);
        body.extend_from_slice(b"Base Camp");
        body.push(tag(3, 2));
        body.push(2);
        body.extend_from_slice(b"BC");

        let info = decode_node_info(&body);
        assert_eq!(info.id.as_deref(), Some("!abc"));
        assert_eq!(info.long_name.as_deref(), Some("Base Camp"));
        assert_eq!(info.short_name.as_deref(), Some("BC"));
    }

    #[test]
    fn garbage_terminates() {
        // Adversarial bytes must terminate without panicking; every loop
        // shrinks the window.
        let garbage: Vec<u8> = (0..=255).collect();
        let _ = decode_data(&garbage);
        let _ = decode_position(&garbage);
        let _ = decode_telemetry(&garbage);
        let _ = decode_node_info(&garbage);
    }
}

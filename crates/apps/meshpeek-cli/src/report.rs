//! Text rendering of decode results.
//!
//! Verbosity follows the device's `log_level` setting: 0 prints nothing,
//! 1 a one-line summary per frame, 2 the full labeled field decode in
//! the same layout the node prints on its serial console.

use std::io::{self, Write};

use meshpeek_core::inspect::{port, PayloadContent};
use meshpeek_core::Outcome;

pub fn render<W: Write>(out: &mut W, outcome: &Outcome, level: u8) -> io::Result<()> {
    match level {
        0 => Ok(()),
        1 => summary(out, outcome),
        _ => full(out, outcome),
    }
}

fn summary<W: Write>(out: &mut W, outcome: &Outcome) -> io::Result<()> {
    match outcome {
        Outcome::Decoded(packet) => {
            let header = &packet.header;
            write!(
                out,
                "{:08x} -> {:08x} id {:08x} ch {:02x}",
                header.from, header.dest, header.packet_id, header.channel_hash
            )?;
            if let Some(port_num) = packet.port {
                match port::name(port_num) {
                    Some(name) => write!(out, " {name}")?,
                    None => write!(out, " port {port_num}")?,
                }
            }
            if let Some(content) = &packet.content {
                write!(out, " {}", content_summary(content))?;
            }
            if packet.truncated {
                write!(out, " (truncated)")?;
            }
            writeln!(out)
        }
        Outcome::Duplicate(header) => {
            writeln!(out, "dup {:08x}/{:08x}", header.from, header.packet_id)
        }
        Outcome::Malformed { len } => writeln!(out, "malformed frame ({len}B)"),
    }
}

fn content_summary(content: &PayloadContent) -> String {
    match content {
        PayloadContent::Text(text) => format!("\"{text}\""),
        PayloadContent::Position(position) => match (position.latitude(), position.longitude()) {
            (Some(lat), Some(lon)) => format!("{lat:.5},{lon:.5}"),
            _ => "pos?".to_string(),
        },
        PayloadContent::Telemetry(_) => "telemetry".to_string(),
        PayloadContent::NodeInfo(info) => {
            info.short_name.clone().or_else(|| info.id.clone()).unwrap_or_default()
        }
    }
}

fn full<W: Write>(out: &mut W, outcome: &Outcome) -> io::Result<()> {
    writeln!(out, "\n--- [Mesh Pkt] ---")?;
    let packet = match outcome {
        Outcome::Decoded(packet) => packet,
        Outcome::Duplicate(header) => {
            line(out, "Sender", &format!("0x{:08X}", header.from))?;
            line(out, "Pkt ID", &format!("0x{:08X}", header.packet_id))?;
            return line(out, "Status", "duplicate, decode skipped");
        }
        Outcome::Malformed { len } => {
            return line(out, "Pkt", &format!("too short: {len}"));
        }
    };

    let header = &packet.header;
    line(out, "Sender", &format!("0x{:08X}", header.from))?;
    let dest = if header.is_broadcast() {
        format!("0x{:08X} (Bcast)", header.dest)
    } else {
        format!("0x{:08X}", header.dest)
    };
    line(out, "Dest", &dest)?;
    line(out, "Pkt ID", &format!("0x{:08X}", header.packet_id))?;
    line(out, "Hop Lft", &header.hop_limit.to_string())?;
    line(out, "Hop Str", &header.hop_start.to_string())?;
    line(out, "Wnt ACK", if header.want_ack { "Y" } else { "N" })?;
    line(out, "MQTT", if header.via_mqtt { "Y" } else { "N" })?;
    line(out, "Chan H", &channel_hash_label(header.channel_hash))?;
    line(out, "Nx Hop", &format!("0x{:02X}", header.next_hop))?;
    line(out, "Relay", &format!("0x{:02X}", header.relay_node))?;
    if let Some(rx) = &packet.rx {
        line(out, "FreqErr", &format!("{:.0}Hz", rx.freq_error_hz))?;
        line(out, "RSSI/SNR", &format!("{:.0}/{:.1}", rx.rssi_dbm, rx.snr_db))?;
    }
    let size = if packet.truncated {
        format!("{}B (truncated)", packet.payload.len())
    } else {
        format!("{}B", packet.payload.len())
    };
    line(out, "Pld Size", &size)?;
    if packet.key.is_guess() {
        line(out, "Key", "guessed from channel hash (unverified)")?;
    }
    line(out, "Hex", &hex_preview(&packet.payload, 16))?;
    line(out, "ASCII", &ascii_preview(&packet.payload, 32))?;

    if let Some(port_num) = packet.port {
        let label = match port::name(port_num) {
            Some(name) => format!("{port_num} ({name})"),
            None => port_num.to_string(),
        };
        line(out, "PortNum", &label)?;
    }

    match &packet.content {
        Some(PayloadContent::Text(text)) => line(out, "Text", &format!("\"{text}\""))?,
        Some(PayloadContent::Position(position)) => {
            if let Some(lat) = position.latitude() {
                line(out, "Lat", &format!("{lat:.7}"))?;
            }
            if let Some(lon) = position.longitude() {
                line(out, "Lon", &format!("{lon:.7}"))?;
            }
            if let Some(alt) = position.altitude_m {
                line(out, "Alt", &format!("{alt}m"))?;
            }
        }
        Some(PayloadContent::Telemetry(telemetry)) => {
            if let Some(device) = &telemetry.device {
                if let Some(battery) = device.battery_pct {
                    line(out, "Bat", &format!("{battery}%"))?;
                }
                if let Some(voltage) = device.voltage_v {
                    line(out, "Volt", &format!("{voltage:.2}V"))?;
                }
                if let Some(util) = device.channel_util_pct {
                    line(out, "ChUtil", &format!("{util:.2}%"))?;
                }
                if let Some(uptime) = device.uptime_s {
                    line(out, "Uptime", &format!("{uptime}s"))?;
                }
            }
            if let Some(env) = &telemetry.environment {
                if let Some(temperature) = env.temperature_c {
                    line(out, "Temp", &format!("{temperature:.2}C"))?;
                }
                if let Some(humidity) = env.relative_humidity_pct {
                    line(out, "Humid", &format!("{humidity:.2}%"))?;
                }
                if let Some(pressure) = env.pressure_hpa {
                    line(out, "Pres", &format!("{pressure:.2}hPa"))?;
                }
            }
        }
        Some(PayloadContent::NodeInfo(info)) => {
            if let Some(id) = &info.id {
                line(out, "Node ID", id)?;
            }
            if let Some(long_name) = &info.long_name {
                line(out, "Long Nm", long_name)?;
            }
            if let Some(short_name) = &info.short_name {
                line(out, "Short Nm", short_name)?;
            }
        }
        None => {}
    }
    Ok(())
}

fn line<W: Write>(out: &mut W, label: &str, value: &str) -> io::Result<()> {
    writeln!(out, "{label:<8}: {value}")
}

fn channel_hash_label(hash: u8) -> String {
    match hash {
        0x08 => format!("0x{hash:02X} (LongFast)"),
        0x00 => format!("0x{hash:02X} (Routing/Ctrl)"),
        _ => format!("0x{hash:02X} (Unknown Hash!)"),
    }
}

fn hex_preview(payload: &[u8], limit: usize) -> String {
    let shown: Vec<String> = payload.iter().take(limit).map(|b| format!("{b:02X}")).collect();
    let mut text = shown.join(" ");
    if payload.len() > limit {
        text.push_str(" ..");
    }
    text
}

fn ascii_preview(payload: &[u8], limit: usize) -> String {
    payload
        .iter()
        .take(limit)
        .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshpeek_core::{DecodedPacket, KeyCandidate, MeshHeader};

    fn sample_packet() -> DecodedPacket {
        DecodedPacket {
            header: MeshHeader {
                dest: 0xFFFF_FFFF,
                from: 0x1234_5678,
                packet_id: 7,
                hop_limit: 3,
                want_ack: false,
                via_mqtt: false,
                hop_start: 3,
                channel_hash: 0x08,
                next_hop: 0,
                relay_node: 0,
            },
            rx: None,
            key: KeyCandidate::Known([0u8; 16]),
            payload: b"\x08\x01\x12\x02hi".to_vec(),
            truncated: false,
            port: Some(port::TEXT),
            content: Some(PayloadContent::Text("hi".to_string())),
        }
    }

    #[test]
    fn silent_level_prints_nothing() {
        let mut out = Vec::new();
        render(&mut out, &Outcome::Decoded(sample_packet()), 0).expect("render");
        assert!(out.is_empty());
    }

    #[test]
    fn summary_line() {
        let mut out = Vec::new();
        render(&mut out, &Outcome::Decoded(sample_packet()), 1).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "12345678 -> ffffffff id 00000007 ch 08 TEXT \"hi\"\n");
    }

    #[test]
    fn full_block_contains_labels() {
        let mut out = Vec::new();
        render(&mut out, &Outcome::Decoded(sample_packet()), 2).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Sender  : 0x12345678"));
        assert!(text.contains("Dest    : 0xFFFFFFFF (Bcast)"));
        assert!(text.contains("Chan H  : 0x08 (LongFast)"));
        assert!(text.contains("PortNum : 1 (TEXT)"));
        assert!(text.contains("Text    : \"hi\""));
    }

    #[test]
    fn duplicate_summary() {
        let mut out = Vec::new();
        let header = sample_packet().header;
        render(&mut out, &Outcome::Duplicate(header), 1).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "dup 12345678/00000007\n");
    }

    #[test]
    fn malformed_summary() {
        let mut out = Vec::new();
        render(&mut out, &Outcome::Malformed { len: 3 }, 1).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "malformed frame (3B)\n");
    }
}

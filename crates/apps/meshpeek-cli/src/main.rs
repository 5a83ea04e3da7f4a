//! Host-side frame decoder.
//!
//! Feeds captured frames (hex, one per line) through the decode
//! pipeline and renders each result at the configured verbosity.

mod report;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use log::warn;

use meshpeek_core::crypt::CHANNEL_KEY_LEN;
use meshpeek_core::{DeviceConfig, PacketInspector};

#[derive(Parser, Debug)]
#[command(name = "meshpeek", about = "Decode captured mesh frames", version)]
struct Cli {
    /// File of hex-encoded frames, one per line; stdin when omitted.
    input: Option<PathBuf>,

    /// 16-byte channel key as 32 hex chars; overrides the config file.
    #[arg(long)]
    key: Option<String>,

    /// TOML device configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output verbosity: 0 silent, 1 summary, 2 full field decode.
    #[arg(long)]
    log_level: Option<u8>,

    /// Duplicate cache capacity.
    #[arg(long, default_value_t = 64)]
    cache_slots: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DeviceConfig::load_toml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DeviceConfig::default(),
    };
    if let Some(key_hex) = &cli.key {
        config.channel_key = parse_key(key_hex)?;
    }
    if let Some(level) = cli.log_level {
        if level > 2 {
            bail!("--log-level must be 0, 1 or 2");
        }
        config.log_level = level;
    }

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut inspector = PacketInspector::new(cli.cache_slots);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut bad_lines = 0usize;

    for (number, line) in reader.lines().enumerate() {
        let line = line.context("reading input")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let compact: String = trimmed.split_whitespace().collect();
        let frame = match hex::decode(&compact) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("line {}: not hex: {err}", number + 1);
                bad_lines += 1;
                continue;
            }
        };
        let outcome = inspector.inspect(&frame, None, &config.channel_key);
        report::render(&mut out, &outcome, config.log_level)?;
    }
    out.flush()?;

    if bad_lines > 0 {
        bail!("{bad_lines} input line(s) were not valid hex");
    }
    Ok(())
}

fn parse_key(text: &str) -> anyhow::Result<[u8; CHANNEL_KEY_LEN]> {
    let bytes = hex::decode(text.trim()).context("--key must be hex")?;
    if bytes.len() != CHANNEL_KEY_LEN {
        bail!("--key must be {} bytes ({} hex chars)", CHANNEL_KEY_LEN, CHANNEL_KEY_LEN * 2);
    }
    let mut key = [0u8; CHANNEL_KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

//! Device configuration.
//!
//! Two surfaces: a fixed-layout binary image the node persists in
//! non-volatile storage (magic, version, trailing checksum), and the
//! line-oriented `key=value` protocol spoken over the serial console.
//! Host-side tools read and write the same settings as TOML.

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::crypt::{CHANNEL_KEY_LEN, DEFAULT_CHANNEL_KEY};

/// "KASK"
pub const CONFIG_MAGIC: u32 = 0x4B41_534B;
pub const CONFIG_VERSION: u8 = 1;

/// Size of the persisted binary image.
///
/// ```text
/// 0..4   magic u32 LE        16..18 preamble_len u16 LE
/// 4      version             18..22 adc_multiplier f32 LE
/// 5..9   frequency_mhz f32   22..26 battery_threshold f32 LE
/// 9..13  bandwidth_khz f32   26..42 channel_key
/// 13     spreading_factor    42     log_level
/// 14     coding_rate         43..45 checksum u16 LE
/// 15     sync_word
/// ```
pub const CONFIG_IMAGE_LEN: usize = 45;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config image too short: {0} bytes (need {CONFIG_IMAGE_LEN})")]
    TooShort(usize),

    #[error("bad magic: 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported version: {0}")]
    BadVersion(u8),

    #[error("checksum mismatch: stored 0x{stored:04x}, computed 0x{computed:04x}")]
    BadChecksum { stored: u16, computed: u16 },

    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("config encode: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

/// Tunable node settings. Radio parameters are consumed by the (out of
/// scope) transceiver driver; the decode pipeline only needs
/// `channel_key` and `log_level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub frequency_mhz: f32,
    pub bandwidth_khz: f32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub sync_word: u8,
    pub preamble_len: u16,
    pub adc_multiplier: f32,
    pub battery_threshold: f32,
    #[serde(with = "hex_key")]
    pub channel_key: [u8; CHANNEL_KEY_LEN],
    /// 0 = silent, 1 = summary, 2 = full field decode.
    pub log_level: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 869.085,
            bandwidth_khz: 250.0,
            spreading_factor: 11,
            coding_rate: 5,
            sync_word: 0x2B,
            preamble_len: 16,
            adc_multiplier: 4.9,
            battery_threshold: 3.4,
            channel_key: DEFAULT_CHANNEL_KEY,
            log_level: 1,
        }
    }
}

/// Outcome of one console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Set { key: &'static str, rendered: String },
    Get { key: &'static str, rendered: String },
    /// Persist the config and restart; acting on this is the caller's job.
    Apply,
    BadValue { key: &'static str, value: String },
    Unknown(String),
}

impl DeviceConfig {
    /// Serialize to the persisted binary layout, checksum included.
    pub fn encode(&self) -> [u8; CONFIG_IMAGE_LEN] {
        let mut out = [0u8; CONFIG_IMAGE_LEN];
        out[0..4].copy_from_slice(&CONFIG_MAGIC.to_le_bytes());
        out[4] = CONFIG_VERSION;
        out[5..9].copy_from_slice(&self.frequency_mhz.to_le_bytes());
        out[9..13].copy_from_slice(&self.bandwidth_khz.to_le_bytes());
        out[13] = self.spreading_factor;
        out[14] = self.coding_rate;
        out[15] = self.sync_word;
        out[16..18].copy_from_slice(&self.preamble_len.to_le_bytes());
        out[18..22].copy_from_slice(&self.adc_multiplier.to_le_bytes());
        out[22..26].copy_from_slice(&self.battery_threshold.to_le_bytes());
        out[26..42].copy_from_slice(&self.channel_key);
        out[42] = self.log_level;
        let checksum = image_checksum(&out[..CONFIG_IMAGE_LEN - 2]);
        out[43..45].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Parse and validate a persisted image.
    pub fn decode(image: &[u8]) -> Result<Self, ConfigError> {
        if image.len() < CONFIG_IMAGE_LEN {
            return Err(ConfigError::TooShort(image.len()));
        }
        let magic = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);
        if magic != CONFIG_MAGIC {
            return Err(ConfigError::BadMagic(magic));
        }
        if image[4] != CONFIG_VERSION {
            return Err(ConfigError::BadVersion(image[4]));
        }
        let stored = u16::from_le_bytes([image[43], image[44]]);
        let computed = image_checksum(&image[..CONFIG_IMAGE_LEN - 2]);
        if stored != computed {
            return Err(ConfigError::BadChecksum { stored, computed });
        }

        let mut channel_key = [0u8; CHANNEL_KEY_LEN];
        channel_key.copy_from_slice(&image[26..42]);
        Ok(Self {
            frequency_mhz: f32::from_le_bytes([image[5], image[6], image[7], image[8]]),
            bandwidth_khz: f32::from_le_bytes([image[9], image[10], image[11], image[12]]),
            spreading_factor: image[13],
            coding_rate: image[14],
            sync_word: image[15],
            preamble_len: u16::from_le_bytes([image[16], image[17]]),
            adc_multiplier: f32::from_le_bytes([image[18], image[19], image[20], image[21]]),
            battery_threshold: f32::from_le_bytes([image[22], image[23], image[24], image[25]]),
            channel_key,
            log_level: image[42],
        })
    }

    /// Decode with fallback: an invalid image logs why and yields the
    /// defaults, so the node always boots with a usable config.
    pub fn load_or_default(image: &[u8]) -> Self {
        match Self::decode(image) {
            Ok(config) => config,
            Err(err) => {
                warn!("config: {err}; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_toml(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Process one console line: `key=value` assigns, a bare key reads
    /// back, `apply` requests save-and-restart.
    pub fn apply_command(&mut self, line: &str) -> CommandOutcome {
        let line = line.trim();
        if let Some((key, value)) = line.split_once('=') {
            let (key, value) = (key.trim(), value.trim());
            let Some(key) = known_key(key) else {
                return CommandOutcome::Unknown(key.to_string());
            };
            if self.assign(key, value) {
                CommandOutcome::Set { key, rendered: self.render(key) }
            } else {
                CommandOutcome::BadValue { key, value: value.to_string() }
            }
        } else if line == "apply" {
            CommandOutcome::Apply
        } else if let Some(key) = known_key(line) {
            CommandOutcome::Get { key, rendered: self.render(key) }
        } else {
            CommandOutcome::Unknown(line.to_string())
        }
    }

    fn assign(&mut self, key: &'static str, value: &str) -> bool {
        match key {
            "freq" => parse_into(value, &mut self.frequency_mhz),
            "bw" => parse_into(value, &mut self.bandwidth_khz),
            "sf" => parse_into(value, &mut self.spreading_factor),
            "cr" => parse_into(value, &mut self.coding_rate),
            "sw" => match parse_u8_auto(value) {
                Some(v) => {
                    self.sync_word = v;
                    true
                }
                None => false,
            },
            "pre" => parse_into(value, &mut self.preamble_len),
            "adc" => parse_into(value, &mut self.adc_multiplier),
            "batt" => parse_into(value, &mut self.battery_threshold),
            "key" => match parse_channel_key(value) {
                Some(k) => {
                    self.channel_key = k;
                    true
                }
                None => false,
            },
            "loglevel" => match value.parse::<u8>() {
                Ok(v) if v <= 2 => {
                    self.log_level = v;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn render(&self, key: &'static str) -> String {
        match key {
            "freq" => format!("{:.3}", self.frequency_mhz),
            "bw" => format!("{:.1}", self.bandwidth_khz),
            "sf" => self.spreading_factor.to_string(),
            "cr" => self.coding_rate.to_string(),
            "sw" => format!("0x{:02X}", self.sync_word),
            "pre" => self.preamble_len.to_string(),
            "adc" => format!("{:.6}", self.adc_multiplier),
            "batt" => format!("{:.2}", self.battery_threshold),
            // Key material never goes back out over the console.
            "key" => "REDACTED".to_string(),
            "loglevel" => self.log_level.to_string(),
            _ => String::new(),
        }
    }
}

const KEYS: [&str; 10] =
    ["freq", "bw", "sf", "cr", "sw", "pre", "adc", "batt", "key", "loglevel"];

fn known_key(key: &str) -> Option<&'static str> {
    KEYS.iter().find(|&&k| k == key).copied()
}

fn parse_into<T: std::str::FromStr>(value: &str, target: &mut T) -> bool {
    match value.parse() {
        Ok(v) => {
            *target = v;
            true
        }
        Err(_) => false,
    }
}

fn parse_u8_auto(value: &str) -> Option<u8> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

fn parse_channel_key(value: &str) -> Option<[u8; CHANNEL_KEY_LEN]> {
    if value.len() != CHANNEL_KEY_LEN * 2 {
        return None;
    }
    let bytes = hex::decode(value).ok()?;
    let mut key = [0u8; CHANNEL_KEY_LEN];
    key.copy_from_slice(&bytes);
    Some(key)
}

fn image_checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

mod hex_key {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::crypt::CHANNEL_KEY_LEN;

    pub fn serialize<S: Serializer>(
        key: &[u8; CHANNEL_KEY_LEN],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; CHANNEL_KEY_LEN], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text.trim()).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("channel key must be 16 bytes of hex"))
    }
}

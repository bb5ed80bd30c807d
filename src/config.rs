//! Configuration file loading.
//!
//! The bridge is configured from one TOML file:
//!
//! ```toml
//! mainloopinterval = 250
//!
//! [mqtt]
//! broker = "127.0.0.1"
//! retain_default = true
//!
//! [plxx]
//! device = "/dev/ttyUSB0"
//! baudrate = 9600
//!
//! [[updatecycles]]
//! id = 1
//! interval = 10
//!
//! [[pldevices]]
//! id = 1
//! name = "PL40"
//!
//! [[pldevices.tags]]
//! address = 50
//! update_cycle = 1
//! topic = "solar/battery/voltage"
//! format = "%.1f"
//! multiplier = 0.1
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    broker::MqttSettings,
    cycle::UpdateCycle,
    format::ValueFormat,
    register,
    scheduler::Scheduler,
    serial::SUPPORTED_BAUD_RATES,
    tag::{NoreadAction, Tag},
};

/// Bounds of the main loop interval, in milliseconds.
pub const LOOP_INTERVAL_MIN_MS: u64 = 50;
pub const LOOP_INTERVAL_MAX_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no update cycles configured")]
    NoUpdateCycles,
    #[error("duplicate update cycle id {0}")]
    DuplicateCycle(u32),
    #[error("update cycle {0} has a zero interval")]
    ZeroInterval(u32),
    #[error("no PL devices configured")]
    NoDevices,
    #[error("device id {0} out of range 1..=254")]
    DeviceId(u8),
    #[error("unsupported baud rate {0}")]
    BaudRate(u32),
    #[error("device {device_id}: register address {address} has no known conversion")]
    UnknownRegister { device_id: u8, address: u16 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Main loop cadence in milliseconds, see [`Config::loop_interval`].
    #[serde(default = "default_loop_interval")]
    pub mainloopinterval: u64,
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub plxx: PlxxConfig,
    #[serde(default)]
    pub updatecycles: Vec<UpdateCycleConfig>,
    #[serde(default)]
    pub pldevices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    /// Keep-alive in seconds.
    pub keepalive: u64,
    /// Retain flag for tags that do not set their own.
    pub retain_default: bool,
    pub clearonexit: bool,
    pub noreadonexit: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "plbridge".to_string(),
            keepalive: 60,
            retain_default: false,
            clearonexit: false,
            noreadonexit: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlxxConfig {
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baudrate: u32,
    /// Milliseconds between register transactions.
    #[serde(default)]
    pub transaction_delay: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCycleConfig {
    pub id: u32,
    /// Seconds.
    pub interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagConfig {
    pub address: u16,
    pub update_cycle: u32,
    #[serde(default)]
    pub group: u32,
    #[serde(default)]
    pub topic: String,
    pub retain: Option<bool>,
    #[serde(default)]
    pub format: ValueFormat,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub noreadvalue: f64,
    #[serde(default = "default_noread_action")]
    pub noreadaction: i32,
    #[serde(default)]
    pub noreadignore: u32,
}

fn default_loop_interval() -> u64 {
    250
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_noread_action() -> i32 {
    -1
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.updatecycles.is_empty() {
            return Err(ConfigError::NoUpdateCycles);
        }
        let mut ids = HashSet::new();
        for cycle in &self.updatecycles {
            if !ids.insert(cycle.id) {
                return Err(ConfigError::DuplicateCycle(cycle.id));
            }
            if cycle.interval == 0 {
                return Err(ConfigError::ZeroInterval(cycle.id));
            }
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.plxx.baudrate) {
            return Err(ConfigError::BaudRate(self.plxx.baudrate));
        }

        if self.pldevices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        for device in &self.pldevices {
            if !(1..=254).contains(&device.id) {
                return Err(ConfigError::DeviceId(device.id));
            }
            for tag in &device.tags {
                if register::is_packed(tag.address) && register::lookup_packed(tag.address).is_none()
                {
                    return Err(ConfigError::UnknownRegister {
                        device_id: device.id,
                        address: tag.address,
                    });
                }
            }
        }
        Ok(())
    }

    /// The main loop interval, clamped to the supported range.
    pub fn loop_interval(&self) -> Duration {
        let ms = self
            .mainloopinterval
            .clamp(LOOP_INTERVAL_MIN_MS, LOOP_INTERVAL_MAX_MS);
        if ms != self.mainloopinterval {
            warn!(
                configured_ms = self.mainloopinterval,
                used_ms = ms,
                "main loop interval out of range"
            );
        }
        Duration::from_millis(ms)
    }

    pub fn transaction_delay(&self) -> Duration {
        Duration::from_millis(self.plxx.transaction_delay)
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt.broker.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            keepalive: Duration::from_secs(self.mqtt.keepalive),
        }
    }

    /// Tags of every enabled device, in configuration order.
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags = Vec::new();
        for device in &self.pldevices {
            if !device.enabled {
                info!(device_id = device.id, name = %device.name, "device disabled");
                continue;
            }
            for config in &device.tags {
                tags.push(config.to_tag(device.id, self.mqtt.retain_default));
            }
        }
        tags
    }

    pub fn update_cycles(&self) -> Vec<UpdateCycle> {
        self.updatecycles
            .iter()
            .map(|cycle| UpdateCycle::new(cycle.id, Duration::from_secs(cycle.interval)))
            .collect()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.update_cycles(), self.tags(), self.transaction_delay())
    }
}

impl TagConfig {
    fn to_tag(&self, device_id: u8, retain_default: bool) -> Tag {
        let mut tag = Tag::new(device_id, self.address);
        tag.update_cycle = self.update_cycle;
        tag.group = self.group;
        tag.topic = self.topic.clone();
        tag.format = self.format.clone();
        tag.retain = self.retain.unwrap_or(retain_default);
        tag.multiplier = self.multiplier;
        tag.offset = self.offset;
        tag.noread_value = self.noreadvalue;
        tag.noread_action = NoreadAction::from(self.noreadaction);
        tag.noread_ignore = self.noreadignore;
        tag
    }
}

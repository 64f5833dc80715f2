//! Runtime configuration

use crate::error::{Result, VmError};
use crate::frame::MAX_SLOTS_PER_CARD;
use crate::topology::PortLayout;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration values
///
/// The values describe the reference deployment: two cards with eight
/// reconfigurable slots each.
pub mod defaults {
    /// Number of accelerator cards
    pub const CARDS: usize = 2;

    /// Reconfigurable slots per card
    pub const SLOTS_PER_CARD: u8 = 8;

    /// Shared command channel port on every card
    pub const CONTROL_PORT: u32 = 50;

    /// Partial reconfiguration (ICAP) channel port on every card
    pub const RECONFIG_PORT: u32 = 100;

    /// First data port of slot 0 (input-A)
    pub const DATA_PORT_BASE: u32 = 11;

    /// Distance between the data ports of consecutive slots
    pub const DATA_PORT_STRIDE: u32 = 10;

    /// Quiescence time the reconfiguration fabric needs after an image write
    pub const RECONFIG_SETTLE_US: u64 = 500;

    /// Card model number searched for when no static bit file is given
    pub const CARD_MODEL: u32 = 0x505;
}

/// Virtual machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Number of cards in the pool
    pub cards: usize,
    /// Slots per card (1..=15)
    pub slots_per_card: u8,
    /// Control channel port
    pub control_port: u32,
    /// Reconfiguration channel port
    pub reconfig_port: u32,
    /// Input-A port of slot 0
    pub data_port_base: u32,
    /// Port distance between slots
    pub data_port_stride: u32,
    /// Settle delay after each image write, in microseconds
    pub reconfig_settle_us: u64,
    /// Model number used for card discovery
    pub card_model: u32,
    /// Static bit file loaded onto every card instead of discovery
    pub static_bitfile: Option<PathBuf>,
    /// Default deadline for `allocate`; `None` blocks until satisfied
    pub allocation_timeout_ms: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            cards: defaults::CARDS,
            slots_per_card: defaults::SLOTS_PER_CARD,
            control_port: defaults::CONTROL_PORT,
            reconfig_port: defaults::RECONFIG_PORT,
            data_port_base: defaults::DATA_PORT_BASE,
            data_port_stride: defaults::DATA_PORT_STRIDE,
            reconfig_settle_us: defaults::RECONFIG_SETTLE_US,
            card_model: defaults::CARD_MODEL,
            static_bitfile: None,
            allocation_timeout_ms: None,
        }
    }
}

impl VmConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| VmError::config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| VmError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Build a configuration from the defaults and environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `VAM_CARDS` - number of cards
    /// - `VAM_SLOTS_PER_CARD` - slots per card
    /// - `VAM_SETTLE_US` - reconfiguration settle delay
    /// - `VAM_BITFILE` - static bit file to load onto every card
    /// - `VAM_ALLOC_TIMEOUT_MS` - default allocation deadline
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(cards) = env_number::<usize>("VAM_CARDS")? {
            config.cards = cards;
        }
        if let Some(slots) = env_number::<u8>("VAM_SLOTS_PER_CARD")? {
            config.slots_per_card = slots;
        }
        if let Some(settle) = env_number::<u64>("VAM_SETTLE_US")? {
            config.reconfig_settle_us = settle;
        }
        if let Ok(path) = env::var("VAM_BITFILE") {
            if !path.trim().is_empty() {
                config.static_bitfile = Some(PathBuf::from(path));
            }
        }
        if let Some(timeout) = env_number::<u64>("VAM_ALLOC_TIMEOUT_MS")? {
            config.allocation_timeout_ms = Some(timeout);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for layouts the protocol cannot address
    pub fn validate(&self) -> Result<()> {
        if self.cards == 0 {
            return Err(VmError::config("at least one card is required"));
        }
        if self.slots_per_card == 0 || self.slots_per_card > MAX_SLOTS_PER_CARD {
            return Err(VmError::config(format!(
                "slots_per_card must be within 1..={MAX_SLOTS_PER_CARD}, got {}",
                self.slots_per_card
            )));
        }
        if self.control_port == self.reconfig_port {
            return Err(VmError::config("control and reconfiguration ports must differ"));
        }
        if self.data_port_stride < 3 {
            return Err(VmError::config("data_port_stride must leave room for three ports per slot"));
        }

        let last_slot = u32::from(self.slots_per_card - 1);
        let highest_port = self
            .data_port_stride
            .checked_mul(last_slot)
            .and_then(|offset| offset.checked_add(self.data_port_base))
            .and_then(|first| first.checked_add(2));
        if highest_port.is_none() {
            return Err(VmError::config(format!(
                "data ports overflow: base {} with stride {} cannot address {} slots",
                self.data_port_base, self.data_port_stride, self.slots_per_card
            )));
        }

        let layout = self.port_layout();
        for slot in 0..self.slots_per_card {
            for port in layout.ports_for(slot).all() {
                if port == self.control_port || port == self.reconfig_port {
                    return Err(VmError::config(format!(
                        "data port {port} of slot {slot} collides with a command port"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total number of nodes in the pool
    pub fn total_nodes(&self) -> usize {
        self.cards * self.slots_per_card as usize
    }

    /// Data port numbering scheme
    pub fn port_layout(&self) -> PortLayout {
        PortLayout::new(self.data_port_base, self.data_port_stride)
    }

    /// Settle delay after an image write
    pub fn settle_delay(&self) -> Duration {
        Duration::from_micros(self.reconfig_settle_us)
    }

    /// Default allocation deadline
    pub fn allocation_timeout(&self) -> Option<Duration> {
        self.allocation_timeout_ms.map(Duration::from_millis)
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| VmError::config(format!("{key}={value} is not a valid number"))),
        _ => Ok(None),
    }
}

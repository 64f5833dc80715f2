//! Card driver interface
//!
//! The runtime talks to hardware through a deliberately narrow surface:
//! open a stream on a numbered port, write bytes, read bytes, close.
//! Transfers report how many bytes actually moved; the runtime treats a
//! short transfer as an error.
//!
//! Provisioning is separate: a [`CardProvider`] finds a card by model or
//! programs one from a static bit file and hands back a driver.

pub mod sim;

use crate::config::VmConfig;
use crate::error::{Result, VmError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Result type for driver calls
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opaque stream handle issued by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub u32);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Driver status code with a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("driver error {code}: {message}")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub const INVALID_STREAM: i32 = -1;
    pub const INVALID_PORT: i32 = -2;
    pub const IO: i32 = -3;
    pub const TIMEOUT: i32 = -4;
    pub const SHORT_TRANSFER: i32 = -5;
    pub const NOT_FOUND: i32 = -6;
    pub const PROTOCOL: i32 = -7;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn short_transfer(expected: usize, actual: usize) -> Self {
        Self::new(
            Self::SHORT_TRANSFER,
            format!("transferred {actual} of {expected} bytes"),
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.code == Self::TIMEOUT
    }
}

/// Stream access to one card
///
/// Implementations must allow concurrent calls on distinct streams.
pub trait CardDriver: Send + Sync {
    /// Open a stream on `port`
    fn create_stream(&self, port: u32) -> DriverResult<StreamHandle>;

    /// Close a stream
    fn close_stream(&self, stream: StreamHandle) -> DriverResult<()>;

    /// Write bytes; returns the number of bytes accepted
    fn write_stream(&self, stream: StreamHandle, data: &[u8]) -> DriverResult<usize>;

    /// Read into `buf`; returns the number of bytes delivered
    fn read_stream(&self, stream: StreamHandle, buf: &mut [u8]) -> DriverResult<usize>;

    /// Human-readable card identity for logs
    fn describe(&self) -> String {
        "card".to_string()
    }
}

/// Whole-transfer helpers over [`CardDriver`]
pub trait CardDriverExt: CardDriver {
    /// Write all of `data` or fail with a short-transfer error
    fn write_all(&self, stream: StreamHandle, data: &[u8]) -> DriverResult<()> {
        let written = self.write_stream(stream, data)?;
        if written != data.len() {
            return Err(DriverError::short_transfer(data.len(), written));
        }
        Ok(())
    }

    /// Fill `buf` or fail with a short-transfer error
    fn read_exact(&self, stream: StreamHandle, buf: &mut [u8]) -> DriverResult<()> {
        let expected = buf.len();
        let read = self.read_stream(stream, buf)?;
        if read != expected {
            return Err(DriverError::short_transfer(expected, read));
        }
        Ok(())
    }
}

impl<T: CardDriver + ?Sized> CardDriverExt for T {}

/// Discovery criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardCriteria {
    pub model: u32,
}

/// Finds or programs cards
pub trait CardProvider {
    /// Next card matching `criteria`
    fn discover(&self, criteria: &CardCriteria) -> DriverResult<Arc<dyn CardDriver>>;

    /// Next card, programmed with the static bit file at `path`
    fn load_bitfile(&self, path: &Path) -> DriverResult<Arc<dyn CardDriver>>;
}

/// Acquire `config.cards` cards, by static bit file when one is configured
/// and by model discovery otherwise
pub fn connect_cards(provider: &dyn CardProvider, config: &VmConfig) -> Result<Vec<Arc<dyn CardDriver>>> {
    config.validate()?;

    let mut cards = Vec::with_capacity(config.cards);
    for card in 0..config.cards {
        let driver = match &config.static_bitfile {
            Some(path) => provider.load_bitfile(path),
            None => provider.discover(&CardCriteria {
                model: config.card_model,
            }),
        }
        .map_err(|source| VmError::CardProvisioning { card, source })?;

        tracing::info!(card, driver = %driver.describe(), "card connected");
        cards.push(driver);
    }
    Ok(cards)
}

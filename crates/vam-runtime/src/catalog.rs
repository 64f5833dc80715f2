//! Accelerator function types and the per-slot reconfiguration catalog
//!
//! Partial bitstreams are placement-specific: the image that turns slot 3
//! into a vector adder cannot be used on slot 4. The catalog therefore
//! keeps one image per (function, slot) pair. It is built once at startup
//! and then only read.

use crate::error::{Result, VmError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Accelerator personality a slot can be reconfigured into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum FunctionType {
    Nop = 0,
    VAdd = 1,
    VSub = 2,
    VReduce = 3,
    VMul = 4,
    VAddReduce = 5,
    VSubReduce = 6,
    AccMm = 7,
    AccMmm = 8,
    SqlEqu = 9,
    SqlSelect = 10,
    SqlAvg = 11,
    SqlLess = 12,
    SqlLarge = 13,
    A2Pb2 = 14,
    VApbb = 15,
    VAapb = 16,
}

impl FunctionType {
    /// All function types in code order
    pub const ALL: [Self; 17] = [
        Self::Nop,
        Self::VAdd,
        Self::VSub,
        Self::VReduce,
        Self::VMul,
        Self::VAddReduce,
        Self::VSubReduce,
        Self::AccMm,
        Self::AccMmm,
        Self::SqlEqu,
        Self::SqlSelect,
        Self::SqlAvg,
        Self::SqlLess,
        Self::SqlLarge,
        Self::A2Pb2,
        Self::VApbb,
        Self::VAapb,
    ];

    /// Numeric code
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Look a function up by code
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Lower-case name, also the stem of bitstream file names
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::VAdd => "vadd",
            Self::VSub => "vsub",
            Self::VReduce => "vreduce",
            Self::VMul => "vmul",
            Self::VAddReduce => "vaddreduce",
            Self::VSubReduce => "vsubreduce",
            Self::AccMm => "accmm",
            Self::AccMmm => "accmmm",
            Self::SqlEqu => "sqlequ",
            Self::SqlSelect => "sqlselect",
            Self::SqlAvg => "sqlavg",
            Self::SqlLess => "sqlless",
            Self::SqlLarge => "sqllarge",
            Self::A2Pb2 => "a2pb2",
            Self::VApbb => "vapbb",
            Self::VAapb => "vaapb",
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FunctionType {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| VmError::invalid_request(format!("unknown function type '{s}'")))
    }
}

/// Immutable partial bitstream
#[derive(Clone, PartialEq, Eq)]
pub struct Bitstream {
    image: Arc<[u8]>,
}

impl Bitstream {
    pub fn new(image: impl Into<Arc<[u8]>>) -> Self {
        Self { image: image.into() }
    }

    /// Image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

impl From<Vec<u8>> for Bitstream {
    fn from(image: Vec<u8>) -> Self {
        Self::new(image)
    }
}

impl fmt::Debug for Bitstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitstream").field("len", &self.image.len()).finish()
    }
}

/// Partial bitstreams indexed by function type and slot
#[derive(Debug, Clone, Default)]
pub struct ReconfigCatalog {
    images: BTreeMap<(FunctionType, u8), Bitstream>,
}

impl ReconfigCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the image for `function` on `slot`, replacing any previous one
    pub fn insert(&mut self, function: FunctionType, slot: u8, image: impl Into<Bitstream>) -> &mut Self {
        self.images.insert((function, slot), image.into());
        self
    }

    /// Image that reconfigures `slot` into `function`
    pub fn lookup(&self, function: FunctionType, slot: u8) -> Result<&Bitstream> {
        self.images
            .get(&(function, slot))
            .ok_or(VmError::CatalogMiss { function, slot })
    }

    pub fn contains(&self, function: FunctionType, slot: u8) -> bool {
        self.images.contains_key(&(function, slot))
    }

    /// Function types with at least one image
    pub fn functions(&self) -> Vec<FunctionType> {
        let mut functions: Vec<_> = self.images.keys().map(|(f, _)| *f).collect();
        functions.dedup();
        functions
    }

    /// Slots that have an image for `function`
    pub fn slots_for(&self, function: FunctionType) -> Vec<u8> {
        self.images
            .range((function, 0)..=(function, u8::MAX))
            .map(|((_, slot), _)| *slot)
            .collect()
    }

    /// Number of images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Load every `<name>_pr<slot+1>.bit` found in `dir` for slots `0..slots`
    ///
    /// Missing files are skipped; read errors are returned.
    pub fn from_directory(dir: impl AsRef<Path>, slots: u8) -> Result<Self> {
        let dir = dir.as_ref();
        let mut catalog = Self::new();

        for function in FunctionType::ALL {
            for slot in 0..slots {
                let path = dir.join(bitstream_file_name(function, slot));
                if !path.is_file() {
                    continue;
                }
                let image = std::fs::read(&path).map_err(|source| VmError::CatalogIo {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(%function, slot, bytes = image.len(), path = %path.display(), "loaded bitstream");
                catalog.insert(function, slot, image);
            }
        }

        tracing::info!(images = catalog.len(), dir = %dir.display(), "reconfiguration catalog loaded");
        Ok(catalog)
    }
}

/// File name of the image for `function` on `slot`
pub fn bitstream_file_name(function: FunctionType, slot: u8) -> String {
    format!("{}_pr{}.bit", function.name(), slot as u16 + 1)
}

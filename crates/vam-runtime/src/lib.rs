//! Virtual accelerator machine over a pool of reconfigurable card slots
//!
//! This crate provides:
//! - **Node Pool**: one record per (card, slot), guarded by a single pool lock
//! - **Virtual Machine**: allocate / free / load-function / bind-io / start / end
//! - **Reconfiguration Catalog**: per-slot partial bitstreams for every accelerator type
//! - **Card Driver Interface**: the narrow stream API the runtime consumes
//! - **Simulated Card**: an in-memory driver for tests and benchmarks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    VirtualMachine                        │
//! │  allocate · free · load_function · bind_io · start · end │
//! └─────────────┬─────────────────────────────┬─────────────┘
//!               │ pool lock                   │ no lock
//!               ▼                             ▼
//!   ┌───────────────────────┐     ┌───────────────────────┐
//!   │ control channel (50)  │     │ stream workers        │
//!   │ reconfig channel (100)│     │ in-A · in-B · out     │
//!   └───────────┬───────────┘     └───────────┬───────────┘
//!               └──────────────┬──────────────┘
//!                              ▼
//!               ┌───────────────────────────┐
//!               │   CardDriver (per card)    │
//!               └───────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use vam_runtime::driver::sim::{synthetic_catalog, SimCard};
//! use vam_runtime::{CardDriver, FunctionType, IoBuffer, VirtualMachine, VmConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VmConfig { cards: 1, slots_per_card: 2, ..VmConfig::default() };
//! let card: Arc<dyn CardDriver> = Arc::new(SimCard::from_config(0, &config));
//! let catalog = synthetic_catalog(config.slots_per_card, &[FunctionType::VAdd]);
//! let vm = VirtualMachine::init(vec![card], catalog, config)?;
//!
//! let nodes = vm.allocate(1)?;
//! vm.load_function(nodes[0], FunctionType::VAdd)?;
//!
//! let out = IoBuffer::zeroed(4);
//! vm.bind_io(nodes[0], Some(vec![1, 2, 3, 4].into()), Some(vec![5, 6, 7, 8].into()), out.clone(), 4)?;
//! vm.start(&nodes, 4, 4, 4)?;
//! assert_eq!(out.to_vec(), vec![6, 8, 10, 12]);
//!
//! vm.free(&nodes)?;
//! vm.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod catalog;
mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod node;
pub mod pool;
pub mod topology;
pub mod vm;
mod worker;

// Re-export public API
pub use buffer::IoBuffer;
pub use catalog::{Bitstream, FunctionType, ReconfigCatalog};
pub use config::VmConfig;
pub use driver::{connect_cards, CardCriteria, CardDriver, CardProvider, DriverError, StreamHandle};
pub use error::{Result, TransferOp, VmError};
pub use frame::{ControlFrame, FrameKind};
pub use node::{NodeHandle, NodeSnapshot, NodeState};
pub use pool::PoolReport;
pub use topology::{NodePorts, Port, PortKind, PortLayout, Tie, Topology};
pub use vm::{IoBinding, VirtualMachine};

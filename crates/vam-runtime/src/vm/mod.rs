//! The virtual machine: a pool of card slots exposed as allocatable nodes
//!
//! One lock guards the whole pool. Every control-channel exchange and every
//! reconfiguration runs under it, because the control and reconfiguration
//! ports of a card are shared by all of its slots. Data transfers run
//! outside the lock on dedicated worker threads.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vam_runtime::driver::sim::{synthetic_catalog, SimCard, SimProvider};
//! use vam_runtime::{FunctionType, VirtualMachine, VmConfig};
//!
//! # fn main() -> vam_runtime::Result<()> {
//! let config = VmConfig { cards: 2, slots_per_card: 2, reconfig_settle_us: 0, ..VmConfig::default() };
//! let provider = SimProvider::new((0..2).map(|id| Arc::new(SimCard::from_config(id, &config))));
//! let catalog = synthetic_catalog(2, &[FunctionType::VSub]);
//! let vm = VirtualMachine::connect(&provider, catalog, config)?;
//!
//! let nodes = vm.allocate(3)?;
//! assert_eq!(vm.busy_count(), 3);
//! vm.free(&nodes)?;
//! # Ok(())
//! # }
//! ```

mod allocation;
mod execute;
mod reconfigure;

pub use execute::IoBinding;

use crate::catalog::ReconfigCatalog;
use crate::config::VmConfig;
use crate::driver::{connect_cards, CardDriver, CardProvider, StreamHandle};
use crate::error::{Result, TransferOp, VmError};
use crate::node::{Node, NodeHandle, NodeSnapshot, NodeStreams};
use crate::pool::{NodePool, PoolReport};
use crate::topology::{NodePorts, Port};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Runtime over a fixed set of cards
pub struct VirtualMachine {
    cards: Vec<Arc<dyn CardDriver>>,
    catalog: ReconfigCatalog,
    config: VmConfig,
    pool: Mutex<NodePool>,
    available: Condvar,
    streams_open: bool,
}

impl VirtualMachine {
    /// Build the pool over already connected cards
    ///
    /// Opens the three data streams of every node; they stay open until
    /// [`VirtualMachine::shutdown`]. `cards[i]` becomes card `i`.
    #[instrument(skip_all, fields(cards = cards.len(), slots = config.slots_per_card))]
    pub fn init(cards: Vec<Arc<dyn CardDriver>>, catalog: ReconfigCatalog, config: VmConfig) -> Result<Self> {
        config.validate()?;
        if cards.len() != config.cards {
            return Err(VmError::config(format!(
                "configured for {} cards but {} were supplied",
                config.cards,
                cards.len()
            )));
        }

        let layout = config.port_layout();
        let mut nodes = Vec::with_capacity(config.total_nodes());
        for (index, card) in cards.iter().enumerate() {
            for slot in 0..config.slots_per_card {
                let handle = NodeHandle::new(index, slot);
                let ports = layout.ports_for(slot);
                match open_node_streams(card.as_ref(), handle, ports) {
                    Ok(streams) => nodes.push(Node::new(handle, ports, streams)),
                    Err(err) => {
                        for node in &nodes {
                            close_node_streams(cards[node.handle.card()].as_ref(), node);
                        }
                        return Err(err);
                    }
                }
            }
        }

        if catalog.is_empty() {
            warn!("reconfiguration catalog is empty; load_function will fail");
        }
        info!(nodes = nodes.len(), images = catalog.len(), "virtual machine initialised");

        Ok(Self {
            cards,
            catalog,
            pool: Mutex::new(NodePool::new(nodes, config.slots_per_card)),
            config,
            available: Condvar::new(),
            streams_open: true,
        })
    }

    /// Acquire cards from `provider` and build the pool over them
    pub fn connect(provider: &dyn CardProvider, catalog: ReconfigCatalog, config: VmConfig) -> Result<Self> {
        let cards = connect_cards(provider, &config)?;
        Self::init(cards, catalog, config)
    }

    /// Close every data stream
    ///
    /// Dropping the machine does the same but can only log failures.
    pub fn shutdown(mut self) -> Result<()> {
        self.close_streams()
    }

    fn close_streams(&mut self) -> Result<()> {
        if !self.streams_open {
            return Ok(());
        }
        self.streams_open = false;

        let mut first_error = None;
        for node in self.pool.get_mut().iter() {
            let card = self.cards[node.handle.card()].as_ref();
            for port in [Port::InputA, Port::InputB, Port::Output] {
                if let Err(source) = card.close_stream(node.streams.stream(port)) {
                    let err = VmError::HardwareIo {
                        node: node.handle,
                        op: TransferOp::CloseStream {
                            port: node.ports.port(port),
                        },
                        source,
                    };
                    warn!(error = %err, "failed to close data stream");
                    first_error.get_or_insert(err);
                }
            }
        }

        info!("virtual machine shut down");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn card(&self, node: NodeHandle) -> Result<&Arc<dyn CardDriver>> {
        self.cards.get(node.card()).ok_or(VmError::InvalidNodeHandle(node))
    }

    /// Snapshot of one node
    pub fn node(&self, handle: NodeHandle) -> Result<NodeSnapshot> {
        Ok(self.pool.lock().get(handle)?.snapshot())
    }

    /// Snapshot of every node
    pub fn report(&self) -> PoolReport {
        self.pool.lock().report()
    }

    pub fn busy_count(&self) -> usize {
        self.pool.lock().busy_count()
    }

    pub fn total_nodes(&self) -> usize {
        self.pool.lock().len()
    }

    /// Every node handle, card-major
    pub fn handles(&self) -> Vec<NodeHandle> {
        self.pool.lock().handles()
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ReconfigCatalog {
        &self.catalog
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        if let Err(err) = self.close_streams() {
            warn!(error = %err, "errors while closing streams on drop");
        }
    }
}

fn open_node_streams(card: &dyn CardDriver, node: NodeHandle, ports: NodePorts) -> Result<NodeStreams> {
    let open = |port: u32, opened: &[StreamHandle]| {
        card.create_stream(port).map_err(|source| {
            for stream in opened {
                let _ = card.close_stream(*stream);
            }
            VmError::HardwareIo {
                node,
                op: TransferOp::OpenStream { port },
                source,
            }
        })
    };

    let in_a = open(ports.in_a, &[])?;
    let in_b = open(ports.in_b, &[in_a])?;
    let out = open(ports.out, &[in_a, in_b])?;
    debug!(%node, in_a = ports.in_a, in_b = ports.in_b, out = ports.out, "data streams opened");
    Ok(NodeStreams { in_a, in_b, out })
}

fn close_node_streams(card: &dyn CardDriver, node: &Node) {
    for port in [Port::InputA, Port::InputB, Port::Output] {
        if let Err(err) = card.close_stream(node.streams.stream(port)) {
            warn!(node = %node.handle, %port, error = %err, "failed to close data stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimCard, SimEvent};

    fn config(cards: usize, slots: u8) -> VmConfig {
        VmConfig {
            cards,
            slots_per_card: slots,
            reconfig_settle_us: 0,
            ..VmConfig::default()
        }
    }

    #[test]
    fn test_init_opens_three_streams_per_node() {
        let config = config(1, 3);
        let card = Arc::new(SimCard::from_config(0, &config));
        let driver: Arc<dyn CardDriver> = card.clone();
        let vm = VirtualMachine::init(vec![driver], ReconfigCatalog::new(), config).unwrap();

        assert_eq!(vm.total_nodes(), 3);
        assert_eq!(card.open_streams(), 9);
        assert_eq!(
            vm.handles(),
            vec![NodeHandle::new(0, 0), NodeHandle::new(0, 1), NodeHandle::new(0, 2)]
        );

        vm.shutdown().unwrap();
        assert_eq!(card.open_streams(), 0);
    }

    #[test]
    fn test_drop_closes_streams() {
        let config = config(1, 1);
        let card = Arc::new(SimCard::from_config(0, &config));
        let driver: Arc<dyn CardDriver> = card.clone();
        drop(VirtualMachine::init(vec![driver], ReconfigCatalog::new(), config).unwrap());
        assert_eq!(card.open_streams(), 0);
    }

    #[test]
    fn test_init_rejects_card_count_mismatch() {
        let config = config(2, 1);
        let card: Arc<dyn CardDriver> = Arc::new(SimCard::from_config(0, &config));
        let err = VirtualMachine::init(vec![card], ReconfigCatalog::new(), config).err().unwrap();
        assert!(matches!(err, VmError::Config(_)));
    }

    #[test]
    fn test_failed_init_closes_what_it_opened() {
        let config = config(1, 2);
        // slot 1 ports do not exist on a single-slot card
        let card = Arc::new(SimCard::new(0, 1));
        let driver: Arc<dyn CardDriver> = card.clone();
        let err = VirtualMachine::init(vec![driver], ReconfigCatalog::new(), config)
            .err()
            .unwrap();

        assert!(matches!(
            err,
            VmError::HardwareIo {
                op: TransferOp::OpenStream { port: 21 },
                ..
            }
        ));
        assert_eq!(card.open_streams(), 0);
        let opened = card
            .events()
            .iter()
            .filter(|e| matches!(e, SimEvent::StreamOpened { .. }))
            .count();
        assert_eq!(opened, 3);
    }

    #[test]
    fn test_snapshot_of_unknown_node_is_rejected() {
        let config = config(1, 1);
        let card: Arc<dyn CardDriver> = Arc::new(SimCard::from_config(0, &config));
        let vm = VirtualMachine::init(vec![card], ReconfigCatalog::new(), config).unwrap();
        assert!(matches!(
            vm.node(NodeHandle::new(0, 5)),
            Err(VmError::InvalidNodeHandle(_))
        ));
        assert_eq!(vm.report().nodes.len(), 1);
    }
}

//! Node records

use crate::buffer::IoBuffer;
use crate::catalog::FunctionType;
use crate::driver::StreamHandle;
use crate::topology::{NodePorts, Port, Tie, Topology};
use std::fmt;

/// Caller-visible identifier of one (card, slot) node
///
/// Encoded as `card << 4 | slot`, so card 1 slot 3 is `0x13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub const fn new(card: usize, slot: u8) -> Self {
        Self(((card as u32) << 4) | (slot as u32 & 0xF))
    }

    /// Wrap a raw handle value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn card(self) -> usize {
        (self.0 >> 4) as usize
    }

    pub const fn slot(self) -> u8 {
        (self.0 & 0xF) as u8
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Allocation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Free,
    Busy,
}

/// Data streams opened for a node at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeStreams {
    pub in_a: StreamHandle,
    pub in_b: StreamHandle,
    pub out: StreamHandle,
}

impl NodeStreams {
    pub fn stream(&self, port: Port) -> StreamHandle {
        match port {
            Port::InputA => self.in_a,
            Port::InputB => self.in_b,
            Port::Output => self.out,
        }
    }
}

/// One slot of one card
#[derive(Debug)]
pub(crate) struct Node {
    pub handle: NodeHandle,
    pub state: NodeState,
    pub loaded_function: Option<FunctionType>,
    pub topology: Option<Topology>,
    pub in1: Option<IoBuffer>,
    pub in2: Option<IoBuffer>,
    pub out: Option<IoBuffer>,
    pub tie_in1: Tie,
    pub tie_in2: Tie,
    pub tie_out: Tie,
    pub transfer_size: u32,
    pub pending_command: u32,
    pub ports: NodePorts,
    pub streams: NodeStreams,
}

impl Node {
    pub fn new(handle: NodeHandle, ports: NodePorts, streams: NodeStreams) -> Self {
        Self {
            handle,
            state: NodeState::Free,
            loaded_function: None,
            topology: None,
            in1: None,
            in2: None,
            out: None,
            tie_in1: Tie::External,
            tie_in2: Tie::External,
            tie_out: Tie::External,
            transfer_size: 0,
            pending_command: 0,
            ports,
            streams,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state == NodeState::Busy
    }

    /// Return the node to the free pool
    ///
    /// Buffer references are dropped. The loaded personality stays, so the
    /// next user may skip reconfiguration.
    ///
    /// Returns whether a runtime-owned output (register output tied
    /// internally) was released. [`VirtualMachine::bind`] only accepts
    /// all-buffer topologies and ties every port externally, so this is
    /// always `false` for nodes bound through the public API.
    ///
    /// [`VirtualMachine::bind`]: crate::vm::VirtualMachine::bind
    pub fn release(&mut self) -> bool {
        let owned_output = self.tie_out == Tie::Internal
            && self.topology.is_some_and(Topology::output_is_register)
            && self.out.is_some();

        self.state = NodeState::Free;
        self.in1 = None;
        self.in2 = None;
        self.out = None;
        self.tie_in1 = Tie::External;
        self.tie_in2 = Tie::External;
        self.tie_out = Tie::External;
        self.topology = None;
        owned_output
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            handle: self.handle,
            state: self.state,
            loaded_function: self.loaded_function,
            topology: self.topology,
            transfer_size: self.transfer_size,
            pending_command: self.pending_command,
            in1_len: self.in1.as_ref().map(IoBuffer::len),
            in2_len: self.in2.as_ref().map(IoBuffer::len),
            out_len: self.out.as_ref().map(IoBuffer::len),
            ports: self.ports,
        }
    }
}

/// Point-in-time copy of a node record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub handle: NodeHandle,
    pub state: NodeState,
    pub loaded_function: Option<FunctionType>,
    pub topology: Option<Topology>,
    pub transfer_size: u32,
    pub pending_command: u32,
    pub in1_len: Option<usize>,
    pub in2_len: Option<usize>,
    pub out_len: Option<usize>,
    pub ports: NodePorts,
}

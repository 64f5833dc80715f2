//! Error types for virtual machine operations

use crate::catalog::FunctionType;
use crate::driver::DriverError;
use crate::frame::FrameKind;
use crate::node::NodeHandle;
use crate::topology::{Port, Topology};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for virtual machine operations
pub type Result<T> = std::result::Result<T, VmError>;

/// The protocol step a hardware error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    /// Opening a stream on a card port
    OpenStream { port: u32 },
    /// Closing a stream on a card port
    CloseStream { port: u32 },
    /// Writing a control frame
    ControlWrite(FrameKind),
    /// Reading a response frame from the control channel
    ControlRead,
    /// Streaming a partial bitstream to the reconfiguration channel
    ImageWrite,
    /// Writing the first input buffer
    WriteInput1,
    /// Writing the second input buffer
    WriteInput2,
    /// Reading the output buffer
    ReadOutput,
}

impl TransferOp {
    /// Short label used in logs and transfer events
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenStream { .. } => "open_stream",
            Self::CloseStream { .. } => "close_stream",
            Self::ControlWrite(_) => "control_write",
            Self::ControlRead => "control_read",
            Self::ImageWrite => "image",
            Self::WriteInput1 => "write_in1",
            Self::WriteInput2 => "write_in2",
            Self::ReadOutput => "read_out",
        }
    }
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenStream { port } => write!(f, "open stream on port {port}"),
            Self::CloseStream { port } => write!(f, "close stream on port {port}"),
            Self::ControlWrite(kind) => write!(f, "{kind} frame write"),
            Self::ControlRead => f.write_str("control response read"),
            Self::ImageWrite => f.write_str("bitstream write"),
            Self::WriteInput1 => f.write_str("input-1 write"),
            Self::WriteInput2 => f.write_str("input-2 write"),
            Self::ReadOutput => f.write_str("output read"),
        }
    }
}

/// Errors that can occur while driving the node pool
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// A stream operation against a card failed
    #[error("{op} failed on node {node}: {source}")]
    HardwareIo {
        node: NodeHandle,
        op: TransferOp,
        #[source]
        source: DriverError,
    },

    /// Discovering or programming a card failed
    #[error("card {card} could not be provisioned: {source}")]
    CardProvisioning {
        card: usize,
        #[source]
        source: DriverError,
    },

    /// The catalog has no image for the function on this slot
    #[error("no reconfiguration image for {function} on slot {slot}")]
    CatalogMiss { function: FunctionType, slot: u8 },

    /// Reading catalog images from disk failed
    #[error("failed to read bitstream {path}: {source}")]
    CatalogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Handle does not name a node of this pool
    #[error("invalid node handle: {0}")]
    InvalidNodeHandle(NodeHandle),

    /// Operation needs an allocated (Busy) node
    #[error("node {0} is not allocated")]
    NodeNotAllocated(NodeHandle),

    /// `start`/`end` on a node that was never bound
    #[error("node {0} has no bound topology")]
    TopologyUnset(NodeHandle),

    /// Topology variant without a protocol implementation
    #[error("topology {topology} is not supported yet (node {node})")]
    UnsupportedTopology { node: NodeHandle, topology: Topology },

    /// Bound buffer is shorter than the requested transfer
    #[error("{port} buffer of node {node} holds {available} items, transfer needs {requested}")]
    BufferTooSmall {
        node: NodeHandle,
        port: Port,
        requested: usize,
        available: usize,
    },

    /// Malformed request (empty batch, zero count, duplicate handles)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request can never be satisfied by this pool
    #[error("requested {requested} nodes but the pool only has {capacity}")]
    ResourceExhausted { requested: usize, capacity: usize },

    /// Allocation gave up at its deadline
    #[error("allocation timed out after {waited:?}: obtained {obtained} of {requested} nodes")]
    AllocationTimeout {
        requested: usize,
        obtained: usize,
        waited: Duration,
    },

    /// A stream worker thread panicked
    #[error("stream worker for {op} on node {node} panicked")]
    WorkerPanicked { node: NodeHandle, op: TransferOp },

    /// Invalid runtime configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl VmError {
    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Adapter for `map_err` on driver results
    pub(crate) fn hardware(node: NodeHandle, op: TransferOp) -> impl FnOnce(DriverError) -> Self {
        move |source| Self::HardwareIo { node, op, source }
    }

    /// Node the error is about, if any
    pub fn node(&self) -> Option<NodeHandle> {
        match self {
            Self::HardwareIo { node, .. }
            | Self::UnsupportedTopology { node, .. }
            | Self::BufferTooSmall { node, .. }
            | Self::WorkerPanicked { node, .. } => Some(*node),
            Self::InvalidNodeHandle(node) | Self::NodeNotAllocated(node) | Self::TopologyUnset(node) => Some(*node),
            _ => None,
        }
    }

    /// Whether the error came from the hardware rather than from misuse
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::HardwareIo { .. } | Self::CardProvisioning { .. })
    }
}

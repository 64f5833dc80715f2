//! Short-lived command channels
//!
//! The control and reconfiguration ports are shared by every slot of a
//! card, so a channel is opened per command sequence and closed right
//! after, always while the pool lock is held. The `&NodePool` argument of
//! [`CardChannel::open`] can only be produced from the locked pool.

use crate::driver::{CardDriver, CardDriverExt, StreamHandle};
use crate::error::{Result, TransferOp, VmError};
use crate::frame::{ControlFrame, FRAME_BYTES};
use crate::node::NodeHandle;
use crate::pool::NodePool;
use tracing::{trace, warn};

/// Open stream on a card's control or reconfiguration port
///
/// Closed on every path: explicitly through [`CardChannel::close`] or on
/// drop when an error unwinds the command sequence.
pub(crate) struct CardChannel<'a> {
    card: &'a dyn CardDriver,
    stream: StreamHandle,
    port: u32,
    node: NodeHandle,
    open: bool,
}

impl<'a> CardChannel<'a> {
    pub fn open(_locked: &NodePool, card: &'a dyn CardDriver, port: u32, node: NodeHandle) -> Result<Self> {
        let stream = card
            .create_stream(port)
            .map_err(VmError::hardware(node, TransferOp::OpenStream { port }))?;
        trace!(%node, port, %stream, "channel opened");
        Ok(Self {
            card,
            stream,
            port,
            node,
            open: true,
        })
    }

    /// Write one control frame
    pub fn send(&self, frame: &ControlFrame) -> Result<()> {
        let kind = frame
            .kind()
            .ok_or_else(|| VmError::invalid_request(format!("unrecognised control frame {frame:?}")))?;
        self.card
            .write_all(self.stream, frame.as_bytes())
            .map_err(VmError::hardware(self.node, TransferOp::ControlWrite(kind)))?;
        trace!(node = %self.node, ?frame, "control frame sent");
        Ok(())
    }

    /// Read one response frame
    pub fn receive(&self) -> Result<ControlFrame> {
        let mut bytes = [0u8; FRAME_BYTES];
        self.card
            .read_exact(self.stream, &mut bytes)
            .map_err(VmError::hardware(self.node, TransferOp::ControlRead))?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Stream raw bytes, used for partial bitstreams
    pub fn write_bytes(&self, bytes: &[u8], op: TransferOp) -> Result<()> {
        self.card
            .write_all(self.stream, bytes)
            .map_err(VmError::hardware(self.node, op))
    }

    /// Close the stream, reporting a failure
    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.card
            .close_stream(self.stream)
            .map_err(VmError::hardware(self.node, TransferOp::CloseStream { port: self.port }))
    }
}

impl Drop for CardChannel<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(err) = self.card.close_stream(self.stream) {
            warn!(node = %self.node, port = self.port, error = %err, "failed to close channel");
        }
    }
}

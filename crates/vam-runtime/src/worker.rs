//! Data stream workers
//!
//! Each bound data port of a node is served by one blocking transfer. A
//! batch runs every transfer on its own scoped thread so that a node's
//! output read can block while the inputs of that and other nodes are
//! still streaming. Workers never touch the pool lock.

use crate::buffer::IoBuffer;
use crate::driver::{CardDriver, CardDriverExt, StreamHandle};
use crate::error::{Result, TransferOp, VmError};
use crate::node::NodeHandle;
use crate::topology::Port;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{trace, warn};
use vam_tracing::performance::record_transfer;

/// One blocking transfer between a host buffer and a node data port
pub(crate) struct StreamJob {
    node: NodeHandle,
    port: Port,
    card: Arc<dyn CardDriver>,
    stream: StreamHandle,
    buffer: IoBuffer,
    items: usize,
}

impl StreamJob {
    pub fn new(
        node: NodeHandle,
        port: Port,
        card: Arc<dyn CardDriver>,
        stream: StreamHandle,
        buffer: IoBuffer,
        items: usize,
    ) -> Self {
        Self {
            node,
            port,
            card,
            stream,
            buffer,
            items,
        }
    }

    pub fn node(&self) -> NodeHandle {
        self.node
    }

    pub fn op(&self) -> TransferOp {
        match self.port {
            Port::InputA => TransferOp::WriteInput1,
            Port::InputB => TransferOp::WriteInput2,
            Port::Output => TransferOp::ReadOutput,
        }
    }

    /// Move `items` 32-bit words, writing inputs and reading the output
    pub fn run(self) -> Result<()> {
        let op = self.op();
        let started = Instant::now();

        let mut data = self.buffer.lock();
        let available = data.len();
        let items = data.get_mut(..self.items).ok_or(VmError::BufferTooSmall {
            node: self.node,
            port: self.port,
            requested: self.items,
            available,
        })?;

        let result = match self.port {
            Port::Output => self.card.read_exact(self.stream, bytemuck::cast_slice_mut(items)),
            Port::InputA | Port::InputB => self.card.write_all(self.stream, bytemuck::cast_slice(items)),
        };
        result.map_err(VmError::hardware(self.node, op))?;

        let bytes = self.items * std::mem::size_of::<i32>();
        let elapsed_us = started.elapsed().as_micros() as u64;
        trace!(node = %self.node, %op, bytes, elapsed_us, "stream transfer complete");
        record_transfer(op.label(), bytes, elapsed_us);
        Ok(())
    }
}

/// Transfers of one node within a batch
pub(crate) struct NodeTransfers {
    pub writes: Vec<StreamJob>,
    pub read: StreamJob,
}

/// Run every transfer concurrently and wait for all of them
///
/// Writers are joined before readers, each in node order. All workers are
/// joined even after a failure; the first failure in join order is
/// returned.
pub(crate) fn run_batch(batch: Vec<NodeTransfers>) -> Result<()> {
    thread::scope(|scope| {
        let mut writers = Vec::new();
        let mut readers = Vec::with_capacity(batch.len());

        for transfers in batch {
            for job in transfers.writes {
                let (node, op) = (job.node(), job.op());
                writers.push((node, op, scope.spawn(move || job.run())));
            }
            let job = transfers.read;
            let (node, op) = (job.node(), job.op());
            readers.push((node, op, scope.spawn(move || job.run())));
        }

        let mut first_error = None;
        for (node, op, handle) in writers.into_iter().chain(readers) {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(VmError::WorkerPanicked { node, op }));
            if let Err(err) = outcome {
                warn!(%node, %op, error = %err, "stream worker failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

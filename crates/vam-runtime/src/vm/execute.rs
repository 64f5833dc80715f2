//! I/O binding and batch execution

use super::allocation::ensure_distinct;
use super::VirtualMachine;
use crate::buffer::IoBuffer;
use crate::channel::CardChannel;
use crate::error::{Result, VmError};
use crate::frame::ControlFrame;
use crate::node::{Node, NodeHandle};
use crate::pool::NodePool;
use crate::topology::{Port, Tie, Topology};
use crate::worker::{self, NodeTransfers, StreamJob};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, trace};
use vam_tracing::performance::record_batch;

/// Buffers and transfer size attached to a node
#[derive(Debug, Clone)]
pub struct IoBinding {
    pub topology: Topology,
    pub in1: Option<IoBuffer>,
    pub in2: Option<IoBuffer>,
    pub out: IoBuffer,
    pub transfer_size: u32,
}

impl IoBinding {
    /// All-buffer binding
    pub fn buffers(in1: Option<IoBuffer>, in2: Option<IoBuffer>, out: IoBuffer, transfer_size: u32) -> Self {
        Self {
            topology: Topology::BufBufBuf,
            in1,
            in2,
            out,
            transfer_size,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
}

impl VirtualMachine {
    /// Attach caller buffers to `node` with the all-buffer topology
    ///
    /// Both inputs may share one buffer. The output may not share a buffer
    /// with either input: its stream worker holds the buffer for the whole
    /// read, which would block the input it depends on.
    pub fn bind_io(
        &self,
        node: NodeHandle,
        in1: Option<IoBuffer>,
        in2: Option<IoBuffer>,
        out: IoBuffer,
        transfer_size: u32,
    ) -> Result<()> {
        self.bind(node, IoBinding::buffers(in1, in2, out, transfer_size))
    }

    /// Attach buffers to `node` and announce the transfer size to its slot
    ///
    /// The record is only updated once the tie-io frame was accepted.
    /// Rejects an output buffer aliasing an input before any frame is sent.
    #[instrument(skip_all, fields(node = %node, topology = %binding.topology, size = binding.transfer_size))]
    pub fn bind(&self, node: NodeHandle, binding: IoBinding) -> Result<()> {
        let mut pool = self.pool.lock();
        let card = self.card(node)?;
        pool.busy(node)?;
        if !binding.topology.is_supported() {
            return Err(VmError::UnsupportedTopology {
                node,
                topology: binding.topology,
            });
        }
        let aliased = [&binding.in1, &binding.in2]
            .into_iter()
            .flatten()
            .any(|input| input.ptr_eq(&binding.out));
        if aliased {
            return Err(VmError::invalid_request(format!(
                "output buffer of {node} aliases one of its inputs"
            )));
        }

        let frame = ControlFrame::tie_io(node.slot(), binding.transfer_size);
        let control = CardChannel::open(&pool, card.as_ref(), self.config.control_port, node)?;
        control.send(&frame)?;
        control.close()?;

        let record = pool.busy_mut(node)?;
        record.topology = Some(binding.topology);
        record.in1 = binding.in1;
        record.in2 = binding.in2;
        record.out = Some(binding.out);
        record.tie_in1 = Tie::External;
        record.tie_in2 = Tie::External;
        record.tie_out = Tie::External;
        record.transfer_size = binding.transfer_size;
        record.pending_command = frame.command_word();
        debug!("node bound");
        Ok(())
    }

    /// Run one batch on `nodes`
    ///
    /// Every node is validated before anything is sent. Go frames then
    /// reach each node in order under the pool lock, after which the data
    /// of all nodes moves concurrently. The batch completes with one
    /// acknowledgement read from the last node's card.
    ///
    /// Go frames are not rolled back: if one cannot be delivered, the nodes
    /// before it have already started a run and no data moves for any node.
    /// The next `start` on those nodes issues fresh go frames.
    #[instrument(skip(self), level = "debug")]
    pub fn start(&self, nodes: &[NodeHandle], size_in1: usize, size_in2: usize, size_out: usize) -> Result<()> {
        let started = Instant::now();
        let last = *nodes
            .last()
            .ok_or_else(|| VmError::invalid_request("start needs at least one node"))?;
        ensure_distinct(nodes)?;

        let batch = {
            let pool = self.pool.lock();
            nodes
                .iter()
                .map(|&node| self.plan_transfers(&pool, node, size_in1, size_in2, size_out))
                .collect::<Result<Vec<_>>>()?
        };

        for &node in nodes {
            self.send_go(node)?;
        }

        worker::run_batch(batch)?;

        let ack = self.read_ack(last)?;
        debug!(?ack, "batch acknowledged");
        record_batch("start", nodes.len(), started.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Drain results without a new run: read each node's output and its
    /// acknowledgement, one node after another
    #[instrument(skip(self), level = "debug")]
    pub fn end(&self, nodes: &[NodeHandle], size_out: usize) -> Result<()> {
        let started = Instant::now();
        if nodes.is_empty() {
            return Err(VmError::invalid_request("end needs at least one node"));
        }
        ensure_distinct(nodes)?;

        let reads = {
            let pool = self.pool.lock();
            nodes
                .iter()
                .map(|&node| {
                    let record = runnable(&pool, node)?;
                    self.stream_job(record, Port::Output, size_out)
                })
                .collect::<Result<Vec<_>>>()?
        };

        for job in reads {
            let node = job.node();
            job.run()?;
            let ack = self.read_ack(node)?;
            trace!(%node, ?ack, "node drained");
        }

        record_batch("end", nodes.len(), started.elapsed().as_micros() as u64);
        Ok(())
    }

    fn plan_transfers(
        &self,
        pool: &NodePool,
        node: NodeHandle,
        size_in1: usize,
        size_in2: usize,
        size_out: usize,
    ) -> Result<NodeTransfers> {
        let record = runnable(pool, node)?;

        let mut writes = Vec::with_capacity(2);
        if record.in1.is_some() {
            writes.push(self.stream_job(record, Port::InputA, size_in1)?);
        }
        if record.in2.is_some() {
            writes.push(self.stream_job(record, Port::InputB, size_in2)?);
        }
        let read = self.stream_job(record, Port::Output, size_out)?;

        Ok(NodeTransfers { writes, read })
    }

    fn stream_job(&self, record: &Node, port: Port, items: usize) -> Result<StreamJob> {
        let node = record.handle;
        let buffer = match port {
            Port::InputA => record.in1.as_ref(),
            Port::InputB => record.in2.as_ref(),
            Port::Output => record.out.as_ref(),
        }
        .ok_or(VmError::TopologyUnset(node))?;

        let available = buffer.len();
        if available < items {
            return Err(VmError::BufferTooSmall {
                node,
                port,
                requested: items,
                available,
            });
        }

        Ok(StreamJob::new(
            node,
            port,
            Arc::clone(self.card(node)?),
            record.streams.stream(port),
            buffer.clone(),
            items,
        ))
    }

    fn send_go(&self, node: NodeHandle) -> Result<()> {
        let mut pool = self.pool.lock();
        let card = self.card(node)?;
        pool.busy(node)?;

        let frame = ControlFrame::go(node.slot());
        let control = CardChannel::open(&pool, card.as_ref(), self.config.control_port, node)?;
        control.send(&frame)?;
        control.close()?;

        pool.get_mut(node)?.pending_command = frame.command_word();
        Ok(())
    }

    fn read_ack(&self, node: NodeHandle) -> Result<ControlFrame> {
        let pool = self.pool.lock();
        let card = self.card(node)?;
        let control = CardChannel::open(&pool, card.as_ref(), self.config.control_port, node)?;
        let ack = control.receive()?;
        control.close()?;
        Ok(ack)
    }
}

/// Allocated node with a supported topology
fn runnable(pool: &NodePool, node: NodeHandle) -> Result<&Node> {
    let record = pool.busy(node)?;
    let topology = record.topology.ok_or(VmError::TopologyUnset(node))?;
    if !topology.is_supported() {
        return Err(VmError::UnsupportedTopology { node, topology });
    }
    Ok(record)
}

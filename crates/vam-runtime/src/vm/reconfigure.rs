//! Partial reconfiguration

use super::VirtualMachine;
use crate::catalog::{Bitstream, FunctionType};
use crate::channel::CardChannel;
use crate::driver::CardDriver;
use crate::error::{Result, TransferOp};
use crate::frame::ControlFrame;
use crate::node::NodeHandle;
use crate::pool::NodePool;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use vam_tracing::{perf_event, perf_span};
use vam_tracing::performance::record_transfer;

impl VirtualMachine {
    /// Give `node` the `function` personality
    ///
    /// Always brackets the slot with PR-begin / PR-end on the control
    /// channel. The bitstream itself is only streamed when the slot holds a
    /// different function, so repeated loads of the same function are
    /// cheap. A missing catalog entry is reported before any frame is sent.
    /// When the image write fails, PR-end is still attempted and the slot
    /// keeps its previous function.
    #[instrument(skip_all, fields(node = %node, function = %function))]
    pub fn load_function(&self, node: NodeHandle, function: FunctionType) -> Result<()> {
        let _perf = perf_span!("load_function", slot = node.slot());
        let slot = node.slot();

        let mut pool = self.pool.lock();
        let card = self.card(node)?;
        let previous = pool.busy(node)?.loaded_function;
        let image = match previous {
            Some(loaded) if loaded == function => None,
            _ => Some(self.catalog.lookup(function, slot)?),
        };

        let control = CardChannel::open(&pool, card.as_ref(), self.config.control_port, node)?;
        control.send(&ControlFrame::pr_begin(slot))?;

        match image {
            Some(image) => {
                if let Err(err) = self.write_image(&pool, card.as_ref(), node, image) {
                    // leave PR mode so the static region keeps running
                    if let Err(end_err) = control.send(&ControlFrame::pr_end(slot)) {
                        warn!(error = %end_err, "PR-end after failed image write was not delivered");
                    }
                    return Err(err);
                }
                pool.get_mut(node)?.loaded_function = Some(function);
                info!(?previous, bytes = image.len(), "slot reconfigured");
            }
            None => debug!("function already loaded, bitstream skipped"),
        }

        let end = ControlFrame::pr_end(slot);
        control.send(&end)?;
        pool.get_mut(node)?.pending_command = end.command_word();
        control.close()
    }

    /// Stream `image` into the reconfiguration port and let the fabric settle
    fn write_image(&self, locked: &NodePool, card: &dyn CardDriver, node: NodeHandle, image: &Bitstream) -> Result<()> {
        let started = Instant::now();

        let channel = CardChannel::open(locked, card, self.config.reconfig_port, node)?;
        channel.write_bytes(image.bytes(), TransferOp::ImageWrite)?;
        thread::sleep(self.config.settle_delay());
        channel.close()?;

        let elapsed_us = started.elapsed().as_micros() as u64;
        record_transfer(TransferOp::ImageWrite.label(), image.len(), elapsed_us);
        perf_event!("slot_reconfigured", slot = node.slot(), image_bytes = image.len(), elapsed_us = elapsed_us);
        Ok(())
    }
}

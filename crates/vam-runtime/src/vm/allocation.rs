//! Node allocation and release

use super::VirtualMachine;
use crate::error::{Result, VmError};
use crate::node::{NodeHandle, NodeState};
use parking_lot::MutexGuard;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace, warn};

impl VirtualMachine {
    /// Claim `count` nodes, blocking until enough are free
    ///
    /// Nodes are claimed one at a time in index order and kept while the
    /// caller waits for the rest. The configured allocation timeout, if
    /// any, applies.
    pub fn allocate(&self, count: usize) -> Result<Vec<NodeHandle>> {
        self.allocate_within(count, self.config.allocation_timeout())
    }

    /// Like [`VirtualMachine::allocate`] but gives up after `timeout`,
    /// returning every node it had claimed so far to the pool
    pub fn allocate_timeout(&self, count: usize, timeout: Duration) -> Result<Vec<NodeHandle>> {
        self.allocate_within(count, Some(timeout))
    }

    #[instrument(skip(self), level = "debug")]
    fn allocate_within(&self, count: usize, timeout: Option<Duration>) -> Result<Vec<NodeHandle>> {
        if count == 0 {
            return Err(VmError::invalid_request("cannot allocate zero nodes"));
        }

        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut claimed = Vec::with_capacity(count);

        let mut pool = self.pool.lock();
        if count > pool.len() {
            return Err(VmError::ResourceExhausted {
                requested: count,
                capacity: pool.len(),
            });
        }

        while claimed.len() < count {
            if let Some(handle) = pool.claim_first_free() {
                trace!(%handle, "node claimed");
                claimed.push(handle);
                if claimed.len() < count {
                    // let frees and other allocators in between claims
                    MutexGuard::bump(&mut pool);
                }
                continue;
            }

            match deadline {
                None => self.available.wait(&mut pool),
                Some(deadline) => {
                    let timed_out = self.available.wait_until(&mut pool, deadline).timed_out();
                    if timed_out && !pool.has_free() {
                        for &handle in &claimed {
                            pool.unclaim(handle);
                        }
                        drop(pool);
                        if !claimed.is_empty() {
                            self.available.notify_all();
                        }
                        warn!(requested = count, obtained = claimed.len(), "allocation timed out");
                        return Err(VmError::AllocationTimeout {
                            requested: count,
                            obtained: claimed.len(),
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }

        debug!(nodes = ?claimed, waited_us = started.elapsed().as_micros() as u64, "nodes allocated");
        Ok(claimed)
    }

    /// Return nodes to the pool
    ///
    /// The whole batch is validated first; on error no node changes state.
    /// Loaded functions stay on the released slots.
    #[instrument(skip(self), level = "debug")]
    pub fn free(&self, nodes: &[NodeHandle]) -> Result<()> {
        ensure_distinct(nodes)?;

        let mut pool = self.pool.lock();
        for &handle in nodes {
            if pool.get(handle)?.state != NodeState::Busy {
                return Err(VmError::NodeNotAllocated(handle));
            }
        }

        for &handle in nodes {
            let node = pool.get_mut(handle)?;
            if node.release() {
                debug!(%handle, "runtime-owned output buffer released");
            }
        }
        drop(pool);

        self.available.notify_all();
        debug!(count = nodes.len(), "nodes freed");
        Ok(())
    }
}

/// Reject batches naming a node twice
pub(super) fn ensure_distinct(nodes: &[NodeHandle]) -> Result<()> {
    let mut seen = HashSet::with_capacity(nodes.len());
    match nodes.iter().find(|node| !seen.insert(**node)) {
        Some(duplicate) => Err(VmError::invalid_request(format!("node {duplicate} appears twice in the batch"))),
        None => Ok(()),
    }
}

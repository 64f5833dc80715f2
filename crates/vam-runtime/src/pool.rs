//! Node pool: every (card, slot) record behind the virtual machine's lock

use crate::error::{Result, VmError};
use crate::node::{Node, NodeHandle, NodeSnapshot, NodeState};
use std::fmt;

/// Fixed table of nodes, card-major
///
/// Node `i` sits on card `i / slots_per_card`, slot `i % slots_per_card`.
#[derive(Debug)]
pub(crate) struct NodePool {
    nodes: Vec<Node>,
    slots_per_card: u8,
}

impl NodePool {
    pub fn new(nodes: Vec<Node>, slots_per_card: u8) -> Self {
        Self { nodes, slots_per_card }
    }

    fn index_of(&self, handle: NodeHandle) -> Option<usize> {
        if handle.slot() >= self.slots_per_card {
            return None;
        }
        let index = handle.card() * self.slots_per_card as usize + handle.slot() as usize;
        (index < self.nodes.len() && self.nodes[index].handle == handle).then_some(index)
    }

    pub fn get(&self, handle: NodeHandle) -> Result<&Node> {
        self.index_of(handle)
            .map(|i| &self.nodes[i])
            .ok_or(VmError::InvalidNodeHandle(handle))
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        let index = self.index_of(handle).ok_or(VmError::InvalidNodeHandle(handle))?;
        Ok(&mut self.nodes[index])
    }

    /// Node that must currently be allocated
    pub fn busy(&self, handle: NodeHandle) -> Result<&Node> {
        let node = self.get(handle)?;
        if !node.is_busy() {
            return Err(VmError::NodeNotAllocated(handle));
        }
        Ok(node)
    }

    pub fn busy_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        let node = self.get_mut(handle)?;
        if !node.is_busy() {
            return Err(VmError::NodeNotAllocated(handle));
        }
        Ok(node)
    }

    /// Mark the lowest-index free node busy
    pub fn claim_first_free(&mut self) -> Option<NodeHandle> {
        let node = self.nodes.iter_mut().find(|n| n.state == NodeState::Free)?;
        node.state = NodeState::Busy;
        Some(node.handle)
    }

    /// Undo a claim that never reached the caller
    pub fn unclaim(&mut self, handle: NodeHandle) {
        if let Ok(node) = self.get_mut(handle) {
            node.state = NodeState::Free;
        }
    }

    pub fn has_free(&self) -> bool {
        self.nodes.iter().any(|n| n.state == NodeState::Free)
    }

    pub fn busy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_busy()).count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn handles(&self) -> Vec<NodeHandle> {
        self.nodes.iter().map(|n| n.handle).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn report(&self) -> PoolReport {
        PoolReport {
            nodes: self.nodes.iter().map(Node::snapshot).collect(),
        }
    }
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    pub nodes: Vec<NodeSnapshot>,
}

impl PoolReport {
    pub fn busy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.state == NodeState::Busy).count()
    }

    pub fn free_count(&self) -> usize {
        self.nodes.len() - self.busy_count()
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} nodes, {} busy, {} free",
            self.nodes.len(),
            self.busy_count(),
            self.free_count()
        )?;
        for node in &self.nodes {
            let function = node.loaded_function.map_or("-", |f| f.name());
            let topology = node.topology.map_or_else(|| "-".to_string(), |t| t.to_string());
            writeln!(
                f,
                "  {:<6} {:<5} fn={:<11} topo={:<11} size={}",
                node.handle.to_string(),
                format!("{:?}", node.state),
                function,
                topology,
                node.transfer_size
            )?;
        }
        Ok(())
    }
}

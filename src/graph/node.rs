//! The runtime graph vertex: one role tag plus a uniform record of
//! optional buffer ids, links and rendezvous state.

use std::sync::{Condvar, Mutex};

use crate::functions::{Activation, Convergence, Loss};
use crate::types::{AstId, BufferId, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Layer,
    Output,
    Divergent,
    Convergent,
}

/// Where a node's backward pass finds the gradient flowing into it from
/// downstream. Dense downstreams require a transposed-weight multiply at
/// traversal time; convergent and divergent downstreams expose a buffer
/// that is already split or summed.
#[derive(Debug, Clone, Copy)]
pub enum IncomingGradient {
    Unset,
    Dense(NodeRef),
    Buffer(BufferId),
}

/// Flags exchanged between executor threads, guarded by the node mutex.
#[derive(Debug, Default)]
pub struct SyncFlags {
    /// Forward rendezvous: this node's activations are complete.
    pub ready: bool,
    /// Backward rendezvous: this node's gradient is complete.
    pub back_ready: bool,
    /// Backward walks that have arrived at this (divergent) node.
    pub back_arrivals: usize,
    /// This node's backward step already ran in the current batch.
    pub back_done: bool,
}

#[derive(Debug, Default)]
pub struct NodeSync {
    pub state: Mutex<SyncFlags>,
    pub cond: Condvar,
}

#[derive(Debug)]
pub struct RuntimeNode {
    pub role: Role,
    /// Source-name hash; implicit splice nodes have none.
    pub id: Option<AstId>,

    pub next: Option<NodeRef>,
    pub prev: Option<NodeRef>,
    /// Fan-out targets beyond `next` (divergent nodes only).
    pub extra_branches: Vec<NodeRef>,

    /// Activated output; owned by every role except Divergent.
    pub activations: Option<BufferId>,
    /// Pre-activation values (dense nodes only).
    pub preact: Option<BufferId>,
    pub width: usize,

    /// Row-major `width x prev_width` weights (dense nodes only).
    pub weights: Option<BufferId>,
    pub bias: Option<BufferId>,
    pub weight_gradient: Option<BufferId>,
    /// Gradient with respect to this node's output (pre-activation for
    /// dense nodes, operator output for convergent nodes).
    pub gradient: Option<BufferId>,
    /// Gradient toward the secondary predecessor (convergent nodes only).
    pub path_gradient: Option<BufferId>,
    /// Per-sample target working buffer (output node only).
    pub expected: Option<BufferId>,

    pub activation: Option<(Activation, f32)>,
    pub loss: Option<(Loss, f32)>,
    pub operator: Option<Convergence>,

    /// Alias of the upstream activations feeding this node.
    pub prev_activations: Option<BufferId>,
    pub prev_width: usize,
    /// Backlog slot of those upstream activations: (offset, width).
    pub prev_backlog: Option<(usize, usize)>,

    /// Secondary predecessor of a convergent node and the alias of its
    /// activations.
    pub convergent_node: Option<NodeRef>,
    pub convergent_buffer: Option<BufferId>,

    pub incoming: IncomingGradient,

    /// This node's backlog window start within a per-sample slice.
    pub backlog_offset: usize,
    /// Extra offset from `backlog_offset` to the post-activation copy.
    pub backlog_offset_activation: usize,
    /// Width of the backlog window (0 when the node stores nothing).
    pub backlog_width: usize,

    /// Outgoing edge closes a cycle.
    pub loop_edge: bool,
    /// Target of a cycle-closing edge; its path gradient persists across
    /// batches as the one-step unroll snapshot.
    pub loop_entry: bool,
    /// Lies on a cycle. A divergent does not wait for gradient arrivals
    /// from an in-cycle consumer; it reads the persisted previous-batch
    /// gradient instead.
    pub in_cycle: bool,

    pub sync: NodeSync,
}

impl RuntimeNode {
    pub fn new(role: Role, id: Option<AstId>) -> Self {
        Self {
            role,
            id,
            next: None,
            prev: None,
            extra_branches: Vec::new(),
            activations: None,
            preact: None,
            width: 0,
            weights: None,
            bias: None,
            weight_gradient: None,
            gradient: None,
            path_gradient: None,
            expected: None,
            activation: None,
            loss: None,
            operator: None,
            prev_activations: None,
            prev_width: 0,
            prev_backlog: None,
            convergent_node: None,
            convergent_buffer: None,
            incoming: IncomingGradient::Unset,
            backlog_offset: 0,
            backlog_offset_activation: 0,
            backlog_width: 0,
            loop_edge: false,
            loop_entry: false,
            in_cycle: false,
            sync: NodeSync::default(),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self.role, Role::Layer | Role::Output)
    }

    /// Backlog offset of this node's activated values within a sample
    /// slice; divergent nodes alias their upstream's slot.
    pub fn activation_slot(&self) -> Option<(usize, usize)> {
        match self.role {
            Role::Divergent => self.prev_backlog,
            _ => Some((
                self.backlog_offset + self.backlog_offset_activation,
                self.width,
            )),
        }
    }

    /// Successors in traversal order: `next` first, then the extra fan-out
    /// branches.
    pub fn successors(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.next.into_iter().chain(self.extra_branches.iter().copied())
    }
}

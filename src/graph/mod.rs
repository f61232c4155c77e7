//! Runtime graph: node arena, buffer arena, adjacency and the per-batch
//! backlog.

pub mod buffers;
pub mod builder;
pub mod loops;
pub mod node;

use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

use crate::types::NodeRef;

use buffers::BufferArena;
use node::RuntimeNode;

pub struct Graph {
    pub nodes: Vec<RuntimeNode>,
    pub buffers: BufferArena,
    /// Ordered successor lists, indexed like `nodes`.
    pub adjacency: Vec<Vec<NodeRef>>,
    pub input: NodeRef,
    pub output: NodeRef,
    /// Per-batch record of every node's pre- and post-activation values,
    /// `backlog_stride` floats per sample.
    pub backlog: Mutex<Vec<f32>>,
    pub backlog_stride: usize,
    pub batch_size: usize,
    /// Threads participating in the most recent forward pass.
    pub threads: AtomicUsize,
}

impl Graph {
    pub fn node(&self, r: NodeRef) -> &RuntimeNode {
        &self.nodes[r.0]
    }

    /// Copies `values` into the backlog window of `sample` at `offset`.
    pub fn write_backlog(&self, sample: usize, offset: usize, values: &[f32]) {
        let mut backlog = self.backlog.lock().expect("backlog lock poisoned");
        let start = sample * self.backlog_stride + offset;
        backlog[start..start + values.len()].copy_from_slice(values);
    }

    /// Reads `len` floats from the backlog window of `sample` into `out`.
    pub fn read_backlog(&self, sample: usize, offset: usize, len: usize, out: &mut Vec<f32>) {
        let backlog = self.backlog.lock().expect("backlog lock poisoned");
        let start = sample * self.backlog_stride + offset;
        out.clear();
        out.extend_from_slice(&backlog[start..start + len]);
    }
}

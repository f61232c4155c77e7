//! Back-edge detection over the runtime graph.
//!
//! Ancestor-stack DFS over the adjacency: an edge to a node currently on
//! the stack closes a cycle. The source of such an edge is flagged
//! `loop_edge` so the forward rendezvous can skip the wait; the target is
//! flagged `loop_entry` so its path gradient persists across batches as
//! the one-step unroll snapshot; the stack segment between them is the
//! cycle itself.

use crate::types::NodeRef;

use super::node::RuntimeNode;

pub fn mark_loops(nodes: &mut [RuntimeNode], adjacency: &[Vec<NodeRef>], input: NodeRef) {
    let mut stack: Vec<NodeRef> = Vec::new();
    visit(nodes, adjacency, input, &mut stack);
}

fn visit(
    nodes: &mut [RuntimeNode],
    adjacency: &[Vec<NodeRef>],
    current: NodeRef,
    stack: &mut Vec<NodeRef>,
) {
    if adjacency[current.0].is_empty() {
        return;
    }
    stack.push(current);
    for successor in adjacency[current.0].clone() {
        if let Some(entry) = stack.iter().position(|&n| n == successor) {
            nodes[current.0].loop_edge = true;
            nodes[successor.0].loop_entry = true;
            for &member in &stack[entry..] {
                nodes[member.0].in_cycle = true;
            }
            continue;
        }
        visit(nodes, adjacency, successor, stack);
    }
    stack.pop();
}

//! Parallel forward executor: one OS thread of control per branch.
//!
//! The input runs in the caller's thread. A divergent spawns one scoped
//! thread per additional walkable branch and continues the first inline;
//! a fan-out target that is a convergence fed primarily by another branch
//! is not walked — reaching it means "end of branch", and the walker
//! signals `ready` so the primary branch can consume the rendezvous.

use std::sync::atomic::Ordering;
use std::thread;

use ndarray::{ArrayView1, ArrayView2};

use crate::graph::node::Role;
use crate::graph::Graph;
use crate::types::NodeRef;

/// Runs one forward pass for `sample`; returns the loss computed by the
/// output branch, or `None` if no branch reached the output.
pub fn forward(graph: &Graph, sample: usize) -> Option<f32> {
    graph.threads.store(1, Ordering::SeqCst);
    thread::scope(|scope| branch_forward(scope, graph, graph.input, sample))
}

fn branch_forward<'scope, 'env>(
    scope: &'scope thread::Scope<'scope, 'env>,
    graph: &'env Graph,
    start: NodeRef,
    sample: usize,
) -> Option<f32> {
    let mut scratch = Vec::new();
    let mut current = start;
    loop {
        let node = graph.node(current);
        let end = end_of_branch(graph, current);
        match node.role {
            Role::Input => {
                // The driver already copied the sample into the
                // activations; record it for the backward pass.
                let activations = match node.activations {
                    Some(id) => graph.buffers.to_vec(id),
                    None => {
                        tracing::error!("input node owns no activations");
                        return None;
                    }
                };
                graph.write_backlog(sample, node.backlog_offset, &activations);
                match node.next {
                    Some(next) => current = next,
                    None => {
                        tracing::error!("input node has no successor");
                        return None;
                    }
                }
            }
            Role::Layer => {
                dense_pass(graph, current, sample, &mut scratch);
                if end {
                    signal_ready(graph, current);
                    return None;
                }
                match node.next {
                    Some(next) => current = next,
                    None => {
                        tracing::error!("layer reached a dead end");
                        return None;
                    }
                }
            }
            Role::Output => {
                dense_pass(graph, current, sample, &mut scratch);
                let activations = graph
                    .buffers
                    .to_vec(node.activations.expect("output owns activations"));
                let expected = graph
                    .buffers
                    .to_vec(node.expected.expect("output owns an expected buffer"));
                let (loss, parameter) = node.loss.expect("output carries the loss");
                return Some(loss.evaluate(&activations, &expected, parameter));
            }
            Role::Divergent => {
                let mut end = end;
                let mut walkable: Vec<NodeRef> = Vec::new();
                for target in node.successors() {
                    let t = graph.node(target);
                    if t.role == Role::Convergent && t.prev != Some(current) {
                        // This divergent is the secondary operand of the
                        // convergence; it rendezvouses instead of walking.
                        end = true;
                    } else {
                        walkable.push(target);
                    }
                }
                if end {
                    // The divergent's activations are an alias of its
                    // upstream, complete before any branch runs; signaling
                    // before the joins keeps a waiting branch from
                    // deadlocking against its own join handle.
                    signal_ready(graph, current);
                }
                if walkable.is_empty() {
                    return None;
                }
                let mut handles = Vec::with_capacity(walkable.len() - 1);
                for &target in &walkable[1..] {
                    graph.threads.fetch_add(1, Ordering::SeqCst);
                    handles.push(
                        scope.spawn(move || branch_forward(scope, graph, target, sample)),
                    );
                }
                let mut result = branch_forward(scope, graph, walkable[0], sample);
                for handle in handles {
                    match handle.join() {
                        Ok(candidate) => result = result.or(candidate),
                        Err(_) => tracing::error!("forward branch thread panicked"),
                    }
                }
                return result;
            }
            Role::Convergent => {
                if let (Some(secondary), Some(path_buffer)) =
                    (node.convergent_node, node.convergent_buffer)
                {
                    let partner = graph.node(secondary);
                    let mut state = partner
                        .sync
                        .state
                        .lock()
                        .expect("rendezvous lock poisoned");
                    while !(state.ready || partner.loop_edge) {
                        state = partner
                            .sync
                            .cond
                            .wait(state)
                            .expect("rendezvous lock poisoned");
                    }
                    let path = graph.buffers.to_vec(path_buffer);
                    graph.buffers.read_into(
                        node.prev_activations.expect("convergent has a primary operand"),
                        &mut scratch,
                    );
                    let mut merged = vec![0.0; node.width];
                    node.operator
                        .expect("convergent node carries an operator")
                        .apply(&path, &scratch, &mut merged);
                    graph
                        .buffers
                        .write(node.activations.expect("convergent owns activations"), &merged);
                    graph.write_backlog(sample, node.backlog_offset, &merged);
                    if !partner.loop_edge {
                        // Loop edges stay latched so the recurrent pass
                        // never waits on a value produced downstream.
                        state.ready = false;
                    }
                }
                if end {
                    signal_ready(graph, current);
                    return None;
                }
                match node.next {
                    Some(next) => current = next,
                    None => {
                        tracing::error!("convergence reached a dead end");
                        return None;
                    }
                }
            }
        }
    }
}

/// A branch ends where its successor is a convergence whose primary
/// predecessor is some other branch.
fn end_of_branch(graph: &Graph, current: NodeRef) -> bool {
    match graph.node(current).next {
        Some(next) => {
            let n = graph.node(next);
            n.role == Role::Convergent && n.prev != Some(current)
        }
        None => false,
    }
}

fn signal_ready(graph: &Graph, current: NodeRef) {
    let node = graph.node(current);
    let mut state = node.sync.state.lock().expect("rendezvous lock poisoned");
    state.ready = true;
    node.sync.cond.notify_all();
}

/// `y = act(W · prev + b)`, with pre- and post-activation backlog writes.
fn dense_pass(graph: &Graph, current: NodeRef, sample: usize, scratch: &mut Vec<f32>) {
    let node = graph.node(current);
    let width = node.width;
    let prev_width = node.prev_width;
    graph.buffers.read_into(
        node.prev_activations.expect("dense node is linked upstream"),
        scratch,
    );

    let mut raw = {
        let weights = graph
            .buffers
            .lock(node.weights.expect("dense node owns weights"));
        let w = ArrayView2::from_shape((width, prev_width), &weights[..])
            .expect("weight buffer matches its declared shape");
        let x = ArrayView1::from(&scratch[..]);
        w.dot(&x)
    };
    {
        let bias = graph.buffers.lock(node.bias.expect("dense node owns a bias"));
        for (r, b) in raw.iter_mut().zip(bias.iter()) {
            *r += *b;
        }
    }
    let mut values = raw.into_raw_vec();
    graph
        .buffers
        .write(node.preact.expect("dense node owns a raw buffer"), &values);
    graph.write_backlog(sample, node.backlog_offset, &values);

    if let Some((activation, parameter)) = node.activation {
        activation.apply(&mut values, parameter);
    }
    graph
        .buffers
        .write(node.activations.expect("dense node owns activations"), &values);
    graph.write_backlog(
        sample,
        node.backlog_offset + node.backlog_offset_activation,
        &values,
    );
}

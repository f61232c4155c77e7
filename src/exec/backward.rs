//! Batch-coordinated backward executor.
//!
//! Runs once per batch, starting at the output node and walking
//! predecessors. Dense nodes re-derive per-sample deltas from the backlog,
//! average them over the batch and apply the SGD update. Convergent nodes
//! split the incoming gradient by operator derivative and send one scoped
//! thread up their secondary predecessor. Divergent nodes complete by
//! arrival counting: the walk arriving from the last non-recurrent
//! consumer sums all consumer gradients and continues upstream; gradients
//! across a loop edge come from the previous batch's persisted buffers,
//! which is the one-step unroll.

use std::thread;

use crate::functions::Activation;
use crate::graph::node::{IncomingGradient, Role};
use crate::graph::Graph;
use crate::types::NodeRef;

/// Propagates gradients for the batch recorded in the backlog and applies
/// the parameter update.
pub fn backward(graph: &Graph, batch_expected: &[f32], learning_rate: f32) {
    for node in &graph.nodes {
        let mut state = node.sync.state.lock().expect("rendezvous lock poisoned");
        state.back_ready = false;
        state.back_arrivals = 0;
        state.back_done = false;
    }
    thread::scope(|scope| {
        back_walk(scope, graph, graph.output, batch_expected, learning_rate)
    });
}

fn back_walk<'scope, 'env>(
    scope: &'scope thread::Scope<'scope, 'env>,
    graph: &'env Graph,
    start: NodeRef,
    batch_expected: &'env [f32],
    learning_rate: f32,
) {
    let mut current = start;
    loop {
        let node = graph.node(current);
        match node.role {
            Role::Input => return,
            Role::Layer | Role::Output => {
                if !claim(graph, current) {
                    return;
                }
                dense_backward(graph, current, batch_expected, learning_rate);
                mark_back_ready(graph, current);
                match node.prev {
                    Some(prev) => current = prev,
                    None => return,
                }
            }
            Role::Convergent => {
                if !claim(graph, current) {
                    return;
                }
                convergent_backward(graph, current);
                mark_back_ready(graph, current);
                if let Some(secondary) = node.convergent_node {
                    let handle = scope.spawn(move || {
                        back_walk(scope, graph, secondary, batch_expected, learning_rate)
                    });
                    if handle.join().is_err() {
                        tracing::error!("backward branch thread panicked");
                    }
                }
                match node.prev {
                    Some(prev) => current = prev,
                    None => return,
                }
            }
            Role::Divergent => {
                {
                    let mut state =
                        node.sync.state.lock().expect("rendezvous lock poisoned");
                    if state.back_done {
                        return;
                    }
                    state.back_arrivals += 1;
                    if state.back_arrivals < pending_consumers(graph, current) {
                        return;
                    }
                    state.back_done = true;
                }
                divergent_backward(graph, current);
                mark_back_ready(graph, current);
                match node.prev {
                    Some(prev) => current = prev,
                    None => return,
                }
            }
        }
    }
}

/// Marks the node's backward step as taken; returns false if another walk
/// already ran it (which happens only at loop closures).
fn claim(graph: &Graph, current: NodeRef) -> bool {
    let node = graph.node(current);
    let mut state = node.sync.state.lock().expect("rendezvous lock poisoned");
    if state.back_done {
        return false;
    }
    state.back_done = true;
    true
}

fn mark_back_ready(graph: &Graph, current: NodeRef) {
    let node = graph.node(current);
    let mut state = node.sync.state.lock().expect("rendezvous lock poisoned");
    state.back_ready = true;
    node.sync.cond.notify_all();
}

/// Number of consumer walks a divergent must see before its own step.
/// Consumers sharing a cycle with the divergent never arrive in time by
/// construction; their gradient is read from the previous batch instead.
fn pending_consumers(graph: &Graph, current: NodeRef) -> usize {
    let node = graph.node(current);
    node.successors()
        .filter(|&c| !(node.in_cycle && graph.node(c).in_cycle))
        .count()
}

/// Gradient flowing from consumer `c` toward `current`.
fn gradient_toward(graph: &Graph, current: NodeRef, consumer: NodeRef) -> Vec<f32> {
    let c = graph.node(consumer);
    match c.role {
        Role::Layer | Role::Output => transposed_pull(graph, consumer),
        Role::Convergent => {
            if c.prev == Some(current) {
                graph.buffers.to_vec(c.gradient.expect("convergent owns a gradient"))
            } else {
                graph
                    .buffers
                    .to_vec(c.path_gradient.expect("convergent owns a path gradient"))
            }
        }
        Role::Divergent => graph
            .buffers
            .to_vec(c.gradient.expect("linked divergent owns a gradient")),
        Role::Input => unreachable!("the input node consumes nothing"),
    }
}

/// `out[k] = Σ_i W[i,k] · grad[i]` — the transposed-weight multiply that
/// turns a dense node's delta into the gradient its predecessor receives.
fn transposed_pull(graph: &Graph, consumer: NodeRef) -> Vec<f32> {
    let c = graph.node(consumer);
    let weights = graph
        .buffers
        .to_vec(c.weights.expect("dense node owns weights"));
    let grad = graph
        .buffers
        .to_vec(c.gradient.expect("dense node owns a gradient"));
    let (width, prev_width) = (c.width, c.prev_width);
    let mut out = vec![0.0; prev_width];
    for i in 0..width {
        let row = i * prev_width;
        for k in 0..prev_width {
            out[k] += weights[row + k] * grad[i];
        }
    }
    out
}

/// The gradient arriving into `current` from its downstream edge.
fn read_incoming(graph: &Graph, current: NodeRef) -> Vec<f32> {
    let node = graph.node(current);
    match node.incoming {
        IncomingGradient::Dense(consumer) => transposed_pull(graph, consumer),
        IncomingGradient::Buffer(id) => graph.buffers.to_vec(id),
        IncomingGradient::Unset => {
            tracing::error!("node has no downstream gradient wiring");
            vec![0.0; node.width]
        }
    }
}

fn dense_backward(
    graph: &Graph,
    current: NodeRef,
    batch_expected: &[f32],
    learning_rate: f32,
) {
    let node = graph.node(current);
    let is_output = node.role == Role::Output;
    let width = node.width;
    let prev_width = node.prev_width;
    let batch = graph.batch_size;

    let base = if is_output {
        Vec::new()
    } else {
        read_incoming(graph, current)
    };
    let (activation, act_parameter) =
        node.activation.unwrap_or((Activation::Linear, 0.0));
    let (prev_offset, _) = node
        .prev_backlog
        .expect("dense node records its upstream backlog slot");

    let mut gradient = vec![0.0; width];
    let mut weight_gradient = vec![0.0; width * prev_width];
    let mut raw = Vec::new();
    let mut delta = vec![0.0; width];
    let mut post = Vec::new();
    let mut prev_post = Vec::new();
    let mut dloss = vec![0.0; width];

    for sample in 0..batch {
        graph.read_backlog(sample, node.backlog_offset, width, &mut raw);
        activation.derive(&raw, &mut delta, act_parameter);
        if is_output {
            graph.read_backlog(
                sample,
                node.backlog_offset + node.backlog_offset_activation,
                width,
                &mut post,
            );
            let (loss, loss_parameter) = node.loss.expect("output carries the loss");
            let expected = &batch_expected[sample * width..(sample + 1) * width];
            loss.derive(&post, expected, &mut dloss, loss_parameter);
            for i in 0..width {
                delta[i] *= dloss[i];
            }
        } else {
            for i in 0..width {
                delta[i] *= base[i];
            }
        }
        graph.read_backlog(sample, prev_offset, prev_width, &mut prev_post);
        for i in 0..width {
            gradient[i] += delta[i];
            let row = i * prev_width;
            for k in 0..prev_width {
                weight_gradient[row + k] += delta[i] * prev_post[k];
            }
        }
    }

    let scale = batch as f32;
    for g in gradient.iter_mut() {
        *g /= scale;
    }
    for g in weight_gradient.iter_mut() {
        *g /= scale;
    }
    graph
        .buffers
        .write(node.gradient.expect("dense node owns a gradient"), &gradient);
    graph.buffers.write(
        node.weight_gradient
            .expect("dense node owns a weight gradient"),
        &weight_gradient,
    );

    // A zero learning rate is a dry run; skipping keeps parameters
    // bitwise intact.
    if learning_rate == 0.0 {
        return;
    }
    {
        let mut bias = graph.buffers.lock(node.bias.expect("dense node owns a bias"));
        for i in 0..width {
            bias[i] -= learning_rate * gradient[i];
        }
    }
    {
        let mut weights = graph
            .buffers
            .lock(node.weights.expect("dense node owns weights"));
        for i in 0..weights.len() {
            weights[i] -= learning_rate * weight_gradient[i];
        }
    }
}

/// Splits the incoming gradient between the two operands by operator
/// derivative. Operand values are the buffers' current contents, i.e. the
/// batch's last forward sample.
fn convergent_backward(graph: &Graph, current: NodeRef) {
    let node = graph.node(current);
    let incoming = read_incoming(graph, current);
    let path = graph
        .buffers
        .to_vec(node.convergent_buffer.expect("convergent has a secondary operand"));
    let primary = graph
        .buffers
        .to_vec(node.prev_activations.expect("convergent has a primary operand"));
    let mut toward_primary = vec![0.0; node.width];
    let mut toward_path = vec![0.0; node.width];
    node.operator
        .expect("convergent node carries an operator")
        .split_gradient(&incoming, &path, &primary, &mut toward_primary, &mut toward_path);
    graph.buffers.write(
        node.gradient.expect("convergent owns a gradient"),
        &toward_primary,
    );
    graph.buffers.write(
        node.path_gradient.expect("convergent owns a path gradient"),
        &toward_path,
    );
}

/// Sums the gradients every consumer sends back through this fan point.
fn divergent_backward(graph: &Graph, current: NodeRef) {
    let node = graph.node(current);
    let width = graph
        .buffers
        .len(node.gradient.expect("linked divergent owns a gradient"));
    let mut sum = vec![0.0; width];
    for consumer in node.successors() {
        let contribution = gradient_toward(graph, current, consumer);
        debug_assert_eq!(contribution.len(), width);
        for (s, c) in sum.iter_mut().zip(&contribution) {
            *s += *c;
        }
    }
    graph
        .buffers
        .write(node.gradient.expect("linked divergent owns a gradient"), &sum);
}

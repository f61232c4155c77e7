//! Lowers a legality-checked AST onto the runtime graph.
//!
//! The walk proceeds in graph order (predecessors first) with a `domain`
//! memo table from AST id to runtime node, so re-entering an id at a
//! convergence join reuses the existing node. Buffer wiring happens at
//! link time, when the upstream width is known.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};

use crate::ast::{Ast, AstNode, LayerArgs};
use crate::errors::{DendriteError, DendriteResult};
use crate::functions::with_rng;
use crate::mdl::Header;
use crate::types::{AstId, BufferId, NodeRef};

use super::buffers::BufferArena;
use super::loops;
use super::node::{IncomingGradient, Role, RuntimeNode};
use super::Graph;

pub fn build(
    ast: &Ast,
    header: &Header,
    batch_size: usize,
) -> DendriteResult<(Graph, HashMap<AstId, NodeRef>)> {
    let root = ast
        .root
        .ok_or_else(|| DendriteError::Build("model has no root".to_string()))?;
    let mut builder = Builder {
        ast,
        nodes: Vec::new(),
        buffers: BufferArena::new(),
        adjacency: Vec::new(),
        domain: HashMap::new(),
        backlog_cursor: 0,
        output: None,
    };
    let input = builder
        .build_branch(root, false, None)
        .map_err(|e| DendriteError::Build(e.to_string()))?;
    let output = builder
        .output
        .ok_or_else(|| DendriteError::Build("graph has no reachable output".to_string()))?;
    loops::mark_loops(&mut builder.nodes, &builder.adjacency, input);
    builder.initialize_parameters(header);

    let stride = builder.backlog_cursor;
    tracing::debug!(
        nodes = builder.nodes.len(),
        backlog_stride = stride,
        batch_size,
        "built runtime graph"
    );
    let graph = Graph {
        nodes: builder.nodes,
        buffers: builder.buffers,
        adjacency: builder.adjacency,
        input,
        output,
        backlog: Mutex::new(vec![0.0; stride * batch_size]),
        backlog_stride: stride,
        batch_size,
        threads: AtomicUsize::new(0),
    };
    Ok((graph, builder.domain))
}

struct Builder<'a> {
    ast: &'a Ast,
    nodes: Vec<RuntimeNode>,
    buffers: BufferArena,
    adjacency: Vec<Vec<NodeRef>>,
    domain: HashMap<AstId, NodeRef>,
    backlog_cursor: usize,
    output: Option<NodeRef>,
}

impl<'a> Builder<'a> {
    /// Builds the chain starting at `start`, linking it onto `attach`.
    /// Returns the first node of the chain. Stops early when the chain
    /// runs into an already-built node (a convergence join or back-edge).
    fn build_branch(
        &mut self,
        start: AstId,
        branch: bool,
        mut attach: Option<NodeRef>,
    ) -> Result<NodeRef> {
        let mut initial: Option<NodeRef> = None;
        let mut first = true;
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let entry = self
                .ast
                .get(id)
                .ok_or_else(|| anyhow!("unknown node {}", self.ast.name(id)))?
                .clone();
            let current = match &entry.node {
                AstNode::Layer(args) => {
                    if first {
                        if branch {
                            self.new_layer(id, args, Role::Layer)
                        } else {
                            self.new_input(id, args)
                        }
                    } else {
                        // A dense node following a dense or input node is
                        // spliced through an implicit divergent so the
                        // downstream edge never owns its input activations.
                        if let Some(a) = attach {
                            if matches!(self.nodes[a.0].role, Role::Layer | Role::Input) {
                                let splice = self.new_divergent(None);
                                self.link(a, splice)?;
                                attach = Some(splice);
                            }
                        }
                        if entry.next.is_none() {
                            self.new_output(id, args)
                        } else {
                            self.new_layer(id, args, Role::Layer)
                        }
                    }
                }
                AstNode::Convergence(args) => {
                    let node = self.new_node(Role::Convergent, Some(id));
                    self.nodes[node.0].operator = args.operator;
                    node
                }
                AstNode::Divergence(args) => {
                    let node = self.new_divergent(Some(id));
                    if let Some(a) = attach.take() {
                        self.link(a, node)?;
                    }
                    for head in &args.heads {
                        if let Some(&existing) = self.domain.get(head) {
                            // Stale link: the head was already built, so
                            // this edge is a back-edge or a shared join.
                            self.link(node, existing)?;
                        } else {
                            self.build_branch(*head, true, Some(node))?;
                        }
                    }
                    node
                }
            };
            if let Some(a) = attach.take() {
                self.link(a, current)?;
            }
            attach = Some(current);
            self.domain.insert(id, current);
            if self.nodes[current.0].role == Role::Output {
                self.output = Some(current);
            }
            if first {
                initial = Some(current);
                first = false;
            }
            cursor = entry.next;
            if let Some(next_id) = cursor {
                if let Some(&existing) = self.domain.get(&next_id) {
                    self.link(current, existing)?;
                    break;
                }
            }
        }
        initial.ok_or_else(|| anyhow!("empty branch"))
    }

    fn new_node(&mut self, role: Role, id: Option<AstId>) -> NodeRef {
        let node = NodeRef(self.nodes.len());
        self.nodes.push(RuntimeNode::new(role, id));
        self.adjacency.push(Vec::new());
        node
    }

    fn new_input(&mut self, id: AstId, args: &LayerArgs) -> NodeRef {
        let node = self.new_node(Role::Input, Some(id));
        let width = args.width;
        let activations = self.buffers.alloc(width);
        let n = &mut self.nodes[node.0];
        n.width = width;
        n.activations = Some(activations);
        n.backlog_offset = self.backlog_cursor;
        n.backlog_width = width;
        self.backlog_cursor += width;
        node
    }

    fn new_layer(&mut self, id: AstId, args: &LayerArgs, role: Role) -> NodeRef {
        let node = self.new_node(role, Some(id));
        let width = args.width;
        let activations = self.buffers.alloc(width);
        let preact = self.buffers.alloc(width);
        let bias = self.buffers.alloc(width);
        let gradient = self.buffers.alloc(width);
        let n = &mut self.nodes[node.0];
        n.width = width;
        n.activations = Some(activations);
        n.preact = Some(preact);
        n.bias = Some(bias);
        n.gradient = Some(gradient);
        n.activation = args.activation;
        n.backlog_offset = self.backlog_cursor;
        n.backlog_offset_activation = width;
        n.backlog_width = 2 * width;
        self.backlog_cursor += 2 * width;
        node
    }

    fn new_output(&mut self, id: AstId, args: &LayerArgs) -> NodeRef {
        let node = self.new_layer(id, args, Role::Output);
        let expected = self.buffers.alloc(args.width);
        self.nodes[node.0].loss = args.loss;
        self.nodes[node.0].expected = Some(expected);
        node
    }

    fn new_divergent(&mut self, id: Option<AstId>) -> NodeRef {
        self.new_node(Role::Divergent, id)
    }

    fn describe(&self, node: NodeRef) -> String {
        match self.nodes[node.0].id {
            Some(id) => self.ast.name(id).to_string(),
            None => format!("splice#{}", node.0),
        }
    }

    /// Activations feeding out of `source`: the owned buffer, or the alias
    /// carried by a divergent. Returns (buffer, width, backlog slot).
    fn resolve_activations(
        &self,
        source: NodeRef,
    ) -> Result<(BufferId, usize, Option<(usize, usize)>)> {
        let s = &self.nodes[source.0];
        match s.role {
            Role::Divergent => {
                let buffer = s.prev_activations.ok_or_else(|| {
                    anyhow!("divergent {} used before it was linked", self.describe(source))
                })?;
                Ok((buffer, s.prev_width, s.prev_backlog))
            }
            _ => {
                let buffer = s.activations.ok_or_else(|| {
                    anyhow!("node {} owns no activations", self.describe(source))
                })?;
                Ok((buffer, s.width, s.activation_slot()))
            }
        }
    }

    fn link(&mut self, source: NodeRef, destination: NodeRef) -> Result<()> {
        // Source side: first edge fills `next`, a divergent fans out.
        match self.nodes[source.0].role {
            Role::Input | Role::Layer | Role::Convergent => {
                if self.nodes[source.0].next.is_some() {
                    bail!("node {} already has a successor", self.describe(source));
                }
                self.nodes[source.0].next = Some(destination);
            }
            Role::Divergent => {
                if self.nodes[source.0].next.is_none() {
                    self.nodes[source.0].next = Some(destination);
                } else {
                    self.nodes[source.0].extra_branches.push(destination);
                }
            }
            Role::Output => {
                bail!("output node {} cannot have successors", self.describe(source));
            }
        }
        self.adjacency[source.0].push(destination);

        let (src_buffer, src_width, src_slot) = self.resolve_activations(source)?;

        // Destination side.
        match self.nodes[destination.0].role {
            Role::Layer | Role::Output => {
                if self.nodes[destination.0].weights.is_some() {
                    bail!(
                        "dense node {} has two predecessors",
                        self.describe(destination)
                    );
                }
                let width = self.nodes[destination.0].width;
                let weights = self.buffers.alloc(width * src_width);
                let weight_gradient = self.buffers.alloc(width * src_width);
                let d = &mut self.nodes[destination.0];
                d.prev = Some(source);
                d.prev_activations = Some(src_buffer);
                d.prev_width = src_width;
                d.prev_backlog = src_slot;
                d.weights = Some(weights);
                d.weight_gradient = Some(weight_gradient);
            }
            Role::Divergent => {
                if self.nodes[destination.0].prev.is_some() {
                    bail!(
                        "divergent {} has two predecessors",
                        self.describe(destination)
                    );
                }
                let gradient = self.buffers.alloc(src_width);
                let d = &mut self.nodes[destination.0];
                d.prev = Some(source);
                d.prev_activations = Some(src_buffer);
                d.prev_width = src_width;
                d.prev_backlog = src_slot;
                d.gradient = Some(gradient);
            }
            Role::Convergent => {
                if self.nodes[destination.0].prev.is_none() {
                    // First incoming edge: primary predecessor; the node
                    // owns its operator output and both gradient splits.
                    let width = src_width;
                    let activations = self.buffers.alloc(width);
                    let gradient = self.buffers.alloc(width);
                    let path_gradient = self.buffers.alloc(width);
                    let offset = self.backlog_cursor;
                    self.backlog_cursor += width;
                    let d = &mut self.nodes[destination.0];
                    d.prev = Some(source);
                    d.prev_activations = Some(src_buffer);
                    d.prev_width = width;
                    d.prev_backlog = src_slot;
                    d.width = width;
                    d.activations = Some(activations);
                    d.gradient = Some(gradient);
                    d.path_gradient = Some(path_gradient);
                    d.backlog_offset = offset;
                    d.backlog_width = width;
                } else {
                    if self.nodes[destination.0].convergent_node.is_some() {
                        bail!(
                            "convergence {} has more than two predecessors",
                            self.describe(destination)
                        );
                    }
                    if src_width != self.nodes[destination.0].width {
                        bail!(
                            "convergence {} operand widths differ: {} vs {}",
                            self.describe(destination),
                            self.nodes[destination.0].width,
                            src_width
                        );
                    }
                    let d = &mut self.nodes[destination.0];
                    d.convergent_node = Some(source);
                    d.convergent_buffer = Some(src_buffer);
                }
            }
            Role::Input => {
                bail!("attempted link into the input node");
            }
        }

        // Reverse wiring: where the source's backward step reads the
        // gradient arriving from this edge.
        let incoming = match self.nodes[destination.0].role {
            Role::Layer | Role::Output => IncomingGradient::Dense(destination),
            Role::Divergent => IncomingGradient::Buffer(
                self.nodes[destination.0]
                    .gradient
                    .expect("divergent gradient allocated above"),
            ),
            Role::Convergent => {
                let d = &self.nodes[destination.0];
                let buffer = if d.prev == Some(source) {
                    d.gradient.expect("convergent gradient allocated above")
                } else {
                    d.path_gradient.expect("convergent path gradient allocated above")
                };
                IncomingGradient::Buffer(buffer)
            }
            Role::Input => unreachable!("links into the input are rejected above"),
        };
        if matches!(self.nodes[source.0].incoming, IncomingGradient::Unset) {
            self.nodes[source.0].incoming = incoming;
        }
        Ok(())
    }

    fn initialize_parameters(&mut self, header: &Header) {
        with_rng(|rng| {
            for node in &self.nodes {
                if !node.is_dense() {
                    continue;
                }
                if let Some(weights) = node.weights {
                    let mut buffer = self.buffers.lock(weights);
                    header.weight.fill(
                        &mut buffer,
                        node.prev_width,
                        node.width,
                        header.weight_a,
                        header.weight_b,
                        rng,
                    );
                }
                if let Some(bias) = node.bias {
                    let mut buffer = self.buffers.lock(bias);
                    header.bias.fill(&mut buffer, header.bias_a, header.bias_b, rng);
                }
            }
        });
    }
}

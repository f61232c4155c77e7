//! The model lifecycle and batch driver: compile a description, build the
//! runtime graph, then feed batches through the executors.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::ast::Ast;
use crate::errors::{DendriteError, DendriteResult};
use crate::exec;
use crate::graph::{builder, Graph};
use crate::mdl::{self, Header};
use crate::types::{AstId, NodeRef};

pub struct Model {
    ast: Ast,
    header: Header,
    batch_size: usize,
    learning_rate: f32,
    runtime: Option<Runtime>,
}

struct Runtime {
    graph: Graph,
    /// AST id to runtime node, kept for name-based introspection.
    domain: HashMap<AstId, NodeRef>,
    /// Authoritative target store for the whole batch; the output node's
    /// `expected` buffer is only a per-sample working copy.
    batch_expected: Vec<f32>,
}

impl Model {
    /// Parses and legality-checks a description. The graph is not
    /// allocated until `build`.
    pub fn compile(
        description: &str,
        batch_size: usize,
        learning_rate: f32,
    ) -> DendriteResult<Model> {
        if batch_size == 0 {
            return Err(DendriteError::Usage(
                "batch size must be positive".to_string(),
            ));
        }
        let (header, ast) = mdl::compile_description(description)?;
        Ok(Model {
            ast,
            header,
            batch_size,
            learning_rate,
            runtime: None,
        })
    }

    /// Allocates and wires all runtime buffers and initializes the
    /// learnable parameters.
    pub fn build(&mut self) -> DendriteResult<()> {
        let (graph, domain) = builder::build(&self.ast, &self.header, self.batch_size)?;
        let output_width = graph.node(graph.output).width;
        self.runtime = Some(Runtime {
            graph,
            domain,
            batch_expected: vec![0.0; output_width * self.batch_size],
        });
        Ok(())
    }

    fn runtime(&self) -> DendriteResult<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| DendriteError::Usage("model is not built".to_string()))
    }

    pub fn is_built(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn input_width(&self) -> DendriteResult<usize> {
        let rt = self.runtime()?;
        Ok(rt.graph.node(rt.graph.input).width)
    }

    pub fn output_width(&self) -> DendriteResult<usize> {
        let rt = self.runtime()?;
        Ok(rt.graph.node(rt.graph.output).width)
    }

    pub fn node_count(&self) -> DendriteResult<usize> {
        Ok(self.runtime()?.graph.nodes.len())
    }

    /// Threads that participated in the most recent forward pass.
    pub fn forward_thread_count(&self) -> DendriteResult<usize> {
        Ok(self
            .runtime()?
            .graph
            .threads
            .load(std::sync::atomic::Ordering::SeqCst))
    }

    /// Runs one minibatch: `inputs` is `B × input_width`, `expecteds` is
    /// `B × output_width`. Returns the mean per-sample loss.
    pub fn train_batch(
        &mut self,
        inputs: ArrayView2<'_, f32>,
        expecteds: ArrayView2<'_, f32>,
        verbose: bool,
    ) -> DendriteResult<f32> {
        let learning_rate = self.learning_rate;
        let batch_size = self.batch_size;
        let rt = self
            .runtime
            .as_mut()
            .ok_or_else(|| DendriteError::Usage("model is not built".to_string()))?;
        let graph = &rt.graph;
        let input_width = graph.node(graph.input).width;
        let output_width = graph.node(graph.output).width;
        if inputs.nrows() != batch_size || expecteds.nrows() != batch_size {
            return Err(DendriteError::Usage(format!(
                "batch has {} input rows and {} expected rows, model batch size is {}",
                inputs.nrows(),
                expecteds.nrows(),
                batch_size
            )));
        }
        if inputs.ncols() != input_width {
            return Err(DendriteError::Usage(format!(
                "input width {} does not match the model's {}",
                inputs.ncols(),
                input_width
            )));
        }
        if expecteds.ncols() != output_width {
            return Err(DendriteError::Usage(format!(
                "expected width {} does not match the model's {}",
                expecteds.ncols(),
                output_width
            )));
        }

        let input_buffer = graph
            .node(graph.input)
            .activations
            .expect("input owns activations");
        let expected_buffer = graph
            .node(graph.output)
            .expected
            .expect("output owns an expected buffer");
        let mut total = 0.0;
        for sample in 0..batch_size {
            let row: Vec<f32> = inputs.row(sample).iter().copied().collect();
            graph.buffers.write(input_buffer, &row);
            let expected: Vec<f32> = expecteds.row(sample).iter().copied().collect();
            graph.buffers.write(expected_buffer, &expected);
            rt.batch_expected[sample * output_width..(sample + 1) * output_width]
                .copy_from_slice(&expected);
            let loss = exec::forward(graph, sample).ok_or_else(|| {
                DendriteError::Usage("forward pass produced no loss".to_string())
            })?;
            if verbose {
                tracing::info!(sample, loss, "forward pass");
            }
            total += loss;
        }
        exec::backward(graph, &rt.batch_expected, learning_rate);
        Ok(total / batch_size as f32)
    }

    /// Trains over a sequence of batches; returns the mean loss across
    /// all of them.
    pub fn train(
        &mut self,
        input_batches: &[Array2<f32>],
        expected_batches: &[Array2<f32>],
        verbose: bool,
    ) -> DendriteResult<f32> {
        if input_batches.len() != expected_batches.len() {
            return Err(DendriteError::Usage(format!(
                "{} input batches but {} expected batches",
                input_batches.len(),
                expected_batches.len()
            )));
        }
        if input_batches.is_empty() {
            return Err(DendriteError::Usage("no batches supplied".to_string()));
        }
        let mut total = 0.0;
        for (batch, (inputs, expecteds)) in
            input_batches.iter().zip(expected_batches).enumerate()
        {
            let loss = self.train_batch(inputs.view(), expecteds.view(), verbose)?;
            if verbose {
                tracing::info!(batch, loss, "batch complete");
            }
            total += loss;
        }
        Ok(total / input_batches.len() as f32)
    }

    /// Single inference pass; the loss machinery runs against stale
    /// targets and is discarded.
    pub fn predict(&mut self, input: ArrayView1<'_, f32>) -> DendriteResult<Vec<f32>> {
        let rt = self.runtime()?;
        let graph = &rt.graph;
        let input_width = graph.node(graph.input).width;
        if input.len() != input_width {
            return Err(DendriteError::Usage(format!(
                "input width {} does not match the model's {}",
                input.len(),
                input_width
            )));
        }
        let row: Vec<f32> = input.iter().copied().collect();
        graph.buffers.write(
            graph
                .node(graph.input)
                .activations
                .expect("input owns activations"),
            &row,
        );
        exec::forward(graph, 0);
        Ok(graph.buffers.to_vec(
            graph
                .node(graph.output)
                .activations
                .expect("output owns activations"),
        ))
    }

    fn dense_node(&self, name: &str) -> DendriteResult<NodeRef> {
        let rt = self.runtime()?;
        let node = rt
            .domain
            .get(&AstId::from_name(name))
            .copied()
            .ok_or_else(|| DendriteError::UnknownNode(name.to_string()))?;
        if !rt.graph.node(node).is_dense() {
            return Err(DendriteError::Usage(format!(
                "node {name} carries no learnable parameters"
            )));
        }
        Ok(node)
    }

    /// Copies out a dense node's weights and biases.
    pub fn parameters(&self, name: &str) -> DendriteResult<(Vec<f32>, Vec<f32>)> {
        let node = self.dense_node(name)?;
        let graph = &self.runtime()?.graph;
        let n = graph.node(node);
        let weights = graph
            .buffers
            .to_vec(n.weights.expect("dense node owns weights"));
        let bias = graph.buffers.to_vec(n.bias.expect("dense node owns a bias"));
        Ok((weights, bias))
    }

    /// Overwrites a dense node's weights and biases; a test and
    /// experimentation hook.
    pub fn set_parameters(
        &mut self,
        name: &str,
        weights: &[f32],
        biases: &[f32],
    ) -> DendriteResult<()> {
        let node = self.dense_node(name)?;
        let graph = &self.runtime()?.graph;
        let n = graph.node(node);
        let weight_buffer = n.weights.expect("dense node owns weights");
        let bias_buffer = n.bias.expect("dense node owns a bias");
        if graph.buffers.len(weight_buffer) != weights.len() {
            return Err(DendriteError::Usage(format!(
                "node {name} has {} weights, {} supplied",
                graph.buffers.len(weight_buffer),
                weights.len()
            )));
        }
        if graph.buffers.len(bias_buffer) != biases.len() {
            return Err(DendriteError::Usage(format!(
                "node {name} has {} biases, {} supplied",
                graph.buffers.len(bias_buffer),
                biases.len()
            )));
        }
        graph.buffers.write(weight_buffer, weights);
        graph.buffers.write(bias_buffer, biases);
        Ok(())
    }
}

//! dendrite — a compiler and threaded runtime for small dataflow neural
//! networks described in MDL, a compact one-line textual grammar.
//!
//! A description such as
//!
//! ```text
//! /xavier,zero/(in,4,<linear,0>)(hid,3,<relu,0>)(out,2,<linear,0>,<mse,0>)
//! ```
//!
//! declares a weight/bias initializer header followed by the network
//! segments: `(…)` dense layers, `[…]` divergences fanning out into
//! `|`-separated branches, and `{…}` convergences joining two branches
//! with an elementwise operator. [`Model::compile`] parses and checks the
//! description, [`Model::build`] allocates the shared-buffer runtime
//! graph, and [`Model::train_batch`] runs parallel forward passes plus a
//! coordinated backward pass with minibatch SGD.

pub mod ast;
pub mod errors;
pub mod exec;
pub mod functions;
pub mod graph;
pub mod mdl;
pub mod model;
pub mod types;

pub use errors::{DendriteError, DendriteResult};
pub use functions::seed;
pub use model::Model;

/// Installs a stderr `tracing` subscriber for the crate's diagnostics.
/// Safe to call more than once; later calls are no-ops.
pub fn init_diagnostics() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
}

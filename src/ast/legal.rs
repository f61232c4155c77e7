//! Static legality check over the rewired AST.
//!
//! Runs after the post-parse passes and before the builder; everything the
//! builder assumes about graph shape is proven here.

use anyhow::{bail, Result};

use super::{Ast, AstNode};
use crate::types::AstId;

pub fn check_legal(ast: &Ast) -> Result<()> {
    let root = match ast.root {
        Some(root) => root,
        None => bail!("no root node"),
    };
    tracing::debug!(nodes = ast.len(), "checking model legality");

    match ast.get(root).map(|e| &e.node) {
        Some(AstNode::Layer(args)) => {
            if args.loss.is_some() {
                bail!("root layer {} carries the loss function", ast.name(root));
            }
        }
        Some(_) => bail!("root node {} is not a layer", ast.name(root)),
        None => bail!("root node is missing from the tree"),
    }

    let mut output: Option<AstId> = None;
    for (id, entry) in ast.iter() {
        if let Some(next) = entry.next {
            if next == root {
                bail!("node {} points back at the input layer", ast.name(id));
            }
            if ast.get(next).is_none() {
                bail!(
                    "node {} points at undeclared node {}",
                    ast.name(id),
                    ast.name(next)
                );
            }
        }
        match &entry.node {
            AstNode::Layer(args) => {
                if args.width == 0 {
                    bail!("layer {} has zero width", ast.name(id));
                }
                if args.activation.is_none() && !args.input {
                    bail!("layer {} has no activation function", ast.name(id));
                }
                if args.loss.is_some() {
                    if entry.next.is_some() {
                        bail!(
                            "loss function provided to non-terminal layer {}",
                            ast.name(id)
                        );
                    }
                    if let Some(previous) = output.replace(id) {
                        bail!(
                            "multiple output layers: {} and {}",
                            ast.name(previous),
                            ast.name(id)
                        );
                    }
                } else if entry.next.is_none() {
                    bail!("non-terminal layer {} has no successor", ast.name(id));
                }
            }
            AstNode::Divergence(args) => {
                for head in &args.heads {
                    if *head == root {
                        bail!(
                            "divergence {} branches into the input layer",
                            ast.name(id)
                        );
                    }
                    if ast.get(*head).is_none() {
                        bail!(
                            "divergence {} branches into undeclared node {}",
                            ast.name(id),
                            ast.name(*head)
                        );
                    }
                }
            }
            AstNode::Convergence(args) => {
                if args.path.is_none() {
                    bail!("convergence {} has no path", ast.name(id));
                }
                if args.operator.is_none() {
                    bail!("convergence {} has no operator", ast.name(id));
                }
                if entry.next.is_none() {
                    bail!("convergence {} has no successor", ast.name(id));
                }
            }
        }
    }

    if output.is_none() {
        bail!("no output layer (a terminal layer with a loss function)");
    }
    Ok(())
}

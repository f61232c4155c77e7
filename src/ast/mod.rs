//! The abstract syntax tree produced by the MDL parser, plus the
//! post-parse passes that stitch branches to their convergence points.

pub mod legal;

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};

use crate::functions::{Activation, Convergence, Loss};
use crate::types::AstId;

#[derive(Debug, Clone)]
pub struct LayerArgs {
    pub width: usize,
    pub activation: Option<(Activation, f32)>,
    pub loss: Option<(Loss, f32)>,
    /// Set only on the first declared segment, which is the input layer.
    pub input: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DivergenceArgs {
    /// Branch heads in source order.
    pub heads: Vec<AstId>,
    /// Last segment of each branch, recorded for successor resolution.
    pub tails: Vec<AstId>,
}

#[derive(Debug, Clone)]
pub struct ConvergenceArgs {
    /// The other predecessor branch feeding this fan-in.
    pub path: Option<AstId>,
    pub operator: Option<Convergence>,
}

#[derive(Debug, Clone)]
pub enum AstNode {
    Layer(LayerArgs),
    Divergence(DivergenceArgs),
    Convergence(ConvergenceArgs),
}

#[derive(Debug, Clone)]
pub struct AstEntry {
    pub node: AstNode,
    /// Forward successor; `None` marks the output layer (or a divergence
    /// whose continuation was absorbed by its branch tails).
    pub next: Option<AstId>,
}

/// Node-id keyed AST, with the source names kept for diagnostics.
#[derive(Debug, Default)]
pub struct Ast {
    entries: HashMap<AstId, AstEntry>,
    names: HashMap<AstId, String>,
    pub root: Option<AstId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node. A duplicate name overwrites the earlier entry;
    /// the legality pass rejects whatever illegality results.
    pub fn insert(&mut self, name: &str, entry: AstEntry) -> AstId {
        let id = AstId::from_name(name);
        if self.entries.insert(id, entry).is_some() {
            tracing::warn!(name, "duplicate node declaration overwrites earlier one");
        }
        self.names.insert(id, name.to_string());
        id
    }

    pub fn get(&self, id: AstId) -> Option<&AstEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: AstId) -> Option<&mut AstEntry> {
        self.entries.get_mut(&id)
    }

    pub fn name(&self, id: AstId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or("<unknown>")
    }

    /// Records a name for an id that is referenced before (or without)
    /// being declared, so diagnostics can still print it.
    pub fn note_name(&mut self, name: &str) -> AstId {
        let id = AstId::from_name(name);
        self.names.entry(id).or_insert_with(|| name.to_string());
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AstId, &AstEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    /// Chains `next` onto `prev`. A divergence whose continuation is
    /// already occupied gains `next` as an extra branch head instead.
    pub fn set_next(&mut self, prev: AstId, next: AstId) -> Result<()> {
        let prev_name = self.name(prev).to_string();
        let entry = self
            .entries
            .get_mut(&prev)
            .ok_or_else(|| anyhow!("predecessor {prev_name} does not exist"))?;
        if entry.next.is_none() {
            entry.next = Some(next);
            return Ok(());
        }
        match &mut entry.node {
            AstNode::Divergence(args) => {
                args.heads.push(next);
                Ok(())
            }
            _ => bail!("node {prev_name} already has a successor"),
        }
    }

    /// Post-parse pass one: every convergence writes itself into its
    /// `path` branch's successor field, which is how a branch finds its
    /// convergence point.
    pub fn converge_branches(&mut self) -> Result<()> {
        let joins: Vec<(AstId, AstId)> = self
            .entries
            .iter()
            .filter_map(|(&id, e)| match &e.node {
                AstNode::Convergence(args) => args.path.map(|p| (p, id)),
                _ => None,
            })
            .collect();
        for (path, convergence) in joins {
            if self.get(path).is_none() {
                bail!(
                    "convergence {} references unknown path {}",
                    self.name(convergence),
                    self.name(path)
                );
            }
            self.set_next(path, convergence)?;
        }
        Ok(())
    }

    /// Post-parse pass two: a segment following a divergence is adopted by
    /// any branch tails still lacking a successor after convergence
    /// rewiring; when every tail already converged, the segment stays a
    /// passthrough fan-out edge of the divergence itself.
    pub fn resolve_divergence_successors(&mut self) -> Result<()> {
        let divergences: Vec<AstId> = self
            .entries
            .iter()
            .filter_map(|(&id, e)| match e.node {
                AstNode::Divergence(_) => e.next.map(|_| id),
                _ => None,
            })
            .collect();
        for id in divergences {
            let entry = &self.entries[&id];
            let successor = entry.next.expect("filtered on next above");
            let tails = match &entry.node {
                AstNode::Divergence(args) => args.tails.clone(),
                _ => unreachable!(),
            };
            let open: Vec<AstId> = tails
                .into_iter()
                .filter(|t| self.get(*t).map_or(false, |e| e.next.is_none()))
                .collect();
            if open.is_empty() {
                continue;
            }
            let successor_is_convergence = matches!(
                self.get(successor).map(|e| &e.node),
                Some(AstNode::Convergence(_))
            );
            if open.len() > 1 && !successor_is_convergence {
                bail!(
                    "divergence {} leaves {} branches dangling before {}",
                    self.name(id),
                    open.len(),
                    self.name(successor)
                );
            }
            for tail in open {
                self.set_next(tail, successor)?;
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.next = None;
            }
        }
        Ok(())
    }
}

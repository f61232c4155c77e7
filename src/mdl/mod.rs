//! MDL front end: cursor, header sub-parser, segment parser, and the
//! compile pipeline that runs the post-parse passes and the legality check.

pub mod cursor;
pub mod header;
pub mod parser;

pub use header::Header;

use crate::ast::{legal, Ast};
use crate::errors::{DendriteError, DendriteResult};

use cursor::Cursor;

/// Parses a full description into a header and a legality-checked AST.
pub fn compile_description(description: &str) -> DendriteResult<(Header, Ast)> {
    let mut cursor = Cursor::new(description);
    let header = header::parse_header(&mut cursor)?;
    let mut ast = parser::parse_model(&mut cursor)?;
    ast.converge_branches()
        .map_err(|e| DendriteError::Legality(e.to_string()))?;
    ast.resolve_divergence_successors()
        .map_err(|e| DendriteError::Legality(e.to_string()))?;
    legal::check_legal(&ast).map_err(|e| {
        tracing::error!("rejected model description: {e}");
        DendriteError::Legality(e.to_string())
    })?;
    tracing::debug!(nodes = ast.len(), "compiled model description");
    Ok((header, ast))
}

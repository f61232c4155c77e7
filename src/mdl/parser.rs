//! Recursive-descent parser for MDL segments.
//!
//! Brackets select the node kind and double as delimiters: `(…)` layers,
//! `[…]` divergences with `|`-separated branches, `{…}` convergences, and
//! `<…>` parametric function literals inside layers.

use crate::ast::{Ast, AstEntry, AstNode, ConvergenceArgs, DivergenceArgs, LayerArgs};
use crate::errors::{DendriteError, DendriteResult};
use crate::functions::{self, Convergence, FunctionRef};
use crate::types::AstId;

use super::cursor::Cursor;

/// Parses the segment sequence after the header into an AST.
pub fn parse_model(cursor: &mut Cursor) -> DendriteResult<Ast> {
    let mut ast = Ast::new();
    let mut prev: Option<AstId> = None;
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            None => break,
            Some(b'(') | Some(b'[') | Some(b'{') => {
                let first = prev.is_none();
                let id = parse_segment(cursor, &mut ast, first)?;
                if first {
                    ast.root = Some(id);
                } else if let Some(p) = prev {
                    ast.set_next(p, id)
                        .map_err(|e| cursor.error(e.to_string()))?;
                }
                prev = Some(id);
            }
            Some(byte) => {
                return Err(cursor.error(format!(
                    "unexpected token '{}' between segments",
                    byte as char
                )));
            }
        }
    }
    if ast.root.is_none() {
        return Err(cursor.error("description contains no segments".to_string()));
    }
    Ok(ast)
}

fn parse_segment(cursor: &mut Cursor, ast: &mut Ast, true_root: bool) -> DendriteResult<AstId> {
    cursor.skip_whitespace();
    match cursor.bump() {
        Some(b'(') => parse_layer(cursor, ast, true_root),
        Some(b'[') => parse_divergence(cursor, ast),
        Some(b'{') => parse_convergence(cursor, ast),
        Some(byte) => Err(cursor.error(format!(
            "expected a segment, found '{}'",
            byte as char
        ))),
        None => Err(cursor.error("expected a segment, found end of description".to_string())),
    }
}

fn parse_layer(cursor: &mut Cursor, ast: &mut Ast, true_root: bool) -> DendriteResult<AstId> {
    let name = cursor.token(&[b',', b')'])?;
    cursor.expect(b',')?;
    let mut args = LayerArgs {
        width: 0,
        activation: None,
        loss: None,
        input: true_root,
    };
    let mut positional = 0u16;
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            Some(b')') => {
                cursor.bump();
                break;
            }
            Some(b',') => {
                cursor.bump();
            }
            Some(b'<') => {
                let (function, parameter) = parse_parametric(cursor)?;
                match function {
                    FunctionRef::Activation(act) => {
                        if args.activation.replace((act, parameter)).is_some() {
                            return Err(cursor.error(format!(
                                "layer {name} declares two activation functions"
                            )));
                        }
                    }
                    FunctionRef::Loss(loss) => {
                        if args.loss.replace((loss, parameter)).is_some() {
                            return Err(cursor.error(format!(
                                "layer {name} declares two loss functions"
                            )));
                        }
                    }
                    _ => {
                        return Err(cursor.error(
                            "initializers belong in the header, not in a layer".to_string(),
                        ));
                    }
                }
                positional += 1;
            }
            Some(_) => {
                let token = cursor.token(&[b',', b')'])?;
                if positional != 0 {
                    return Err(cursor.error(format!(
                        "additional non-function argument {token} passed to layer {name}"
                    )));
                }
                args.width = token.parse().map_err(|_| {
                    cursor.error(format!("{token} is not a valid layer size"))
                })?;
                if args.width == 0 {
                    return Err(cursor.error(format!("{token} is not a valid layer size")));
                }
                positional += 1;
            }
            None => {
                return Err(cursor.error(format!("unterminated layer {name}")));
            }
        }
    }
    Ok(ast.insert(
        &name,
        AstEntry {
            node: AstNode::Layer(args),
            next: None,
        },
    ))
}

/// `<name>` or `<name,number>`; only activation and loss functions are
/// legal here.
fn parse_parametric(cursor: &mut Cursor) -> DendriteResult<(FunctionRef, f32)> {
    cursor.expect(b'<')?;
    let name = cursor.token(&[b',', b'>'])?;
    let function = functions::lookup(&name)
        .ok_or(DendriteError::UnknownFunction { name })?;
    let mut parameter = 0.0;
    cursor.skip_whitespace();
    if cursor.peek() == Some(b',') {
        cursor.bump();
        let token = cursor.token(&[b'>'])?;
        parameter = token
            .parse()
            .map_err(|_| cursor.error(format!("{token} is not a number")))?;
    }
    cursor.expect(b'>')?;
    Ok((function, parameter))
}

fn parse_divergence(cursor: &mut Cursor, ast: &mut Ast) -> DendriteResult<AstId> {
    let name = cursor.token(&[b',', b']'])?;
    cursor.expect(b',')?;
    let mut args = DivergenceArgs::default();
    let mut branch_start = true;
    let mut sub_prev: Option<AstId> = None;
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            Some(b']') => {
                cursor.bump();
                if let Some(tail) = sub_prev {
                    args.tails.push(tail);
                }
                break;
            }
            Some(b'|') => {
                cursor.bump();
                match sub_prev.take() {
                    Some(tail) => args.tails.push(tail),
                    None => {
                        return Err(cursor.error(format!(
                            "empty branch in divergence {name}"
                        )));
                    }
                }
                branch_start = true;
            }
            Some(b'(') | Some(b'[') | Some(b'{') => {
                let id = parse_segment(cursor, ast, false)?;
                if branch_start {
                    args.heads.push(id);
                    branch_start = false;
                } else if let Some(p) = sub_prev {
                    ast.set_next(p, id)
                        .map_err(|e| cursor.error(e.to_string()))?;
                }
                sub_prev = Some(id);
            }
            Some(byte) => {
                return Err(cursor.error(format!(
                    "unexpected token '{}' in divergence {name}",
                    byte as char
                )));
            }
            None => {
                return Err(cursor.error(format!("unterminated divergence {name}")));
            }
        }
    }
    Ok(ast.insert(
        &name,
        AstEntry {
            node: AstNode::Divergence(args),
            next: None,
        },
    ))
}

fn parse_convergence(cursor: &mut Cursor, ast: &mut Ast) -> DendriteResult<AstId> {
    let name = cursor.token(&[b',', b'}'])?;
    cursor.expect(b',')?;
    let path = cursor.token(&[b',', b'}'])?;
    cursor.expect(b',')?;
    let operator = cursor.token(&[b'}'])?;
    let operator = Convergence::from_name(&operator).ok_or_else(|| {
        cursor.error(format!("unknown convergence function {operator}"))
    })?;
    cursor.expect(b'}')?;
    let path = ast.note_name(&path);
    Ok(ast.insert(
        &name,
        AstEntry {
            node: AstNode::Convergence(ConvergenceArgs {
                path: Some(path),
                operator: Some(operator),
            }),
            next: None,
        },
    ))
}

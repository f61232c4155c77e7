//! The `/weight-init,bias-init/` header sub-grammar.

use crate::errors::{DendriteError, DendriteResult};
use crate::functions::{self, BiasInit, FunctionRef, WeightInit};

use super::cursor::Cursor;

/// Initializer selection parsed from the model header. Parameter slots not
/// used by the chosen initializer stay zero.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub weight: WeightInit,
    pub weight_a: f32,
    pub weight_b: f32,
    pub bias: BiasInit,
    pub bias_a: f32,
    pub bias_b: f32,
}

pub fn parse_header(cursor: &mut Cursor) -> DendriteResult<Header> {
    cursor.expect(b'/')?;
    let mut weight: Option<(WeightInit, f32, f32)> = None;
    let mut bias: Option<(BiasInit, f32, f32)> = None;

    loop {
        let name = cursor.token(&[b',', b'/'])?;
        let function = functions::lookup(&name)
            .ok_or_else(|| DendriteError::UnknownFunction { name: name.clone() })?;
        let mut params = Vec::new();
        loop {
            cursor.skip_whitespace();
            match cursor.peek() {
                Some(b',') | Some(b'/') => break,
                Some(_) => {
                    let token = cursor.token(&[b',', b'/'])?;
                    let value: f32 = token.parse().map_err(|_| {
                        DendriteError::Header(format!("{token} is not a number"))
                    })?;
                    params.push(value);
                }
                None => {
                    return Err(cursor.error("unterminated header".to_string()));
                }
            }
        }
        match function {
            FunctionRef::Weight(init) => {
                check_arity(&name, init.arity(), params.len())?;
                if weight.is_some() {
                    return Err(DendriteError::Header(
                        "more than one weight initializer".to_string(),
                    ));
                }
                weight = Some((
                    init,
                    params.first().copied().unwrap_or(0.0),
                    params.get(1).copied().unwrap_or(0.0),
                ));
            }
            FunctionRef::Bias(init) => {
                check_arity(&name, init.arity(), params.len())?;
                if bias.is_some() {
                    return Err(DendriteError::Header(
                        "more than one bias initializer".to_string(),
                    ));
                }
                bias = Some((
                    init,
                    params.first().copied().unwrap_or(0.0),
                    params.get(1).copied().unwrap_or(0.0),
                ));
            }
            _ => {
                return Err(DendriteError::Header(format!(
                    "{name} is not an initializer"
                )));
            }
        }
        match cursor.bump() {
            Some(b',') => continue,
            Some(b'/') => break,
            _ => return Err(cursor.error("unterminated header".to_string())),
        }
    }

    let (weight, weight_a, weight_b) = weight.ok_or_else(|| {
        DendriteError::Header("missing weight initialization function".to_string())
    })?;
    let (bias, bias_a, bias_b) = bias.ok_or_else(|| {
        DendriteError::Header("missing bias initialization function".to_string())
    })?;
    Ok(Header {
        weight,
        weight_a,
        weight_b,
        bias,
        bias_a,
        bias_b,
    })
}

fn check_arity(name: &str, expected: usize, found: usize) -> DendriteResult<()> {
    if expected != found {
        return Err(DendriteError::Header(format!(
            "{name} takes {expected} parameters, found {found}"
        )));
    }
    Ok(())
}

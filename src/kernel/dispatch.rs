//! The dispatch table: maps (operation name, argument list) onto exactly one
//! declared operation.
//!
//! Built once per engine from the model's declared surface. Resolution rules:
//! a fixed-arity declaration (including one completed by trailing defaults)
//! always beats a variadic catch-all; within one precedence tier, more than
//! one applicable declaration is an error, not a guess.

use std::collections::HashMap;

use thiserror::Error;

use crate::kernel::traits::{OperationDecl, OperationKind};
use crate::kernel::value::Value;

/// Dispatch-time validation failures, surfaced to the caller before the
/// engine ever sees the call.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown operation '{name}'")]
    UnknownOperation { name: String },

    #[error("no overload of '{name}' accepts {arity} argument(s)")]
    NoMatchingOverload { name: String, arity: usize },

    #[error("call to '{name}' with {arity} argument(s) is ambiguous")]
    Ambiguous { name: String, arity: usize },

    /// Surface construction error: a defaulted parameter is followed by a
    /// required one.
    #[error("operation '{name}': parameter '{param}' follows a defaulted parameter but has no default")]
    NonTrailingDefault { name: String, param: String },

    /// Surface construction error: variadic declarations take no defaults.
    #[error("variadic operation '{name}' declares defaulted parameters")]
    VariadicWithDefaults { name: String },
}

/// A call resolved to a unique declaration, with defaults bound.
#[derive(Debug)]
pub struct ResolvedCall {
    pub decl: &'static OperationDecl,
    /// Caller arguments plus bound trailing defaults. Binding is idempotent:
    /// re-resolving these arguments selects `decl` again, which is what
    /// journal replay does.
    pub args: Vec<Value>,
}

impl ResolvedCall {
    pub fn kind(&self) -> OperationKind {
        self.decl.kind
    }
}

/// The static lookup built once from a model's declared surface.
pub struct DispatchTable {
    groups: HashMap<&'static str, Vec<&'static OperationDecl>>,
}

impl DispatchTable {
    /// Build the table, rejecting malformed declarations.
    pub fn build(operations: &'static [OperationDecl]) -> Result<Self, ValidationError> {
        let mut groups: HashMap<&'static str, Vec<&'static OperationDecl>> = HashMap::new();

        for decl in operations {
            if decl.variadic.is_some() && decl.params.iter().any(|p| p.default.is_some()) {
                return Err(ValidationError::VariadicWithDefaults {
                    name: decl.name.to_string(),
                });
            }

            let mut seen_default = false;
            for param in decl.params {
                if param.default.is_some() {
                    seen_default = true;
                } else if seen_default {
                    return Err(ValidationError::NonTrailingDefault {
                        name: decl.name.to_string(),
                        param: param.name.to_string(),
                    });
                }
            }

            groups.entry(decl.name).or_default().push(decl);
        }

        Ok(DispatchTable { groups })
    }

    /// Look up a declaration of the given name and kind, regardless of
    /// arity. Used to validate configured operation names up front.
    pub fn find(&self, name: &str, kind: OperationKind) -> Option<&'static OperationDecl> {
        self.groups
            .get(name)?
            .iter()
            .find(|d| d.kind == kind)
            .copied()
    }

    /// Resolve a call to the unique matching declaration and bind arguments.
    pub fn resolve(&self, name: &str, args: &[Value]) -> Result<ResolvedCall, ValidationError> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| ValidationError::UnknownOperation {
                name: name.to_string(),
            })?;

        // Tier 1: fixed-arity declarations, trailing defaults may be omitted.
        let fixed: Vec<&'static OperationDecl> = group
            .iter()
            .filter(|d| d.variadic.is_none() && Self::fixed_applicable(d, args))
            .copied()
            .collect();

        match fixed.len() {
            1 => return Ok(Self::bind_fixed(fixed[0], args)),
            0 => {}
            _ => {
                return Err(ValidationError::Ambiguous {
                    name: name.to_string(),
                    arity: args.len(),
                })
            }
        }

        // Tier 2: variadic catch-alls.
        let variadic: Vec<&'static OperationDecl> = group
            .iter()
            .filter(|d| d.variadic.is_some() && Self::variadic_applicable(d, args))
            .copied()
            .collect();

        match variadic.len() {
            1 => Ok(ResolvedCall {
                decl: variadic[0],
                args: args.to_vec(),
            }),
            0 => Err(ValidationError::NoMatchingOverload {
                name: name.to_string(),
                arity: args.len(),
            }),
            _ => Err(ValidationError::Ambiguous {
                name: name.to_string(),
                arity: args.len(),
            }),
        }
    }

    fn fixed_applicable(decl: &OperationDecl, args: &[Value]) -> bool {
        if args.len() < decl.required_arity() || args.len() > decl.params.len() {
            return false;
        }
        decl.params
            .iter()
            .zip(args)
            .all(|(param, arg)| param.kind.accepts(arg))
    }

    fn variadic_applicable(decl: &OperationDecl, args: &[Value]) -> bool {
        let tail_kind = match decl.variadic {
            Some(kind) => kind,
            None => return false,
        };
        if args.len() < decl.params.len() {
            return false;
        }
        let (prefix, tail) = args.split_at(decl.params.len());
        decl.params
            .iter()
            .zip(prefix)
            .all(|(param, arg)| param.kind.accepts(arg))
            && tail.iter().all(|arg| tail_kind.accepts(arg))
    }

    fn bind_fixed(decl: &'static OperationDecl, args: &[Value]) -> ResolvedCall {
        let mut bound = args.to_vec();
        for param in &decl.params[args.len()..] {
            // fixed_applicable guarantees omitted parameters are defaulted.
            let default = param.default.unwrap_or(|| Value::Null);
            bound.push(default());
        }
        ResolvedCall { decl, args: bound }
    }
}

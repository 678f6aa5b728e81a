//! Reference model proving overload dispatch.
//!
//! Three same-named commands — zero-argument, single-argument, and a
//! variadic catch-all — share one call counter, plus a query with a
//! defaulted trailing parameter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::traits::{Call, Model, OperationDecl, ParamDecl, SnapshotStream};
use crate::kernel::value::{Value, ValueKind};

const OVERLOAD_SNAPSHOT_SCHEMA: u32 = 1;

fn default_step() -> Value {
    Value::Int(1)
}

static OPERATIONS: &[OperationDecl] = &[
    OperationDecl::command("mark", &[]),
    OperationDecl::command("mark", &[ParamDecl::required("num", ValueKind::Int)]),
    OperationDecl::variadic_command("mark", &[], ValueKind::Int),
    OperationDecl::query("calls", &[]),
    OperationDecl::query(
        "increment",
        &[
            ParamDecl::required("number", ValueKind::Int),
            ParamDecl::defaulted("step", ValueKind::Int, default_step),
        ],
    ),
];

/// Counts how many times any `mark` overload ran.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverloadModel {
    calls: i64,
}

#[derive(Debug, Error)]
pub enum OverloadError {
    #[error("operation '{0}' received an argument of the wrong type")]
    InvalidArgument(String),

    #[error("operation '{0}' is not part of this model")]
    UnsupportedOperation(String),

    #[error("snapshot codec: {0}")]
    Snapshot(String),

    #[error("unknown snapshot schema version {0}")]
    UnknownSchema(u32),
}

fn int_arg(call: &Call<'_>, index: usize) -> Result<i64, OverloadError> {
    call.arg(index)
        .as_int()
        .ok_or_else(|| OverloadError::InvalidArgument(call.operation.to_string()))
}

impl OverloadModel {
    pub fn calls(&self) -> i64 {
        self.calls
    }
}

impl Model for OverloadModel {
    type Error = OverloadError;

    fn genesis() -> Self {
        OverloadModel::default()
    }

    fn operations() -> &'static [OperationDecl] {
        OPERATIONS
    }

    fn execute(&mut self, call: &Call<'_>) -> Result<Value, Self::Error> {
        match call.operation {
            // Dispatch already selected the overload; arity tells the
            // variants apart here.
            "mark" => {
                self.calls += 1;
                match call.args.len() {
                    0 => Ok(Value::Null),
                    1 => Ok(Value::Int(int_arg(call, 0)? + 1)),
                    _ => {
                        let mut sum = 0i64;
                        for index in 0..call.args.len() {
                            sum += int_arg(call, index)?;
                        }
                        Ok(Value::Int(sum))
                    }
                }
            }

            other => Err(OverloadError::UnsupportedOperation(other.to_string())),
        }
    }

    fn query(&self, call: &Call<'_>) -> Result<Value, Self::Error> {
        match call.operation {
            "calls" => Ok(Value::Int(self.calls)),

            "increment" => {
                let number = int_arg(call, 0)?;
                let step = int_arg(call, 1)?;
                Ok(Value::Int(number + step))
            }

            other => Err(OverloadError::UnsupportedOperation(other.to_string())),
        }
    }

    fn export(&self) -> Result<SnapshotStream, Self::Error> {
        let data =
            bincode::serialize(self).map_err(|e| OverloadError::Snapshot(e.to_string()))?;
        Ok(SnapshotStream {
            schema_version: OVERLOAD_SNAPSHOT_SCHEMA,
            data,
        })
    }

    fn import(stream: SnapshotStream) -> Result<Self, Self::Error> {
        match stream.schema_version {
            OVERLOAD_SNAPSHOT_SCHEMA => bincode::deserialize(&stream.data)
                .map_err(|e| OverloadError::Snapshot(e.to_string())),
            other => Err(OverloadError::UnknownSchema(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::traits::Timestamp;

    fn call<'a>(op: &'a str, args: &'a [Value]) -> Call<'a> {
        Call::new(op, args, Timestamp::from_nanos(0))
    }

    #[test]
    fn test_zero_arg_mark_counts() {
        let mut model = OverloadModel::genesis();
        assert_eq!(model.execute(&call("mark", &[])).unwrap(), Value::Null);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_single_arg_mark_returns_successor() {
        let mut model = OverloadModel::genesis();
        let args = [Value::Int(41)];
        assert_eq!(model.execute(&call("mark", &args)).unwrap(), Value::Int(42));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_variadic_mark_returns_sum() {
        let mut model = OverloadModel::genesis();
        let args = [Value::Int(1), Value::Int(2), Value::Int(3)];
        assert_eq!(model.execute(&call("mark", &args)).unwrap(), Value::Int(6));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_increment_does_not_count() {
        let model = OverloadModel::genesis();
        let args = [Value::Int(10), Value::Int(5)];
        assert_eq!(model.query(&call("increment", &args)).unwrap(), Value::Int(15));
        assert_eq!(model.calls(), 0);
    }
}

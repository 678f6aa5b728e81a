//! Reference journaled model: a string key-value store with expiration.
//!
//! Proves the whole pipeline: plain commands and queries, the expiration
//! contract (`expire`/`persist`/`get_expired_keys`/`purge_expired`), and
//! export/import through snapshots. Purge reads the call stamp, so replaying
//! a journaled purge removes exactly the keys the original execution removed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::expiry::ExpirationMap;
use crate::kernel::traits::{
    Call, Model, OperationDecl, ParamDecl, SnapshotStream, Timestamp,
};
use crate::kernel::value::{Value, ValueKind};

/// Current snapshot schema for [`KvModel`].
const KV_SNAPSHOT_SCHEMA: u32 = 1;

static OPERATIONS: &[OperationDecl] = &[
    OperationDecl::command(
        "set",
        &[
            ParamDecl::required("key", ValueKind::Str),
            ParamDecl::required("value", ValueKind::Str),
        ],
    ),
    OperationDecl::query("get", &[ParamDecl::required("key", ValueKind::Str)]),
    OperationDecl::command("remove", &[ParamDecl::required("key", ValueKind::Str)]),
    OperationDecl::command(
        "rename",
        &[
            ParamDecl::required("from", ValueKind::Str),
            ParamDecl::required("to", ValueKind::Str),
        ],
    ),
    OperationDecl::query("key_count", &[]),
    OperationDecl::command(
        "expire",
        &[
            ParamDecl::required("key", ValueKind::Str),
            ParamDecl::required("at", ValueKind::Time),
        ],
    ),
    OperationDecl::query("expires", &[ParamDecl::required("key", ValueKind::Str)]),
    OperationDecl::command("persist", &[ParamDecl::required("key", ValueKind::Str)]),
    OperationDecl::query("get_expired_keys", &[]),
    OperationDecl::command("purge_expired", &[]),
];

/// String key-value store with per-key expiration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KvModel {
    entries: HashMap<String, String>,
    expiry: ExpirationMap,
}

/// Snapshot payload for [`KvModel`].
#[derive(Serialize, Deserialize)]
struct KvSnapshotData {
    entries: HashMap<String, String>,
    expiry: ExpirationMap,
}

/// Deterministic errors of the key-value model.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("no such key '{0}'")]
    NoSuchKey(String),

    #[error("operation '{0}' received an argument of the wrong type")]
    InvalidArgument(String),

    #[error("operation '{0}' is not part of this model")]
    UnsupportedOperation(String),

    #[error("snapshot codec: {0}")]
    Snapshot(String),

    #[error("unknown snapshot schema version {0}")]
    UnknownSchema(u32),
}

fn str_arg<'c>(call: &'c Call<'_>, index: usize) -> Result<&'c str, KvError> {
    call.arg(index)
        .as_str()
        .ok_or_else(|| KvError::InvalidArgument(call.operation.to_string()))
}

fn time_arg(call: &Call<'_>, index: usize) -> Result<Timestamp, KvError> {
    call.arg(index)
        .as_time()
        .ok_or_else(|| KvError::InvalidArgument(call.operation.to_string()))
}

impl KvModel {
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Keys whose deadline is at or before `now`, sorted for stable output.
    fn expired_keys(&self, now: Timestamp) -> Vec<String> {
        let mut keys = self.expiry.expired_keys(now);
        keys.sort();
        keys
    }
}

impl Model for KvModel {
    type Error = KvError;

    fn genesis() -> Self {
        KvModel::default()
    }

    fn operations() -> &'static [OperationDecl] {
        OPERATIONS
    }

    fn execute(&mut self, call: &Call<'_>) -> Result<Value, Self::Error> {
        match call.operation {
            "set" => {
                let key = str_arg(call, 0)?;
                let value = str_arg(call, 1)?;
                self.entries.insert(key.to_string(), value.to_string());
                Ok(Value::Null)
            }

            "remove" => {
                let key = str_arg(call, 0)?;
                let existed = self.entries.remove(key).is_some();
                self.expiry.clear(key);
                Ok(Value::Bool(existed))
            }

            "rename" => {
                let from = str_arg(call, 0)?.to_string();
                let to = str_arg(call, 1)?.to_string();
                // Validate before mutating: rename is all-or-nothing.
                let value = self
                    .entries
                    .remove(&from)
                    .ok_or(KvError::NoSuchKey(from.clone()))?;
                self.entries.insert(to.clone(), value);
                if let Some(at) = self.expiry.deadline(&from) {
                    self.expiry.clear(&from);
                    self.expiry.set(&to, at);
                }
                Ok(Value::Null)
            }

            "expire" => {
                let key = str_arg(call, 0)?;
                let at = time_arg(call, 1)?;
                if !self.entries.contains_key(key) {
                    return Ok(Value::Bool(false));
                }
                self.expiry.set(key, at);
                Ok(Value::Bool(true))
            }

            "persist" => {
                let key = str_arg(call, 0)?;
                Ok(Value::Bool(self.expiry.clear(key)))
            }

            "purge_expired" => {
                // The stamp is the journaled admission time: replay observes
                // the same instant and removes the same keys.
                let expired = self.expiry.drain_expired(call.stamp);
                for key in &expired {
                    self.entries.remove(key);
                }
                Ok(Value::Int(expired.len() as i64))
            }

            other => Err(KvError::UnsupportedOperation(other.to_string())),
        }
    }

    fn query(&self, call: &Call<'_>) -> Result<Value, Self::Error> {
        match call.operation {
            "get" => {
                let key = str_arg(call, 0)?;
                Ok(self
                    .entries
                    .get(key)
                    .map(|v| Value::Str(v.clone()))
                    .unwrap_or(Value::Null))
            }

            "key_count" => Ok(Value::Int(self.entries.len() as i64)),

            "expires" => {
                let key = str_arg(call, 0)?;
                Ok(self
                    .expiry
                    .deadline(key)
                    .map(Value::Time)
                    .unwrap_or(Value::Null))
            }

            "get_expired_keys" => {
                let keys = self
                    .expired_keys(call.stamp)
                    .into_iter()
                    .map(Value::Str)
                    .collect();
                Ok(Value::List(keys))
            }

            other => Err(KvError::UnsupportedOperation(other.to_string())),
        }
    }

    fn export(&self) -> Result<SnapshotStream, Self::Error> {
        let data = KvSnapshotData {
            entries: self.entries.clone(),
            expiry: self.expiry.clone(),
        };
        let bytes = bincode::serialize(&data).map_err(|e| KvError::Snapshot(e.to_string()))?;
        Ok(SnapshotStream {
            schema_version: KV_SNAPSHOT_SCHEMA,
            data: bytes,
        })
    }

    fn import(stream: SnapshotStream) -> Result<Self, Self::Error> {
        match stream.schema_version {
            KV_SNAPSHOT_SCHEMA => {
                let data: KvSnapshotData = bincode::deserialize(&stream.data)
                    .map_err(|e| KvError::Snapshot(e.to_string()))?;
                Ok(KvModel {
                    entries: data.entries,
                    expiry: data.expiry,
                })
            }
            other => Err(KvError::UnknownSchema(other)),
        }
    }
}

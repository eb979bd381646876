//! Declarative JSON shape checking
//!
//! A [`Schema`] is an ordered list of required keys and the kind of value
//! each must hold. Validation walks the keys in declaration order and stops
//! at the first violation, so a payload missing several keys always fails at
//! the same one.

use crate::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;

/// Integer-typed keys of the `/stats` payload
pub const STATS_INTEGER_KEYS: [&str; 13] = [
    "pool_hashrate",
    "round_hashes",
    "network_hashrate",
    "network_height",
    "last_template_fetched",
    "last_block_found",
    "pool_blocks_found",
    "pool_port",
    "pool_ssl_port",
    "allow_self_select",
    "connected_miners",
    "miner_hashrate",
    "worker_count",
];

/// Decimal-typed keys of the `/stats` payload
pub const STATS_DECIMAL_KEYS: [&str; 3] = ["pool_fee", "miner_balance", "payment_threshold"];

/// Key of the historical miner hashrate samples in `/stats`
pub const HASHRATE_HISTORY_KEY: &str = "miner_hashrate_stats";

/// Number of samples in the hashrate history
pub const HASHRATE_HISTORY_LEN: usize = 6;

/// Expected kind of a JSON value
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    /// A JSON integer (no fractional representation)
    Integer,
    /// A JSON number written with a fractional part
    Decimal,
    String,
    Boolean,
    Null,
    /// Anything, presence only
    Any,
    /// An object satisfying a nested schema
    Object(Schema),
    /// An array of any length
    List,
    /// An array of exactly `len` elements, optionally equal to `pinned`
    ListOfLength { len: usize, pinned: Option<Vec<Value>> },
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Integer => write!(f, "integer"),
            Kind::Decimal => write!(f, "decimal"),
            Kind::String => write!(f, "string"),
            Kind::Boolean => write!(f, "boolean"),
            Kind::Null => write!(f, "null"),
            Kind::Any => write!(f, "any value"),
            Kind::Object(_) => write!(f, "object"),
            Kind::List => write!(f, "list"),
            Kind::ListOfLength { len, pinned: None } => write!(f, "list of length {}", len),
            Kind::ListOfLength {
                pinned: Some(values),
                ..
            } => write!(f, "list equal to {}", Value::Array(values.clone())),
        }
    }
}

/// Ordered set of required keys and their kinds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, Kind)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required key
    pub fn field(mut self, key: impl Into<String>, kind: Kind) -> Self {
        self.fields.push((key.into(), kind));
        self
    }

    /// Declared keys, in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Check `value` against this schema
    pub fn validate(&self, value: &Value) -> Result<()> {
        match value.as_object() {
            Some(map) => self.validate_map(map, ""),
            None => Err(Error::schema("$", "object", describe(value))),
        }
    }

    fn validate_map(&self, map: &Map<String, Value>, prefix: &str) -> Result<()> {
        for (key, kind) in &self.fields {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };

            let value = map
                .get(key)
                .ok_or_else(|| Error::schema(&path, kind.to_string(), "missing"))?;
            check_kind(value, kind, &path)?;
        }
        Ok(())
    }

    /// Shape of the `job` object handed out on login
    pub fn job() -> Self {
        Self::new()
            .field("blob", Kind::String)
            .field("job_id", Kind::String)
            .field("target", Kind::String)
            .field("height", Kind::Integer)
            .field("seed_hash", Kind::String)
            .field("next_seed_hash", Kind::String)
    }

    /// Shape of a login response frame
    pub fn login_response() -> Self {
        Self::new()
            .field("id", Kind::Integer)
            .field("jsonrpc", Kind::String)
            .field("error", Kind::Any)
            .field(
                "result",
                Kind::Object(
                    Self::new()
                        .field("id", Kind::String)
                        .field("job", Kind::Object(Self::job()))
                        .field("status", Kind::String),
                ),
            )
    }

    /// Shape of the `/stats` payload with any six-sample history
    pub fn stats() -> Self {
        Self::stats_with_history(Kind::ListOfLength {
            len: HASHRATE_HISTORY_LEN,
            pinned: None,
        })
    }

    /// Shape of the `/stats` payload before any hashrate sample was recorded
    pub fn idle_stats() -> Self {
        Self::stats_with_history(Kind::ListOfLength {
            len: HASHRATE_HISTORY_LEN,
            pinned: Some(vec![Value::from(0); HASHRATE_HISTORY_LEN]),
        })
    }

    fn stats_with_history(history: Kind) -> Self {
        let mut schema = Self::new();
        for key in STATS_INTEGER_KEYS {
            schema = schema.field(key, Kind::Integer);
        }
        schema = schema.field(HASHRATE_HISTORY_KEY, history);
        for key in STATS_DECIMAL_KEYS {
            schema = schema.field(key, Kind::Decimal);
        }
        schema
    }
}

fn check_kind(value: &Value, kind: &Kind, path: &str) -> Result<()> {
    let matches = match kind {
        Kind::Any => true,
        Kind::Integer => value.is_i64() || value.is_u64(),
        Kind::Decimal => value.is_f64(),
        Kind::String => value.is_string(),
        Kind::Boolean => value.is_boolean(),
        Kind::Null => value.is_null(),
        Kind::Object(schema) => {
            return match value.as_object() {
                Some(map) => schema.validate_map(map, path),
                None => Err(Error::schema(path, kind.to_string(), describe(value))),
            };
        }
        Kind::List => value.is_array(),
        Kind::ListOfLength { len, pinned } => {
            let items = value
                .as_array()
                .ok_or_else(|| Error::schema(path, kind.to_string(), describe(value)))?;
            if items.len() != *len {
                return Err(Error::schema(
                    path,
                    kind.to_string(),
                    format!("list of length {}", items.len()),
                ));
            }
            if let Some(expected) = pinned {
                if !items.iter().zip(expected).all(|(a, b)| same_value(a, b)) {
                    return Err(Error::schema(path, kind.to_string(), value.to_string()));
                }
            }
            true
        }
    };

    if matches {
        Ok(())
    } else {
        Err(Error::schema(path, kind.to_string(), describe(value)))
    }
}

/// Numbers compare by value so `0` equals `0.0`
fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// Short description of a value's runtime kind and literal, for error reports
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) if n.is_f64() => format!("decimal {}", n),
        Value::Number(n) => format!("integer {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(items) => format!("list of length {}", items.len()),
        Value::Object(_) => "object".to_string(),
    }
}

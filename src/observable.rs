//! Hierarchical dot-path state inspection for external tooling and tests.
//!
//! Every major subsystem (`Cpu`, `Bus`, `DiskController`, `TermMux`, and
//! `System` itself) implements `Observable`, exposing its state as a tree of
//! named values reachable by a dotted path (`"cpu.ic"`, `"disk0.state"`).
//! This is the crate's substitute for a logging/metrics facade: rather than
//! emitting lines to a log sink, state is queried on demand.

use std::fmt;

/// A single observed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    String(String),
    Array(Vec<Value>),
    Map(Vec<(&'static str, Value)>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v:#04x}"),
            Value::U16(v) => write!(f, "{v:#06x}"),
            Value::U32(v) => write!(f, "{v:#010x}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Array(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Queryable hierarchical state.
pub trait Observable {
    /// Resolve a dotted path (e.g. `"registers.r0"`) to a value, or `None`
    /// if the path is not recognized.
    fn query(&self, path: &str) -> Option<Value>;

    /// The full set of valid top-level paths this object answers, for
    /// discovery by tooling and tests.
    fn query_paths(&self) -> &'static [&'static str];
}

#[cfg(feature = "mcp")]
impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        use serde_json::json;
        match value {
            Value::Bool(v) => json!(v),
            Value::U8(v) => json!(v),
            Value::U16(v) => json!(v),
            Value::U32(v) => json!(v),
            Value::U64(v) => json!(v),
            Value::I8(v) => json!(v),
            Value::String(v) => json!(v),
            Value::Array(vs) => {
                serde_json::Value::Array(vs.into_iter().map(Into::into).collect())
            }
            Value::Map(pairs) => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.into()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_display_is_brace_joined() {
        let v = Value::Map(vec![("a", Value::U8(1)), ("b", Value::Bool(true))]);
        assert_eq!(v.to_string(), "{a=0x01, b=true}");
    }
}

use serde_json::{Map, Value};

/// One decoded rtl_433 record, kept alongside the exact line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    raw: String,
    fields: Map<String, Value>,
}

/// Parses a decoder line. Anything that is not a JSON object is `None`:
/// rtl_433 interleaves plain-text diagnostics with its records.
pub fn parse(line: &str) -> Option<Reading> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => Some(Reading {
            raw: line.to_string(),
            fields,
        }),
        _ => None,
    }
}

impl Reading {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn model(&self) -> Option<&str> {
        self.get("model").and_then(Value::as_str)
    }

    /// Device identifier as plain text; rtl_433 emits both strings and integers.
    pub fn device_id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }
}

//! Home Assistant MQTT auto-discovery.
//!
//! Discovery messages are retained on the broker, so each one is sent only when
//! its content differs from what this process last sent on the same topic.
//! The record of what was sent lives in [`DiscoveryCache`], in memory only:
//! after a restart every discovery topic is published once more.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

pub type Fingerprint = [u8; 32];

/// Fields of one discovery payload, as consumed by Home Assistant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryConfig {
    pub device_class: Option<String>,
    pub name: String,
    pub state_topic: String,
    pub unit_of_measurement: Option<String>,
    pub value_template: Option<String>,
    pub unique_id: String,
}

impl DiscoveryConfig {
    pub fn into_payload(self) -> Value {
        let mut map = Map::new();
        if let Some(device_class) = self.device_class {
            map.insert("device_class".into(), Value::String(device_class));
        }
        map.insert("name".into(), Value::String(self.name));
        map.insert("state_topic".into(), Value::String(self.state_topic));
        if let Some(unit) = self.unit_of_measurement {
            map.insert("unit_of_measurement".into(), Value::String(unit));
        }
        if let Some(template) = self.value_template {
            map.insert("value_template".into(), Value::String(template));
        }
        map.insert("unique_id".into(), Value::String(self.unique_id));
        Value::Object(map)
    }
}

/// A retained configuration message for one (device, metric) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryDescriptor {
    pub topic: String,
    pub payload: Value,
}

impl DiscoveryDescriptor {
    pub fn new(topic: String, config: DiscoveryConfig) -> Self {
        Self {
            topic,
            payload: config.into_payload(),
        }
    }

    /// Bytes that go on the wire; identical to what gets fingerprinted.
    pub fn body(&self) -> String {
        canonical_json(&self.payload)
    }
}

/// JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

pub fn fingerprint(payload: &Value) -> Fingerprint {
    Sha256::digest(canonical_json(payload).as_bytes()).into()
}

/// Last published fingerprint per discovery topic.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    published: HashMap<String, Fingerprint>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `payload` must be sent, recording it as sent.
    pub fn should_publish(&mut self, topic: &str, payload: &Value) -> bool {
        let digest = fingerprint(payload);
        match self.published.get(topic) {
            Some(previous) if *previous == digest => {
                debug!("Discovery unchanged for {} ({})", topic, hex::encode(&digest[..8]));
                false
            }
            _ => {
                self.published.insert(topic.to_string(), digest);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"name":"x","unique_id":"u","state_topic":"t"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"state_topic":"t","name":"x","unique_id":"u"}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(canonical_json(&a), r#"{"name":"x","state_topic":"t","unique_id":"u"}"#);
    }

    #[test]
    fn test_fingerprint_nested_key_order() {
        let a: Value = serde_json::from_str(r#"{"device":{"b":1,"a":[{"y":1,"x":2}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"device":{"a":[{"x":2,"y":1}],"b":1}}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_detects_changes() {
        assert_ne!(fingerprint(&json!({"name": "a"})), fingerprint(&json!({"name": "b"})));
        assert_ne!(fingerprint(&json!({"name": "a"})), fingerprint(&json!({"name": "a", "x": 1})));
    }

    #[test]
    fn test_should_publish_sequence() {
        let mut cache = DiscoveryCache::new();
        let p1 = json!({"name": "Hideki-TS04_7_temperature"});
        let p2 = json!({"name": "Hideki-TS04_7_humidity"});

        assert!(cache.should_publish("rtl_433/t/config", &p1));
        assert!(!cache.should_publish("rtl_433/t/config", &p1));
        assert!(cache.should_publish("rtl_433/t/config", &p2));
        assert!(!cache.should_publish("rtl_433/t/config", &p2));
        assert!(cache.should_publish("rtl_433/t/config", &p1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_topics_are_independent() {
        let mut cache = DiscoveryCache::new();
        let payload = json!({"name": "same"});
        assert!(cache.should_publish("a/config", &payload));
        assert!(cache.should_publish("b/config", &payload));
        assert_eq!(cache.len(), 2);
        assert!(!cache.should_publish("a/config", &payload));
        assert!(!cache.should_publish("b/config", &payload));
    }

    #[test]
    fn test_config_payload_omits_absent_fields() {
        let payload = DiscoveryConfig {
            device_class: Some("door".into()),
            name: "SimpliSafe-Sensor_1900123".into(),
            state_topic: "rtl_433/binary_sensor/SimpliSafe-Sensor/1900123/state".into(),
            unique_id: "1900123".into(),
            ..Default::default()
        }
        .into_payload();
        let obj = payload.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert!(!obj.contains_key("unit_of_measurement"));
        assert!(!obj.contains_key("value_template"));
    }

    #[test]
    fn test_body_is_canonical() {
        let descriptor = DiscoveryDescriptor::new(
            "t/config".into(),
            DiscoveryConfig {
                device_class: Some("humidity".into()),
                name: "n".into(),
                state_topic: "s".into(),
                unit_of_measurement: Some("%".into()),
                value_template: Some("{{ value_json.humidity }}".into()),
                unique_id: "n".into(),
            },
        );
        assert_eq!(
            descriptor.body(),
            r#"{"device_class":"humidity","name":"n","state_topic":"s","unit_of_measurement":"%","unique_id":"n","value_template":"{{ value_json.humidity }}"}"#
        );
    }
}

/*!
Mock MQTT client for developing without a broker

Records every published message, in order, so tests can assert on topics,
payloads, QoS and retain flags.
*/

use anyhow::Result;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Mock MQTT client mirroring the publish side of `rumqttc::AsyncClient`
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same signature as `AsyncClient::publish`
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        tracing::debug!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages
            .lock()
            .map_err(|_| anyhow::anyhow!("mock client poisoned"))?
            .push(message);
        Ok(())
    }

    /// All published messages, oldest first
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parses the last message on a topic as JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
    }
}

/// Builds rtl_433 JSON records the way `rtl_433 -F json` prints them
pub struct ReadingBuilder {
    fields: Map<String, Value>,
}

impl ReadingBuilder {
    pub fn new<M, I>(model: M, id: I) -> Self
    where
        M: Into<String>,
        I: Into<Value>,
    {
        let mut fields = Map::new();
        fields.insert("model".into(), Value::String(model.into()));
        fields.insert("id".into(), id.into());
        Self { fields }
    }

    /// Adds the decoder's local `time` stamp
    pub fn with_time(mut self) -> Self {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.fields.insert("time".into(), Value::String(now));
        self
    }

    pub fn field<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn build_line(self) -> String {
        self.build().to_string()
    }

    /// Hideki-TS04 temperature/humidity record
    pub fn hideki(id: u32, temperature_c: f64, humidity: u32) -> Self {
        Self::new("Hideki-TS04", id)
            .field("channel", 1)
            .field("battery_ok", 1)
            .field("temperature_C", temperature_c)
            .field("humidity", humidity)
    }

    /// SimpliSafe-Sensor record; `id` carries the sensor type prefix
    pub fn simplisafe(id: &str, state: i64) -> Self {
        Self::new("SimpliSafe-Sensor", id)
            .field("seq", 1)
            .field("state", state)
            .field("extradata", "Contact Closed")
    }
}

/*!
Test harness for the bridge

- Assertions over the messages recorded by [`MockMqttClient`]
- [`FakeDecoder`]: a throwaway shell script standing in for rtl_433
*/

use crate::mqtt_stub::MockMqttClient;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
}

impl TestHarness {
    pub fn new() -> Self {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init()
            .ok();

        Self {
            mqtt_client: MockMqttClient::new(),
        }
    }

    /// Topics of every published message, in publish order
    pub fn published_topics(&self) -> Vec<String> {
        self.mqtt_client
            .get_published_messages()
            .into_iter()
            .map(|msg| msg.topic)
            .collect()
    }

    /// Asserts that some message on `topic` equals `expected` as JSON
    pub fn assert_message_sent(&self, topic: &str, expected_payload: &Value) -> Result<()> {
        for msg in self.mqtt_client.find_messages_by_topic(topic) {
            let payload: Value = serde_json::from_slice(&msg.payload)?;
            if payload == *expected_payload {
                return Ok(());
            }
        }
        anyhow::bail!("Expected message not found on topic: {}", topic);
    }

    /// Asserts that some message on `topic` has exactly this payload text
    pub fn assert_raw_sent(&self, topic: &str, expected: &str) -> Result<()> {
        let messages = self.mqtt_client.find_messages_by_topic(topic);
        if messages.iter().any(|msg| msg.payload == expected.as_bytes()) {
            return Ok(());
        }
        anyhow::bail!(
            "Payload {:?} not found on {} (got {:?})",
            expected,
            topic,
            messages.iter().map(|m| m.payload_str()).collect::<Vec<_>>()
        );
    }

    /// Asserts a field of the latest JSON message on `topic`
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("No message on {}", topic);
        };
        match get_nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found in latest message on {}", field_path, topic),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();
        let mut retained = 0;

        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
            if msg.retain {
                retained += 1;
            }
        }

        TestStats {
            total_messages: messages.len(),
            retained_messages: retained,
            topic_counts,
        }
    }

    pub fn reset(&mut self) {
        self.mqtt_client.clear();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(obj) => obj.get(part),
        _ => None,
    })
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub retained_messages: usize,
    pub topic_counts: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
enum Output {
    Stdout(String),
    Stderr(String),
}

/// Builder for a shell script that mimics rtl_433's output and exit status
#[derive(Debug, Clone, Default)]
pub struct FakeDecoder {
    output: Vec<Output>,
    exit_code: i32,
    pause: Option<Duration>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.output.push(Output::Stdout(line.into()));
        self
    }

    pub fn stderr_line(mut self, line: impl Into<String>) -> Self {
        self.output.push(Output::Stderr(line.into()));
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Stays alive for `pause` after the last line, so the reader sees every line
    /// before the exit.
    pub fn pause_before_exit(mut self, pause: Duration) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn script(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");
        for output in &self.output {
            match output {
                Output::Stdout(line) => script.push_str(&format!("printf '%s\\n' {}\n", quote(line))),
                Output::Stderr(line) => script.push_str(&format!("printf '%s\\n' {} >&2\n", quote(line))),
            }
        }
        if let Some(pause) = self.pause {
            script.push_str(&format!("sleep {}\n", pause.as_secs_f64()));
        }
        script.push_str(&format!("exit {}\n", self.exit_code));
        script
    }

    /// Writes the script into a fresh temporary directory
    pub fn write(&self) -> Result<FakeDecoderScript> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rtl_433");
        std::fs::write(&path, self.script())?;
        Ok(FakeDecoderScript { _dir: dir, path })
    }
}

/// Keeps the script on disk for as long as it lives
pub struct FakeDecoderScript {
    _dir: TempDir,
    path: PathBuf,
}

impl FakeDecoderScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoder command line running the script through `sh`
    pub fn argv(&self) -> Vec<String> {
        vec!["sh".to_string(), self.path.to_string_lossy().into_owned()]
    }
}

fn quote(line: &str) -> String {
    format!("'{}'", line.replace('\'', r"'\''"))
}

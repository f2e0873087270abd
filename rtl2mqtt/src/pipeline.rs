//! Line -> reading -> dispatch -> broker, strictly one line at a time.

use crate::decoder::{DecoderProcess, LineEvent, ReaderError};
use crate::discovery::{DiscoveryCache, DiscoveryDescriptor};
use crate::models::{DispatchContext, ModelRegistry};
use crate::mqtt::{Publish, PublishDescriptor};
use crate::reading;
use tracing::{debug, error, info, warn};

pub struct Pipeline<P> {
    registry: ModelRegistry,
    ctx: DispatchContext,
    cache: DiscoveryCache,
    publisher: P,
}

impl<P: Publish> Pipeline<P> {
    pub fn new(registry: ModelRegistry, ctx: DispatchContext, publisher: P) -> Self {
        Self {
            registry,
            ctx,
            cache: DiscoveryCache::new(),
            publisher,
        }
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Handles one decoder line; returns how many messages were handed to the broker client.
    pub async fn handle_line(&mut self, line: &str) -> usize {
        let Some(reading) = reading::parse(line) else {
            return 0;
        };
        info!("{}", line);

        let dispatch = match self.registry.dispatch(&reading, &self.ctx) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                warn!("Skipping reading: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for descriptor in dispatch.discovery {
            if self.publish_discovery(descriptor).await {
                sent += 1;
            }
        }
        for message in dispatch.publish {
            if self.send(message).await {
                sent += 1;
            }
        }
        sent
    }

    async fn publish_discovery(&mut self, descriptor: DiscoveryDescriptor) -> bool {
        if !self.cache.should_publish(&descriptor.topic, &descriptor.payload) {
            return false;
        }
        info!("Publishing config for Home Assistant AutoDiscovery to {}", descriptor.topic);
        let body = descriptor.body();
        self.send(PublishDescriptor::new(descriptor.topic, body, self.ctx.qos, true))
            .await
    }

    async fn send(&self, message: PublishDescriptor) -> bool {
        debug!("-> {} {}", message.topic, message.payload_str());
        match self.publisher.publish(message).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    /// Consumes decoder output until the decoder exits; returns its exit code.
    pub async fn run(&mut self, decoder: &mut DecoderProcess) -> Result<i32, ReaderError> {
        loop {
            match decoder.next_line().await? {
                LineEvent::Line(line) => {
                    self.handle_line(&line).await;
                }
                LineEvent::Exited(code) => {
                    info!("{} exited with code {}", decoder.program(), code);
                    return Ok(code);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::PublishError;
    use async_trait::async_trait;
    use regex::Regex;
    use rtl2mqtt_devkit::{FakeDecoder, MockMqttClient, ReadingBuilder, TestHarness};
    use rumqttc::QoS;
    use serde_json::json;
    use std::time::Duration;

    #[async_trait]
    impl Publish for MockMqttClient {
        async fn publish(&self, message: PublishDescriptor) -> Result<(), PublishError> {
            MockMqttClient::publish(self, message.topic.clone(), message.qos, message.retain, message.payload)
                .await
                .map_err(|e| PublishError::Rejected {
                    topic: message.topic,
                    reason: e.to_string(),
                })
        }
    }

    fn pipeline(harness: &TestHarness) -> Pipeline<MockMqttClient> {
        Pipeline::new(
            ModelRegistry::with_builtin(&["Hideki-TS04".to_string()]),
            DispatchContext {
                topic_root: "rtl_433".into(),
                qos: QoS::AtLeastOnce,
            },
            harness.mqtt_client.clone(),
        )
    }

    const HIDEKI: &str = r#"{"model": "Hideki-TS04", "id": 7, "temperature_C": 21.5, "humidity": 40}"#;

    #[tokio::test]
    async fn test_climate_line_publishes_discovery_then_data() {
        let harness = TestHarness::new();
        let mut pipeline = pipeline(&harness);

        assert_eq!(pipeline.handle_line(HIDEKI).await, 3);

        assert_eq!(
            harness.published_topics(),
            vec![
                "rtl_433/sensor/Hideki-TS04/7_temperature/config",
                "rtl_433/sensor/Hideki-TS04/7_humidity/config",
                "rtl_433/sensor/Hideki-TS04/7/data",
            ]
        );
        let config = harness.mqtt_client.find_messages_by_topic("rtl_433/sensor/Hideki-TS04/7_temperature/config");
        assert!(config[0].retain);
        assert_eq!(config[0].qos, QoS::AtLeastOnce);
        harness
            .assert_field_equals("rtl_433/sensor/Hideki-TS04/7_temperature/config", "unit_of_measurement", &json!("°C"))
            .unwrap();
        harness.assert_raw_sent("rtl_433/sensor/Hideki-TS04/7/data", HIDEKI).unwrap();
    }

    #[tokio::test]
    async fn test_discovery_is_not_repeated() {
        let harness = TestHarness::new();
        let mut pipeline = pipeline(&harness);

        pipeline.handle_line(HIDEKI).await;
        let second = r#"{"model": "Hideki-TS04", "id": 7, "temperature_C": 22.0, "humidity": 41}"#;
        assert_eq!(pipeline.handle_line(second).await, 1);

        let stats = harness.get_stats();
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.topic_counts["rtl_433/sensor/Hideki-TS04/7/data"], 2);
        assert_eq!(stats.topic_counts["rtl_433/sensor/Hideki-TS04/7_humidity/config"], 1);
        assert_eq!(pipeline.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_non_readings_and_unknown_models_publish_nothing() {
        let harness = TestHarness::new();
        let mut pipeline = pipeline(&harness);

        assert_eq!(pipeline.handle_line("Tuned to 433.92MHz.").await, 0);
        assert_eq!(pipeline.handle_line(r#"{"time":"2024-05-01"}"#).await, 0);
        assert_eq!(pipeline.handle_line(r#"{"model":"Acurite-Tower","id":1}"#).await, 0);
        assert_eq!(harness.get_stats().total_messages, 0);
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_skipped_without_crashing() {
        let harness = TestHarness::new();
        let mut pipeline = pipeline(&harness);

        let line = r#"{"model":"SimpliSafe-Sensor","id":"1700123","state":1}"#;
        assert_eq!(pipeline.handle_line(line).await, 0);
        assert!(pipeline.cache().is_empty());

        let line = r#"{"model":"SimpliSafe-Sensor","id":"1500123","state":2}"#;
        assert_eq!(pipeline.handle_line(line).await, 3);
        harness
            .assert_raw_sent("rtl_433/binary_sensor/SimpliSafe-Sensor/1500123/state", "ON")
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_order_matches_input_order() {
        let harness = TestHarness::new();
        let mut pipeline = pipeline(&harness);

        let lines: Vec<String> = (0..20)
            .map(|i| {
                ReadingBuilder::new("SimpliSafe-Sensor", format!("19{i:05}"))
                    .field("state", 1)
                    .build_line()
            })
            .collect();
        for line in &lines {
            pipeline.handle_line(line).await;
        }

        let data: Vec<String> = harness
            .mqtt_client
            .get_published_messages()
            .into_iter()
            .filter(|m| m.topic.ends_with("/data"))
            .map(|m| String::from_utf8(m.payload).unwrap())
            .collect();
        assert_eq!(data, lines);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_until_decoder_exits() {
        let harness = TestHarness::new();
        let mut pipeline = pipeline(&harness);

        let fake = FakeDecoder::new()
            .line("rtl_433 version 23.11 branch  at 202311281352 inputs file rtl_tcp RTL-SDR")
            .line("Found Rafael Micro R820T tuner")
            .line(HIDEKI)
            .line(r#"{"model":"SimpliSafe-Sensor","id":"1900123","state":1}"#)
            .pause_before_exit(Duration::from_millis(300))
            .exit_code(4)
            .write()
            .unwrap();

        let mut decoder = DecoderProcess::start(&fake.argv(), Regex::new("^(Found|Tuned)").unwrap(), false).unwrap();
        let code = pipeline.run(&mut decoder).await.unwrap();

        assert_eq!(code, 4);
        assert_eq!(
            harness.published_topics(),
            vec![
                "rtl_433/sensor/Hideki-TS04/7_temperature/config",
                "rtl_433/sensor/Hideki-TS04/7_humidity/config",
                "rtl_433/sensor/Hideki-TS04/7/data",
                "rtl_433/binary_sensor/SimpliSafe-Sensor/1900123/config",
                "rtl_433/binary_sensor/SimpliSafe-Sensor/1900123/state",
                "rtl_433/binary_sensor/SimpliSafe-Sensor/1900123/data",
            ]
        );
    }
}

//! Temperature/humidity sensors (e.g. Hideki-TS04).
//!
//! One Home Assistant `sensor` per metric, all reading from a single shared
//! data topic that carries the untouched rtl_433 record.

use super::{device_base, require_id, Dispatch, DispatchContext, DispatchError, ModelHandler};
use crate::discovery::{DiscoveryConfig, DiscoveryDescriptor};
use crate::mqtt::PublishDescriptor;
use crate::reading::Reading;

const ENTITY_TYPE: &str = "sensor";

/// (metric, rtl_433 field, unit)
const METRICS: [(&str, &str, &str); 2] = [
    ("temperature", "temperature_C", "°C"),
    ("humidity", "humidity", "%"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ClimateSensor;

impl ModelHandler for ClimateSensor {
    fn dispatch(&self, reading: &Reading, ctx: &DispatchContext) -> Result<Dispatch, DispatchError> {
        let model = reading.model().unwrap_or_default();
        let id = require_id(reading, model)?;

        let base = device_base(ctx, ENTITY_TYPE, model, &id)?;
        let data_topic = format!("{base}/data");

        let discovery = METRICS
            .iter()
            .map(|(metric, field, unit)| {
                let name = format!("{model}_{id}_{metric}");
                DiscoveryDescriptor::new(
                    format!("{base}_{metric}/config"),
                    DiscoveryConfig {
                        device_class: Some(metric.to_string()),
                        name: name.clone(),
                        state_topic: data_topic.clone(),
                        unit_of_measurement: Some(unit.to_string()),
                        value_template: Some(format!("{{{{ value_json.{field} }}}}")),
                        unique_id: name,
                    },
                )
            })
            .collect();

        Ok(Dispatch {
            discovery,
            publish: vec![PublishDescriptor::new(data_topic, reading.raw(), ctx.qos, false)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::ctx;
    use crate::reading::parse;
    use serde_json::json;

    const LINE: &str = r#"{"model": "Hideki-TS04", "id": "7", "temperature_C": 21.5, "humidity": 40}"#;

    #[test]
    fn test_two_discovery_one_data() {
        let reading = parse(LINE).unwrap();
        let out = ClimateSensor.dispatch(&reading, &ctx()).unwrap();

        assert_eq!(out.discovery.len(), 2);
        assert_eq!(out.publish.len(), 1);

        let data = &out.publish[0];
        assert_eq!(data.topic, "rtl_433/sensor/Hideki-TS04/7/data");
        assert_eq!(data.payload, LINE.as_bytes());
        assert!(!data.retain);
        assert_eq!(data.qos, ctx().qos);
    }

    #[test]
    fn test_temperature_discovery_payload() {
        let reading = parse(LINE).unwrap();
        let out = ClimateSensor.dispatch(&reading, &ctx()).unwrap();

        let temp = &out.discovery[0];
        assert_eq!(temp.topic, "rtl_433/sensor/Hideki-TS04/7_temperature/config");
        assert_eq!(
            temp.payload,
            json!({
                "device_class": "temperature",
                "name": "Hideki-TS04_7_temperature",
                "state_topic": "rtl_433/sensor/Hideki-TS04/7/data",
                "unit_of_measurement": "°C",
                "value_template": "{{ value_json.temperature_C }}",
                "unique_id": "Hideki-TS04_7_temperature",
            })
        );
    }

    #[test]
    fn test_humidity_discovery_payload() {
        let reading = parse(LINE).unwrap();
        let out = ClimateSensor.dispatch(&reading, &ctx()).unwrap();

        let hum = &out.discovery[1];
        assert_eq!(hum.topic, "rtl_433/sensor/Hideki-TS04/7_humidity/config");
        assert_eq!(hum.payload["unit_of_measurement"], "%");
        assert_eq!(hum.payload["value_template"], "{{ value_json.humidity }}");
        assert_eq!(hum.payload["device_class"], "humidity");
    }

    #[test]
    fn test_numeric_id() {
        let reading = parse(r#"{"model":"Hideki-TS04","id":7,"temperature_C":21.5,"humidity":40}"#).unwrap();
        let out = ClimateSensor.dispatch(&reading, &ctx()).unwrap();
        assert_eq!(out.publish[0].topic, "rtl_433/sensor/Hideki-TS04/7/data");
    }

    #[test]
    fn test_payload_is_stable_across_readings() {
        let first = ClimateSensor.dispatch(&parse(LINE).unwrap(), &ctx()).unwrap();
        let later = parse(r#"{"model":"Hideki-TS04","id":"7","temperature_C":-3.0,"humidity":91}"#).unwrap();
        let second = ClimateSensor.dispatch(&later, &ctx()).unwrap();
        assert_eq!(first.discovery, second.discovery);
        assert_eq!(first.discovery[0].body(), second.discovery[0].body());
    }

    #[test]
    fn test_missing_id() {
        let reading = parse(r#"{"model":"Hideki-TS04","temperature_C":21.5}"#).unwrap();
        let err = ClimateSensor.dispatch(&reading, &ctx()).unwrap_err();
        assert_eq!(
            err,
            DispatchError::MissingField {
                model: "Hideki-TS04".into(),
                field: "id"
            }
        );
    }

    #[test]
    fn test_id_with_separator_is_rejected() {
        let reading = parse(r#"{"model":"Hideki-TS04","id":"7/../x"}"#).unwrap();
        let err = ClimateSensor.dispatch(&reading, &ctx()).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSegment(_)));
    }
}

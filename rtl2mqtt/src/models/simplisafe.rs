//! SimpliSafe door/motion sensors, exposed as Home Assistant `binary_sensor`s.
//!
//! The sensor kind is encoded in the leading digits of the device id.

use super::{device_base, require_id, Dispatch, DispatchContext, DispatchError, ModelHandler};
use crate::discovery::{DiscoveryConfig, DiscoveryDescriptor};
use crate::mqtt::PublishDescriptor;
use crate::reading::Reading;

const ENTITY_TYPE: &str = "binary_sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Motion,
    Door,
}

impl SensorKind {
    pub fn from_id(id: &str) -> Option<Self> {
        if id.starts_with("15") {
            Some(Self::Motion)
        } else if id.starts_with("19") {
            Some(Self::Door)
        } else {
            None
        }
    }

    pub fn device_class(self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Door => "door",
        }
    }

    /// `state` code meaning "triggered" for this kind.
    fn active_code(self) -> i64 {
        match self {
            Self::Motion => 2,
            Self::Door => 1,
        }
    }

    pub fn state(self, code: i64) -> &'static str {
        if code == self.active_code() {
            "ON"
        } else {
            "OFF"
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpliSafeSensor;

impl ModelHandler for SimpliSafeSensor {
    fn dispatch(&self, reading: &Reading, ctx: &DispatchContext) -> Result<Dispatch, DispatchError> {
        let model = reading.model().unwrap_or_default();
        let id = require_id(reading, model)?;

        let kind = SensorKind::from_id(&id).ok_or_else(|| DispatchError::UnknownDevicePrefix {
            model: model.to_string(),
            id: id.clone(),
        })?;
        let code = reading.get_i64("state").ok_or_else(|| DispatchError::MissingField {
            model: model.to_string(),
            field: "state",
        })?;

        let base = device_base(ctx, ENTITY_TYPE, model, &id)?;
        let state_topic = format!("{base}/state");

        let config = DiscoveryConfig {
            device_class: Some(kind.device_class().to_string()),
            name: format!("{model}_{id}"),
            state_topic: state_topic.clone(),
            unique_id: id.clone(),
            ..Default::default()
        };

        Ok(Dispatch {
            discovery: vec![DiscoveryDescriptor::new(format!("{base}/config"), config)],
            publish: vec![
                PublishDescriptor::new(state_topic, kind.state(code), ctx.qos, false),
                PublishDescriptor::new(format!("{base}/data"), reading.raw(), ctx.qos, false),
            ],
        })
    }
}

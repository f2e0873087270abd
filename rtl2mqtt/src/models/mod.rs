//! Model dispatch: rtl_433 `model` value -> handler producing broker messages.
//!
//! Handlers are pure: they turn a [`Reading`] into descriptors and never touch
//! the broker. New device families are added by registering another
//! [`ModelHandler`] in the [`ModelRegistry`].

pub mod climate;
pub mod simplisafe;

use crate::discovery::DiscoveryDescriptor;
use crate::mqtt::PublishDescriptor;
use crate::reading::Reading;
use rumqttc::QoS;
use std::collections::HashMap;

pub use climate::ClimateSensor;
pub use simplisafe::SimpliSafeSensor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{model}: missing or malformed field '{field}'")]
    MissingField { model: String, field: &'static str },
    #[error("{model}: device id '{id}' has no known type prefix")]
    UnknownDevicePrefix { model: String, id: String },
    #[error("'{0}' cannot be used as a topic segment")]
    InvalidSegment(String),
}

/// Broker settings every handler needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchContext {
    pub topic_root: String,
    pub qos: QoS,
}

/// Everything one reading produces, in publish order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    pub discovery: Vec<DiscoveryDescriptor>,
    pub publish: Vec<PublishDescriptor>,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.discovery.is_empty() && self.publish.is_empty()
    }
}

pub trait ModelHandler: Send + Sync {
    fn dispatch(&self, reading: &Reading, ctx: &DispatchContext) -> Result<Dispatch, DispatchError>;
}

#[derive(Default)]
pub struct ModelRegistry {
    handlers: HashMap<String, Box<dyn ModelHandler>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers; `climate_models` all use [`ClimateSensor`].
    pub fn with_builtin(climate_models: &[String]) -> Self {
        let mut registry = Self::new();
        for model in climate_models {
            registry.register(model.clone(), ClimateSensor);
        }
        registry.register("SimpliSafe-Sensor", SimpliSafeSensor);
        registry
    }

    pub fn register<H>(&mut self, model: impl Into<String>, handler: H)
    where
        H: ModelHandler + 'static,
    {
        self.handlers.insert(model.into(), Box::new(handler));
    }

    pub fn is_registered(&self, model: &str) -> bool {
        self.handlers.contains_key(model)
    }

    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.handlers.keys().cloned().collect();
        models.sort();
        models
    }

    /// Unknown or missing models yield an empty [`Dispatch`].
    pub fn dispatch(&self, reading: &Reading, ctx: &DispatchContext) -> Result<Dispatch, DispatchError> {
        match reading.model().and_then(|model| self.handlers.get(model)) {
            Some(handler) => handler.dispatch(reading, ctx),
            None => Ok(Dispatch::default()),
        }
    }
}

/// Joins topic segments with `/`, refusing segments that would alter the topic shape.
pub fn topic(segments: &[&str]) -> Result<String, DispatchError> {
    for segment in segments {
        if segment.is_empty() || segment.contains(['/', '+', '#']) {
            return Err(DispatchError::InvalidSegment(segment.to_string()));
        }
    }
    Ok(segments.join("/"))
}

/// `<root>/<entity_type>/<model>/<device_id>`; the root itself may hold several levels.
pub fn device_base(ctx: &DispatchContext, entity_type: &str, model: &str, id: &str) -> Result<String, DispatchError> {
    Ok(format!("{}/{}", ctx.topic_root, topic(&[entity_type, model, id])?))
}

pub(crate) fn require_id(reading: &Reading, model: &str) -> Result<String, DispatchError> {
    reading.device_id().ok_or_else(|| DispatchError::MissingField {
        model: model.to_string(),
        field: "id",
    })
}

use crate::config::MqttConf;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker client rejected publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },
}

/// One outgoing broker message.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishDescriptor {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishDescriptor {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Hands messages to a broker client. Returning does not mean the broker has them.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, message: PublishDescriptor) -> Result<(), PublishError>;
}

#[async_trait]
impl Publish for AsyncClient {
    async fn publish(&self, message: PublishDescriptor) -> Result<(), PublishError> {
        AsyncClient::publish(self, message.topic.clone(), message.qos, message.retain, message.payload)
            .await
            .map_err(|e| PublishError::Rejected {
                topic: message.topic,
                reason: e.to_string(),
            })
    }
}

pub fn mqtt_options(conf: &MqttConf) -> MqttOptions {
    let mut opts = MqttOptions::new(conf.client_id(), conf.host.clone(), conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
    if let Some(password) = &conf.password {
        info!("Connecting with authentication");
        opts.set_credentials(conf.user.clone().unwrap_or_default(), password.clone());
    } else {
        info!("Connecting without authentication");
    }
    opts
}

/// Creates the client and drives its event loop on a background task.
///
/// The task owns connect/reconnect for the whole program lifetime.
pub fn connect(conf: &MqttConf, verbose: bool) -> (AsyncClient, JoinHandle<()>) {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(conf), conf.channel_capacity);
    let host = format!("{}:{}", conf.host, conf.port);

    let handle = task::spawn(async move {
        let mut connected = false;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    connected = ack.code == ConnectReturnCode::Success;
                    info!("MQTT: {} ({})", connect_status(ack.code), host);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    connected = false;
                    warn!("MQTT: broker requested disconnect");
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) if verbose => {
                    debug!("Pub: {}", pkid);
                }
                Ok(Event::Incoming(packet)) if verbose => {
                    debug!("MQTT in: {:?}", packet);
                }
                Ok(_) => {}
                Err(e) => {
                    if connected {
                        warn!("Unexpected disconnection: {}", e);
                    } else {
                        error!("MQTT connection error ({}): {}", host, e);
                    }
                    connected = false;
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                }
            }
        }
    });

    (client, handle)
}

pub fn connect_status(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "Connected",
        ConnectReturnCode::RefusedProtocolVersion => "incorrect protocol version",
        ConnectReturnCode::BadClientId => "invalid client ID",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorised",
    }
}

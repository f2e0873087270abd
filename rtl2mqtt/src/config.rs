//! Runtime configuration: defaults, optional YAML file, environment, CLI flags.
//!
//! The pipeline only ever reads the merged [`Config`]; nothing is reloaded after startup.

use clap::Parser;
use regex::Regex;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "rtl2mqtt.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Command-line flags. Anything left unset falls back to env/file/defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "rtl2mqtt", version, about = "Publish rtl_433 readings to MQTT")]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Debug logging, including every raw decoder line
    #[arg(short, long)]
    pub verbose: bool,

    /// Decoder command line, e.g. "/usr/local/bin/rtl_433 -F json"
    #[arg(long)]
    pub decoder: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConf,
    pub decoder: DecoderConf,
    pub models: ModelsConf,
    pub verbose: bool,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub qos: u8,
    pub topic_root: String,
    pub channel_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DecoderConf {
    pub command: String,
    pub important_pattern: String,
}

/// Extra model names routed to the built-in handlers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ModelsConf {
    pub climate: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            decoder: DecoderConf::default(),
            models: ModelsConf::default(),
            verbose: false,
            source: None,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            user: None,
            password: None,
            client_id: None,
            keep_alive_secs: 60,
            qos: 0,
            topic_root: "rtl_433".into(),
            channel_capacity: 100,
        }
    }
}

impl Default for DecoderConf {
    fn default() -> Self {
        Self {
            command: "/usr/local/bin/rtl_433".into(),
            important_pattern: "^(Found|Tuned)".into(),
        }
    }
}

impl Default for ModelsConf {
    fn default() -> Self {
        Self {
            climate: vec!["Hideki-TS04".into()],
        }
    }
}

impl MqttConf {
    pub fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("rtl2mqtt-{}", uuid::Uuid::new_v4()))
    }
}

impl DecoderConf {
    /// Program and arguments, split the way a shell would.
    pub fn argv(&self) -> Result<Vec<String>, ConfigError> {
        let argv = shell_words::split(&self.command)
            .map_err(|e| ConfigError::Invalid(format!("decoder.command: {e}")))?;
        if argv.is_empty() {
            return Err(ConfigError::Invalid("decoder.command is empty".into()));
        }
        Ok(argv)
    }

    pub fn important_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.important_pattern)
            .map_err(|e| ConfigError::Invalid(format!("decoder.important_pattern: {e}")))
    }
}

impl Config {
    /// Full startup merge: defaults, YAML file, `.env` + process env, then CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let explicit = cli
            .config
            .clone()
            .or_else(|| std::env::var("RTL2MQTT_CONFIG").ok().map(PathBuf::from));
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&txt).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml(txt: &str) -> Result<Self, serde_yaml::Error> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt)
    }

    /// Overrides from `MQTT_*`, `DEBUG` and `RTL_433_CMD`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_BROKER") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "MQTT_PORT", value: port })?;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt.user = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.mqtt.password = Some(pass);
        }
        if let Some(qos) = lookup("MQTT_QOS") {
            self.mqtt.qos = qos
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "MQTT_QOS", value: qos })?;
        }
        if let Some(root) = lookup("MQTT_TOPIC") {
            self.mqtt.topic_root = root;
        }
        if let Some(cmd) = lookup("RTL_433_CMD") {
            self.decoder.command = cmd;
        }
        if let Some(debug) = lookup("DEBUG") {
            self.verbose = matches!(
                debug.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if cli.verbose {
            self.verbose = true;
        }
        if let Some(cmd) = &cli.decoder {
            self.decoder.command = cmd.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "mqtt.qos must be 0, 1 or 2 (got {})",
                self.mqtt.qos
            )));
        }
        let root = &self.mqtt.topic_root;
        if root.is_empty() || root.starts_with('/') || root.ends_with('/') {
            return Err(ConfigError::Invalid(format!("mqtt.topic_root '{root}'")));
        }
        if root.contains(['+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "mqtt.topic_root '{root}' contains a wildcard"
            )));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Invalid("mqtt.channel_capacity must be > 0".into()));
        }
        self.decoder.argv()?;
        self.decoder.important_regex()?;
        Ok(())
    }
}

/**
 * RTL2MQTT - Entry point of the rtl_433 -> MQTT bridge
 *
 * ROLE : loads the configuration, connects to the broker, starts rtl_433 and
 * feeds every output line through the pipeline.
 *
 * TERMINATION : the program exits with the decoder's exit code as soon as the
 * decoder stops. There is no other shutdown path.
 */

use anyhow::{Context, Result};
use clap::Parser;
use rtl2mqtt::{mqtt, setup_logging, Cli, Config, DecoderProcess, DispatchContext, ModelRegistry, Pipeline};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            // no-op when the configured subscriber is already installed
            setup_logging(false);
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(&cli).context("Failed to load configuration")?;
    setup_logging(config.verbose);

    info!("rtl2mqtt {} starting", env!("CARGO_PKG_VERSION"));
    match &config.source {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file, using defaults and environment"),
    }
    if config.verbose {
        debug!("Debugging messages enabled");
    }

    let (client, _eventloop) = mqtt::connect(&config.mqtt, config.verbose);

    let registry = ModelRegistry::with_builtin(&config.models.climate);
    info!("Handling models: [{}]", registry.models().join(", "));
    let ctx = DispatchContext {
        topic_root: config.mqtt.topic_root.clone(),
        qos: config.mqtt.qos(),
    };
    let mut pipeline = Pipeline::new(registry, ctx, client);

    info!("Starting RTL433");
    let argv = config.decoder.argv()?;
    let mut decoder = DecoderProcess::start(&argv, config.decoder.important_regex()?, config.verbose)
        .context("Failed to launch decoder")?;

    let code = pipeline.run(&mut decoder).await.context("Decoder output failed")?;
    Ok(code)
}

//! `rtl2mqtt` library.
//!
//! The binary (`src/main.rs`) handles CLI parsing and the process exit code. Everything between a decoder line and a broker message lives here:
//!
//! ```text
//! decoder (lines) -> reading (parse) -> models (dispatch) -> discovery (dedup) -> mqtt (publish)
//! ```
//!
//! [`pipeline::Pipeline`] wires those stages together, one line at a time.

pub mod config;
pub mod decoder;
pub mod discovery;
pub mod models;
pub mod mqtt;
pub mod pipeline;
pub mod reading;

pub use config::{Cli, Config};
pub use decoder::{DecoderProcess, LaunchError, LineEvent, ProcessState};
pub use discovery::{DiscoveryCache, DiscoveryDescriptor};
pub use models::{Dispatch, DispatchContext, DispatchError, ModelHandler, ModelRegistry};
pub use mqtt::{Publish, PublishDescriptor, PublishError};
pub use pipeline::Pipeline;
pub use reading::Reading;

/// Installs the global fmt subscriber at INFO, or DEBUG when `verbose`.
///
/// Returns false when a subscriber is already installed; the first one wins.
pub fn setup_logging(verbose: bool) -> bool {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

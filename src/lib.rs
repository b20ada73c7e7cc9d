//! Wookiee Unicaster engine library — see `SPEC_FULL.md` for the full
//! design. `main.rs` is a thin CLI shell around [`run`].

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod slot;
pub mod socket;
pub mod supervisor;
pub mod worker;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, Role};
use crate::error::EngineError;

/// Runs the engine to completion (i.e. until a shutdown signal arrives),
/// dispatching to the SERVER or CLIENT role per spec §2.
pub async fn run(config: Config) -> Result<(), EngineError> {
    let cancel = CancellationToken::new();
    match config.role {
        Role::Server => server::run(config, cancel).await,
        Role::Client => client::run(config, cancel).await,
    }
}

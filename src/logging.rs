//! Terminal logging setup (spec §7, §10.4), adapted from the teacher's
//! `log.rs` `CombinedLogger`/`TermLogger` stack down to a single terminal
//! logger appropriate for a CLI daemon.

use anyhow::{Context, Result};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

/// `-q` forces `Warn` regardless of the config file's `logging_level`.
pub fn init(level: LevelFilter, quiet: bool) -> Result<()> {
    let level = if quiet { LevelFilter::Warn.min(level) } else { level };

    let config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap()
        .add_filter_ignore_str("mio")
        .build();

    TermLogger::init(level, config, TerminalMode::Mixed, ColorChoice::Auto)
        .context("failed to initialize terminal logger")
}

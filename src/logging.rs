use std::io::IsTerminal;

use clap::ColorChoice;
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::style::ProgressStyle;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding `tracing` filter directives.
pub const LOG_ENV_VAR: &str = "POST_CLUSTERS_LOG";

/// Install the global subscriber. `level` comes from the CLI verbosity flag and is the default
/// directive; anything set in `POST_CLUSTERS_LOG` takes precedence. `color` decides whether log
/// lines carry ANSI escapes.
pub fn setup_logger(level: Option<tracing::Level>, color: ColorChoice) {
    let indicatif_layer = IndicatifLayer::new();

    let default_level = match level {
        Some(level) => LevelFilter::from_level(level),
        None => LevelFilter::OFF,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy()
        // The HTTP stack is chatty at debug.
        .add_directive("hyper_util=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"));

    let fmt = fmt::layer()
        .with_ansi(use_ansi(color, std::io::stderr().is_terminal()))
        .with_target(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_writer(indicatif_layer.get_stderr_writer())
        .pretty();

    tracing_subscriber::registry()
        .with(fmt)
        .with(indicatif_layer)
        .with(env_filter)
        .init();
}

/// `Auto` follows whether stderr is a terminal.
fn use_ansi(color: ColorChoice, stderr_is_terminal: bool) -> bool {
    match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => stderr_is_terminal,
    }
}

/// Shared style for the determinate progress bars (embedding, labeling).
pub fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .expect("static progress template")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_choice_controls_ansi_output() {
        assert!(use_ansi(ColorChoice::Always, false));
        assert!(!use_ansi(ColorChoice::Never, true));
        assert!(use_ansi(ColorChoice::Auto, true));
        assert!(!use_ansi(ColorChoice::Auto, false));
    }
}

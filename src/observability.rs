//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout stays clean for the dashboard URL and
//! subcommand output. `RUST_LOG` takes precedence over `-v`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "astra_monitor=info,tower_http=warn",
        1 => "astra_monitor=debug,tower_http=debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init(verbose: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .try_init()?;

    Ok(())
}

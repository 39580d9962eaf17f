//! Log subscriber construction
//!
//! The binary runs each command under the returned dispatcher with
//! `tracing::dispatcher::with_default`; library code only emits events.

use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogArgs, LogFormat};

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "vault_piv_helper=debug,info"
    } else {
        "info"
    }
}

/// Build a stderr subscriber for the given log settings
pub fn dispatch(args: &LogArgs) -> Dispatch {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(args.verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Text => Dispatch::new(registry.with(fmt::layer().with_writer(std::io::stderr))),
        LogFormat::Json => Dispatch::new(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    }
}

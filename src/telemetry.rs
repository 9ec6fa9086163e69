//! Log output for suite binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive for a `--v` level.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "kube_e2e=warn",
        1 => "kube_e2e=info",
        2 => "kube_e2e=debug",
        _ => "kube_e2e=trace",
    }
}

/// Install a global subscriber. `RUST_LOG` wins over `verbosity`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(verbosity: u8) -> bool {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity))),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(default_directive(0), "kube_e2e=warn");
        assert_eq!(default_directive(2), "kube_e2e=debug");
        assert_eq!(default_directive(9), "kube_e2e=trace");
    }

    #[test]
    fn directives_parse() {
        for v in 0..4 {
            assert!(default_directive(v).parse::<tracing_subscriber::filter::Directive>().is_ok());
        }
    }

    #[test]
    fn second_init_is_rejected() {
        init_tracing(1);
        assert!(!init_tracing(1));
    }
}

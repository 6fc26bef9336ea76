//! pidpool-broker - Broker-side packet identifier tracking.
//!
//! Ties the pools from `pidpool-core` into a broker session:
//! - [`Config`]: strategy selection, inflight window and logging, loaded from
//!   TOML plus `PIDPOOL__` environment overrides
//! - [`OutboundFlow`]: per-client tracking of acknowledged exchanges
//! - [`SessionSnapshot`]: the in-flight state a restored session seeds its
//!   pool with
//!
//! # Example
//!
//! ```
//! use pidpool_broker::{Config, ExchangeKind, OutboundFlow, QoS, SessionSnapshot};
//!
//! let config = Config::parse("[pool]\nstrategy = \"ranges\"").unwrap();
//! let mut flow = OutboundFlow::new("sensor-1", &config.pool);
//!
//! // Persisted session had packet id 1 in flight.
//! let snapshot = SessionSnapshot::new("sensor-1")
//!     .with_inflight(1, ExchangeKind::Publish(QoS::AtLeastOnce));
//! flow.restore(&snapshot).unwrap();
//!
//! let id = flow.begin(ExchangeKind::Subscribe).unwrap();
//! assert_eq!(id, 2);
//! flow.complete(id);
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod session;

pub use crate::config::{Config, ConfigError, LogConfig, PoolConfig, PoolStrategy};
pub use error::{FlowError, Result};
pub use flow::{Exchange, OutboundFlow};
pub use session::{ExchangeKind, InflightRecord, QoS, SessionSnapshot};

/// Initialize `env_logger` with the configured level.
///
/// `RUST_LOG` still takes precedence. Does nothing if a logger is already
/// installed.
pub fn init_logging(config: &LogConfig) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.level),
    )
    .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        let config = LogConfig {
            level: "debug".to_string(),
        };
        init_logging(&config);
        init_logging(&config);
        log::debug!("logger initialized");
    }
}

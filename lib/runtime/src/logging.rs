// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Serval logging module.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `SERVAL_LOGGING_CONFIG_PATH` environment variable.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `SERVAL_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters can be configured using the `SERVAL_LOG` environment variable or by setting the
//! `log_filters` key in the TOML configuration file. Filters are comma-separated key-value
//! pairs where the key is the crate or module name and the value is the log level. The
//! default log level is `info`.
//!
//! Example:
//! ```toml
//! log_level = "error"
//!
//! [log_filters]
//! "serval_serving" = "debug"
//! "serval_serving::manager" = "trace"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Environment variable holding extra filter directives.
const ENV_LOG_FILTERS: &str = "SERVAL_LOG";

/// Environment variable pointing at a TOML logging configuration file.
const ENV_LOGGING_CONFIG_PATH: &str = "SERVAL_LOGGING_CONFIG_PATH";

/// Environment variable enabling JSONL output.
const ENV_LOGGING_JSONL: &str = "SERVAL_LOGGING_JSONL";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::from([("figment".to_string(), "warn".to_string())]),
        }
    }
}

impl LoggingConfig {
    fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(LoggingConfig::default()));
        if let Ok(path) = std::env::var(ENV_LOGGING_CONFIG_PATH) {
            figment = figment.merge(Toml::file(path));
        }
        figment
    }

    fn from_settings() -> LoggingConfig {
        Self::figment().extract().unwrap_or_default()
    }

    /// Assemble `EnvFilter` directives: base level, then per-target filters
    /// from the config file, then `SERVAL_LOG` overrides.
    fn filter_directives(&self) -> String {
        let mut directives = vec![self.log_level.clone()];
        for (target, level) in &self.log_filters {
            directives.push(format!("{target}={level}"));
        }
        if let Ok(extra) = std::env::var(ENV_LOG_FILTERS) {
            for directive in extra.split(',').filter(|d| !d.trim().is_empty()) {
                directives.push(directive.trim().to_string());
            }
        }
        directives.join(",")
    }
}

/// Returns true when the named environment variable is set to a truthy value
/// (`1`, `true`, `on`, `yes`, case-insensitive).
pub fn env_is_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        Err(_) => false,
    }
}

/// Initialize the global tracing subscriber. Idempotent; only the first call
/// installs the subscriber, later calls are no-ops so tests may call this
/// freely.
pub fn init() {
    INIT.call_once(|| {
        let config = LoggingConfig::from_settings();
        let filter = EnvFilter::builder().parse_lossy(config.filter_directives());

        if env_is_truthy(ENV_LOGGING_JSONL) {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_ansi(false))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_start_with_base_level() {
        let config = LoggingConfig::default();
        let directives = config.filter_directives();
        assert!(directives.starts_with("info"));
        assert!(directives.contains("figment=warn"));
    }

    #[test]
    fn per_target_filters_are_appended() {
        let config = LoggingConfig {
            log_level: "warn".to_string(),
            log_filters: HashMap::from([("serval_serving".to_string(), "trace".to_string())]),
        };
        let directives = config.filter_directives();
        assert!(directives.starts_with("warn"));
        assert!(directives.contains("serval_serving=trace"));
    }

    #[test]
    fn truthy_parsing() {
        unsafe { std::env::set_var("SERVAL_TEST_TRUTHY", "TRUE") };
        assert!(env_is_truthy("SERVAL_TEST_TRUTHY"));
        unsafe { std::env::set_var("SERVAL_TEST_TRUTHY", "0") };
        assert!(!env_is_truthy("SERVAL_TEST_TRUTHY"));
        assert!(!env_is_truthy("SERVAL_TEST_TRUTHY_UNSET"));
    }
}

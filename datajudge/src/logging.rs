//! Logging utilities and configuration for datajudge.
//!
//! Constraint evaluation emits structured `tracing` events. Generated SQL can
//! be long, so query logging is gated and truncated through [`LogConfig`],
//! which every [`ExecutionContext`](crate::core::ExecutionContext) carries.

/// What constraint evaluation logs, carried by every execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log every query sent to the engine
    pub log_queries: bool,
    /// Log the verdict of every comparison
    pub log_constraint_details: bool,
    /// SQL text and other long fields are cut to this many bytes
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_queries: true,
            log_constraint_details: false,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    pub fn with_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn with_constraint_details(mut self, enabled: bool) -> Self {
        self.log_constraint_details = enabled;
        self
    }

    pub fn with_max_field_length(mut self, max_field_length: usize) -> Self {
        self.max_field_length = max_field_length;
        self
    }
}

/// Logs an executed query at debug level if query logging is enabled.
#[macro_export]
macro_rules! log_query {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_queries {
            tracing::debug!($($arg)*);
        }
    };
}

/// Macro for conditional constraint logging.
#[macro_export]
macro_rules! log_constraint {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_constraint_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Utilities for installing a `tracing` subscriber.
pub mod setup {
    use tracing::Level;

    /// Configuration for datajudge's logging setup.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for datajudge components specifically
        pub judge_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                judge_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a configuration for development use.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                judge_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        /// Sets the log level for the application.
        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        /// Sets the log level for datajudge components.
        pub fn with_judge_level(mut self, level: Level) -> Self {
            self.judge_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},datajudge={}",
                    self.level.as_str().to_lowercase(),
                    self.judge_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs a global subscriber according to `config`.
    ///
    /// `RUST_LOG` takes precedence over the configured filter. Fails if a
    /// global subscriber is already installed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use datajudge::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::development().with_json_format(true)).unwrap();
    /// assert!(init_logging(LoggingConfig::default()).is_err());
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::setup::LoggingConfig;
    use super::*;
    use tracing::Level;

    #[test]
    fn test_log_config_builders() {
        let config = LogConfig::default();
        assert!(config.log_queries);
        assert!(!config.log_constraint_details);
        assert_eq!(config.max_field_length, 256);

        let config = config
            .with_queries(false)
            .with_constraint_details(true)
            .with_max_field_length(64);
        assert!(!config.log_queries);
        assert!(config.log_constraint_details);
        assert_eq!(config.max_field_length, 64);
    }

    #[test]
    fn test_truncate_field() {
        assert_eq!(truncate_field("hello", 10), "hello");
        assert_eq!(
            truncate_field("SELECT COUNT(*) FROM orders", 6),
            "SELECT...(truncated)"
        );
    }

    #[test]
    fn test_truncate_field_respects_char_boundaries() {
        assert_eq!(truncate_field("ääää", 3), "ä...(truncated)");
    }

    #[test]
    fn test_env_filter() {
        let config = LoggingConfig::default().with_level(Level::WARN);
        assert_eq!(config.env_filter(), "warn,datajudge=debug");

        let config = LoggingConfig::development()
            .with_judge_level(Level::TRACE)
            .with_env_filter("datajudge=trace");
        assert_eq!(config.env_filter(), "datajudge=trace");
    }
}

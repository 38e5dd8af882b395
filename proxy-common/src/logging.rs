use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
}

/// Logging configuration shared by all lab binaries
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit one JSON object per event instead of human readable lines
    pub json_format: bool,

    /// Include file and line number information
    pub include_file_info: bool,

    /// Colored output (ignored for JSON)
    pub enable_colors: bool,

    /// Per-target overrides, e.g. `hyper=warn`
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("tower_http".to_string(), "info".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_file_info: false,
            enable_colors: true,
            module_levels,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    fn build_filter(&self) -> Result<EnvFilter, LoggingError> {
        // RUST_LOG wins over the configured levels when present
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        if !levels::is_valid_level(&self.level) {
            return Err(LoggingError::InvalidDirective {
                directive: self.level.clone(),
                reason: "unknown level".to_string(),
            });
        }

        let mut filter = EnvFilter::new(&self.level);
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            let parsed = directive
                .parse::<Directive>()
                .map_err(|e| LoggingError::InvalidDirective {
                    directive: directive.clone(),
                    reason: e.to_string(),
                })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Initialize the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.build_filter()?;

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_file(config.include_file_info)
            .with_line_number(config.include_file_info)
    });
    let text_layer = (!config.json_format).then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(config.include_file_info)
            .with_line_number(config.include_file_info)
            .with_ansi(config.enable_colors)
    });

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();

    match result {
        Ok(_) => tracing::debug!("Logging initialized with level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }

    Ok(())
}

/// Log level utilities
pub mod levels {
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json_format);
        assert!(config.enable_colors);
        assert_eq!(config.module_levels.get("hyper").map(String::as_str), Some("warn"));
    }

    #[test]
    fn test_invalid_module_directive_is_reported() {
        std::env::remove_var("RUST_LOG");
        let mut config = LoggingConfig::default();
        config
            .module_levels
            .insert("proxy_core".to_string(), "loud".to_string());
        let err = config.build_filter().unwrap_err();
        assert!(err.to_string().contains("proxy_core=loud"));
    }

    #[test]
    fn test_unknown_base_level_is_reported() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig::default().with_level("verbose");
        assert!(config.build_filter().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        assert!(levels::is_valid_level("info"));
        assert!(levels::is_valid_level("DEBUG"));
        assert!(!levels::is_valid_level("verbose"));
        assert!(!levels::is_valid_level(""));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default().with_level("debug");
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}

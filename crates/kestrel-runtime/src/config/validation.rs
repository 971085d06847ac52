//! Configuration validation utilities.

use kestrel_framework::SafetyScreen;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, KestrelConfig, LimitsConfig, LoggingConfig, PluginsConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &KestrelConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_bot_config(&config.bot)?;
    validate_limits_config(&config.limits)?;
    validate_plugins_config(&config.plugins)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.file_prefix.trim().is_empty() {
        return Err(ConfigError::missing_field("logging.file_prefix"));
    }
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.require_prefix && bot.prefixes.iter().all(|p| p.is_empty()) {
        return Err(ConfigError::validation(
            "bot.prefixes must contain a non-empty prefix when bot.require_prefix is on",
        ));
    }
    Ok(())
}

fn validate_limits_config(limits: &LimitsConfig) -> ConfigResult<()> {
    if limits.rate_window_ms == 0 {
        return Err(ConfigError::validation("limits.rate_window_ms must be greater than 0"));
    }
    if limits.spam_window_ms == 0 {
        return Err(ConfigError::validation("limits.spam_window_ms must be greater than 0"));
    }
    if limits.spam_threshold == 0 {
        return Err(ConfigError::validation("limits.spam_threshold must be greater than 0"));
    }
    if limits.notice_cache_cap == 0 {
        return Err(ConfigError::validation("limits.notice_cache_cap must be greater than 0"));
    }
    if limits.correlation_capacity == 0 {
        return Err(ConfigError::validation(
            "limits.correlation_capacity must be greater than 0",
        ));
    }
    positive_interval("limits.limiter_sweep_secs", limits.limiter_sweep_secs)?;
    positive_interval("limits.spam_sweep_secs", limits.spam_sweep_secs)?;
    positive_interval("limits.notice_clear_secs", limits.notice_clear_secs)?;
    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if plugins.core_dir.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("plugins.core_dir"));
    }
    if plugins.max_execution_ms == 0 {
        return Err(ConfigError::validation("plugins.max_execution_ms must be greater than 0"));
    }
    if plugins.failure_threshold == 0 {
        return Err(ConfigError::validation("plugins.failure_threshold must be greater than 0"));
    }
    positive_interval("plugins.health_check_secs", plugins.health_check_secs)?;
    positive_interval("plugins.metrics_cleanup_secs", plugins.metrics_cleanup_secs)?;

    SafetyScreen::with_patterns(&plugins.deny_patterns).map_err(|e| {
        ConfigError::validation(format!("plugins.deny_patterns contains an invalid regex: {e}"))
    })?;
    Ok(())
}

/// Interval timers cannot tick at a zero period.
fn positive_interval(field: &str, secs: u64) -> ConfigResult<()> {
    if secs == 0 {
        return Err(ConfigError::validation(format!("{field} must be greater than 0")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&KestrelConfig::default()).is_ok());
    }

    #[test]
    fn prefix_required_but_missing() {
        let mut config = KestrelConfig::default();
        config.bot.prefixes = vec![String::new()];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));

        config.bot.require_prefix = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_windows_and_thresholds_rejected() {
        let mut config = KestrelConfig::default();
        config.limits.spam_threshold = 0;
        assert!(validate_config(&config).is_err());

        let mut config = KestrelConfig::default();
        config.plugins.max_execution_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = KestrelConfig::default();
        config.plugins.health_check_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bad_deny_pattern_rejected() {
        let mut config = KestrelConfig::default();
        config.plugins.deny_patterns = vec!["(unclosed".into()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("deny_patterns"));
    }
}

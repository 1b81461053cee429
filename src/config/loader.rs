/// Layered configuration: a TOML file overridden by environment variables.
use crate::error::{EngineError, Result};
use crate::types::ProcessConfig;

pub fn load_config(path: &str) -> Result<ProcessConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::default()
                .separator("_")
                .list_separator(",")
                .with_list_parse_key("frontend_origins")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| EngineError::ConfigError(format!("failed to build config: {}", e)))?;

    let config: ProcessConfig = settings
        .try_deserialize()
        .map_err(|e| EngineError::ConfigError(format!("failed to parse config: {}", e)))?;

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ProcessConfig) -> Result<()> {
    if config.port == 0 {
        return Err(EngineError::ConfigError("port must be nonzero".to_string()));
    }
    if config.frontend_origins.is_empty() {
        return Err(EngineError::ConfigError("frontend_origins is empty".to_string()));
    }
    if config.secret_key.is_empty() {
        return Err(EngineError::ConfigError("secret_key is empty".to_string()));
    }
    if config.broker_client_code.is_empty() || config.broker_totp_secret.is_empty() {
        return Err(EngineError::ConfigError("broker credentials are incomplete".to_string()));
    }
    if config.trading.target_percent <= 0.0 {
        return Err(EngineError::ConfigError(format!(
            "invalid target_percent: {}",
            config.trading.target_percent
        )));
    }
    if config.trading.max_margin <= 0.0 {
        return Err(EngineError::ConfigError(format!(
            "invalid max_margin: {}",
            config.trading.max_margin
        )));
    }
    if config.trading.candle_interval_minutes < 1 {
        return Err(EngineError::ConfigError("candle_interval_minutes must be >= 1".to_string()));
    }
    if config.trading.session_max_seconds < 1 {
        return Err(EngineError::ConfigError("session_max_seconds must be >= 1".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingConfig;

    fn valid_config() -> ProcessConfig {
        ProcessConfig {
            port: 8080,
            frontend_origins: vec!["http://localhost:3000".to_string()],
            secret_key: "secret".to_string(),
            user_credentials_file: "users.json".to_string(),
            stocks_database_file: "watchlist.csv".to_string(),
            broker_client_code: "CLIENT".to_string(),
            broker_password: "pw".to_string(),
            broker_totp_secret: "ABCDEFGH".to_string(),
            broker_api_key: "key".to_string(),
            telegram_bot_token: None,
            telegram_channel_id: None,
            enable_paper_trading: true,
            trading: TradingConfig::default(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = valid_config();
        config.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_empty_frontend_origins() {
        let mut config = valid_config();
        config.frontend_origins.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_missing_broker_credentials() {
        let mut config = valid_config();
        config.broker_totp_secret.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_non_positive_target_percent() {
        let mut config = valid_config();
        config.trading.target_percent = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_sub_minute_candle_interval() {
        let mut config = valid_config();
        config.trading.candle_interval_minutes = 0;
        assert!(validate_config(&config).is_err());
    }
}

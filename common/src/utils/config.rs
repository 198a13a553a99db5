use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;

/// How the source reader authenticates against the warehouse.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceAuthMode {
    Password,
    ExternalBrowser,
    OAuth,
}

#[derive(Clone, Deserialize, Debug)]
pub struct SourceConfig {
    pub base_url: String,
    pub warehouse: String,
    pub auth_mode: SourceAuthMode,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub oauth_token: Option<String>,
    #[serde(default = "default_source_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_source_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Deserialize, Debug)]
pub struct SinkConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
}

/// What the AI enrichment client does when the cost budget is exhausted.
/// Defaults to `hard_gate`: reject the call outright rather than degrade.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    HardGate,
    SoftDegrade,
}

fn default_budget_policy() -> BudgetPolicy {
    BudgetPolicy::HardGate
}

#[derive(Clone, Deserialize, Debug)]
pub struct AiConfig {
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    pub extraction_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: u32,
    #[serde(default = "default_budget_policy")]
    pub budget_policy: BudgetPolicy,
    pub daily_budget_usd: f64,
    /// Spend threshold that raises a C10 alert without blocking calls; must
    /// be less than or equal to `daily_budget_usd`.
    pub cost_alert_usd: f64,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
    #[serde(default = "default_embed_cache_capacity")]
    pub embed_cache_capacity: usize,
    #[serde(default = "default_max_wait_secs")]
    pub rate_limit_max_wait_secs: u64,
}

fn default_max_wait_secs() -> u64 {
    5
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_rate_limit_rps() -> u32 {
    5
}

fn default_embed_cache_capacity() -> usize {
    10_000
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct EtlConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub lease_secs: i64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    pub retry_max_attempts: u32,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_open_secs: u64,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_workers: 4,
            lease_secs: 300,
            retry_base_delay_secs: 1,
            retry_max_delay_secs: 300,
            retry_backoff_cap_exponent: 6,
            retry_max_attempts: 3,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_open_secs: 60,
        }
    }
}

impl EtlConfig {
    /// Builds the sink/AI-client retry schedule from the configured fields.
    #[must_use]
    pub fn backoff_policy(&self) -> crate::resilience::backoff::BackoffPolicy {
        crate::resilience::backoff::BackoffPolicy {
            base_delay_secs: self.retry_base_delay_secs,
            max_delay_secs: self.retry_max_delay_secs,
            backoff_cap_exponent: self.retry_backoff_cap_exponent,
            max_attempts: self.retry_max_attempts,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub ai: AiConfig,
    #[serde(default)]
    pub etl: EtlConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::default().separator("__"))
            .build()
            .map_err(ConfigError::Source)?;

        let app_config: Self = config.try_deserialize().map_err(ConfigError::Source)?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.source.auth_mode {
            SourceAuthMode::Password => {
                if self.source.username.is_none() || self.source.password.is_none() {
                    return Err(ConfigError::Invalid {
                        field: "source.auth_mode",
                        reason: "password auth requires source.username and source.password"
                            .to_string(),
                    });
                }
            }
            SourceAuthMode::OAuth => {
                if self.source.oauth_token.is_none() {
                    return Err(ConfigError::Invalid {
                        field: "source.auth_mode",
                        reason: "oauth auth requires source.oauth_token".to_string(),
                    });
                }
            }
            SourceAuthMode::ExternalBrowser => {}
        }

        if self.etl.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "etl.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.ai.daily_budget_usd < 0.0 {
            return Err(ConfigError::Invalid {
                field: "ai.daily_budget_usd",
                reason: "must be non-negative".to_string(),
            });
        }

        if self.ai.embedding_dimensions == 0 {
            return Err(ConfigError::Invalid {
                field: "ai.embedding_dimensions",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.ai.cost_alert_usd > self.ai.daily_budget_usd {
            return Err(ConfigError::Invalid {
                field: "ai.cost_alert_usd",
                reason: "must not exceed ai.daily_budget_usd".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            source: SourceConfig {
                base_url: "https://warehouse.example.com".to_string(),
                warehouse: "WH_ETL".to_string(),
                auth_mode: SourceAuthMode::Password,
                username: Some("svc_etl".to_string()),
                password: Some("secret".to_string()),
                oauth_token: None,
                request_timeout_secs: 30,
            },
            sink: SinkConfig {
                surrealdb_address: "mem://".to_string(),
                surrealdb_username: "root".to_string(),
                surrealdb_password: "root".to_string(),
                surrealdb_namespace: "ns".to_string(),
                surrealdb_database: "db".to_string(),
            },
            ai: AiConfig {
                openai_api_key: "key".to_string(),
                openai_base_url: default_openai_base_url(),
                extraction_model: "gpt-test".to_string(),
                embedding_model: "text-embed".to_string(),
                embedding_dimensions: 1536,
                budget_policy: BudgetPolicy::HardGate,
                daily_budget_usd: 10.0,
                cost_alert_usd: 8.0,
                rate_limit_rps: 5,
                embed_cache_capacity: 1000,
                rate_limit_max_wait_secs: 5,
            },
            etl: EtlConfig::default(),
        }
    }

    #[test]
    fn password_auth_requires_credentials() {
        let mut config = base_config();
        config.source.password = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "source.auth_mode", .. })
        ));
    }

    #[test]
    fn oauth_auth_requires_token() {
        let mut config = base_config();
        config.source.auth_mode = SourceAuthMode::OAuth;
        config.source.oauth_token = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "source.auth_mode", .. })
        ));
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = base_config();
        config.etl.max_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "etl.max_workers", .. })
        ));
    }

    #[test]
    fn cost_alert_above_daily_budget_is_rejected() {
        let mut config = base_config();
        config.ai.cost_alert_usd = config.ai.daily_budget_usd + 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "ai.cost_alert_usd", .. })
        ));
    }
}

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub cache: CacheConfig,
    pub tokens: TokenConfig,
    pub cipher_key: Secret<String>,
    pub flow: FlowConfig,
    pub security: SecurityConfig,
    pub bootstrap: Option<BootstrapConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis: RedisConfig,
    pub identity_ttl_seconds: u64,
    pub provider_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub signing_secret: Secret<String>,
    pub access_token_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Externally reachable base URL of this service; provider callbacks
    /// are built from it.
    pub public_url: String,
    pub login_ttl_seconds: u64,
    pub code_ttl_seconds: u64,
    pub provider_timeout_seconds: u64,
    pub refresh_interval_seconds: u64,
}

impl FlowConfig {
    pub fn login_ttl(&self) -> Duration {
        Duration::from_secs(self.login_ttl_seconds)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

/// Seed for the IAM system's own client and its identity provider.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub client_id: String,
    pub client_name: String,
    pub client_secret: Secret<String>,
    pub redirect_urls: Vec<String>,
    pub project_id: String,
    pub provider: ProviderSeed,
}

#[derive(Debug, Clone)]
pub struct ProviderSeed {
    pub id: String,
    pub name: String,
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub scopes: Vec<String>,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = BrokerConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-broker"), false)?,
            service_version: get_env(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                false,
            )?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            cache: CacheConfig {
                backend: get_env("CACHE_BACKEND", Some("memory"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                redis: RedisConfig {
                    url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
                },
                identity_ttl_seconds: parse_num(
                    "IDENTITY_CACHE_TTL_SECONDS",
                    get_env("IDENTITY_CACHE_TTL_SECONDS", Some("300"), false)?,
                )?,
                provider_ttl_seconds: parse_num(
                    "PROVIDER_CACHE_TTL_SECONDS",
                    get_env("PROVIDER_CACHE_TTL_SECONDS", Some("600"), false)?,
                )?,
            },
            tokens: TokenConfig {
                signing_secret: Secret::new(get_env(
                    "TOKEN_SIGNING_SECRET",
                    Some("dev-only-token-signing-secret"),
                    is_prod,
                )?),
                access_token_ttl_seconds: parse_num(
                    "ACCESS_TOKEN_TTL_SECONDS",
                    get_env("ACCESS_TOKEN_TTL_SECONDS", Some("3600"), false)?,
                )?,
            },
            // 32 zero bytes, base64. Dev only.
            cipher_key: Secret::new(get_env(
                "CIPHER_KEY",
                Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
                is_prod,
            )?),
            flow: FlowConfig {
                public_url: get_env("PUBLIC_URL", Some("http://localhost:8080"), is_prod)?,
                login_ttl_seconds: parse_num(
                    "LOGIN_TTL_SECONDS",
                    get_env("LOGIN_TTL_SECONDS", Some("600"), false)?,
                )?,
                code_ttl_seconds: parse_num(
                    "CODE_TTL_SECONDS",
                    get_env("CODE_TTL_SECONDS", Some("60"), false)?,
                )?,
                provider_timeout_seconds: parse_num(
                    "PROVIDER_TIMEOUT_SECONDS",
                    get_env("PROVIDER_TIMEOUT_SECONDS", Some("10"), false)?,
                )?,
                refresh_interval_seconds: parse_num(
                    "PROVIDER_REFRESH_INTERVAL_SECONDS",
                    get_env("PROVIDER_REFRESH_INTERVAL_SECONDS", Some("300"), false)?,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
            },
            bootstrap: bootstrap_from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.tokens.access_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.flow.code_ttl_seconds == 0 || self.flow.login_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOGIN_TTL_SECONDS and CODE_TTL_SECONDS must be positive"
            )));
        }

        if self.flow.refresh_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PROVIDER_REFRESH_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.cache.backend == CacheBackend::Memory {
                tracing::warn!("In-memory cache in production: identity cache is per-process");
            }
        }

        Ok(())
    }
}

fn bootstrap_from_env() -> Result<Option<BootstrapConfig>, AppError> {
    let client_id = match env::var("BOOTSTRAP_CLIENT_ID") {
        Ok(id) if !id.is_empty() => id,
        _ => return Ok(None),
    };

    // Once a bootstrap client is requested all of its settings are required.
    Ok(Some(BootstrapConfig {
        client_id,
        client_name: get_env("BOOTSTRAP_CLIENT_NAME", Some("IAM Console"), false)?,
        client_secret: Secret::new(get_env("BOOTSTRAP_CLIENT_SECRET", None, false)?),
        redirect_urls: split_list(&get_env("BOOTSTRAP_REDIRECT_URLS", None, false)?),
        project_id: get_env("BOOTSTRAP_PROJECT_ID", Some("iam"), false)?,
        provider: ProviderSeed {
            id: get_env("BOOTSTRAP_PROVIDER_ID", None, false)?,
            name: get_env("BOOTSTRAP_PROVIDER_NAME", Some("Default"), false)?,
            authorization_url: get_env("BOOTSTRAP_PROVIDER_AUTHORIZATION_URL", None, false)?,
            token_url: get_env("BOOTSTRAP_PROVIDER_TOKEN_URL", None, false)?,
            userinfo_url: get_env("BOOTSTRAP_PROVIDER_USERINFO_URL", None, false)?,
            client_id: get_env("BOOTSTRAP_PROVIDER_CLIENT_ID", None, false)?,
            client_secret: Secret::new(get_env("BOOTSTRAP_PROVIDER_CLIENT_SECRET", None, false)?),
            scopes: get_env("BOOTSTRAP_PROVIDER_SCOPES", Some("openid email profile"), false)?
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        },
    }))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_num<T>(key: &str, raw: String) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            _ => Err(format!("Invalid cache backend: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_and_backend() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("redis".parse::<CacheBackend>(), Ok(CacheBackend::Redis));
        assert!("staging".parse::<Environment>().is_err());
        assert!("memcached".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn splits_comma_lists() {
        assert_eq!(
            split_list(" https://a , ,https://b"),
            vec!["https://a".to_string(), "https://b".to_string()]
        );
    }

    #[test]
    fn reports_key_on_bad_number() {
        let err = parse_num::<u64>("CODE_TTL_SECONDS", "soon".to_string()).unwrap_err();
        assert!(err.to_string().contains("CODE_TTL_SECONDS"));
    }

    #[test]
    fn missing_required_value_is_config_error() {
        let err = get_env("IDENTITY_BROKER_TEST_UNSET_KEY", None, false).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(
            get_env("IDENTITY_BROKER_TEST_UNSET_KEY", Some("x"), false).unwrap(),
            "x"
        );
    }
}

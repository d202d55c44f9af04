//! Environment-driven bot configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BOT_USERNAME: &str = "PeopleRatingsBot";

/// Which payment provider issues invoices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    YooMoney,
    CryptoPay,
}

/// Credentials of the selected provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    YooMoney {
        wallet: String,
        access_token: String,
    },
    CryptoPay {
        api_key: String,
        testnet: bool,
        asset: String,
    },
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::YooMoney { .. } => ProviderKind::YooMoney,
            ProviderConfig::CryptoPay { .. } => ProviderKind::CryptoPay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub telegram_token: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub bot_username: String,
    pub admin_ids: Vec<i64>,
    pub provider: ProviderConfig,
    pub sweep_interval: Duration,
    pub payment_grace: chrono::Duration,
    pub check_countdown_secs: u32,
}

impl BotConfig {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let provider = match vars.optional("PAYMENT_PROVIDER").as_deref() {
            None | Some("yoomoney") => ProviderConfig::YooMoney {
                wallet: vars.required("YOOMONEY_WALLET")?,
                access_token: vars.required("YOOMONEY_ACCESS_TOKEN")?,
            },
            Some("cryptopay") => ProviderConfig::CryptoPay {
                api_key: vars.required("CRYPTOBOT_API_KEY")?,
                testnet: vars.flag("CRYPTOBOT_TESTNET", true)?,
                asset: vars
                    .optional("CRYPTOBOT_ASSET")
                    .unwrap_or_else(|| "TRX".to_string()),
            },
            Some(other) => return Err(ConfigError::UnknownProvider(other.to_string())),
        };

        let admin_ids = match vars.optional("ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| {
                    id.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                        key: "ADMIN_IDS",
                        value: id.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            telegram_token: vars.required("TELEGRAM_BOT_TOKEN")?,
            database_url: vars.required("DATABASE_URL")?,
            database_max_connections: vars.number("DATABASE_MAX_CONNECTIONS", 5)?,
            bot_username: vars
                .optional("BOT_USERNAME")
                .unwrap_or_else(|| DEFAULT_BOT_USERNAME.to_string()),
            admin_ids,
            provider,
            sweep_interval: Duration::from_secs(vars.number("SWEEP_INTERVAL_SECS", 300)?),
            payment_grace: chrono::Duration::minutes(vars.number("PAYMENT_GRACE_MINUTES", 10)?),
            check_countdown_secs: vars.number("CHECK_COUNTDOWN_SECS", 10)?,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::MissingVar { key })
    }

    fn number<T: std::str::FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes") => Ok(true),
            Some("0" | "false" | "no") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key,
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid value `{value}` in `{key}`")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown payment provider `{0}` (expected yoomoney or cryptopay)")]
    UnknownProvider(String),
}

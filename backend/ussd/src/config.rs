//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{GatewayError, Result};
use crate::locale::Locale;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the HTTP server (USSD callback + REST API)
    pub api_port: u16,
    /// Path to the SQLite database holding the pledge log
    pub database_url: String,
    /// Locale assigned to every new session
    pub default_locale: Locale,
    /// Donation limits and round-up unit
    pub policy: DonationPolicy,
    /// Idle sessions older than this are purged
    pub session_ttl_secs: u64,
    /// How often (in seconds) the idle-session sweeper runs
    pub session_sweep_secs: u64,
    /// Upper bound on a single receipt SMS call
    pub receipt_timeout_secs: u64,
    /// Upper bound on a single ledger submission, retries included
    pub ledger_timeout_secs: u64,
    /// Optional JSON file with the project catalog
    pub catalog_path: Option<String>,
    /// Optional JSON-RPC relay in front of the donation contract
    pub ledger_rpc_url: Option<String>,
    /// Optional SMS gateway used for receipts
    pub sms: Option<SmsConfig>,
}

/// Amount bounds and round-up unit, all in minor units of `currency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationPolicy {
    pub min_amount: u64,
    pub max_amount: u64,
    pub round_up_unit: u64,
    pub currency: String,
}

impl DonationPolicy {
    /// Inclusive on both ends.
    pub fn accepts(&self, amount: u64) -> bool {
        (self.min_amount..=self.max_amount).contains(&amount)
    }
}

impl Default for DonationPolicy {
    fn default() -> Self {
        Self {
            min_amount: 100,
            max_amount: 10_000,
            round_up_unit: 100,
            currency: "KES".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_url: String,
    pub api_key: String,
    pub username: String,
    pub sender_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_locale = {
            let code = lookup("DEFAULT_LOCALE").unwrap_or_else(|| "en".to_string());
            Locale::from_code(&code).ok_or_else(|| {
                GatewayError::Config(format!("Unsupported DEFAULT_LOCALE: {code}"))
            })?
        };

        let policy = DonationPolicy {
            min_amount: parse_or(&lookup, "MIN_AMOUNT", 100)?,
            max_amount: parse_or(&lookup, "MAX_AMOUNT", 10_000)?,
            round_up_unit: parse_or(&lookup, "ROUND_UP_UNIT", 100)?,
            currency: lookup("CURRENCY").unwrap_or_else(|| "KES".to_string()),
        };
        if policy.min_amount == 0 {
            return Err(GatewayError::Config("MIN_AMOUNT must be positive".to_string()));
        }
        if policy.min_amount > policy.max_amount {
            return Err(GatewayError::Config(
                "MIN_AMOUNT must not exceed MAX_AMOUNT".to_string(),
            ));
        }
        if policy.round_up_unit == 0 {
            return Err(GatewayError::Config("ROUND_UP_UNIT must be positive".to_string()));
        }

        let sms = match (
            lookup("SMS_API_URL"),
            lookup("SMS_API_KEY"),
            lookup("SMS_USERNAME"),
        ) {
            (Some(api_url), Some(api_key), Some(username)) => Some(SmsConfig {
                api_url,
                api_key,
                username,
                sender_id: lookup("SMS_SENDER_ID"),
            }),
            _ => None,
        };

        Ok(Config {
            api_port: parse_or(&lookup, "API_PORT", 3002)?,
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:./pifp_ussd.db".to_string()),
            default_locale,
            policy,
            session_ttl_secs: parse_or(&lookup, "SESSION_TTL_SECS", 300)?,
            session_sweep_secs: parse_or(&lookup, "SESSION_SWEEP_SECS", 60)?,
            receipt_timeout_secs: parse_or(&lookup, "RECEIPT_TIMEOUT_SECS", 10)?,
            ledger_timeout_secs: parse_or(&lookup, "LEDGER_TIMEOUT_SECS", 30)?,
            catalog_path: lookup("CATALOG_PATH"),
            ledger_rpc_url: lookup("LEDGER_RPC_URL"),
            sms,
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_secs.max(1))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("Invalid {key}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_port, 3002);
        assert_eq!(config.default_locale, Locale::En);
        assert_eq!(config.policy, DonationPolicy::default());
        assert!(config.sms.is_none());
        assert!(config.ledger_rpc_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("API_PORT", "8080"),
            ("DEFAULT_LOCALE", "sw"),
            ("MIN_AMOUNT", " 50 "),
            ("MAX_AMOUNT", "5000"),
            ("CURRENCY", "UGX"),
        ])
        .unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.default_locale, Locale::Sw);
        assert_eq!(config.policy.min_amount, 50);
        assert_eq!(config.policy.max_amount, 5000);
        assert_eq!(config.policy.currency, "UGX");
    }

    #[test]
    fn sms_requires_url_key_and_username() {
        let partial = config_from(&[("SMS_API_URL", "https://sms.example"), ("SMS_API_KEY", "k")])
            .unwrap();
        assert!(partial.sms.is_none());

        let full = config_from(&[
            ("SMS_API_URL", "https://sms.example"),
            ("SMS_API_KEY", "k"),
            ("SMS_USERNAME", "pifp"),
        ])
        .unwrap();
        let sms = full.sms.unwrap();
        assert_eq!(sms.username, "pifp");
        assert!(sms.sender_id.is_none());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = config_from(&[("MIN_AMOUNT", "500"), ("MAX_AMOUNT", "100")]).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn rejects_zero_unit_and_bad_numbers() {
        assert!(config_from(&[("ROUND_UP_UNIT", "0")]).is_err());
        assert!(config_from(&[("MIN_AMOUNT", "0")]).is_err());
        assert!(config_from(&[("API_PORT", "not-a-port")]).is_err());
        assert!(config_from(&[("DEFAULT_LOCALE", "de")]).is_err());
    }

    #[test]
    fn policy_bounds_are_inclusive() {
        let policy = DonationPolicy::default();
        assert!(policy.accepts(100));
        assert!(policy.accepts(10_000));
        assert!(!policy.accepts(99));
        assert!(!policy.accepts(10_001));
    }
}

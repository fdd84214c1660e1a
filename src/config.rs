//! Runtime configuration, read from the environment (and `.env`).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Absent means everything lives in memory.
    pub database_url: Option<String>,
    pub port: u16,
    pub nats_url: Option<String>,
    pub environment: String,
    pub reference_number_prefix: String,
    /// Always locate customers by their profile country.
    pub force_profile_country: bool,
    pub public_base_url: String,
    pub currency: String,
    pub json_logs: bool,
    pub webhooks: WebhookSettings,
    pub cybersource: CybersourceSettings,
}

#[derive(Clone, Debug)]
pub struct WebhookSettings {
    pub retry_max: u32,
    pub retry_cooldown: Duration,
    pub timeout: Duration,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self { retry_max: 4, retry_cooldown: Duration::from_secs(60), timeout: Duration::from_secs(30) }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CybersourceSettings {
    pub merchant_id: String,
    /// Secure Acceptance hosted checkout.
    pub secure_acceptance_url: String,
    pub access_key: String,
    pub profile_id: String,
    pub security_key: String,
    /// REST API host, e.g. `apitest.cybersource.com`.
    pub rest_api_host: String,
    pub rest_key_id: String,
    /// Base64 shared secret for REST HTTP signatures.
    pub rest_shared_secret: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());
        let defaults = WebhookSettings::default();
        Ok(Self {
            database_url: get("DATABASE_URL"),
            port: parse(&lookup, "PORT", 8083)?,
            nats_url: get("NATS_URL"),
            environment: or("ENVIRONMENT", "dev"),
            reference_number_prefix: or("REFERENCE_NUMBER_PREFIX", "uecom"),
            force_profile_country: parse(&lookup, "FORCE_PROFILE_COUNTRY", false)?,
            public_base_url: or("PUBLIC_BASE_URL", "http://localhost:8083").trim_end_matches('/').to_string(),
            currency: or("CURRENCY", "USD"),
            json_logs: get("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            webhooks: WebhookSettings {
                retry_max: parse(&lookup, "WEBHOOK_RETRY_MAX", defaults.retry_max)?,
                retry_cooldown: Duration::from_secs(parse(&lookup, "WEBHOOK_RETRY_COOLDOWN_SECS", defaults.retry_cooldown.as_secs())?),
                timeout: Duration::from_secs(parse(&lookup, "WEBHOOK_TIMEOUT_SECS", defaults.timeout.as_secs())?),
            },
            cybersource: CybersourceSettings {
                merchant_id: or("CYBERSOURCE_MERCHANT_ID", ""),
                secure_acceptance_url: or("CYBERSOURCE_SECURE_ACCEPTANCE_URL", "https://testsecureacceptance.cybersource.com/pay"),
                access_key: or("CYBERSOURCE_ACCESS_KEY", ""),
                profile_id: or("CYBERSOURCE_PROFILE_ID", ""),
                security_key: or("CYBERSOURCE_SECURITY_KEY", ""),
                rest_api_host: or("CYBERSOURCE_REST_API_HOST", "apitest.cybersource.com"),
                rest_key_id: or("CYBERSOURCE_REST_KEY_ID", ""),
                rest_shared_secret: or("CYBERSOURCE_REST_SHARED_SECRET", ""),
            },
        })
    }

    /// Settings for tests and local runs with no environment at all.
    pub fn local() -> Self {
        Self {
            database_url: None, port: 8083, nats_url: None, environment: "test".into(), reference_number_prefix: "uecom".into(),
            force_profile_country: false, public_base_url: "http://localhost:8083".into(), currency: "USD".into(), json_logs: false,
            webhooks: WebhookSettings::default(), cybersource: CybersourceSettings::default(),
        }
    }

    /// Fail early when the gateway can't possibly work.
    pub fn require_gateway(&self) -> Result<(), ConfigError> {
        if self.cybersource.security_key.is_empty() { return Err(ConfigError::Missing("CYBERSOURCE_SECURITY_KEY")); }
        if self.cybersource.access_key.is_empty() { return Err(ConfigError::Missing("CYBERSOURCE_ACCESS_KEY")); }
        if self.cybersource.profile_id.is_empty() { return Err(ConfigError::Missing("CYBERSOURCE_PROFILE_ID")); }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.port, 8083);
        assert_eq!(s.environment, "dev");
        assert_eq!(s.reference_number_prefix, "uecom");
        assert!(s.database_url.is_none());
        assert_eq!(s.webhooks.retry_max, 4);
        assert!(!s.json_logs);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let s = settings(&[("PORT", "9000"), ("FORCE_PROFILE_COUNTRY", "true"), ("LOG_FORMAT", "JSON"), ("PUBLIC_BASE_URL", "https://shop.example/")]).unwrap();
        assert_eq!(s.port, 9000);
        assert!(s.force_profile_country);
        assert!(s.json_logs);
        assert_eq!(s.public_base_url, "https://shop.example");
        assert!(matches!(settings(&[("PORT", "eighty")]), Err(ConfigError::Invalid { name: "PORT", .. })));
    }
}

//! Startup configuration read from environment variables.

use crate::analyst::DEFAULT_GEMINI_MODEL;
use crate::error::ConfigError;
use crate::fetcher::{FetchPolicy, RetryPolicy};
use crate::google::{ServiceAccountKey, SheetsAuth};
use crate::source::SourceDescriptor;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Process memory, refreshed by a background loop.
    Memory,
    /// CSV file on disk, refreshed on read once stale.
    File,
}

impl CacheMode {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheMode::Memory),
            "file" => Ok(CacheMode::File),
            _ => Err(ConfigError::InvalidCacheMode(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<SourceDescriptor>,
    pub sheets_auth: SheetsAuth,
    /// `None` selects the local fallback analyst.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub bind_addr: String,
    pub port: u16,
    pub cache_mode: CacheMode,
    pub cache_file: PathBuf,
    pub ttl: Duration,
    pub refresh_interval: Duration,
    pub fetch: FetchPolicy,
    pub model_timeout: Duration,
    pub sample_rows: usize,
    /// Request body limit for `/api/upload`.
    pub upload_max_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match var(name) {
                None => Ok(default),
                Some(value) => value
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { name, value }),
            }
        };

        let sources: Vec<SourceDescriptor> = var("SHEET_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(SourceDescriptor::new)
            .collect();
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let sheets_auth = match (var("GOOGLE_CREDS_JSON"), var("GOOGLE_SHEETS_API_KEY")) {
            (Some(json), _) => SheetsAuth::ServiceAccount(
                ServiceAccountKey::from_json(&json)
                    .map_err(|e| ConfigError::InvalidCredentials(e.to_string()))?,
            ),
            (None, Some(key)) => SheetsAuth::ApiKey(key),
            (None, None) => return Err(ConfigError::MissingCredentials),
        };

        let port = number("PORT", 10000)?;
        let port = u16::try_from(port).map_err(|_| ConfigError::InvalidNumber {
            name: "PORT",
            value: port.to_string(),
        })?;

        let cache_mode = match var("CACHE_MODE") {
            Some(mode) => CacheMode::parse(&mode)?,
            None => CacheMode::Memory,
        };
        let ttl_secs = number("CACHE_TTL_SECS", 600)?;
        let ttl = Duration::from_secs(ttl_secs);
        let (interval_name, interval_secs) = match var("REFRESH_INTERVAL_SECS") {
            Some(_) => (
                "REFRESH_INTERVAL_SECS",
                number("REFRESH_INTERVAL_SECS", 0)?,
            ),
            None => ("CACHE_TTL_SECS", ttl_secs),
        };
        // tokio intervals reject a zero period; file mode has no refresh loop
        if cache_mode == CacheMode::Memory && interval_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                name: interval_name,
                value: "0".to_string(),
            });
        }
        let refresh_interval = Duration::from_secs(interval_secs);

        let fetch = FetchPolicy {
            max_rows: number("MAX_ROWS", 5000)? as usize,
            retry: RetryPolicy {
                max_attempts: number("FETCH_MAX_ATTEMPTS", 3)?.max(1) as u32,
                backoff_base: number("FETCH_BACKOFF_BASE", 2)? as u32,
                backoff_unit: Duration::from_secs(1),
            },
            source_delay: Duration::from_millis(number("SOURCE_DELAY_MS", 1000)?),
        };

        Ok(Self {
            sources,
            sheets_auth,
            gemini_api_key: var("GOOGLE_GENAI_API_KEY").or_else(|| var("GEMINI_API_KEY")),
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            cache_mode,
            cache_file: PathBuf::from(
                var("CACHE_FILE").unwrap_or_else(|| "data_cache.csv".to_string()),
            ),
            ttl,
            refresh_interval,
            fetch,
            model_timeout: Duration::from_secs(number("MODEL_TIMEOUT_SECS", 120)?),
            sample_rows: number("SAMPLE_ROWS", 150)? as usize,
            upload_max_bytes: number("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES as u64)? as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_with_minimal_environment() {
        let config = Config::from_lookup(lookup(&[
            ("SHEET_IDS", " abc , def ,,"),
            ("GOOGLE_SHEETS_API_KEY", "key"),
        ]))
        .unwrap();

        assert_eq!(
            config.sources,
            vec![SourceDescriptor::new("abc"), SourceDescriptor::new("def")]
        );
        assert!(matches!(config.sheets_auth, SheetsAuth::ApiKey(ref k) if k == "key"));
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.gemini_model, "gemini-2.5-flash");
        assert_eq!(config.port, 10000);
        assert_eq!(config.cache_mode, CacheMode::Memory);
        assert_eq!(config.ttl, Duration::from_secs(600));
        assert_eq!(config.refresh_interval, config.ttl);
        assert_eq!(config.fetch.max_rows, 5000);
        assert_eq!(config.fetch.retry.max_attempts, 3);
        assert_eq!(config.fetch.source_delay, Duration::from_secs(1));
        assert_eq!(config.model_timeout, Duration::from_secs(120));
        assert_eq!(config.sample_rows, 150);
        assert_eq!(config.upload_max_bytes, DEFAULT_UPLOAD_MAX_BYTES);
    }

    #[test]
    fn genai_key_is_preferred_over_gemini_key() {
        let config = Config::from_lookup(lookup(&[
            ("SHEET_IDS", "abc"),
            ("GOOGLE_SHEETS_API_KEY", "key"),
            ("GEMINI_API_KEY", "gemini-key"),
            ("GOOGLE_GENAI_API_KEY", "genai-key"),
        ]))
        .unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("genai-key"));

        let config = Config::from_lookup(lookup(&[
            ("SHEET_IDS", "abc"),
            ("GOOGLE_SHEETS_API_KEY", "key"),
            ("GEMINI_API_KEY", "gemini-key"),
        ]))
        .unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("gemini-key"));
    }

    #[test]
    fn zero_refresh_period_names_the_variable_that_set_it() {
        let base = [("SHEET_IDS", "abc"), ("GOOGLE_SHEETS_API_KEY", "key")];

        let zero_ttl = [base[0], base[1], ("CACHE_TTL_SECS", "0")];
        assert!(matches!(
            Config::from_lookup(lookup(&zero_ttl)),
            Err(ConfigError::InvalidNumber { name: "CACHE_TTL_SECS", .. })
        ));

        let zero_interval = [base[0], base[1], ("REFRESH_INTERVAL_SECS", "0")];
        assert!(matches!(
            Config::from_lookup(lookup(&zero_interval)),
            Err(ConfigError::InvalidNumber { name: "REFRESH_INTERVAL_SECS", .. })
        ));

        // file mode has no refresh loop, so a zero TTL is accepted
        let file_mode = [base[0], base[1], ("CACHE_TTL_SECS", "0"), ("CACHE_MODE", "file")];
        let config = Config::from_lookup(lookup(&file_mode)).unwrap();
        assert_eq!(config.ttl, Duration::ZERO);
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("SHEET_IDS", "abc"),
            ("GOOGLE_SHEETS_API_KEY", "key"),
            ("GOOGLE_GENAI_API_KEY", "model-key"),
            ("CACHE_MODE", "File"),
            ("CACHE_FILE", "/tmp/cache.csv"),
            ("CACHE_TTL_SECS", "30"),
            ("REFRESH_INTERVAL_SECS", "5"),
            ("MAX_ROWS", "10"),
            ("PORT", "8080"),
            ("UPLOAD_MAX_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.gemini_api_key.as_deref(), Some("model-key"));
        assert_eq!(config.cache_mode, CacheMode::File);
        assert_eq!(config.cache_file, PathBuf::from("/tmp/cache.csv"));
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.fetch.max_rows, 10);
        assert_eq!(config.port, 8080);
        assert_eq!(config.upload_max_bytes, 1024);
    }

    #[test]
    fn service_account_json_wins_over_api_key() {
        let json = r#"{"client_email":"svc@example.iam.gserviceaccount.com","private_key":"pem"}"#;
        let config = Config::from_lookup(lookup(&[
            ("SHEET_IDS", "abc"),
            ("GOOGLE_CREDS_JSON", json),
            ("GOOGLE_SHEETS_API_KEY", "key"),
        ]))
        .unwrap();
        match config.sheets_auth {
            SheetsAuth::ServiceAccount(key) => {
                assert_eq!(key.client_email, "svc@example.iam.gserviceaccount.com");
                assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn startup_errors() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("GOOGLE_SHEETS_API_KEY", "key")])),
            Err(ConfigError::NoSources)
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SHEET_IDS", "abc")])),
            Err(ConfigError::MissingCredentials)
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SHEET_IDS", "abc"), ("GOOGLE_CREDS_JSON", "{")])),
            Err(ConfigError::InvalidCredentials(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("SHEET_IDS", "abc"),
                ("GOOGLE_SHEETS_API_KEY", "key"),
                ("MAX_ROWS", "lots"),
            ])),
            Err(ConfigError::InvalidNumber { name: "MAX_ROWS", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("SHEET_IDS", "abc"),
                ("GOOGLE_SHEETS_API_KEY", "key"),
                ("CACHE_MODE", "redis"),
            ])),
            Err(ConfigError::InvalidCacheMode(_))
        ));
    }
}

//! Configuration loading for the outbox
//!
//! Supports loading OAuth client credentials from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)
//!
//! Runtime settings come from defaults, then `settings.json` in the relay
//! config directory, then environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Credentials filename in the relay config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Settings filename in the relay config directory
const SETTINGS_FILE: &str = "settings.json";

/// Default database filename in the relay data directory
const DATABASE_FILE: &str = "relay.sqlite";

/// OAuth client credentials used to refresh user tokens
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (~/.config/relay/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .context("GOOGLE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Deployment environment
///
/// Anything other than production withholds CC delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        })
    }
}

/// Runtime settings for the outbox
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub environment: Environment,
    /// Domain used in generated Message-IDs
    pub mail_domain: String,
    /// Retry ceiling: failed records with fewer attempts are retried
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub uploads_root: PathBuf,
    pub templates_dir: PathBuf,
    /// Wait before looking for a sent message in a recipient's mailbox
    pub label_settle_delay: Duration,
    pub http_timeout: Duration,
    pub database_path: PathBuf,
}

/// `settings.json` layout; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    environment: Option<String>,
    mail_domain: Option<String>,
    max_retries: Option<u32>,
    retry_interval_secs: Option<u64>,
    uploads_root: Option<PathBuf>,
    templates_dir: Option<PathBuf>,
    label_settle_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    database_path: Option<PathBuf>,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            mail_domain: "localhost".to_string(),
            max_retries: 2,
            retry_interval: Duration::from_secs(300),
            uploads_root: PathBuf::from("./uploads"),
            templates_dir: PathBuf::from("./templates"),
            label_settle_delay: Duration::from_secs(3),
            http_timeout: Duration::from_secs(30),
            database_path: config::data_path(DATABASE_FILE)
                .unwrap_or_else(|| PathBuf::from(DATABASE_FILE)),
        }
    }
}

impl OutboxSettings {
    /// Load settings from defaults, the settings file, then the environment
    pub fn load() -> Result<Self> {
        let mut settings = Self::default();

        if config::config_exists(SETTINGS_FILE) {
            let file: SettingsFile = config::load_json(SETTINGS_FILE)?;
            settings.apply_file(file);
        }

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Load a settings file from an explicit path over the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_file(config::load_json_file(path)?);
        Ok(settings)
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(environment) = file.environment {
            self.environment = environment.parse().unwrap_or_default();
        }
        if let Some(domain) = file.mail_domain {
            self.mail_domain = domain;
        }
        if let Some(max_retries) = file.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(secs) = file.retry_interval_secs {
            self.retry_interval = Duration::from_secs(secs);
        }
        if let Some(path) = file.uploads_root {
            self.uploads_root = path;
        }
        if let Some(path) = file.templates_dir {
            self.templates_dir = path;
        }
        if let Some(secs) = file.label_settle_secs {
            self.label_settle_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = file.http_timeout_secs {
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = file.database_path {
            self.database_path = path;
        }
    }

    /// Apply overrides from environment-style variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(environment) = lookup("APP_ENV") {
            self.environment = environment.parse().unwrap_or_default();
        }
        if let Some(domain) = lookup("EMAIL_DOMAIN") {
            self.mail_domain = domain;
        }
        if let Some(value) = lookup("EMAIL_MAX_RETRIES") {
            self.max_retries = parse_var("EMAIL_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("EMAIL_RETRY_INTERVAL_SECS") {
            self.retry_interval = Duration::from_secs(parse_var("EMAIL_RETRY_INTERVAL_SECS", &value)?);
        }
        if let Some(path) = lookup("UPLOADS_ROOT") {
            self.uploads_root = PathBuf::from(path);
        }
        if let Some(path) = lookup("EMAIL_TEMPLATES_DIR") {
            self.templates_dir = PathBuf::from(path);
        }
        if let Some(value) = lookup("EMAIL_LABEL_SETTLE_SECS") {
            self.label_settle_delay =
                Duration::from_secs(parse_var("EMAIL_LABEL_SETTLE_SECS", &value)?);
        }
        if let Some(value) = lookup("GMAIL_HTTP_TIMEOUT_SECS") {
            self.http_timeout = Duration::from_secs(parse_var("GMAIL_HTTP_TIMEOUT_SECS", &value)?);
        }
        if let Some(path) = lookup("RELAY_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{
            "web": {
                "client_id": "web-client-id.apps.googleusercontent.com",
                "client_secret": "web-secret"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-client-id.apps.googleusercontent.com");
    }

    #[test]
    fn test_invalid_credentials_json() {
        assert!(GmailCredentials::from_json(r#"{ "other": {} }"#).is_err());
    }

    #[test]
    fn test_defaults() {
        let settings = OutboxSettings::default();
        assert!(!settings.is_production());
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.retry_interval, Duration::from_secs(300));
        assert_eq!(settings.label_settle_delay, Duration::from_secs(3));
        assert_eq!(settings.mail_domain, "localhost");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APP_ENV", "production"),
            ("EMAIL_DOMAIN", "mail.example.com"),
            ("EMAIL_MAX_RETRIES", "4"),
            ("EMAIL_RETRY_INTERVAL_SECS", "60"),
            ("UPLOADS_ROOT", "/srv/uploads"),
        ]);

        let mut settings = OutboxSettings::default();
        settings
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(settings.is_production());
        assert_eq!(settings.mail_domain, "mail.example.com");
        assert_eq!(settings.max_retries, 4);
        assert_eq!(settings.retry_interval, Duration::from_secs(60));
        assert_eq!(settings.uploads_root, PathBuf::from("/srv/uploads"));
    }

    #[test]
    fn test_invalid_env_number_is_an_error() {
        let mut settings = OutboxSettings::default();
        let result = settings.apply_env(|key| (key == "EMAIL_MAX_RETRIES").then(|| "two".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_file_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"environment": "staging", "max_retries": 5}"#).unwrap();

        let settings = OutboxSettings::from_file(&path).unwrap();
        assert!(!settings.is_production());
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.mail_domain, "localhost");
    }
}

//! Configuration management for sppilot

use crate::auth::DEFAULT_TOKEN_ENDPOINT;
use crate::client::ClientOptions;
use crate::error::{Error, Result};
use crate::site::SiteCredentials;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration directory name
const CONFIG_DIR: &str = "sppilot";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Site used when `--site` is not given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_site: Option<String>,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,
    pub advanced: Option<AdvancedConfig>,
    pub logging: Option<LoggingConfig>,
}

/// App-only credentials for one site
#[derive(Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Tenant host, e.g. `contoso.sharepoint.com`
    pub host: String,
    /// Site path, e.g. `/sites/MyTeamSite`; empty for the root site
    #[serde(default)]
    pub site_path: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for SiteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteConfig")
            .field("host", &self.host)
            .field("site_path", &self.site_path)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl SiteConfig {
    pub fn credentials(&self) -> Result<SiteCredentials> {
        SiteCredentials::new(
            self.host.as_str(),
            self.site_path.as_str(),
            self.tenant_id.as_str(),
            self.client_id.as_str(),
            self.client_secret.as_str(),
        )
    }

    /// `https://{host}{site_path}`
    pub fn site_url(&self) -> String {
        format!(
            "https://{}/{}",
            self.host.trim_end_matches('/'),
            self.site_path.trim_matches('/')
        )
        .trim_end_matches('/')
        .to_string()
    }
}

/// Advanced configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Seconds, per token or listing request
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Seconds, per file download
    #[serde(default = "default_download_timeout")]
    pub download_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Milliseconds, doubled on each further attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
    /// Seconds before expiry at which the token is refreshed
    #[serde(default = "default_token_refresh_margin")]
    pub token_refresh_margin: u64,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            download_timeout: default_download_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            max_concurrent_downloads: default_max_concurrent(),
            token_refresh_margin: default_token_refresh_margin(),
            token_endpoint: default_token_endpoint(),
        }
    }
}

impl From<&AdvancedConfig> for ClientOptions {
    fn from(advanced: &AdvancedConfig) -> Self {
        Self {
            timeout: Duration::from_secs(advanced.timeout),
            download_timeout: Duration::from_secs(advanced.download_timeout),
            max_retries: advanced.max_retries,
            retry_delay: Duration::from_millis(advanced.retry_delay),
            token_refresh_margin: Duration::from_secs(advanced.token_refresh_margin),
            max_concurrent_downloads: advanced.max_concurrent_downloads,
            token_endpoint: advanced.token_endpoint.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `compact`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default values
fn default_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    600 // 10 minutes
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000 // 1 second
}

fn default_max_concurrent() -> usize {
    4
}

fn default_token_refresh_margin() -> u64 {
    300 // 5 minutes
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ConfigFile {
    /// Name of the site to use: `requested`, else `default_site`, else the
    /// only configured site.
    pub fn site_name<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str> {
        if let Some(name) = requested.or(self.default_site.as_deref()) {
            return Ok(name);
        }

        let mut names = self.sites.keys();
        match (names.next(), names.next()) {
            (Some(only), None) => Ok(only.as_str()),
            (None, _) => Err(Error::Config("No sites configured. Run 'sppilot init'".to_string())),
            _ => Err(Error::Config(
                "Several sites configured and no default_site set; pass --site".to_string(),
            )),
        }
    }

    /// Resolve a site profile into credentials.
    pub fn site(&self, name: &str) -> Result<SiteCredentials> {
        self.sites
            .get(name)
            .ok_or_else(|| Error::Config(format!("Unknown site '{}'", name)))?
            .credentials()
    }

    /// Client options from `[advanced]`, defaulted when absent.
    pub fn client_options(&self) -> ClientOptions {
        self.advanced
            .as_ref()
            .map(ClientOptions::from)
            .unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    let config_dir = home.join(".config").join(CONFIG_DIR);

    // Create directory if it doesn't exist
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    Ok(config_dir)
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from the default location
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&get_config_path()?)
}

/// Load configuration from `path`
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file: {}", e))
    })?;

    let config: ConfigFile = toml::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config file: {}", e))
    })?;

    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(config, &get_config_path()?)
}

/// Save configuration to `path`
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| {
        Error::InvalidConfig(format!("Failed to serialize config: {}", e))
    })?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    write_private(path, content.as_bytes()).map_err(|e| {
        Error::Config(format!("Failed to write config file: {}", e))
    })
}

/// Client secrets live in this file: owner read/write only, from creation on.
#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to new files
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    fs::write(path, content)
}

/// Validate configuration
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    if config.sites.is_empty() {
        return Err(Error::Config("No sites configured".to_string()));
    }

    if let Some(default) = &config.default_site {
        if !config.sites.contains_key(default) {
            return Err(Error::Config(format!(
                "default_site '{}' is not a configured site",
                default
            )));
        }
    }

    for (name, site) in &config.sites {
        validate_site(name, site)?;
    }

    if let Some(advanced) = &config.advanced {
        if advanced.max_concurrent_downloads == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if advanced.timeout == 0 || advanced.download_timeout == 0 {
            return Err(Error::InvalidInput("Timeouts must be at least 1 second".to_string()));
        }
        if url::Url::parse(&advanced.token_endpoint).is_err() {
            return Err(Error::InvalidInput(format!(
                "Invalid token_endpoint URL: {}",
                advanced.token_endpoint
            )));
        }
    }

    Ok(())
}

fn validate_site(name: &str, site: &SiteConfig) -> Result<()> {
    for (field, value) in [
        ("host", &site.host),
        ("tenant_id", &site.tenant_id),
        ("client_id", &site.client_id),
        ("client_secret", &site.client_secret),
    ] {
        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "Site '{}': {} cannot be empty",
                name, field
            )));
        }
    }

    for (field, value) in [("tenant_id", &site.tenant_id), ("client_id", &site.client_id)] {
        if !is_guid(value.trim()) {
            return Err(Error::InvalidInput(format!(
                "Site '{}': {} must be a GUID (got '{}')",
                name, field, value
            )));
        }
    }

    site.credentials()
        .map(|_| ())
        .map_err(|e| Error::InvalidInput(format!("Site '{}': {}", name, e)))
}

/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, hex digits
fn is_guid(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Check if configuration exists
pub fn config_exists() -> bool {
    get_config_path().map(|p| p.exists()).unwrap_or(false)
}

/// Public alias for ConfigFile (used by lib.rs)
pub use ConfigFile as Config;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_valid_site() -> SiteConfig {
        SiteConfig {
            host: "contoso.sharepoint.com".to_string(),
            site_path: "/sites/MyTeamSite".to_string(),
            tenant_id: "0b5f1d2e-8c3a-4d6f-9e21-7a4b3c2d1e0f".to_string(),
            client_id: "7f3e2d1c-0b9a-4c8d-8e7f-6a5b4c3d2e1f".to_string(),
            client_secret: "test_secret".to_string(),
        }
    }

    fn make_valid_config() -> ConfigFile {
        let mut sites = BTreeMap::new();
        sites.insert("team".to_string(), make_valid_site());
        ConfigFile {
            default_site: Some("team".to_string()),
            sites,
            advanced: None,
            logging: None,
        }
    }

    #[test]
    fn test_validate_config_valid() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_config_no_sites() {
        let config = ConfigFile::default();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_unknown_default_site() {
        let mut config = make_valid_config();
        config.default_site = Some("missing".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_empty_secret() {
        let mut config = make_valid_config();
        config.sites.get_mut("team").unwrap().client_secret = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_tenant_not_guid() {
        let mut config = make_valid_config();
        config.sites.get_mut("team").unwrap().tenant_id = "contoso".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_host_with_path() {
        let mut config = make_valid_config();
        config.sites.get_mut("team").unwrap().host = "contoso.sharepoint.com/sites/x".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_timeouts() {
        let mut config = make_valid_config();
        config.advanced = Some(AdvancedConfig {
            download_timeout: 0,
            ..AdvancedConfig::default()
        });
        assert!(validate_config(&config).is_err());

        config.advanced = Some(AdvancedConfig {
            token_endpoint: "not a url".to_string(),
            ..AdvancedConfig::default()
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_zero_concurrency() {
        let mut config = make_valid_config();
        config.advanced = Some(AdvancedConfig {
            max_concurrent_downloads: 0,
            ..AdvancedConfig::default()
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_is_guid() {
        assert!(is_guid("00000000-0000-0000-0000-000000000000"));
        assert!(is_guid("ABCDEF01-2345-6789-abcd-ef0123456789"));
        assert!(!is_guid("00000000-0000-0000-0000-00000000000"));
        assert!(!is_guid("0000000g-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: ConfigFile = toml::from_str(
            r#"
            [sites.team]
            host = "contoso.sharepoint.com"
            site_path = "/sites/MyTeamSite"
            tenant_id = "0b5f1d2e-8c3a-4d6f-9e21-7a4b3c2d1e0f"
            client_id = "7f3e2d1c-0b9a-4c8d-8e7f-6a5b4c3d2e1f"
            client_secret = "s"

            [advanced]
            max_concurrent_downloads = 8
            "#,
        )
        .unwrap();

        assert!(validate_config(&config).is_ok());
        assert_eq!(config.site_name(None).unwrap(), "team");

        let options = config.client_options();
        assert_eq!(options.max_concurrent_downloads, 8);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.download_timeout, Duration::from_secs(600));
        assert_eq!(options.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
        assert_eq!(config.logging().level, "info");
    }

    #[test]
    fn test_site_resolution() {
        let mut config = make_valid_config();
        let credentials = config.site("team").unwrap();
        assert_eq!(credentials.site_url(), "https://contoso.sharepoint.com/sites/MyTeamSite");
        assert!(config.site("nope").is_err());

        config.sites.insert("other".to_string(), make_valid_site());
        assert_eq!(config.site_name(Some("other")).unwrap(), "other");
        assert_eq!(config.site_name(None).unwrap(), "team");
        config.default_site = None;
        assert!(config.site_name(None).is_err());
    }

    #[test]
    fn test_site_url() {
        let mut site = make_valid_site();
        assert_eq!(site.site_url(), "https://contoso.sharepoint.com/sites/MyTeamSite");
        site.site_path = String::new();
        assert_eq!(site.site_url(), "https://contoso.sharepoint.com");
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", make_valid_site()).contains("test_secret"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = make_valid_config();
        config.advanced = Some(AdvancedConfig::default());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.default_site.as_deref(), Some("team"));
        assert_eq!(loaded.sites["team"].client_secret, "test_secret");
        assert_eq!(loaded.advanced.unwrap().max_concurrent_downloads, 4);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_save_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "stale contents that are longer than nothing").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        save_config_to(&make_valid_config(), &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.sites["team"].client_secret, "test_secret");
    }

    #[test]
    fn test_legacy_page_size_is_ignored() {
        let config: ConfigFile = toml::from_str(
            r#"
            [sites.team]
            host = "contoso.sharepoint.com"
            tenant_id = "0b5f1d2e-8c3a-4d6f-9e21-7a4b3c2d1e0f"
            client_id = "7f3e2d1c-0b9a-4c8d-8e7f-6a5b4c3d2e1f"
            client_secret = "s"

            [advanced]
            page_size = 100
            "#,
        )
        .unwrap();

        assert!(validate_config(&config).is_ok());
        assert_eq!(config.client_options().max_concurrent_downloads, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_from(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    }
}

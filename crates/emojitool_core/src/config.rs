use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "emojitool/0.1";
pub const DEFAULT_REGISTER_CATEGORY: &str = "bufo";
pub const DEFAULT_SEED_CATEGORY: &str = "custom";
pub const DEFAULT_PAGE_URL: &str = "https://bufo.zone";
pub const DEFAULT_IMAGE_HOST: &str = "all-the.bufo.zone";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_PAUSE_MS: u64 = 500;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_AUTH_SERVER: &str = "https://bsky.social";
pub const DEFAULT_PRODUCTION_METADATA_URL: &str =
    "https://status.zzstoatzz.io/oauth-client-metadata.json";
pub const DEFAULT_PREVIEW_METADATA_URL: &str =
    "https://zzstoatzz-status-pr-32.fly.dev/oauth-client-metadata.json";
pub const DEFAULT_REDIRECT_URI: &str = "https://zzstoatzz-status-pr-32.fly.dev/oauth/callback";
pub const DEFAULT_REQUESTED_SCOPE: &str = "atproto repo:io.zzstoatzz.status.record rpc:app.bsky.actor.getProfile?aud=did:web:api.bsky.app#bsky_appview rpc:app.bsky.graph.getFollows?aud=did:web:api.bsky.app";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub scraper: ScraperSection,
    #[serde(default)]
    pub probe: ProbeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RegistrySection {
    pub category: Option<String>,
    pub seed_category: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScraperSection {
    pub page_url: Option<String>,
    pub image_host: Option<String>,
    pub batch_size: Option<usize>,
    pub pause_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProbeSection {
    pub auth_server: Option<String>,
    pub production_metadata_url: Option<String>,
    pub preview_metadata_url: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub requested_scope: Option<String>,
}

impl ToolConfig {
    pub fn register_category(&self) -> &str {
        self.registry
            .category
            .as_deref()
            .unwrap_or(DEFAULT_REGISTER_CATEGORY)
    }

    pub fn seed_category(&self) -> &str {
        self.registry
            .seed_category
            .as_deref()
            .unwrap_or(DEFAULT_SEED_CATEGORY)
    }

    pub fn page_url(&self) -> &str {
        self.scraper.page_url.as_deref().unwrap_or(DEFAULT_PAGE_URL)
    }

    pub fn image_host(&self) -> &str {
        self.scraper
            .image_host
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_HOST)
    }

    /// Batch size is clamped to at least one download per batch.
    pub fn batch_size(&self) -> usize {
        self.scraper.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.scraper.pause_ms.unwrap_or(DEFAULT_PAUSE_MS))
    }

    /// Resolve request timeout: env EMOJITOOL_HTTP_TIMEOUT_MS > config > DEFAULT_TIMEOUT_MS.
    pub fn request_timeout(&self) -> Duration {
        let from_env = env::var("EMOJITOOL_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok());
        Duration::from_millis(
            from_env
                .or(self.scraper.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    /// Resolve user agent: env EMOJITOOL_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("EMOJITOOL_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.scraper
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn auth_server(&self) -> &str {
        self.probe
            .auth_server
            .as_deref()
            .unwrap_or(DEFAULT_AUTH_SERVER)
            .trim_end_matches('/')
    }

    pub fn production_metadata_url(&self) -> &str {
        self.probe
            .production_metadata_url
            .as_deref()
            .unwrap_or(DEFAULT_PRODUCTION_METADATA_URL)
    }

    pub fn preview_metadata_url(&self) -> &str {
        self.probe
            .preview_metadata_url
            .as_deref()
            .unwrap_or(DEFAULT_PREVIEW_METADATA_URL)
    }

    /// The client id is the metadata document URL; defaults to the preview deployment.
    pub fn client_id(&self) -> &str {
        self.probe
            .client_id
            .as_deref()
            .unwrap_or_else(|| self.preview_metadata_url())
    }

    pub fn redirect_uri(&self) -> &str {
        self.probe
            .redirect_uri
            .as_deref()
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    pub fn requested_scope(&self) -> &str {
        self.probe
            .requested_scope
            .as_deref()
            .unwrap_or(DEFAULT_REQUESTED_SCOPE)
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_gallery_defaults() {
        let config = ToolConfig::default();
        assert_eq!(config.page_url(), "https://bufo.zone");
        assert_eq!(config.image_host(), "all-the.bufo.zone");
        assert_eq!(config.batch_size(), 10);
        assert_eq!(config.batch_pause(), Duration::from_millis(500));
        assert_eq!(config.register_category(), "bufo");
        assert_eq!(config.seed_category(), "custom");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/emojitool.toml")).expect("load config");
        assert_eq!(config, ToolConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("emojitool.toml");
        fs::write(
            &config_path,
            r#"
[registry]
category = "party"

[scraper]
page_url = "https://gallery.example"
image_host = "cdn.gallery.example"
batch_size = 4
pause_ms = 0

[probe]
auth_server = "https://auth.example/"
client_id = "https://app.example/oauth-client-metadata.json"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.register_category(), "party");
        assert_eq!(config.page_url(), "https://gallery.example");
        assert_eq!(config.image_host(), "cdn.gallery.example");
        assert_eq!(config.batch_size(), 4);
        assert_eq!(config.batch_pause(), Duration::ZERO);
        assert_eq!(config.auth_server(), "https://auth.example");
        assert_eq!(
            config.client_id(),
            "https://app.example/oauth-client-metadata.json"
        );
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let config = ToolConfig {
            scraper: ScraperSection {
                batch_size: Some(0),
                ..ScraperSection::default()
            },
            ..ToolConfig::default()
        };
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn client_id_defaults_to_preview_metadata_url() {
        let config = ToolConfig::default();
        assert_eq!(config.client_id(), DEFAULT_PREVIEW_METADATA_URL);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("emojitool.toml");
        fs::write(&config_path, "[scraper\npage_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}

//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use handreceipt_core::config::{normalize_api_base_url, EngineConfig};
use handreceipt_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

pub const PROFILE_ENV: &str = "HANDRECEIPT_PROFILE";
pub const API_URL_ENV: &str = "HANDRECEIPT_API_URL";
pub const ACCESS_TOKEN_ENV: &str = "HANDRECEIPT_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CliProfile {
    /// Engine tuning; `engine.api_base_url` is the transfer API.
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub auth_api_key: Option<String>,
    /// Hex Ed25519 verifying keys by holder id.
    #[serde(default)]
    pub holder_keys: BTreeMap<String, String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("handreceipt")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    normalize_text_option(value.map(ToString::to_string))
}

/// Parse a `HOLDER=HEX` argument.
pub fn parse_holder_key(raw: &str) -> Result<(String, String), String> {
    let Some((holder, key)) = raw.split_once('=') else {
        return Err(format!("holder key '{raw}' must look like HOLDER=HEX"));
    };
    let holder = holder.trim();
    let key = key.trim();
    if holder.is_empty() || key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "holder key '{raw}' needs a holder id and a 64 character hex key"
        ));
    }
    Ok((holder.to_string(), key.to_ascii_lowercase()))
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config
            .normalize()
            .map_err(|error| format!("Invalid config at {}: {}", path.display(), error))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize()?;
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(std::env::var(PROFILE_ENV).ok().as_deref()) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) -> Result<(), String> {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize()?;
        }
        Ok(())
    }
}

impl CliProfile {
    /// API base URL, with `HANDRECEIPT_API_URL` taking precedence.
    pub fn api_base_url(&self) -> Result<Option<String>, String> {
        resolve_api_base_url(
            std::env::var(API_URL_ENV).ok(),
            self.engine.api_base_url.clone(),
        )
    }

    pub fn auth_url(&self) -> Option<String> {
        normalize_text_option(self.auth_url.clone())
    }

    fn normalize(&mut self) -> Result<(), String> {
        self.engine.normalize().map_err(|error| error.to_string())?;
        self.auth_url = normalize_text_option(self.auth_url.take());
        self.auth_api_key = normalize_text_option(self.auth_api_key.take());
        Ok(())
    }
}

pub fn resolve_api_base_url(
    env_value: Option<String>,
    configured: Option<String>,
) -> Result<Option<String>, String> {
    normalize_text_option(env_value)
        .or_else(|| normalize_text_option(configured))
        .map(|url| normalize_api_base_url(&url).map_err(|error| error.to_string()))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
        assert_eq!(normalize_profile_name(Some(" field ")), Some("field".to_string()));
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(" default ".to_string()),
            profiles: BTreeMap::new(),
        };
        let profile = config.profile_mut_or_default("default");
        profile.engine.api_base_url = Some(" https://api.example.com/api/ ".to_string());
        profile.engine.sync.max_attempts = 5;
        profile.auth_url = Some(" https://auth.example.com ".to_string());
        profile
            .holder_keys
            .insert("alice".to_string(), "ab".repeat(32));

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.active_profile.as_deref(), Some("default"));
        let profile = loaded.profile("default").unwrap();
        assert_eq!(
            profile.engine.api_base_url.as_deref(),
            Some("https://api.example.com/api")
        );
        assert_eq!(profile.engine.sync.max_attempts, 5);
        assert_eq!(profile.auth_url(), Some("https://auth.example.com".to_string()));
        assert_eq!(profile.holder_keys.len(), 1);
    }

    #[test]
    fn invalid_engine_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"profiles":{"default":{"engine":{"sync":{"max_attempts":0}}}}}"#,
        )
        .unwrap();
        let error = CliProfilesConfig::load_from_path(&path).unwrap_err();
        assert!(error.contains("max_attempts"));
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("depot".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(config.resolve_profile_name(Some("field")), "field");
    }

    #[test]
    fn env_api_url_overrides_profile() {
        let resolved = resolve_api_base_url(
            Some("https://override.example.com/".to_string()),
            Some("https://api.example.com".to_string()),
        )
        .unwrap();
        assert_eq!(resolved.as_deref(), Some("https://override.example.com"));

        let resolved = resolve_api_base_url(None, Some("https://api.example.com".to_string()));
        assert_eq!(resolved.unwrap().as_deref(), Some("https://api.example.com"));

        assert!(resolve_api_base_url(Some("ftp://nope".to_string()), None).is_err());
        assert_eq!(resolve_api_base_url(Some("  ".to_string()), None), Ok(None));
    }

    #[test]
    fn parse_holder_key_requires_hex() {
        let key = "AB".repeat(32);
        assert_eq!(
            parse_holder_key(&format!("alice={key}")).unwrap(),
            ("alice".to_string(), "ab".repeat(32))
        );
        assert!(parse_holder_key("alice").is_err());
        assert!(parse_holder_key("alice=zz").is_err());
        assert!(parse_holder_key(&format!("={key}")).is_err());
    }
}

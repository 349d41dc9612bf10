//! Server configuration: optional TOML file, then environment overrides.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use shellgate_executor::HttpAssistantConfig;
use shellgate_transport::auth::MIN_CREDENTIAL_LEN;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

/// Variables holding server secrets; never passed to remote commands.
pub const SECRET_VARS: [&str; 4] = [
    "SHELLGATE_SECRET",
    "SHELLGATE_SIGNING_KEY",
    "SHELLGATE_AI_KEY",
    "SHELLGATE_CONFIG",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("No shared secret configured (set SHELLGATE_SECRET)")]
    MissingSecret,
    #[error("Shared secret must be at least {MIN_CREDENTIAL_LEN} characters")]
    SecretTooShort,
    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),
    #[error("Invalid token lifetime '{0}'")]
    InvalidTtl(String),
    #[error("Working directory {0} is not a directory")]
    InvalidWorkdir(PathBuf),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    secret: Option<String>,
    signing_key: Option<String>,
    bind: Option<String>,
    token_ttl_secs: Option<u64>,
    history_db: Option<PathBuf>,
    workdir: Option<PathBuf>,
    ai: Option<AiSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AiSection {
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

/// Resolved `serve` settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub secret: String,
    pub signing_key: String,
    pub bind: SocketAddr,
    pub token_ttl: Duration,
    /// SQLite history path; in-memory history when unset.
    pub history_db: Option<PathBuf>,
    pub workdir: PathBuf,
    pub assistant: Option<HttpAssistantConfig>,
}

impl ServerConfig {
    /// Load from an optional file and the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is unreadable or any value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::resolve(path, |key| std::env::var(key).ok())
    }

    fn resolve(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => read_file(path)?,
            None => FileConfig::default(),
        };
        let var = |key: &str| env(key).filter(|v| !v.is_empty());

        let secret = var("SHELLGATE_SECRET")
            .or(file.secret)
            .ok_or(ConfigError::MissingSecret)?;
        if secret.chars().count() < MIN_CREDENTIAL_LEN {
            return Err(ConfigError::SecretTooShort);
        }
        let signing_key = var("SHELLGATE_SIGNING_KEY")
            .or(file.signing_key)
            .unwrap_or_else(|| secret.clone());

        let bind_text = var("SHELLGATE_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_text
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_text.clone()))?;

        let ttl_secs = match var("SHELLGATE_TOKEN_TTL_SECS") {
            Some(text) => text.parse().map_err(|_| ConfigError::InvalidTtl(text))?,
            None => file.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        };
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidTtl(ttl_secs.to_string()));
        }

        let workdir = match var("SHELLGATE_WORKDIR").map(PathBuf::from).or(file.workdir) {
            Some(dir) => dir,
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let workdir = workdir
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or(ConfigError::InvalidWorkdir(workdir))?;

        let ai = file.ai.unwrap_or_default();
        let assistant = var("SHELLGATE_AI_ENDPOINT")
            .or(ai.endpoint)
            .map(|endpoint| HttpAssistantConfig {
                endpoint,
                api_key: var("SHELLGATE_AI_KEY").or(ai.api_key),
                model: var("SHELLGATE_AI_MODEL")
                    .or(ai.model)
                    .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            });

        Ok(Self {
            secret,
            signing_key,
            bind,
            token_ttl: Duration::from_secs(ttl_secs),
            history_db: var("SHELLGATE_HISTORY_DB").map(PathBuf::from).or(file.history_db),
            workdir,
            assistant,
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "a-long-enough-shared-secret-for-tests";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_env_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::resolve(
            None,
            env(&[
                ("SHELLGATE_SECRET", SECRET),
                ("SHELLGATE_WORKDIR", dir.path().to_str().unwrap()),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.signing_key, SECRET);
        assert_eq!(config.token_ttl, Duration::from_secs(DEFAULT_TOKEN_TTL_SECS));
        assert_eq!(config.workdir, dir.path().canonicalize().unwrap());
        assert!(config.assistant.is_none());
        assert!(config.history_db.is_none());
    }

    #[test]
    fn test_missing_or_short_secret() {
        assert!(matches!(
            ServerConfig::resolve(None, env(&[])),
            Err(ConfigError::MissingSecret)
        ));
        assert!(matches!(
            ServerConfig::resolve(None, env(&[("SHELLGATE_SECRET", "short")])),
            Err(ConfigError::SecretTooShort)
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellgate.toml");
        std::fs::write(
            &path,
            format!(
                "secret = \"{SECRET}\"\nbind = \"0.0.0.0:4000\"\ntoken_ttl_secs = 60\n\
                 workdir = \"{}\"\n\n[ai]\nendpoint = \"http://localhost:11434/v1\"\n",
                dir.path().display()
            ),
        )
        .unwrap();

        let config = ServerConfig::resolve(
            Some(&path),
            env(&[("SHELLGATE_BIND", "127.0.0.1:5000"), ("SHELLGATE_AI_MODEL", "llama3")]),
        )
        .unwrap();

        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.token_ttl, Duration::from_secs(60));
        let assistant = config.assistant.unwrap();
        assert_eq!(assistant.endpoint, "http://localhost:11434/v1");
        assert_eq!(assistant.model, "llama3");
    }

    #[test]
    fn test_invalid_values() {
        let base = [("SHELLGATE_SECRET", SECRET)];
        assert!(matches!(
            ServerConfig::resolve(None, env(&[base[0], ("SHELLGATE_BIND", "nowhere")])),
            Err(ConfigError::InvalidBind(_))
        ));
        assert!(matches!(
            ServerConfig::resolve(None, env(&[base[0], ("SHELLGATE_TOKEN_TTL_SECS", "soon")])),
            Err(ConfigError::InvalidTtl(_))
        ));
        assert!(matches!(
            ServerConfig::resolve(None, env(&[base[0], ("SHELLGATE_WORKDIR", "/no/such/dir")])),
            Err(ConfigError::InvalidWorkdir(_))
        ));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "secrett = \"x\"\n").unwrap();
        assert!(matches!(
            ServerConfig::resolve(Some(&path), env(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }
}

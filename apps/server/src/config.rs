use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const APP_DIR_NAME: &str = "cutout";
const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = "cutout.sqlite";
const STORAGE_DIR_NAME: &str = "storage";
const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Raw `config.toml` contents. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub storage: StorageSection,
    pub supabase: SupabaseSection,
    pub remove_bg: RemoveBgSection,
    pub auth: AuthSection,
    pub uploads: UploadsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Supabase,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: Option<StorageBackend>,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SupabaseSection {
    pub url: Option<String>,
    pub service_role_key: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoveBgSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Static,
    Supabase,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub mode: Option<AuthMode>,
    pub tokens: Vec<StaticToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticToken {
    pub token: String,
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadsSection {
    pub max_file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    Supabase {
        url: String,
        service_role_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    Static { tokens: Vec<StaticToken> },
    Supabase { url: String, anon_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveBgConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

/// Fully resolved settings: file, then environment, then CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: SocketAddr,
    pub public_base_url: String,
    pub database_path: PathBuf,
    pub storage: StorageConfig,
    pub remove_bg: RemoveBgConfig,
    pub auth: AuthConfig,
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub bind: Option<String>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

impl Config {
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let file = match &overrides.config_path {
            Some(path) => read_config_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_config_file(&path)?,
                _ => FileConfig::default(),
            },
        };

        Self::resolve(
            file,
            |name| std::env::var(name).ok(),
            overrides,
            &default_data_dir(),
        )
    }

    pub fn resolve(
        mut file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
        data_dir: &Path,
    ) -> Result<Self> {
        apply_env(&mut file, &env);

        let raw_bind = overrides
            .bind
            .clone()
            .or(file.server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = raw_bind
            .parse()
            .with_context(|| format!("Invalid bind address: {raw_bind}"))?;

        let public_base_url = file
            .server
            .public_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{bind}"));

        let database_path = file
            .database
            .path
            .unwrap_or_else(|| data_dir.join(DATABASE_FILE_NAME));

        let supabase_url = file
            .supabase
            .url
            .map(|url| url.trim_end_matches('/').to_string());

        let storage = match file.storage.backend {
            Some(StorageBackend::Local) => StorageConfig::Local {
                root: file
                    .storage
                    .root
                    .unwrap_or_else(|| data_dir.join(STORAGE_DIR_NAME)),
            },
            Some(StorageBackend::Supabase) => {
                let (Some(url), Some(service_role_key)) =
                    (supabase_url.clone(), file.supabase.service_role_key.clone())
                else {
                    bail!("Supabase storage requires SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY");
                };
                StorageConfig::Supabase {
                    url,
                    service_role_key,
                }
            }
            None => match (supabase_url.clone(), file.supabase.service_role_key.clone()) {
                (Some(url), Some(service_role_key)) => StorageConfig::Supabase {
                    url,
                    service_role_key,
                },
                _ => StorageConfig::Local {
                    root: file
                        .storage
                        .root
                        .unwrap_or_else(|| data_dir.join(STORAGE_DIR_NAME)),
                },
            },
        };

        let auth = match file.auth.mode {
            Some(AuthMode::Static) => AuthConfig::Static {
                tokens: file.auth.tokens,
            },
            Some(AuthMode::Supabase) => {
                let (Some(url), Some(anon_key)) = (supabase_url, file.supabase.anon_key) else {
                    bail!("Supabase auth requires SUPABASE_URL and SUPABASE_ANON_KEY");
                };
                AuthConfig::Supabase { url, anon_key }
            }
            None => match (supabase_url, file.supabase.anon_key) {
                (Some(url), Some(anon_key)) => AuthConfig::Supabase { url, anon_key },
                _ => AuthConfig::Static {
                    tokens: file.auth.tokens,
                },
            },
        };

        let max_file_size = file
            .uploads
            .max_file_size
            .unwrap_or(api_core::DEFAULT_MAX_FILE_SIZE);
        if max_file_size == 0 {
            bail!("uploads.max_file_size must be greater than zero");
        }

        Ok(Self {
            bind,
            public_base_url,
            database_path,
            storage,
            remove_bg: RemoveBgConfig {
                api_key: file.remove_bg.api_key.filter(|key| !key.trim().is_empty()),
                base_url: file
                    .remove_bg
                    .base_url
                    .unwrap_or_else(|| remove_bg_client::DEFAULT_BASE_URL.to_string()),
            },
            auth,
            max_file_size,
        })
    }
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn apply_env(file: &mut FileConfig, env: &impl Fn(&str) -> Option<String>) {
    let var = |name: &str| env(name).filter(|value| !value.trim().is_empty());

    if let Some(value) = var("REMOVE_BG_API_KEY") {
        file.remove_bg.api_key = Some(value);
    }
    if let Some(value) = var("SUPABASE_URL") {
        file.supabase.url = Some(value);
    }
    if let Some(value) = var("SUPABASE_SERVICE_ROLE_KEY") {
        file.supabase.service_role_key = Some(value);
    }
    if let Some(value) = var("SUPABASE_ANON_KEY") {
        file.supabase.anon_key = Some(value);
    }
    if let Some(value) = var("CUTOUT_BIND") {
        file.server.bind = Some(value);
    }
    if let Some(value) = var("CUTOUT_DATABASE_PATH") {
        file.database.path = Some(PathBuf::from(value));
    }
}

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SNIPBOARD_CONFIG";
pub const DATA_ROOT_ENV: &str = "SNIPBOARD_DATA_ROOT";
pub const MAX_FILE_SIZE_ENV: &str = "SNIPBOARD_MAX_FILE_SIZE_BYTES";

const DEFAULT_MAX_PATH_LENGTH: usize = 1000;
const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub max_requests: usize,
    pub window_ms: u64,
    pub max_callers: usize,
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 600,
            window_ms: 60_000,
            max_callers: 256,
            sweep_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub data_root: PathBuf,
    pub max_path_length: usize,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub log_dir: Option<PathBuf>,
    pub rate_limit: RateLimitSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: vec![".txt".to_string(), ".json".to_string()],
            log_dir: None,
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn load() -> AppResult<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn load_from<F>(config_path: Option<&Path>, env: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = serde_json::to_value(Self::default())?;

        if let Some(path) = config_path {
            let raw = fs::read_to_string(path).map_err(|error| {
                AppError::Io(format!("failed to read settings file {}: {}", path.display(), error))
            })?;
            // YAML is a superset of JSON, so one parser covers both file flavours.
            let patch: serde_yaml::Value = serde_yaml::from_str(&raw)?;
            let patch = serde_json::to_value(patch)?;
            if !patch.is_null() {
                merge_json_values(&mut merged, patch);
            }
        }

        let mut settings: AppSettings = serde_json::from_value(merged)?;

        if let Some(root) = env(DATA_ROOT_ENV).filter(|value| !value.trim().is_empty()) {
            settings.data_root = PathBuf::from(root);
        }
        if let Some(raw) = env(MAX_FILE_SIZE_ENV) {
            settings.max_file_size_bytes = raw.trim().parse().map_err(|_| {
                AppError::InvalidRequest(format!("{} must be an integer, got '{}'", MAX_FILE_SIZE_ENV, raw))
            })?;
        }

        Ok(settings)
    }

    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join(".logs"))
    }
}

fn default_data_root() -> PathBuf {
    directories::ProjectDirs::from("", "", "snipboard")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./snipboard-data"))
}

fn merge_json_values(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_object), Value::Object(patch_object)) => {
            for (key, patch_value) in patch_object {
                match base_object.get_mut(&key) {
                    Some(base_value @ Value::Object(_)) if patch_value.is_object() => {
                        merge_json_values(base_value, patch_value);
                    }
                    _ => {
                        base_object.insert(key, patch_value);
                    }
                }
            }
        }
        (base_value, patch_value) => {
            *base_value = patch_value;
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageContext {
    data_root: PathBuf,
    max_path_length: usize,
    max_file_size_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl StorageContext {
    pub fn from_settings(settings: &AppSettings) -> AppResult<Self> {
        fs::create_dir_all(&settings.data_root)?;
        let data_root = settings.data_root.canonicalize()?;
        Ok(Self {
            data_root,
            max_path_length: settings.max_path_length,
            max_file_size_bytes: settings.max_file_size_bytes,
            allowed_extensions: settings
                .allowed_extensions
                .iter()
                .map(|extension| normalize_extension(extension))
                .collect(),
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }
}

pub fn normalize_extension(extension: &str) -> String {
    format!(".{}", extension.trim().trim_start_matches('.').to_lowercase())
}

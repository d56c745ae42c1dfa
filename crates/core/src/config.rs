use crate::classifier::ClassifierSettings;
use crate::models::{CapacityPolicy, UnresolvedPolicy};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub workspace: WorkspaceConfig,
    pub classification: ClassificationConfig,
    pub sources: SourcesConfig,
    pub layout: LayoutConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Local copy of the device's `Backup` directory (holds `Data/<ts>`).
    pub backup_dir: PathBuf,
    pub cache_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("Backup"),
            cache_path: PathBuf::from("app_categories_cache.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub retry_failed: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            backoff_ms: 500,
            timeout_secs: 15,
            retry_failed: true,
        }
    }
}

impl ClassificationConfig {
    pub fn settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            concurrency: self.concurrency.max(1),
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                backoff: Duration::from_millis(self.backoff_ms),
            },
            call_timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry_failed: self.retry_failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSourceConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub min_interval_ms: u64,
}

impl Default for StoreSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            min_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSourceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub min_interval_ms: u64,
}

impl Default for AiSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            min_interval_ms: 1000,
        }
    }
}

impl AiSourceConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub international: StoreSourceConfig,
    pub domestic: StoreSourceConfig,
    pub ai: AiSourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub max_apps_per_folder: usize,
    pub max_folders_per_screen: usize,
    pub grid_columns: usize,
    pub start_screen: i64,
    pub unresolved: UnresolvedPolicy,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let policy = CapacityPolicy::default();
        Self {
            max_apps_per_folder: policy.max_apps_per_folder,
            max_folders_per_screen: policy.max_folders_per_screen,
            grid_columns: policy.grid_columns,
            start_screen: policy.start_screen,
            unresolved: policy.unresolved,
        }
    }
}

impl LayoutConfig {
    pub fn policy(&self) -> CapacityPolicy {
        CapacityPolicy {
            max_apps_per_folder: self.max_apps_per_folder,
            max_folders_per_screen: self.max_folders_per_screen,
            start_screen: self.start_screen,
            grid_columns: self.grid_columns,
            unresolved: self.unresolved,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub adb_path: PathBuf,
    pub serial: Option<String>,
    /// Empty means the vendor defaults.
    pub remote_roots: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            serial: None,
            remote_roots: Vec::new(),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("REGROUP")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_configuration_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.layout.policy(), CapacityPolicy::default());
        assert!(!cfg.sources.ai.enabled);
        assert!(cfg.sources.international.enabled);
        assert_eq!(cfg.classification.settings().retry.max_attempts, 3);
    }

    #[test]
    fn file_sections_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[layout]\nmax_apps_per_folder = 12\nunresolved = \"default_bucket\"\n\n[sources.ai]\nenabled = true\nmodel = \"local\""
        )
        .unwrap();
        let cfg = load(file.path().to_str()).unwrap();
        assert_eq!(cfg.layout.max_apps_per_folder, 12);
        assert_eq!(cfg.layout.unresolved, UnresolvedPolicy::DefaultBucket);
        assert_eq!(cfg.layout.max_folders_per_screen, 24);
        assert!(cfg.sources.ai.enabled);
        assert_eq!(cfg.sources.ai.model, "local");
        assert_eq!(cfg.sources.ai.min_interval_ms, 1000);
    }
}

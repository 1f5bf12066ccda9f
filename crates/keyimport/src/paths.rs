use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct KeyImportPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl KeyImportPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("KEYIMPORT_DATA_DIR"),
            std::env::var("KEYIMPORT_CONFIG_DIR"),
        ) {
            return Ok(Self::from_dirs(config_dir.into(), data_dir.into()));
        }

        // macOS: ~/Library/Application Support/keyimport
        // Linux: ~/.config/keyimport
        // Windows: %APPDATA%\\keyimport
        let proj =
            ProjectDirs::from("", "", "keyimport").context("failed to resolve project dirs")?;
        Ok(Self::from_dirs(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("keyimport.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn address_index(&self) -> PathBuf {
        self.config_dir.join("addresses").join("index.json")
    }

    pub fn registry_lock(&self) -> PathBuf {
        self.data_dir.join("registry.lock")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    pub fn log_file_name(&self) -> &str {
        self.log_file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("keyimport.log.jsonl")
    }

    pub fn log_dir(&self) -> &Path {
        &self.data_dir
    }
}

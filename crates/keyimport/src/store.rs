use crate::{
    config::{parse_app_mode, parse_network_mode, KeyImportConfig},
    paths::KeyImportPaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment overrides. These are never written back to `config.toml`.
fn apply_env_overrides(cfg: &mut KeyImportConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("KEYIMPORT_APP_MODE", |v| {
        if let Some(m) = parse_app_mode(v) {
            cfg.app_mode = m;
        }
    });
    apply_env("KEYIMPORT_NETWORK", |v| {
        if let Some(m) = parse_network_mode(v) {
            cfg.network_mode = m;
        }
    });
    apply_env("KEYIMPORT_CLASSIFIER_URLS", |v| {
        cfg.classifier.base_urls = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    });
    apply_env("KEYIMPORT_CLASSIFIER_TIMEOUT_SECONDS", |v| {
        if let Ok(n) = v.parse::<u64>() {
            if n > 0 {
                cfg.classifier.timeout_seconds = n;
            }
        }
    });
}

impl ConfigStore {
    pub fn new(paths: &KeyImportPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<KeyImportConfig> {
        let mut cfg = if self.path.exists() {
            let s = fs::read_to_string(&self.path).context("read config.toml")?;
            toml::from_str(&s).context("parse config.toml")?
        } else {
            let cfg = KeyImportConfig::default();
            self.save(&cfg)?;
            cfg
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &KeyImportConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_atomic_private(&self.path, s.as_bytes())
            .context("write config.toml")?;
        Ok(())
    }
}

use crate::app::config::AppConfig;
use anyhow::{Error, anyhow};
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Owns the loaded app config. Reloading swaps the whole
/// config under a write lock, readers never see a partial one.
pub struct ConfigManager {
    path: PathBuf,
    cfg: Arc<RwLock<AppConfig>>,
    started: AtomicBool,
}

impl ConfigManager {
    pub fn new(cfg_path: PathBuf) -> ConfigManager {
        ConfigManager {
            path: cfg_path,
            cfg: Arc::new(RwLock::new(AppConfig::default())),
            started: AtomicBool::new(false),
        }
    }

    /// Loads the config file, replacing the current config
    /// only if the new one parses and validates
    pub fn reload(&self) -> Result<(), Error> {
        let cfg = AppConfig::load(&self.path)?;
        *self.cfg.write() = cfg;

        self.started.store(true, Ordering::Release);
        Ok(())
    }

    pub fn start(&self) -> Result<(), Error> {
        self.reload()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get(&self) -> Result<RwLockReadGuard<'_, AppConfig>, Error> {
        if !self.started.load(Ordering::Acquire) {
            return Err(anyhow!(
                "Config from {} requested before it was loaded",
                self.path.display()
            ));
        }

        Ok(self.cfg.read())
    }
}

//! Configuration management for the orchestration master
//!
//! This module handles loading, validation, and management of master
//! configuration from a `master.toml` file, including environment-variable
//! and command-line overrides.

use anyhow::{Context, Result};
use shared::config::MasterConfig;
use std::path::PathBuf;
use tracing::{debug, info};

/// The expected name of the configuration file.
const MASTER_CONFIG_FILE: &str = "master.toml";

/// Manages the master's configuration.
/// This struct is responsible for the lifecycle of the configuration:
/// initial loading, validation, override handling, and persistence.
pub struct ConfigManager {
    /// The full path to the configuration file.
    pub config_path: PathBuf,
    /// The loaded and validated master configuration. The constructor
    /// guarantees it is `Some` on success.
    pub master_config: Option<MasterConfig>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the configuration.
    /// A `ConfigManager` instance is always in a valid, loaded state if
    /// successfully created.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        // Accept either a path to a directory containing master.toml or a
        // direct path to the file itself.
        let config_path = if config_path.is_dir() {
            config_path.join(MASTER_CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                config_path.display()
            ));
        }

        let mut manager = Self {
            config_path,
            master_config: None,
        };

        manager.load_config()?;

        Ok(manager)
    }

    /// Loads the configuration file from disk, parses, validates it, and
    /// applies environment-variable overrides.
    pub fn load_config(&mut self) -> Result<()> {
        info!(
            "Loading master configuration from {}",
            self.config_path.display()
        );

        let config_content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;

        let mut master_config = MasterConfig::from_toml_str(&config_content)
            .with_context(|| format!("Failed to parse {}", self.config_path.display()))?;

        // Environment variables sit between the file and CLI flags in
        // precedence; CLI overrides are applied by the caller afterwards.
        master_config
            .apply_env_overrides()
            .context("Invalid environment variable override")?;

        debug!("Master configuration parameters (including defaults):");
        debug!("  listen_address: {}", master_config.listen_address);
        debug!(
            "  api_key: {}",
            if master_config.api_key.is_empty() {
                "<empty>"
            } else {
                "<redacted>"
            }
        );
        debug!("  data_dir: {}", master_config.data_dir);
        debug!("  params_file: {}", master_config.params_file);
        debug!(
            "  params_reload_interval_seconds: {}",
            master_config.params_reload_interval_seconds
        );
        debug!(
            "  worker_inactive_timeout_seconds: {}",
            master_config.worker_inactive_timeout_seconds
        );
        debug!(
            "  dispatch_retry_limit: {}",
            master_config.dispatch_retry_limit
        );
        debug!(
            "  dispatch_rpc_timeout_seconds: {}",
            master_config.dispatch_rpc_timeout_seconds
        );
        debug!(
            "  telemetry_channel_capacity: {}",
            master_config.telemetry_channel_capacity
        );
        debug!(
            "  telemetry_window_samples: {}",
            master_config.telemetry_window_samples
        );
        debug!(
            "  subscriber_grace_seconds: {}",
            master_config.subscriber_grace_seconds
        );
        debug!("  log_truncate_bytes: {}", master_config.log_truncate_bytes);
        debug!(
            "  scrubber_interval_seconds: {}",
            master_config.scrubber_interval_seconds
        );
        debug!(
            "  graceful_shutdown_timeout_seconds: {}",
            master_config.graceful_shutdown_timeout_seconds
        );
        debug!("  rate_limit_enabled: {}", master_config.rate_limit_enabled);

        info!(
            listen_address = %master_config.listen_address,
            data_dir = %master_config.data_dir,
            params_file = %master_config.params_file,
            "Master configuration loaded successfully"
        );

        self.master_config = Some(master_config);

        Ok(())
    }

    /// Override master configuration values from command-line flags and
    /// persist the merged result to disk.
    /// Returns true if any values were changed.
    pub fn override_and_persist_config(
        &mut self,
        listen_address: Option<String>,
        api_key: Option<String>,
        data_dir: Option<String>,
        params_file: Option<String>,
        dispatch_retry_limit: Option<u32>,
    ) -> Result<bool> {
        let mut config_changed = false;

        if self.master_config.is_none() {
            self.load_config()?;
        }

        let mut master_config = self
            .master_config
            .clone()
            .expect("Master configuration must be loaded");

        if let Some(addr) = listen_address {
            if master_config.listen_address != addr {
                info!(
                    "Overriding listen_address: {} -> {}",
                    master_config.listen_address, addr
                );
                master_config.listen_address = addr;
                config_changed = true;
            }
        }

        if let Some(key) = api_key {
            if master_config.api_key != key {
                info!("Overriding api_key (value hidden for security)");
                master_config.api_key = key;
                config_changed = true;
            }
        }

        if let Some(dir) = data_dir {
            if master_config.data_dir != dir {
                info!("Overriding data_dir: {} -> {}", master_config.data_dir, dir);
                master_config.data_dir = dir;
                config_changed = true;
            }
        }

        if let Some(path) = params_file {
            if master_config.params_file != path {
                info!(
                    "Overriding params_file: {} -> {}",
                    master_config.params_file, path
                );
                master_config.params_file = path;
                config_changed = true;
            }
        }

        if let Some(limit) = dispatch_retry_limit {
            if master_config.dispatch_retry_limit != limit {
                info!(
                    "Overriding dispatch_retry_limit: {} -> {}",
                    master_config.dispatch_retry_limit, limit
                );
                master_config.dispatch_retry_limit = limit;
                config_changed = true;
            }
        }

        if config_changed {
            master_config
                .validate()
                .context("Invalid configuration after applying command-line overrides")?;

            let master_toml = toml::to_string_pretty(&master_config)
                .context("Failed to serialize master configuration")?;

            std::fs::write(&self.config_path, master_toml)
                .with_context(|| format!("Failed to write {}", self.config_path.display()))?;

            self.master_config = Some(master_config);

            info!("Master configuration updated and persisted to disk");
        }

        Ok(config_changed)
    }

    /// Checks if the configuration is loaded.
    pub fn is_loaded(&self) -> bool {
        self.master_config.is_some()
    }
}

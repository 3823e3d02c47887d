//! Configuration loading: TOML file plus `MEMVAULT_*` environment overrides.
//!
//! A missing config file is not an error; the defaults give a working
//! single-machine vault under `~/.memvault/`. A file that exists but does
//! not parse is an error, because silently ignoring a typo'd config is worse
//! than refusing to start.

use memvault_types::config::VaultConfig;
use memvault_types::{MemvaultError, MemvaultResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory holding the config file and the default SQLite databases.
pub fn vault_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memvault")
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    vault_home().join("config.toml")
}

/// Load configuration.
///
/// Explicit path: the file must exist and parse. Default path: absent file
/// falls back to defaults. Either way, environment overrides apply last and
/// relative store paths are anchored under the vault home.
pub fn load_config(path: Option<&Path>) -> MemvaultResult<VaultConfig> {
    let mut config = match path {
        Some(explicit) => read_config_file(explicit)?,
        None => {
            let default = default_config_path();
            if default.exists() {
                read_config_file(&default)?
            } else {
                debug!(path = %default.display(), "no config file, using defaults");
                VaultConfig::default()
            }
        }
    };
    apply_env_overrides(&mut config);
    anchor_store_paths(&mut config);
    Ok(config)
}

fn read_config_file(path: &Path) -> MemvaultResult<VaultConfig> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| {
        MemvaultError::Config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Environment variables win over the file, matching how the service is
/// deployed in containers.
fn apply_env_overrides(config: &mut VaultConfig) {
    if let Ok(v) = std::env::var("MEMVAULT_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = std::env::var("MEMVAULT_METADATA_PATH") {
        config.stores.metadata_path = v;
    }
    if let Ok(v) = std::env::var("MEMVAULT_VECTOR_PATH") {
        config.stores.vector_path = v;
    }
    if let Ok(v) = std::env::var("MEMVAULT_GRAPH_PATH") {
        config.stores.graph_path = v;
    }
    if let Ok(v) = std::env::var("MEMVAULT_QDRANT_URL") {
        if v.is_empty() {
            config.stores.qdrant_url = None;
        } else {
            config.stores.qdrant_url = Some(v);
        }
    }
    if let Ok(v) = std::env::var("MEMVAULT_QDRANT_COLLECTION") {
        config.stores.qdrant_collection = v;
    }
    if let Ok(v) = std::env::var("MEMVAULT_EMBEDDING_PROVIDER") {
        config.embedding.provider = v;
    }
    if let Ok(v) = std::env::var("MEMVAULT_ADAPTER_TIMEOUT_MS") {
        match v.parse() {
            Ok(ms) => config.adapter_timeout_ms = ms,
            Err(_) => warn!(value = %v, "MEMVAULT_ADAPTER_TIMEOUT_MS is not a number, ignoring"),
        }
    }
    if let Ok(v) = std::env::var("MEMVAULT_RECONCILE_INTERVAL_SECS") {
        match v.parse() {
            Ok(secs) => config.reconciler.interval_secs = secs,
            Err(_) => {
                warn!(value = %v, "MEMVAULT_RECONCILE_INTERVAL_SECS is not a number, ignoring")
            }
        }
    }
}

/// Relative SQLite paths resolve under the vault home so `memvault add` and
/// `memvault search` run from different directories agree on the data.
/// `:memory:` and absolute paths pass through untouched.
fn anchor_store_paths(config: &mut VaultConfig) {
    let home = vault_home();
    for path in [
        &mut config.stores.metadata_path,
        &mut config.stores.vector_path,
        &mut config.stores.graph_path,
    ] {
        if path.as_str() == ":memory:" || Path::new(path.as_str()).is_absolute() {
            continue;
        }
        *path = home.join(path.as_str()).to_string_lossy().into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_default_file_gives_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.adapter_timeout_ms, 5_000);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = load_config(Some(Path::new("/nonexistent/memvault.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "adapter_timeout_ms = 250\n[reconciler]\ninterval_secs = 5"
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.adapter_timeout_ms, 250);
        assert_eq!(config.reconciler.interval_secs, 5);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "adapter_timeout_ms = [not a number").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, MemvaultError::Config(_)));
    }

    #[test]
    fn test_relative_paths_anchor_under_home() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stores]\nmetadata_path = \"meta.db\"").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(Path::new(&config.stores.metadata_path).is_absolute());
        assert!(config.stores.metadata_path.ends_with("meta.db"));
    }

    #[test]
    fn test_memory_path_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stores]\nmetadata_path = \":memory:\"").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.stores.metadata_path, ":memory:");
    }
}

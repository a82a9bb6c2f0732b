use crate::config::Config;
use crate::utils::{ensure_dir, get_parley_home};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_parley_home()?.join("config.json"))
}

fn resolve(config_path: Option<&Path>) -> PathBuf {
    match config_path {
        Some(path) => path.to_path_buf(),
        None => get_config_path().unwrap_or_else(|_| PathBuf::from("config.json")),
    }
}

/// Load, apply `PARLEY_*` overrides, validate. A missing file yields defaults.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let path = resolve(config_path);
    let mut config = if path.exists() {
        read_locked(&path)?
    } else {
        debug!("no config at {}, using defaults", path.display());
        Config::default()
    };

    crate::config::credentials::apply_env_overrides(&mut config);
    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    Ok(config)
}

/// Sidecar lock file. `atomic_write` renames over the config inode, which
/// would drop a lock held on the config file itself.
fn open_lock_file(path: &Path) -> Result<fs::File> {
    let lock_path = path.with_extension("json.lock");
    fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file at {}", lock_path.display()))
}

/// Parse while holding the shared lock; readers wait out a concurrent save.
fn read_locked(path: &Path) -> Result<Config> {
    let lock = open_lock_file(path)?;
    lock.lock_shared()
        .with_context(|| "Failed to acquire shared lock on config lock file")?;
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    check_file_permissions(path);
    debug!("loaded config from {}", path.display());
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config JSON from {}", path.display()))
}

/// Warn if the config file or its parent directory is readable by others.
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Once;

    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    "config file {} has permissions {:o}, recommend 0600",
                    path.display(),
                    mode & 0o777
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);
    let path = path.as_path();

    ensure_dir(path.parent().context("Config path has no parent")?)?;

    let lock = open_lock_file(path)?;
    lock.lock_exclusive()
        .with_context(|| "Failed to acquire exclusive lock on config lock file")?;

    let content = serde_json::to_string_pretty(config)?;
    crate::utils::atomic_write(path, &content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    Ok(())
}

//! Credential files under `~/.epistle/credentials/`.
//!
//! Holds the mailbox password and provider API keys so neither has to live
//! in the config file. Files are chmod 600 inside a chmod 700 directory.

use std::path::{Path, PathBuf};

fn default_state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".epistle")
}

fn state_dir() -> PathBuf {
    if let Ok(path) = std::env::var("EPISTLE_CONFIG") {
        let config_path = PathBuf::from(path);
        if let Some(parent) = config_path.parent() {
            return parent.to_path_buf();
        }
    }
    default_state_dir()
}

fn credentials_dir_for(state_dir: &Path) -> PathBuf {
    state_dir.join("credentials")
}

fn normalize_name(name: &str) -> anyhow::Result<String> {
    let name = name.trim().to_ascii_lowercase();
    match name.as_str() {
        "anthropic" | "openai" | "mail" => Ok(name),
        _ => anyhow::bail!("unsupported credential name: {name}"),
    }
}

fn key_file_path_for(state_dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let name = normalize_name(name)?;
    Ok(credentials_dir_for(state_dir).join(format!("{name}.key")))
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| anyhow::anyhow!("failed to chmod 700 {}: {e}", path.display()))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| anyhow::anyhow!("failed to chmod 600 {}: {e}", path.display()))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

pub fn write_key_to(state_dir: &Path, name: &str, value: &str) -> anyhow::Result<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("credential value cannot be empty");
    }

    let dir = credentials_dir_for(state_dir);
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", dir.display()))?;
    set_dir_permissions(&dir)?;

    let path = key_file_path_for(state_dir, name)?;
    std::fs::write(&path, value)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
    set_file_permissions(&path)?;
    Ok(path)
}

pub fn read_key_from(state_dir: &Path, name: &str) -> Option<String> {
    let path = key_file_path_for(state_dir, name).ok()?;
    let value = std::fs::read_to_string(path).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Store a credential in ~/.epistle/credentials/{name}.key.
pub fn store_key(name: &str, value: &str) -> anyhow::Result<PathBuf> {
    write_key_to(&state_dir(), name, value)
}

/// Load a credential from ~/.epistle/credentials/{name}.key.
pub fn load_key(name: &str) -> Option<String> {
    read_key_from(&state_dir(), name)
}

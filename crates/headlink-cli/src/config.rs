//! Configuration vault – reads/writes `~/.headlink/config.toml`.
//!
//! ```toml
//! listen_address = "0.0.0.0:7000"
//!
//! [link]
//! target_name = "GEMMI"
//! poll_interval_ms = 2000
//!
//! [[peers]]
//! name = "GEMMI-PC"
//! address = "192.168.1.20:7000"
//! ```

use headlink_link::LinkConfig;
use headlink_types::RemoteDevice;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted configuration stored in `~/.headlink/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bind address for inbound links. Setting it enables the accept loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<String>,

    #[serde(default)]
    pub link: LinkConfig,

    /// Peers reachable from this host; the static "paired" list.
    #[serde(default)]
    pub peers: Vec<RemoteDevice>,
}

impl Config {
    /// Link settings with `accept_inbound` forced on when a listen address
    /// is configured.
    pub fn effective_link(&self) -> LinkConfig {
        let mut link = self.link.clone();
        if self.listen_address.is_some() {
            link.accept_inbound = true;
        }
        link
    }
}

/// Return the path to `~/.headlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".headlink").join("config.toml")
}

/// Load the config from disk with environment overrides applied. Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `HEADLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HEADLINK_TARGET` | `link.target_name` |
/// | `HEADLINK_POLL_MS` | `link.poll_interval_ms` |
/// | `HEADLINK_LISTEN` | `listen_address` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HEADLINK_TARGET") {
        cfg.link.target_name = v;
    }
    if let Ok(v) = std::env::var("HEADLINK_POLL_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.link.poll_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("HEADLINK_LISTEN") {
        cfg.listen_address = Some(v);
    }
}

/// Save the config to disk, creating `~/.headlink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_with_peers() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.peers.push(RemoteDevice::new("GEMMI-PC", "192.168.1.20:7000"));
        cfg.listen_address = Some("0.0.0.0:7000".to_string());
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.peers, cfg.peers);
        assert_eq!(loaded.link.poll_interval_ms, 2000);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[link]\npoll_interval_ms = 500\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.link.poll_interval_ms, 500);
        assert_eq!(loaded.link.service_name, "ApexHapticsDisplay");
        assert!(loaded.peers.is_empty());
        assert!(loaded.listen_address.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[link\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_headlink_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".headlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn listen_address_enables_inbound() {
        let cfg = Config {
            listen_address: Some("127.0.0.1:7000".to_string()),
            ..Config::default()
        };
        assert!(cfg.effective_link().accept_inbound);
        assert!(!Config::default().effective_link().accept_inbound);
    }

    #[test]
    fn env_overrides() {
        // SAFETY: only this test touches HEADLINK_* variables.
        unsafe {
            std::env::set_var("HEADLINK_TARGET", "DESKTOP");
            std::env::set_var("HEADLINK_POLL_MS", "not-a-number");
            std::env::set_var("HEADLINK_LISTEN", "0.0.0.0:7001");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.link.target_name, "DESKTOP");
        assert_eq!(cfg.link.poll_interval_ms, 2000);
        assert_eq!(cfg.listen_address.as_deref(), Some("0.0.0.0:7001"));

        unsafe { std::env::set_var("HEADLINK_POLL_MS", "250") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.link.poll_interval_ms, 250);

        unsafe {
            std::env::remove_var("HEADLINK_TARGET");
            std::env::remove_var("HEADLINK_POLL_MS");
            std::env::remove_var("HEADLINK_LISTEN");
        }
    }
}

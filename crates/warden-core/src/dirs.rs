//! Directory layout for the Warden home directory.
//!
//! # Layout
//!
//! ```text
//! ~/.warden/                      (WardenHome, or $WARDEN_HOME)
//! ├── config.toml                   (user configuration)
//! ├── rules.json                    (workspace + global policy rules)
//! ├── audit/
//! │   ├── audit.jsonl               (active audit log)
//! │   └── audit.<millis>.jsonl      (rotated segments)
//! ├── logs/                         (daemon log files)
//! ├── gate.sock                     (agent adapter socket)
//! └── supervisor.sock               (human-approval socket)
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Global Warden home directory (`~/.warden/` or `$WARDEN_HOME`).
#[derive(Debug, Clone)]
pub struct WardenHome {
    root: PathBuf,
}

impl WardenHome {
    /// Resolve the home directory.
    ///
    /// Checks `$WARDEN_HOME` first, then falls back to `$HOME/.warden/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$WARDEN_HOME` is relative, or if neither
    /// `$WARDEN_HOME` nor `$HOME` is set.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var("WARDEN_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "WARDEN_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither WARDEN_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".warden")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the directory structure exists with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.audit_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.root(), perms.clone())?;
            std::fs::set_permissions(self.audit_dir(), perms.clone())?;
            std::fs::set_permissions(self.logs_dir(), perms)?;
        }
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the user configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to the persisted workspace/global rules.
    #[must_use]
    pub fn rules_path(&self) -> PathBuf {
        self.root.join("rules.json")
    }

    /// Audit directory (`~/.warden/audit/`).
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Path to the active audit log file.
    #[must_use]
    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_dir().join("audit.jsonl")
    }

    /// Logs directory (`~/.warden/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Agent adapter socket path.
    #[must_use]
    pub fn gate_socket_path(&self) -> PathBuf {
        self.root.join("gate.sock")
    }

    /// Human-approval supervisor socket path.
    #[must_use]
    pub fn supervisor_socket_path(&self) -> PathBuf {
        self.root.join("supervisor.sock")
    }
}

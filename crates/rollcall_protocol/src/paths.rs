use std::path::PathBuf;

/// Resolve the Rollcall home directory.
///
/// Priority:
/// 1) ROLLCALL_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.rollcall
pub fn rollcall_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ROLLCALL_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".rollcall");
    }
    PathBuf::from(".").join(".rollcall")
}

/// Default config file: ~/.rollcall/config.toml
pub fn default_config_path() -> PathBuf {
    rollcall_home().join("config.toml")
}

/// Default ledger directory: ~/.rollcall/ledger
pub fn default_ledger_dir() -> PathBuf {
    rollcall_home().join("ledger")
}

/// Default logs directory: ~/.rollcall/logs
pub fn default_logs_dir() -> PathBuf {
    rollcall_home().join("logs")
}

use std::path::PathBuf;

/// Console configuration directory (`~/.labconsole`)
pub fn labconsole_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".labconsole")
}

pub fn config_json_path() -> PathBuf {
    labconsole_dir().join("config.json")
}

/// Session file inside `storage_dir`
pub fn session_file_path(storage_dir: &std::path::Path) -> PathBuf {
    storage_dir.join("session.json")
}

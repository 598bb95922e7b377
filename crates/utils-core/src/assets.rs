use std::{io, path::PathBuf};

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const ASSET_DIR_ENV: &str = "TASKNOTES_ASSET_DIR";

pub fn asset_dir() -> io::Result<PathBuf> {
    if let Ok(override_dir) = std::env::var(ASSET_DIR_ENV) {
        let override_dir = override_dir.trim();
        if !override_dir.is_empty() {
            let path = PathBuf::from(override_dir);
            std::fs::create_dir_all(&path)?;
            return Ok(path);
        }
    }

    let path = if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        ProjectDirs::from("app", "tasknotes", "tasknotes")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?
            .data_dir()
            .to_path_buf()
    };

    std::fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn config_path() -> io::Result<PathBuf> {
    Ok(asset_dir()?.join("worker.json"))
}

pub fn database_path() -> io::Result<PathBuf> {
    Ok(asset_dir()?.join("db.sqlite"))
}

//! Storage Layer
//!
//! Persistence of scanned cards in a local JSON store, plus the standard
//! configuration and data locations.

pub mod cards;

pub use cards::{Card, CardRepository, JsonCardStore, ProcessedSet};

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "cardscanner", "CardScanner")
        .ok_or_else(|| anyhow::anyhow!("Could not determine project directories"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// `config.toml` in the configuration directory
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// `cards.json` in the data directory
pub fn default_store_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("cards.json"))
}

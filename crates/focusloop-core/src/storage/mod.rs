mod config;
pub mod database;
mod store;

pub use config::{Config, DurationsConfig, EngineTuning};
pub use database::Database;
pub use store::{SessionRecord, TimerStore};

use std::path::PathBuf;

/// Returns `~/.config/focusloop[-dev]/`, creating it if needed.
///
/// `FOCUSLOOP_DATA_DIR` overrides the location entirely (used by tests and
/// scripted setups); `FOCUSLOOP_ENV=dev` switches to the development
/// directory.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = if let Ok(dir) = std::env::var("FOCUSLOOP_DATA_DIR") {
        PathBuf::from(dir)
    } else {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config");
        let env = std::env::var("FOCUSLOOP_ENV").unwrap_or_else(|_| "production".to_string());
        if env == "dev" {
            base_dir.join("focusloop-dev")
        } else {
            base_dir.join("focusloop")
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

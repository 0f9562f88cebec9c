//! XDG directory helpers
//!
//! # Directory Structure
//!
//! - Config: `~/.config/nlfw/` - `config.json`
//! - State: `~/.local/state/nlfw/` - `nlfw.log` and the audit log
//!
//! # Example
//!
//! ```no_run
//! use nlfw::utils::{ensure_dirs, get_config_dir};
//!
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(config_path) = get_config_dir() {
//!     // Load configuration from config_path
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "nlfw", "nlfw")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Creates the config and state directories, user-only on Unix.
pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700);
    builder.recursive(true);

    for dir in [get_config_dir(), get_state_dir()].into_iter().flatten() {
        builder.create(dir)?;
    }
    Ok(())
}

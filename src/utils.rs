//! Directory lookup following the XDG Base Directory specification
//!
//! - Config: `~/.config/iptacl/` - ACL rule files (`acl.json`)
//! - State: `~/.local/state/iptacl/` - Audit trail and log file
//!
//! # Example
//!
//! ```
//! use iptacl::utils::{ensure_dirs, get_state_dir};
//!
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(state) = get_state_dir() {
//!     println!("audit log lives in {}", state.display());
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "iptacl", "iptacl")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Creates the config and state directories, user-only on Unix.
///
/// # Errors
///
/// Returns `Err` if a directory cannot be created.
pub fn ensure_dirs() -> std::io::Result<()> {
    let dirs = [get_config_dir(), get_state_dir()];

    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700);
        builder.recursive(true);
        for dir in dirs.into_iter().flatten() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Renders `bytes` as rows of 16 hex bytes with an offset column.
pub fn hex_dump(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / 16 * 8);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", row * 16);
        for (i, byte) in chunk.iter().enumerate() {
            if i == 8 {
                out.push(' ');
            }
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    out
}

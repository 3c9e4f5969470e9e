use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirError {
    #[error("Directory not found: {0}")]
    DirNotFound(String),
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type DirResult<T> = Result<T, DirError>;

/// Application name used to namespace directories.
pub static APP_NAME: &str = "post-clusters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirType {
    /// Persisted run artifacts (labeled tables, label records, plots).
    Data,
}

impl Display for DirType {
    /// Pretty-print the default directory path hint for this dir type.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirType::Data => write!(f, "~/.local/share/")?,
        };
        write!(f, "{}", APP_NAME)
    }
}

impl DirType {
    fn xdg_key(&self) -> &'static str {
        match self {
            DirType::Data => "XDG_DATA_HOME",
        }
    }

    fn rel_path(&self) -> &'static str {
        match self {
            DirType::Data => ".local/share",
        }
    }

    /// Resolve the directory path from XDG or fallback environment hints.
    pub fn get_dir(&self) -> DirResult<PathBuf> {
        if let Some(dir) = env::var_os(self.xdg_key()).filter(|d| !d.is_empty()) {
            Ok(PathBuf::from(dir).join(APP_NAME))
        } else if let Ok(home) = env::var("HOME") {
            Ok(PathBuf::from(home).join(self.rel_path()).join(APP_NAME))
        } else if let Ok(userprofile) = env::var("USERPROFILE") {
            Ok(PathBuf::from(userprofile)
                .join(self.rel_path())
                .join(APP_NAME))
        } else {
            Err(DirError::DirNotFound(self.to_string()))
        }
    }

    /// Directory for a single named run, nested under this dir type.
    pub fn run_dir<S: AsRef<Path>>(&self, run_name: S) -> DirResult<PathBuf> {
        Ok(self.get_dir()?.join("runs").join(run_name))
    }

    /// Ensure the run directory exists, creating it asynchronously if needed.
    pub async fn ensure_run_dir_async<S: AsRef<Path>>(&self, run_name: S) -> DirResult<PathBuf> {
        let dir = self.run_dir(run_name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_override_is_namespaced_and_runs_nest_below_it() {
        env::set_var("XDG_DATA_HOME", "/tmp/xdg-data");
        let dir = DirType::Data.get_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/xdg-data").join(APP_NAME));

        let run = DirType::Data.run_dir("2025-01-01T00-00-00").unwrap();
        assert_eq!(run, dir.join("runs").join("2025-01-01T00-00-00"));
    }

    #[test]
    fn display_shows_home_relative_hint() {
        assert_eq!(DirType::Data.to_string(), "~/.local/share/post-clusters");
    }
}

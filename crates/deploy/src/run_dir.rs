//! Per-profile run directories and the `current` pointer.
//!
//! ```text
//! <base>/runs/<profile>/
//!   run_20250101_120000/
//!   run_20250102_093000/
//!   current -> run_20250102_093000
//! ```

use std::{
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{AppContext, NetworkProfile, fs::FsHandler};

/// Name of the symlink pointing at the active run directory.
pub const CURRENT_LINK: &str = "current";

/// Temporary sibling of [`CURRENT_LINK`] used for atomic swaps.
pub const CURRENT_TMP_LINK: &str = ".current_tmp";

/// Prefix of timestamped run directory names.
pub const RUN_DIR_PREFIX: &str = "run_";

/// Manages the run directories of a single profile.
#[derive(Debug, Clone)]
pub struct RunManager {
    profile: NetworkProfile,
    profile_dir: PathBuf,
}

impl RunManager {
    pub fn new(ctx: &AppContext, profile: NetworkProfile) -> Self {
        Self {
            profile: profile.canonical(),
            profile_dir: ctx.profile_runs_dir(profile),
        }
    }

    pub fn profile(&self) -> NetworkProfile {
        self.profile
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    fn current_link(&self) -> PathBuf {
        self.profile_dir.join(CURRENT_LINK)
    }

    /// Directory the `current` link points to.
    ///
    /// Returns `None` when no run exists yet, including when the link was lost
    /// in the middle of a swap.
    pub fn current_run_dir(&self) -> Result<Option<PathBuf>> {
        let link = self.current_link();
        match std::fs::read_link(&link) {
            Ok(target) => Ok(Some(self.resolve(target))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read link {}", link.display())),
        }
    }

    /// Like [`Self::current_run_dir`] but fails when there is no run.
    pub fn require_current_run_dir(&self) -> Result<PathBuf> {
        self.current_run_dir()?.with_context(|| {
            format!(
                "No current run for profile {}. Start the network first",
                self.profile
            )
        })
    }

    fn resolve(&self, target: PathBuf) -> PathBuf {
        if target.is_absolute() {
            target
        } else {
            self.profile_dir.join(target)
        }
    }

    /// Return the run directory to use.
    ///
    /// By default the directory `current` points to is reused. `fresh` wipes
    /// and recreates that directory in place. `new_run` always creates a new
    /// timestamped directory and repoints `current` to it. A new run is also
    /// created when there is no current run.
    pub fn ensure_run_dir(&self, fresh: bool, new_run: bool) -> Result<PathBuf> {
        if !new_run && let Some(run_dir) = self.current_run_dir()? {
            if fresh {
                tracing::info!(run_dir = %run_dir.display(), "Wiping run directory");
                match std::fs::remove_dir_all(&run_dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("Failed to wipe run directory {}", run_dir.display())
                        });
                    }
                }
            }
            FsHandler::create_dir(&run_dir)?;
            tracing::debug!(run_dir = %run_dir.display(), fresh, "Reusing current run directory");
            return Ok(run_dir);
        }

        let run_dir = self.create_run_dir()?;
        self.set_current(&run_dir)?;
        tracing::info!(
            profile = %self.profile,
            run_dir = %run_dir.display(),
            "Created new run directory"
        );
        Ok(run_dir)
    }

    fn create_run_dir(&self) -> Result<PathBuf> {
        FsHandler::create_dir(&self.profile_dir)?;

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let base = format!("{RUN_DIR_PREFIX}{stamp}");

        // Runs created within the same second get a numeric suffix, which
        // still sorts after the unsuffixed name.
        let mut candidate = self.profile_dir.join(&base);
        let mut n = 1;
        loop {
            match std::fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = self.profile_dir.join(format!("{base}_{n}"));
                    n += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create run directory {}", candidate.display())
                    });
                }
            }
        }
    }

    /// Atomically point `current` at `run_dir`.
    pub fn set_current(&self, run_dir: &Path) -> Result<()> {
        FsHandler::create_dir(&self.profile_dir)?;

        let target = run_dir
            .strip_prefix(&self.profile_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| run_dir.to_path_buf());

        let tmp = self.profile_dir.join(CURRENT_TMP_LINK);
        FsHandler::remove_file_if_exists(&tmp).context("Failed to remove stale temporary link")?;

        symlink(&target, &tmp)
            .with_context(|| format!("Failed to create temporary link {}", tmp.display()))?;

        let current = self.current_link();
        FsHandler::remove_file_if_exists(&current)?;

        std::fs::rename(&tmp, &current).with_context(|| {
            format!("Failed to move {} onto {}", tmp.display(), current.display())
        })?;

        tracing::debug!(target = %target.display(), "Updated current run link");
        Ok(())
    }

    /// `<run>/node<n>`
    pub fn node_dir(&self, node: usize) -> Result<PathBuf> {
        Ok(self.require_current_run_dir()?.join(format!("node{node}")))
    }

    /// `<run>/node<n>/chainConfigs`
    pub fn chain_config_dir(&self, node: usize) -> Result<PathBuf> {
        Ok(self.node_dir(node)?.join("chainConfigs"))
    }

    /// Names of the run directories, oldest first.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.profile_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read runs directory {}", self.profile_dir.display())
                });
            }
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read runs directory entry")?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == CURRENT_LINK || name == CURRENT_TMP_LINK {
                continue;
            }
            // file_type does not follow symlinks
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                runs.push(name);
            }
        }

        runs.sort();
        Ok(runs)
    }

    /// Remove the oldest run directories, keeping the `keep` most recent.
    ///
    /// The directory `current` points to is never removed. Returns the names
    /// of the removed directories.
    pub fn clean_old_runs(&self, keep: usize) -> Result<Vec<String>> {
        let runs = self.list_runs()?;
        if runs.len() <= keep {
            return Ok(Vec::new());
        }

        let current = self
            .current_run_dir()?
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));

        let excess = runs.len() - keep;
        let mut removed = Vec::new();
        for name in runs.into_iter().take(excess) {
            if current.as_deref() == Some(name.as_str()) {
                tracing::debug!(run = %name, "Keeping current run directory");
                continue;
            }
            let path = self.profile_dir.join(&name);
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove run directory {}", path.display()))?;
            tracing::info!(run = %name, "Removed old run directory");
            removed.push(name);
        }

        Ok(removed)
    }
}

//! VM plugin validation and installation.

use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{AppContext, NetworkProfile, fs::FsHandler, vm_id::VmId};

/// Binaries smaller than this are considered truncated.
pub const MIN_VM_BINARY_SIZE: u64 = 1024;

/// Reasons a VM binary is rejected before installation.
#[derive(Debug, thiserror::Error)]
pub enum VmBinaryError {
    #[error("VM binary not found: {0}")]
    NotFound(PathBuf),
    #[error("VM binary {0} is a symlink to a missing file")]
    DanglingSymlink(PathBuf),
    #[error("VM binary {0} is not a regular file")]
    NotAFile(PathBuf),
    #[error("VM binary {0} is not executable (run: chmod +x {0})")]
    NotExecutable(PathBuf),
    #[error("VM binary {path} is too small ({size} bytes) - may be corrupted")]
    TooSmall { path: PathBuf, size: u64 },
    #[error("failed to inspect VM binary {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Check that `path` looks like a usable VM binary.
///
/// It must exist, be a regular file or a symlink to one, be executable and
/// be at least [`MIN_VM_BINARY_SIZE`] bytes. Returns the size.
pub fn validate_vm_binary(path: &Path) -> Result<u64, VmBinaryError> {
    let link_meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(VmBinaryError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(VmBinaryError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let meta = if link_meta.file_type().is_symlink() {
        match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VmBinaryError::DanglingSymlink(path.to_path_buf()));
            }
            Err(source) => {
                return Err(VmBinaryError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    } else {
        link_meta
    };

    if !meta.is_file() {
        return Err(VmBinaryError::NotAFile(path.to_path_buf()));
    }
    if !FsHandler::is_executable(&meta) {
        return Err(VmBinaryError::NotExecutable(path.to_path_buf()));
    }
    if meta.len() < MIN_VM_BINARY_SIZE {
        return Err(VmBinaryError::TooSmall {
            path: path.to_path_buf(),
            size: meta.len(),
        });
    }

    Ok(meta.len())
}

/// Installs VM binaries where the cluster nodes load plugins from.
pub trait PluginInstaller: Send + Sync {
    /// Install `binary` as the plugin of `vm_id`, returning the installed path.
    fn install(&self, vm_id: &VmId, binary: &Path) -> Result<PathBuf>;

    /// Remove the plugin of `vm_id`. Removing a missing plugin succeeds.
    fn uninstall(&self, vm_id: &VmId) -> Result<()>;

    fn is_installed(&self, vm_id: &VmId) -> bool;
}

impl<P: PluginInstaller + ?Sized> PluginInstaller for &P {
    fn install(&self, vm_id: &VmId, binary: &Path) -> Result<PathBuf> {
        (**self).install(vm_id, binary)
    }

    fn uninstall(&self, vm_id: &VmId) -> Result<()> {
        (**self).uninstall(vm_id)
    }

    fn is_installed(&self, vm_id: &VmId) -> bool {
        (**self).is_installed(vm_id)
    }
}

/// Copies plugins into a profile's plugin directory, named by VM id.
#[derive(Debug, Clone)]
pub struct FsPluginInstaller {
    plugin_dir: PathBuf,
}

impl FsPluginInstaller {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
        }
    }

    pub fn for_profile(ctx: &AppContext, profile: NetworkProfile) -> Self {
        Self::new(ctx.plugins_dir(profile))
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn plugin_path(&self, vm_id: &VmId) -> PathBuf {
        self.plugin_dir.join(vm_id.to_string())
    }
}

impl PluginInstaller for FsPluginInstaller {
    fn install(&self, vm_id: &VmId, binary: &Path) -> Result<PathBuf> {
        FsHandler::create_dir(&self.plugin_dir)?;

        let dest = self.plugin_path(vm_id);
        let tmp = FsHandler::temp_sibling(&dest)?;
        std::fs::copy(binary, &tmp).with_context(|| {
            format!("Failed to copy {} to {}", binary.display(), tmp.display())
        })?;
        FsHandler::set_executable(&tmp)?;
        std::fs::rename(&tmp, &dest)
            .with_context(|| format!("Failed to install plugin {}", dest.display()))?;

        tracing::info!(vm_id = %vm_id, path = %dest.display(), "Installed VM plugin");
        Ok(dest)
    }

    fn uninstall(&self, vm_id: &VmId) -> Result<()> {
        let path = self.plugin_path(vm_id);
        FsHandler::remove_file_if_exists(&path)?;
        tracing::info!(vm_id = %vm_id, path = %path.display(), "Removed VM plugin");
        Ok(())
    }

    fn is_installed(&self, vm_id: &VmId) -> bool {
        self.plugin_path(vm_id).is_file()
    }
}

/// An installed plugin that is removed again unless committed.
///
/// Dropping the guard without calling [`PluginGuard::commit`] uninstalls the
/// plugin and logs any failure. A plugin that was already installed before
/// (another chain may run the same VM) is replaced but never removed.
#[must_use = "an uncommitted plugin is rolled back when dropped"]
pub struct PluginGuard<'a, P: PluginInstaller + ?Sized> {
    installer: &'a P,
    vm_id: VmId,
    path: PathBuf,
    armed: bool,
}

impl<'a, P: PluginInstaller + ?Sized> PluginGuard<'a, P> {
    /// Install the plugin and guard it.
    pub fn install(installer: &'a P, vm_id: VmId, binary: &Path) -> Result<Self> {
        let preexisting = installer.is_installed(&vm_id);
        let path = installer.install(&vm_id, binary)?;
        Ok(Self {
            installer,
            vm_id,
            path,
            armed: !preexisting,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the plugin installed.
    pub fn commit(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Uninstall the plugin now, returning the outcome.
    pub fn rollback(mut self) -> Result<()> {
        if !std::mem::replace(&mut self.armed, false) {
            tracing::debug!(vm_id = %self.vm_id, "Plugin was installed before, keeping it");
            return Ok(());
        }
        self.installer.uninstall(&self.vm_id)
    }
}

impl<P: PluginInstaller + ?Sized> Drop for PluginGuard<'_, P> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.installer.uninstall(&self.vm_id)
        {
            tracing::warn!(vm_id = %self.vm_id, error = %e, "Failed to roll back VM plugin");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempdir::TempDir;

    use super::*;

    fn write_binary(path: &Path, size: usize, executable: bool) {
        std::fs::write(path, vec![0x7f; size]).unwrap();
        if executable {
            FsHandler::set_executable(path).unwrap();
        }
    }

    #[test]
    fn test_validate_accepts_good_binary() {
        let temp_dir = TempDir::new("luxnet-plugin").expect("Failed to create temp dir");
        let path = temp_dir.path().join("evm");
        write_binary(&path, 4096, true);

        assert_eq!(validate_vm_binary(&path).unwrap(), 4096);
    }

    #[test]
    fn test_validate_rejections_are_distinguishable() {
        let temp_dir = TempDir::new("luxnet-plugin").expect("Failed to create temp dir");

        let missing = temp_dir.path().join("missing");
        let err = validate_vm_binary(&missing).unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");

        let plain = temp_dir.path().join("plain");
        write_binary(&plain, 4096, false);
        let err = validate_vm_binary(&plain).unwrap_err();
        assert!(err.to_string().contains("not executable"), "{err}");

        let empty = temp_dir.path().join("empty");
        write_binary(&empty, 0, true);
        let err = validate_vm_binary(&empty).unwrap_err();
        assert!(err.to_string().contains("too small"), "{err}");
        assert!(err.to_string().contains("(0 bytes)"), "{err}");
    }

    #[test]
    fn test_validate_symlinks() {
        let temp_dir = TempDir::new("luxnet-plugin").expect("Failed to create temp dir");
        let target = temp_dir.path().join("evm");
        write_binary(&target, 2048, true);

        let link = temp_dir.path().join("evm-link");
        symlink(&target, &link).unwrap();
        assert_eq!(validate_vm_binary(&link).unwrap(), 2048);

        let dangling = temp_dir.path().join("dangling");
        symlink(temp_dir.path().join("gone"), &dangling).unwrap();
        assert!(matches!(
            validate_vm_binary(&dangling),
            Err(VmBinaryError::DanglingSymlink(_))
        ));

        assert!(matches!(
            validate_vm_binary(temp_dir.path()),
            Err(VmBinaryError::NotAFile(_))
        ));
    }

    #[test]
    fn test_install_and_uninstall() {
        let temp_dir = TempDir::new("luxnet-plugin").expect("Failed to create temp dir");
        let binary = temp_dir.path().join("evm");
        write_binary(&binary, 2048, false);

        let installer = FsPluginInstaller::new(temp_dir.path().join("plugins"));
        let vm_id = VmId::from_name("Lux EVM").unwrap();

        let path = installer.install(&vm_id, &binary).expect("install");
        assert_eq!(
            path,
            temp_dir
                .path()
                .join("plugins/ag3GReYPNuSR17rUP8acMdZipQBikdXNRKDyFszAysmy3vDXE")
        );
        assert!(validate_vm_binary(&path).is_ok());

        installer.uninstall(&vm_id).expect("uninstall");
        assert!(!path.exists());
        installer.uninstall(&vm_id).expect("uninstall twice");
    }

    #[test]
    fn test_guard_rolls_back_unless_committed() {
        let temp_dir = TempDir::new("luxnet-plugin").expect("Failed to create temp dir");
        let binary = temp_dir.path().join("evm");
        write_binary(&binary, 2048, true);
        let installer = FsPluginInstaller::new(temp_dir.path().join("plugins"));

        let dropped = VmId::from_name("dropped-vm").unwrap();
        {
            let guard = PluginGuard::install(&installer, dropped, &binary).unwrap();
            assert!(guard.path().exists());
        }
        assert!(!installer.plugin_path(&dropped).exists());

        let kept = VmId::from_name("kept-vm").unwrap();
        let path = PluginGuard::install(&installer, kept, &binary)
            .unwrap()
            .commit();
        assert!(path.exists());

        let rolled = VmId::from_name("rolled-vm").unwrap();
        PluginGuard::install(&installer, rolled, &binary)
            .unwrap()
            .rollback()
            .expect("rollback");
        assert!(!installer.plugin_path(&rolled).exists());

        // Rolling back a reinstall keeps the plugin other chains rely on.
        PluginGuard::install(&installer, kept, &binary)
            .unwrap()
            .rollback()
            .expect("rollback");
        assert!(installer.is_installed(&kept));
    }
}

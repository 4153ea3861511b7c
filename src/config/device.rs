use std::io;
use std::path::PathBuf;
use std::process::Command;

/// Resolves a filesystem UUID to the mount point of the device.
pub trait DeviceLocator {
    /// Returns [None] if no device with `uuid` is mounted.
    fn mount_point(&self, uuid: &str) -> io::Result<Option<PathBuf>>;
}

/// Locates devices using `findmnt(8)`.
#[derive(Debug, Clone, Default)]
pub struct FindMnt;

impl FindMnt {
    fn command(uuid: &str) -> Command {
        let mut findmnt = Command::new("findmnt");
        findmnt
            .arg("-rn")
            .arg("-o")
            .arg("TARGET")
            .arg("-S")
            .arg(format!("UUID={uuid}"));
        findmnt
    }
}

impl DeviceLocator for FindMnt {
    fn mount_point(&self, uuid: &str) -> io::Result<Option<PathBuf>> {
        log::trace!(target: "device", "Running: findmnt -rn -o TARGET -S UUID={uuid}");
        let output = Self::command(uuid).output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            log::warn!(target: "device", "{}", stderr.trim_end());
        }

        // findmnt exits with 1 if nothing matched
        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mount_point = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from);
        if let Some(mount_point) = &mount_point {
            log::debug!(target: "device", "Device {uuid} is mounted at {}", mount_point.display());
        }

        Ok(mount_point)
    }
}

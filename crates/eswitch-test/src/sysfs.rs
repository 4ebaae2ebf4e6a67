//! Throwaway sysfs trees.
//!
//! Builds the parts of `/sys` the device topology reader looks at under a
//! temporary directory:
//!
//! ```text
//! sys/bus/pci/devices/<addr>/net/<eth>/dev_id
//! sys/class/net/<eth>/dev_id
//! sys/class/net/<eth>/device -> ../../../<addr>
//! ```

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct FakeSysfs {
    dir: TempDir,
}

impl FakeSysfs {
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("sys/bus/pci/devices"))?;
        fs::create_dir_all(dir.path().join("sys/class/net"))?;
        Ok(Self { dir })
    }

    /// Directory to use as the sysfs root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    fn function_dir(&self, addr: &str) -> PathBuf {
        self.root().join("sys/bus/pci/devices").join(addr)
    }

    /// PCI function `addr` exposing netdev `eth` on 1-indexed `port`.
    pub fn add_netdev(&self, addr: &str, eth: &str, port: u32) -> io::Result<&Self> {
        let dev_id = format!("{:#x}\n", port.saturating_sub(1));

        let ndir = self.function_dir(addr).join("net").join(eth);
        fs::create_dir_all(&ndir)?;
        fs::write(ndir.join("dev_id"), &dev_id)?;

        let class = self.root().join("sys/class/net").join(eth);
        fs::create_dir_all(&class)?;
        fs::write(class.join("dev_id"), &dev_id)?;
        symlink(format!("../../../{addr}"), class.join("device"))?;
        Ok(self)
    }

    /// Physical function; same layout as any netdev function.
    pub fn add_pf(&self, addr: &str, eth: &str, port: u32) -> io::Result<&Self> {
        self.add_netdev(addr, eth, port)
    }

    /// Virtual function without a host netdev.
    pub fn add_vf(&self, addr: &str) -> io::Result<&Self> {
        fs::create_dir_all(self.function_dir(addr))?;
        Ok(self)
    }

    /// Removes a PCI function, e.g. after a VF is disabled.
    pub fn remove_function(&self, addr: &str) -> io::Result<()> {
        fs::remove_dir_all(self.function_dir(addr))
    }
}

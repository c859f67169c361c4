//! the device switch: character devices indexed by major number
use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
};

use log::info;
use parking_lot::RwLock;

use crate::{
    error::{fatal, FsError, Invariant, Result},
    param::NDEV,
};

/// a device file's read and write entry points
pub trait CharDevice: Send + Sync {
    fn read(&self, dst: &mut [u8]) -> Result<usize>;
    fn write(&self, src: &[u8]) -> Result<usize>;
}

/// map major device number to device functions
pub struct DeviceTable {
    devsw: RwLock<Vec<Option<Arc<dyn CharDevice>>>>,
}

impl fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let majors: Vec<usize> = self
            .devsw
            .read()
            .iter()
            .enumerate()
            .filter_map(|(major, dev)| dev.as_ref().map(|_| major))
            .collect();
        f.debug_struct("DeviceTable")
            .field("registered", &majors)
            .finish()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTable {
    pub fn new() -> Self {
        DeviceTable {
            devsw: RwLock::new(vec![None; NDEV]),
        }
    }

    /// install the driver for `major`, replacing any previous one
    pub fn register(&self, major: u16, device: Arc<dyn CharDevice>) -> Result<()> {
        let mut devsw = self.devsw.write();
        let slot = devsw
            .get_mut(major as usize)
            .ok_or(FsError::InvalidArgument("major device number out of range"))?;
        *slot = Some(device);
        info!("registered character device with major {major}");
        Ok(())
    }

    pub fn read(&self, major: u16, dst: &mut [u8]) -> Result<usize> {
        self.driver(major)?.read(dst)
    }

    pub fn write(&self, major: u16, src: &[u8]) -> Result<usize> {
        self.driver(major)?.write(src)
    }

    fn driver(&self, major: u16) -> Result<Arc<dyn CharDevice>> {
        match self.devsw.read().get(major as usize) {
            Some(Some(device)) => Ok(device.clone()),
            _ => fatal(Invariant::UnknownDevice(major as u32)),
        }
    }
}

/// the console: reads from standard input, writes to standard output
#[derive(Debug, Default)]
pub struct Console;

/// major number the console is conventionally registered under
pub const CONSOLE: u16 = 1;

impl CharDevice for Console {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        Ok(std::io::stdin().lock().read(dst)?)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        let mut out = std::io::stdout().lock();
        out.write_all(src)?;
        out.flush()?;
        Ok(src.len())
    }
}

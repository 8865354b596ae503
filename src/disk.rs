//! The disk controller: up to eight block images behind three citron
//! ports.
//!
//! Block I/O goes through a single 512-byte transfer buffer that the
//! board also maps at offset 0x20000, so the guest fills or drains it
//! with ordinary memory accesses and moves whole blocks with commands.
//! Bad-block and no-drive-selected conditions drop the command silently;
//! the guest discovers what happened with the read-info command rather
//! than through a bus fault.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::bus::{BusFault, BusSize};
use crate::error::MachineError;
use crate::interrupts::Lsic;

/// Bytes per disk block.
pub const BLOCK_SIZE: usize = 512;

/// LSIC vector raised on command completion when interrupts are enabled.
pub const DISK_IRQ_VECTOR: u32 = 0x3;

const MAX_DISKS: usize = 8;

const CMD_SELECT: u32 = 1;
const CMD_READ_BLOCK: u32 = 2;
const CMD_WRITE_BLOCK: u32 = 3;
const CMD_READ_INFO: u32 = 4;
const CMD_DRIVE_SIZE: u32 = 5;
const CMD_ENABLE_IRQ: u32 = 6;
const CMD_DISABLE_IRQ: u32 = 7;

/// Backing store for an attached disk. Files qualify, and so does
/// `std::io::Cursor<Vec<u8>>`, which the tests attach.
pub trait DiskImage: Read + Write + Seek {}

impl<T: Read + Write + Seek> DiskImage for T {}

struct AttachedDisk {
    stream: Box<dyn DiskImage>,
    block_count: u32,
}

impl AttachedDisk {
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
        self.stream
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;

        // Zero-pad short reads so a truncated final block never leaks
        // stale buffer contents.
        buf.fill(0);
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(())
    }

    fn write_block(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        self.stream
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        self.stream.write_all(buf)?;
        self.stream.flush()
    }
}

/// The disk controller, living behind citron ports 0x19..=0x1B.
pub struct DiskController {
    disks: Vec<AttachedDisk>,
    buffer: [u8; BLOCK_SIZE],
    selected: Option<usize>,
    info_what: u32,
    info_details: u32,
    port_a: u32,
    port_b: u32,
    interrupts: bool,
}

impl Default for DiskController {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskController {
    pub fn new() -> DiskController {
        DiskController {
            disks: Vec::new(),
            buffer: [0; BLOCK_SIZE],
            selected: None,
            info_what: 0,
            info_details: 0,
            port_a: 0,
            port_b: 0,
            interrupts: false,
        }
    }

    /// Attaches a raw disk image file, opened read-write.
    ///
    /// The image length need not be a multiple of 512; trailing bytes
    /// are ignored for the block count.
    pub fn attach<P: AsRef<Path>>(&mut self, path: P) -> Result<(), MachineError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        log::debug!(
            "attaching disk image {} ({} blocks)",
            path.as_ref().display(),
            len / BLOCK_SIZE as u64
        );
        self.attach_image(Box::new(file), len)
    }

    /// Attaches an already-open image of `len` bytes.
    pub fn attach_image(
        &mut self,
        stream: Box<dyn DiskImage>,
        len: u64,
    ) -> Result<(), MachineError> {
        if self.disks.len() >= MAX_DISKS {
            return Err(MachineError::TooManyDisks);
        }

        self.disks.push(AttachedDisk {
            stream,
            block_count: (len / BLOCK_SIZE as u64) as u32,
        });
        Ok(())
    }

    /// The shared transfer buffer, also visible through the board's
    /// MMIO window. Both paths must see the same bytes.
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn reset(&mut self) {
        self.interrupts = false;
        self.port_a = 0;
        self.port_b = 0;
        self.selected = None;
        self.info_what = 0;
        self.info_details = 0;
    }

    pub(crate) fn read(&mut self, port: u32, _size: BusSize) -> Result<u32, BusFault> {
        match port {
            0x19 => Ok(0),
            0x1A => Ok(self.port_a),
            0x1B => Ok(self.port_b),
            _ => Err(BusFault),
        }
    }

    pub(crate) fn write(
        &mut self,
        lsic: &mut Lsic,
        port: u32,
        _size: BusSize,
        value: u32,
    ) -> Result<(), BusFault> {
        match port {
            0x19 => self.command(lsic, value),
            0x1A => {
                self.port_a = value;
                Ok(())
            }
            0x1B => {
                self.port_b = value;
                Ok(())
            }
            _ => Err(BusFault),
        }
    }

    fn command(&mut self, lsic: &mut Lsic, command: u32) -> Result<(), BusFault> {
        match command {
            CMD_SELECT => {
                self.selected = if (self.port_a as usize) < self.disks.len() {
                    Some(self.port_a as usize)
                } else {
                    None
                };
                Ok(())
            }
            CMD_READ_BLOCK => {
                let Some(selected) = self.selected else {
                    return Ok(());
                };
                let disk = &mut self.disks[selected];
                if self.port_a >= disk.block_count {
                    return Ok(());
                }

                if let Err(err) = disk.read_block(self.port_a, &mut self.buffer) {
                    log::warn!("disk {selected}: block read failed: {err}");
                    return Ok(());
                }
                self.write_info(lsic, 0, self.port_a);
                Ok(())
            }
            CMD_WRITE_BLOCK => {
                let Some(selected) = self.selected else {
                    return Ok(());
                };
                let disk = &mut self.disks[selected];
                if self.port_a >= disk.block_count {
                    return Ok(());
                }

                if let Err(err) = disk.write_block(self.port_a, &self.buffer) {
                    log::warn!("disk {selected}: block write failed: {err}");
                    return Ok(());
                }
                self.write_info(lsic, 0, self.port_a);
                Ok(())
            }
            CMD_READ_INFO => {
                self.port_a = self.info_what;
                self.port_b = self.info_details;
                Ok(())
            }
            CMD_DRIVE_SIZE => {
                if let Some(disk) = self.disks.get(self.port_a as usize) {
                    self.port_b = disk.block_count;
                    self.port_a = 1;
                } else {
                    self.port_a = 0;
                    self.port_b = 0;
                }
                Ok(())
            }
            CMD_ENABLE_IRQ => {
                self.interrupts = true;
                Ok(())
            }
            CMD_DISABLE_IRQ => {
                self.interrupts = false;
                Ok(())
            }
            _ => Err(BusFault),
        }
    }

    fn write_info(&mut self, lsic: &mut Lsic, what: u32, details: u32) {
        self.info_what = what;
        self.info_details = details;

        if self.interrupts {
            lsic.raise(DISK_IRQ_VECTOR);
        }
    }
}

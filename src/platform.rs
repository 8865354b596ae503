//! The platform board at bus area 31: citron I/O ports, board
//! registers, NVRAM, the shared disk buffer window, the LSIC window,
//! the boot ROM and the reset trigger.
//!
//! The board owns every device behind it. Citron ports are claim-once
//! bindings into those owned devices, so port dispatch is a table
//! lookup plus a match on the binding. Devices that raise interrupts
//! are handed the LSIC for exactly the duration of the access.

use crate::amanatsu::{Amanatsu, Key};
use crate::bus::{read_le, write_le, BusFault, BusSize};
use crate::disk::DiskController;
use crate::error::MachineError;
use crate::interrupts::Lsic;
use crate::rtc::Rtc;
use crate::serial::SerialPort;

/// Board identification, exposed read-only in board register 0.
pub const BOARD_VERSION: u32 = 0x0003_0001;

/// Writing this long to offset 0x800000 resets the board.
pub const RESET_MAGIC: u32 = 0xAABB_CCDD;

/// Base of the boot ROM window within the board area; the window runs
/// to the end of the area, capping images at 128 KiB.
pub const BOOT_ROM_BASE: u32 = 0x07FE_0000;

const BOOT_ROM_MAX: usize = 128 * 1024;
const NVRAM_SIZE: usize = 64 * 1024;
const CITRON_PORTS: usize = 256;
const SERIAL_UNITS: usize = 2;

/// Decoded regions of the board window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoardArea {
    Citron(u32),
    Regs(u32),
    Nvram(u32),
    DiskBuffer(u32),
    Lsic(u32),
    BootRom(u32),
    Reset,
    None,
}

fn area_from_addr(addr: u32) -> BoardArea {
    if addr < 0x400 {
        BoardArea::Citron(addr)
    } else if (0x800..0x880).contains(&addr) {
        BoardArea::Regs(addr - 0x800)
    } else if (0x1000..0x11000).contains(&addr) {
        BoardArea::Nvram(addr - 0x1000)
    } else if (0x20000..0x20200).contains(&addr) {
        BoardArea::DiskBuffer(addr - 0x20000)
    } else if (0x30000..0x30100).contains(&addr) {
        BoardArea::Lsic(addr - 0x30000)
    } else if addr >= BOOT_ROM_BASE {
        BoardArea::BootRom(addr - BOOT_ROM_BASE)
    } else if addr == 0x800000 {
        BoardArea::Reset
    } else {
        BoardArea::None
    }
}

/// Which owned device answers a citron port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortBinding {
    None,
    Disk,
    Serial(usize),
    Rtc,
    Amanatsu,
}

pub struct Platform {
    lsic: Lsic,
    disk: DiskController,
    serial: [Option<SerialPort>; SERIAL_UNITS],
    rtc: Option<Rtc>,
    amanatsu: Option<Amanatsu>,
    ports: [PortBinding; CITRON_PORTS],
    regs: [u32; 32],
    nvram: Vec<u8>,
    boot_rom: Vec<u8>,
}

impl Platform {
    /// A board with the disk controller on ports 0x19..=0x1B and
    /// `boot_rom` mapped at the top of the area.
    pub fn new(
        lsic: Lsic,
        disk: DiskController,
        boot_rom: Vec<u8>,
    ) -> Result<Platform, MachineError> {
        if boot_rom.len() > BOOT_ROM_MAX {
            return Err(MachineError::BootRomTooLarge(boot_rom.len()));
        }

        let mut regs = [0u32; 32];
        regs[0] = BOARD_VERSION;

        let mut platform = Platform {
            lsic,
            disk,
            serial: [None, None],
            rtc: None,
            amanatsu: None,
            ports: [PortBinding::None; CITRON_PORTS],
            regs,
            nvram: vec![0; NVRAM_SIZE],
            boot_rom,
        };

        for port in 0x19..=0x1B {
            platform.claim_port(port, PortBinding::Disk)?;
        }
        Ok(platform)
    }

    fn claim_port(&mut self, port: u32, binding: PortBinding) -> Result<(), MachineError> {
        let slot = &mut self.ports[port as usize];
        if *slot != PortBinding::None {
            return Err(MachineError::PortInUse(port));
        }
        *slot = binding;
        Ok(())
    }

    /// Wires a UART onto its two citron ports.
    pub fn attach_serial(&mut self, serial: SerialPort) -> Result<(), MachineError> {
        let unit = ((serial.base() - 0x10) / 2) as usize;
        let base = serial.base();

        self.claim_port(base, PortBinding::Serial(unit))?;
        self.claim_port(base + 1, PortBinding::Serial(unit))?;
        self.serial[unit] = Some(serial);
        Ok(())
    }

    /// Wires the clock onto ports 0x20/0x21.
    pub fn attach_rtc(&mut self, rtc: Rtc) -> Result<(), MachineError> {
        self.claim_port(0x20, PortBinding::Rtc)?;
        self.claim_port(0x21, PortBinding::Rtc)?;
        self.rtc = Some(rtc);
        Ok(())
    }

    /// Wires the amanatsu hub onto ports 0x30..=0x34.
    pub fn attach_amanatsu(&mut self, hub: Amanatsu) -> Result<(), MachineError> {
        for port in 0x30..=0x34 {
            self.claim_port(port, PortBinding::Amanatsu)?;
        }
        self.amanatsu = Some(hub);
        Ok(())
    }

    pub fn lsic(&self) -> &Lsic {
        &self.lsic
    }

    pub fn lsic_mut(&mut self) -> &mut Lsic {
        &mut self.lsic
    }

    pub fn disk(&self) -> &DiskController {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut DiskController {
        &mut self.disk
    }

    pub fn serial_mut(&mut self, unit: usize) -> Option<&mut SerialPort> {
        self.serial.get_mut(unit)?.as_mut()
    }

    pub fn amanatsu_mut(&mut self) -> Option<&mut Amanatsu> {
        self.amanatsu.as_mut()
    }

    /// Advances the clock; the outer loop calls this between CPU
    /// batches with the elapsed host milliseconds.
    pub fn tick(&mut self, ms: u32) {
        if let Some(rtc) = &mut self.rtc {
            rtc.tick(&mut self.lsic, ms);
        }
    }

    /// Feeds one host key edge to the keyboard, raising its interrupt
    /// line when the guest has enabled it.
    pub fn key_event(&mut self, key: Key, pressed: bool) {
        if let Some(hub) = &mut self.amanatsu {
            hub.key_event(&mut self.lsic, key, pressed);
        }
    }

    /// Full board reset: the LSIC and every attached device return to
    /// power-on state. The boot ROM, NVRAM and board registers keep
    /// their contents.
    pub fn reset(&mut self) {
        self.lsic.reset();
        self.disk.reset();
        for serial in self.serial.iter_mut().flatten() {
            serial.reset();
        }
        if let Some(rtc) = &mut self.rtc {
            rtc.reset();
        }
        if let Some(hub) = &mut self.amanatsu {
            hub.reset();
        }
    }

    fn citron_read(&mut self, port: u32, size: BusSize) -> Result<u32, BusFault> {
        match self.ports[port as usize] {
            PortBinding::None => Ok(0),
            PortBinding::Disk => self.disk.read(port, size),
            PortBinding::Serial(unit) => match &mut self.serial[unit] {
                Some(serial) => serial.read(port, size),
                None => Err(BusFault),
            },
            PortBinding::Rtc => match &mut self.rtc {
                Some(rtc) => rtc.read(port, size),
                None => Err(BusFault),
            },
            PortBinding::Amanatsu => match &mut self.amanatsu {
                Some(hub) => hub.read(port, size),
                None => Err(BusFault),
            },
        }
    }

    fn citron_write(&mut self, port: u32, size: BusSize, value: u32) -> Result<(), BusFault> {
        match self.ports[port as usize] {
            PortBinding::None => Ok(()),
            PortBinding::Disk => self.disk.write(&mut self.lsic, port, size, value),
            PortBinding::Serial(unit) => match &mut self.serial[unit] {
                Some(serial) => serial.write(port, size, value),
                None => Err(BusFault),
            },
            PortBinding::Rtc => match &mut self.rtc {
                Some(rtc) => rtc.write(port, size, value),
                None => Err(BusFault),
            },
            PortBinding::Amanatsu => match &mut self.amanatsu {
                Some(hub) => hub.write(port, size, value),
                None => Err(BusFault),
            },
        }
    }

    pub(crate) fn mem_read(&mut self, addr: u32, size: BusSize) -> Result<u32, BusFault> {
        match area_from_addr(addr) {
            BoardArea::Citron(offset) => self.citron_read(offset / 4, size),
            BoardArea::Regs(offset) => {
                if size == BusSize::Long {
                    Ok(self.regs[(offset / 4) as usize])
                } else {
                    Ok(0)
                }
            }
            BoardArea::Nvram(offset) => read_le(&self.nvram, offset, size),
            BoardArea::DiskBuffer(offset) => read_le(self.disk.buffer(), offset, size),
            BoardArea::Lsic(offset) => {
                if size == BusSize::Long {
                    self.lsic.mem_read(offset, size)
                } else {
                    Err(BusFault)
                }
            }
            BoardArea::BootRom(offset) => read_le(&self.boot_rom, offset, size),
            BoardArea::Reset | BoardArea::None => Err(BusFault),
        }
    }

    pub(crate) fn mem_write(&mut self, addr: u32, size: BusSize, value: u32) -> Result<(), BusFault> {
        match area_from_addr(addr) {
            BoardArea::Citron(offset) => self.citron_write(offset / 4, size, value),
            BoardArea::Regs(offset) => {
                let reg = (offset / 4) as usize;
                // Register 0 carries the board version and stays fixed.
                if size == BusSize::Long && reg != 0 {
                    self.regs[reg] = value;
                }
                Ok(())
            }
            BoardArea::Nvram(offset) => write_le(&mut self.nvram, offset, size, value),
            BoardArea::DiskBuffer(offset) => write_le(self.disk.buffer_mut(), offset, size, value),
            BoardArea::Lsic(offset) => {
                if size == BusSize::Long {
                    self.lsic.mem_write(offset, size, value)
                } else {
                    Err(BusFault)
                }
            }
            BoardArea::BootRom(_) => Ok(()),
            BoardArea::Reset => {
                if size == BusSize::Long && value == RESET_MAGIC {
                    log::info!("board reset triggered");
                    self.reset();
                    Ok(())
                } else {
                    Err(BusFault)
                }
            }
            BoardArea::None => Err(BusFault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Platform {
        Platform::new(Lsic::new(), DiskController::new(), vec![0xAA, 0xBB, 0xCC, 0xDD]).unwrap()
    }

    #[test]
    fn nvram_round_trips_all_widths() {
        let mut board = board();
        for (offset, size, value) in [
            (0x1000, BusSize::Byte, 0x7Fu32),
            (0x1010, BusSize::Int, 0xBEEF),
            (0x1100, BusSize::Long, 0xDEAD_BEEF),
        ] {
            board.mem_write(offset, size, value).unwrap();
            assert_eq!(Ok(value), board.mem_read(offset, size));
        }

        // Last NVRAM byte is at 0x10FFF; past it the decode goes dead.
        board.mem_write(0x10FFF, BusSize::Byte, 0x42).unwrap();
        assert_eq!(Err(BusFault), board.mem_write(0x11000, BusSize::Byte, 0));
    }

    #[test]
    fn board_register_zero_is_read_only() {
        let mut board = board();
        assert_eq!(Ok(BOARD_VERSION), board.mem_read(0x800, BusSize::Long));

        board.mem_write(0x800, BusSize::Long, 0).unwrap();
        assert_eq!(Ok(BOARD_VERSION), board.mem_read(0x800, BusSize::Long));

        board.mem_write(0x804, BusSize::Long, 0x1234).unwrap();
        assert_eq!(Ok(0x1234), board.mem_read(0x804, BusSize::Long));
    }

    #[test]
    fn boot_rom_is_mapped_read_only() {
        let mut board = board();
        assert_eq!(Ok(0xDDCC_BBAA), board.mem_read(BOOT_ROM_BASE, BusSize::Long));

        board.mem_write(BOOT_ROM_BASE, BusSize::Long, 0).unwrap();
        assert_eq!(Ok(0xDDCC_BBAA), board.mem_read(BOOT_ROM_BASE, BusSize::Long));

        // Reads past the image fault.
        assert_eq!(Err(BusFault), board.mem_read(BOOT_ROM_BASE + 4, BusSize::Long));
    }

    #[test]
    fn oversized_boot_rom_is_refused() {
        assert!(matches!(
            Platform::new(Lsic::new(), DiskController::new(), vec![0; BOOT_ROM_MAX + 1]),
            Err(MachineError::BootRomTooLarge(_))
        ));
    }

    #[test]
    fn lsic_window_is_long_only() {
        let mut board = board();
        board.lsic_mut().raise(5);
        assert_eq!(Ok(5), board.mem_read(0x30010, BusSize::Long));
        assert_eq!(Err(BusFault), board.mem_read(0x30010, BusSize::Int));
        assert_eq!(Err(BusFault), board.mem_write(0x30010, BusSize::Byte, 5));
    }

    #[test]
    fn unclaimed_ports_read_zero_and_drop_writes() {
        let mut board = board();
        assert_eq!(Ok(0), board.mem_read(0x3FC, BusSize::Long));
        assert_eq!(Ok(()), board.mem_write(0x3FC, BusSize::Long, 7));
    }

    #[test]
    fn port_claims_are_exclusive() {
        let mut board = board();
        board.attach_rtc(Rtc::new()).unwrap();
        assert!(matches!(
            board.attach_rtc(Rtc::new()),
            Err(MachineError::PortInUse(0x20))
        ));
    }

    #[test]
    fn disk_buffer_window_aliases_the_controller_buffer() {
        let mut board = board();
        board.mem_write(0x20000, BusSize::Long, 0xCAFE_F00D).unwrap();
        assert_eq!(
            0xCAFE_F00D,
            u32::from_le_bytes(board.disk().buffer()[0..4].try_into().unwrap())
        );
        assert_eq!(Ok(0xCAFE_F00D), board.mem_read(0x20000, BusSize::Long));

        // The window is exactly one block long.
        assert_eq!(Ok(0), board.mem_read(0x201FC, BusSize::Long));
        assert_eq!(Err(BusFault), board.mem_read(0x201FD, BusSize::Long));
    }

    #[test]
    fn reset_write_resets_the_lsic_and_ports() {
        let mut board = board();
        board.attach_serial(SerialPort::with_sink(0, Box::new(std::io::sink()))).unwrap();
        board.lsic_mut().raise(9);

        // Only the magic long performs the reset.
        assert_eq!(Err(BusFault), board.mem_write(0x800000, BusSize::Long, 1));
        assert!(board.lsic().interrupt_pending());

        board.mem_write(0x800000, BusSize::Long, RESET_MAGIC).unwrap();
        assert!(!board.lsic().interrupt_pending());
    }
}

//! The physical address space and its 32-area dispatch.
//!
//! The ls bus is a flat 4 GiB space cut into 32 fixed areas of 128 MiB.
//! The high five address bits select the area, the low 27 bits are the
//! offset within it. Areas 0 and 1 carry RAM, area 2 the RAM descriptor
//! page, area 24 the framebuffer and area 31 the platform board; the
//! remainder is open bus.
//!
//! The CPU talks to memory through the [`AddressBus`] trait rather than
//! the concrete [`Bus`], so tests can substitute a flat memory:
//!
//! ```rust
//! use lsemu::bus::{AddressBus, BusFault, BusSize, InterruptSource};
//!
//! struct FlatMem(Vec<u8>);
//!
//! impl AddressBus for FlatMem {
//!     fn mem_read(&mut self, addr: u32, size: BusSize) -> Result<u32, BusFault> {
//!         lsemu::bus::read_le(&self.0, addr, size)
//!     }
//!
//!     fn mem_write(&mut self, addr: u32, size: BusSize, value: u32) -> Result<(), BusFault> {
//!         lsemu::bus::write_le(&mut self.0, addr, size, value)
//!     }
//! }
//!
//! impl InterruptSource for FlatMem {
//!     fn interrupt_pending(&self) -> bool {
//!         false
//!     }
//! }
//! ```

use crate::error::MachineError;
use crate::kinnowfb::KinnowFb;
use crate::platform::Platform;
use crate::ram::Ram;

/// Size of one bus area in bytes (128 MiB).
pub const AREA_SIZE: u32 = 128 * 1024 * 1024;

/// Number of areas in the 4 GiB space.
pub const AREA_COUNT: usize = 32;

/// First area index of the open-bus region: unmapped areas from here on
/// read as zero and swallow writes instead of faulting.
pub const OPEN_AREA_START: u32 = 24;

/// Bus area carrying the framebuffer.
pub const AREA_VIDEO: u32 = 24;

/// Bus area carrying the platform board.
pub const AREA_BOARD: u32 = 31;

/// The three transaction widths the bus supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSize {
    Byte,
    Int,
    Long,
}

impl BusSize {
    /// Width of the access in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            BusSize::Byte => 1,
            BusSize::Int => 2,
            BusSize::Long => 4,
        }
    }

    /// Mask selecting the low bits a value of this width occupies.
    #[inline]
    pub fn mask(self) -> u32 {
        match self {
            BusSize::Byte => 0xFF,
            BusSize::Int => 0xFFFF,
            BusSize::Long => 0xFFFF_FFFF,
        }
    }
}

/// An access that no device claimed.
///
/// The CPU converts this into a BUSERROR exception with EBADADDR set to
/// the offending address; device internals just propagate it with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unmapped bus access")]
pub struct BusFault;

/// Memory interface the CPU executes against.
pub trait AddressBus {
    /// Reads a byte, int or long at `addr`, zero-extended to 32 bits.
    fn mem_read(&mut self, addr: u32, size: BusSize) -> Result<u32, BusFault>;

    /// Writes the low `size` bits of `value` at `addr`.
    fn mem_write(&mut self, addr: u32, size: BusSize, value: u32) -> Result<(), BusFault>;
}

/// Source of the asynchronous interrupt signal the CPU samples before
/// each instruction.
pub trait InterruptSource {
    /// True while at least one unmasked interrupt vector is pending.
    fn interrupt_pending(&self) -> bool;
}

/// Little-endian load from a backing byte buffer, faulting past the end.
pub fn read_le(buf: &[u8], offset: u32, size: BusSize) -> Result<u32, BusFault> {
    let offset = offset as usize;
    let end = offset.checked_add(size.bytes()).ok_or(BusFault)?;
    if end > buf.len() {
        return Err(BusFault);
    }

    Ok(match size {
        BusSize::Byte => buf[offset] as u32,
        BusSize::Int => u16::from_le_bytes([buf[offset], buf[offset + 1]]) as u32,
        BusSize::Long => {
            u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
        }
    })
}

/// Little-endian store into a backing byte buffer, faulting past the end.
pub fn write_le(buf: &mut [u8], offset: u32, size: BusSize, value: u32) -> Result<(), BusFault> {
    let offset = offset as usize;
    let end = offset.checked_add(size.bytes()).ok_or(BusFault)?;
    if end > buf.len() {
        return Err(BusFault);
    }

    match size {
        BusSize::Byte => buf[offset] = value as u8,
        BusSize::Int => buf[offset..end].copy_from_slice(&(value as u16).to_le_bytes()),
        BusSize::Long => buf[offset..end].copy_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

/// What a bus slot dispatches to. The set of device kinds is closed and
/// known at construction, so dispatch is a tag match, not a v-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Unmapped,
    Ram { page: u32 },
    RamDescriptor,
    Video,
    Board,
}

/// The system bus: owns the RAM, the framebuffer and the platform board,
/// and routes every access by area index.
pub struct Bus {
    slots: [Slot; AREA_COUNT],
    ram: Ram,
    video: Option<KinnowFb>,
    board: Option<Platform>,
}

impl Bus {
    /// Creates a bus with `ram` mapped at areas 0 (and 1, when the
    /// configured size spills past the first area) plus the descriptor
    /// page at area 2.
    pub fn new(ram: Ram) -> Bus {
        let mut slots = [Slot::Unmapped; AREA_COUNT];

        slots[0] = Slot::Ram { page: 0 };
        if ram.size() > AREA_SIZE {
            slots[1] = Slot::Ram { page: 1 };
        }
        slots[2] = Slot::RamDescriptor;

        Bus {
            slots,
            ram,
            video: None,
            board: None,
        }
    }

    fn claim(&mut self, area: u32, slot: Slot) -> Result<(), MachineError> {
        if self.slots[area as usize] != Slot::Unmapped {
            return Err(MachineError::AreaInUse(area));
        }
        self.slots[area as usize] = slot;
        Ok(())
    }

    /// Maps the framebuffer at area 24. An area slot may be set at most
    /// once per boot.
    pub fn map_video(&mut self, video: KinnowFb) -> Result<(), MachineError> {
        self.claim(AREA_VIDEO, Slot::Video)?;
        self.video = Some(video);
        Ok(())
    }

    /// Maps the platform board at area 31.
    pub fn map_board(&mut self, board: Platform) -> Result<(), MachineError> {
        self.claim(AREA_BOARD, Slot::Board)?;
        self.board = Some(board);
        Ok(())
    }

    pub fn video(&self) -> Option<&KinnowFb> {
        self.video.as_ref()
    }

    pub fn video_mut(&mut self) -> Option<&mut KinnowFb> {
        self.video.as_mut()
    }

    pub fn board(&self) -> Option<&Platform> {
        self.board.as_ref()
    }

    pub fn board_mut(&mut self) -> Option<&mut Platform> {
        self.board.as_mut()
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }

    /// Resets every mapped device that has reset semantics (currently
    /// the board, which in turn resets the LSIC and its ports).
    pub fn reset(&mut self) {
        if let Some(board) = &mut self.board {
            board.reset();
        }
    }
}

impl AddressBus for Bus {
    fn mem_read(&mut self, addr: u32, size: BusSize) -> Result<u32, BusFault> {
        let area = addr >> 27;
        let offset = addr & 0x07FF_FFFF;

        match self.slots[area as usize] {
            Slot::Ram { page } => self.ram.area_read(page, offset, size),
            Slot::RamDescriptor => self.ram.descriptor_read(offset, size),
            Slot::Video => match &mut self.video {
                Some(video) => video.mem_read(offset, size),
                None => Err(BusFault),
            },
            Slot::Board => match &mut self.board {
                Some(board) => board.mem_read(offset, size),
                None => Err(BusFault),
            },
            Slot::Unmapped if area >= OPEN_AREA_START => Ok(0),
            Slot::Unmapped => Err(BusFault),
        }
    }

    fn mem_write(&mut self, addr: u32, size: BusSize, value: u32) -> Result<(), BusFault> {
        let area = addr >> 27;
        let offset = addr & 0x07FF_FFFF;

        match self.slots[area as usize] {
            Slot::Ram { page } => self.ram.area_write(page, offset, size, value),
            Slot::RamDescriptor => Err(BusFault),
            Slot::Video => match &mut self.video {
                Some(video) => video.mem_write(offset, size, value),
                None => Err(BusFault),
            },
            Slot::Board => match &mut self.board {
                Some(board) => board.mem_write(offset, size, value),
                None => Err(BusFault),
            },
            Slot::Unmapped if area >= OPEN_AREA_START => Ok(()),
            Slot::Unmapped => Err(BusFault),
        }
    }
}

impl InterruptSource for Bus {
    fn interrupt_pending(&self) -> bool {
        self.board
            .as_ref()
            .is_some_and(|board| board.lsic().interrupt_pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_ram(bytes: u32) -> Bus {
        Bus::new(Ram::new(bytes).unwrap())
    }

    #[test]
    fn area_dispatch_math() {
        // Area index is the top five bits, offset the bottom 27.
        for addr in [0u32, 0x0800_0000, 0xF800_0000, 0xFFFF_FFFF] {
            assert_eq!(addr >> 27, addr / AREA_SIZE);
            assert_eq!(addr & 0x07FF_FFFF, addr % AREA_SIZE);
        }
    }

    #[test]
    fn ram_round_trips_through_the_bus() {
        let mut bus = bus_with_ram(1024 * 1024);
        bus.mem_write(0x1234, BusSize::Long, 0xCAFE_BABE).unwrap();
        assert_eq!(Ok(0xCAFE_BABE), bus.mem_read(0x1234, BusSize::Long));
        assert_eq!(Ok(0xBE), bus.mem_read(0x1234, BusSize::Byte));
        assert_eq!(Ok(0xCAFE), bus.mem_read(0x1236, BusSize::Int));
    }

    #[test]
    fn second_ram_area_maps_only_past_128mib() {
        let small = bus_with_ram(64 * 1024 * 1024);
        assert_eq!(Slot::Unmapped, small.slots[1]);

        let large = bus_with_ram(160 * 1024 * 1024);
        assert_eq!(Slot::Ram { page: 1 }, large.slots[1]);
    }

    #[test]
    fn open_bus_reads_zero_and_swallows_writes() {
        let mut bus = bus_with_ram(4096);
        // Area 25 is unmapped but inside the open-bus region.
        let addr = 25 << 27;
        assert_eq!(Ok(0), bus.mem_read(addr, BusSize::Long));
        assert_eq!(Ok(()), bus.mem_write(addr, BusSize::Long, 0xFFFF_FFFF));
        assert_eq!(Ok(0), bus.mem_read(addr, BusSize::Long));
    }

    #[test]
    fn low_unmapped_areas_fault() {
        let mut bus = bus_with_ram(4096);
        let addr = 5 << 27;
        assert_eq!(Err(BusFault), bus.mem_read(addr, BusSize::Long));
        assert_eq!(Err(BusFault), bus.mem_write(addr, BusSize::Byte, 0));
    }

    #[test]
    fn mapping_an_area_twice_is_refused() {
        let mut bus = bus_with_ram(4096);
        bus.map_video(KinnowFb::new(64, 64)).unwrap();
        assert!(matches!(
            bus.map_video(KinnowFb::new(64, 64)),
            Err(MachineError::AreaInUse(AREA_VIDEO))
        ));
    }

    #[test]
    fn le_helpers_respect_bounds() {
        let mut buf = [0u8; 4];
        assert_eq!(Ok(()), write_le(&mut buf, 0, BusSize::Long, 0x0403_0201));
        assert_eq!(Ok(0x0201), read_le(&buf, 0, BusSize::Int));
        assert_eq!(Err(BusFault), read_le(&buf, 3, BusSize::Int));
        assert_eq!(Err(BusFault), write_le(&mut buf, 1, BusSize::Long, 0));
        assert_eq!(Err(BusFault), read_le(&buf, u32::MAX, BusSize::Long));
    }
}

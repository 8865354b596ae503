//! Physical RAM and the slot-descriptor page.
//!
//! RAM is one contiguous byte vector of up to 256 MiB, exposed to the bus
//! as up to two 128 MiB areas. Firmware sizes memory by reading the
//! descriptor page at area 2: long 0 holds the slot count, longs 1..=8
//! the byte size of each 32 MiB slot.

use crate::bus::{read_le, write_le, BusFault, BusSize};
use crate::error::MachineError;

/// Granularity the descriptor page advertises memory in (32 MiB).
pub const SLOT_SIZE: u32 = 32 * 1024 * 1024;

/// Number of memory slots on the board.
pub const SLOT_COUNT: u32 = 8;

/// Largest supported memory configuration (256 MiB).
pub const MAX_SIZE: u32 = SLOT_SIZE * SLOT_COUNT;

pub struct Ram {
    memory: Vec<u8>,
    slot_sizes: [u32; SLOT_COUNT as usize],
}

impl Ram {
    /// Allocates `size` bytes of zeroed physical memory.
    ///
    /// Sizes that are not a multiple of 32 MiB leave a partially
    /// populated final slot, which the descriptor reports as-is.
    pub fn new(size: u32) -> Result<Ram, MachineError> {
        if size > MAX_SIZE {
            return Err(MachineError::RamTooLarge(size));
        }

        let mut slot_sizes = [0u32; SLOT_COUNT as usize];
        let full_slots = (size / SLOT_SIZE) as usize;

        for slot in slot_sizes.iter_mut().take(full_slots) {
            *slot = SLOT_SIZE;
        }
        let leftover = size - full_slots as u32 * SLOT_SIZE;
        if leftover != 0 {
            slot_sizes[full_slots] = leftover;
        }

        Ok(Ram {
            memory: vec![0; size as usize],
            slot_sizes,
        })
    }

    /// Configured memory size in bytes.
    pub fn size(&self) -> u32 {
        self.memory.len() as u32
    }

    pub(crate) fn area_read(&self, page: u32, offset: u32, size: BusSize) -> Result<u32, BusFault> {
        read_le(&self.memory, page * crate::bus::AREA_SIZE + offset, size)
    }

    pub(crate) fn area_write(
        &mut self,
        page: u32,
        offset: u32,
        size: BusSize,
        value: u32,
    ) -> Result<(), BusFault> {
        write_le(&mut self.memory, page * crate::bus::AREA_SIZE + offset, size, value)
    }

    /// Descriptor page: long-only, read-only.
    pub(crate) fn descriptor_read(&self, offset: u32, size: BusSize) -> Result<u32, BusFault> {
        if size != BusSize::Long {
            return Err(BusFault);
        }

        let reg = offset / 4;
        if reg == 0 {
            Ok(SLOT_COUNT)
        } else if reg - 1 < SLOT_COUNT {
            Ok(self.slot_sizes[(reg - 1) as usize])
        } else {
            Err(BusFault)
        }
    }
}

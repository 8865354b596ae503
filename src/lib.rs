//! # lsemu - ls workstation emulator core
//!
//! A full-system emulator core for the "ls" 32-bit RISC workstation: an
//! XR/17032-style CPU with MMU, a 32-area memory bus, the LSIC
//! interrupt controller, and the board's bestiary of memory-mapped
//! devices - disk, framebuffer, serial, real-time clock and the
//! amanatsu keyboard/mouse hub.
//!
//! ## Features
//!
//! - Complete instruction set: ALU, shifts, branches, JAL/JALR, LL/SC,
//!   multiply/divide, the privileged group and firmware calls
//! - Exception and interrupt delivery checked before every fetch
//! - Two-level MMU page-table walk with the architectural guard band
//! - 64-vector interrupt controller with the claim/complete protocol
//! - Disk controller (eight images), two UARTs, RTC, 16-slot device
//!   hub with keyboard and mouse, 16-bpp framebuffer with
//!   dirty-rectangle tracking
//! - Host-independent: no windowing or rendering dependency; the host
//!   feeds key events in and drains ARGB8888 pixels out
//!
//! The core targets functional correctness sufficient to boot the
//! reference operating systems, not cycle accuracy.
//!
//! ## Quick Start
//!
//! ```rust
//! use lsemu::{Bus, Cpu, DiskController, KinnowFb, Lsic, Platform, Ram};
//!
//! // A boot ROM of two instructions:
//! //   ADDI R1, R0, 5
//! //   HLT
//! let mut boot_rom = Vec::new();
//! boot_rom.extend_from_slice(&0x0005_007Cu32.to_le_bytes());
//! boot_rom.extend_from_slice(&0xC000_0029u32.to_le_bytes());
//!
//! let mut bus = Bus::new(Ram::new(16 * 1024 * 1024)?);
//! let platform = Platform::new(Lsic::new(), DiskController::new(), boot_rom)?;
//! bus.map_board(platform)?;
//! bus.map_video(KinnowFb::new(1024, 768))?;
//!
//! // Reset lands at the top of the boot ROM window.
//! let mut cpu = Cpu::new();
//! assert_eq!(0xFFFE_0000, cpu.pc());
//!
//! while !cpu.is_halted() {
//!     cpu.step(&mut bus)?;
//! }
//! assert_eq!(5, cpu.reg(1));
//! # Ok::<(), lsemu::MachineError>(())
//! ```
//!
//! ## Driving a machine
//!
//! The host loop owns timing and presentation. Per iteration it runs a
//! budgeted batch of [`Cpu::step`] calls (checking [`Cpu::is_halted`]
//! between them), advances the clock with [`Platform::tick`], forwards
//! input with [`Platform::key_event`], and at display cadence drains
//! the framebuffer with [`KinnowFb::flush`] into its ARGB8888 surface.
//! Every device mutation happens on the stepping thread; a device's
//! interrupt is visible to the CPU at the next step boundary.
//!
//! ## Architecture
//!
//! - [`cpu`] - instruction decode/execute, exceptions, MMU walk, LL/SC
//! - [`bus`] - the 32-area physical address space and its access traits
//! - [`ram`] - physical memory and the slot-descriptor page
//! - [`interrupts`] - the LSIC
//! - [`platform`] - the board: citron ports, NVRAM, boot ROM, reset
//! - [`disk`], [`serial`], [`rtc`], [`amanatsu`], [`kinnowfb`] - devices
//! - [`common`] - architectural constants and bit helpers

pub mod amanatsu;
pub mod bus;
pub mod common;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod interrupts;
pub mod kinnowfb;
pub mod platform;
pub mod ram;
pub mod rtc;
pub mod serial;

// Re-export commonly used types at crate root for convenience
pub use amanatsu::{Amanatsu, Key};
pub use bus::{AddressBus, Bus, BusFault, BusSize, InterruptSource};
pub use common::Exception;
pub use cpu::Cpu;
pub use disk::DiskController;
pub use error::MachineError;
pub use interrupts::Lsic;
pub use kinnowfb::{DirtyRect, KinnowFb};
pub use platform::Platform;
pub use ram::Ram;
pub use rtc::Rtc;
pub use serial::SerialPort;

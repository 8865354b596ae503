//! Machine-level error type.

use crate::common::Exception;

/// Errors surfaced to the host driver.
///
/// Construction-time variants correspond to wiring mistakes (claiming a
/// bus area, citron port or hub slot twice, attaching a ninth disk) and
/// are unrecoverable misconfigurations. `NestedException` is the one
/// fatal runtime condition: an unrecoverable exception was raised while
/// another exception was still being delivered. The CPU dumps its
/// register state through `log` before returning it.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("bus area {0} is already mapped")]
    AreaInUse(u32),

    #[error("citron port {0:#04x} is already claimed")]
    PortInUse(u32),

    #[error("amanatsu device slot {0} is already in use")]
    SlotInUse(usize),

    #[error("reached the maximum amount of disks attached")]
    TooManyDisks,

    #[error("boot ROM image is {0} bytes, larger than the 128 KiB window")]
    BootRomTooLarge(usize),

    #[error("requested {0} bytes of RAM, more than the 256 MiB maximum")]
    RamTooLarge(u32),

    #[error("exception {0:?} raised while another exception was being delivered")]
    NestedException(Exception),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Real-time clock: host epoch readback, a settable override clock and
//! a periodic interval interrupt.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::bus::{BusFault, BusSize};
use crate::interrupts::Lsic;

/// LSIC vector raised when the programmed interval elapses.
pub const RTC_IRQ_VECTOR: u32 = 1;

const CMD_SET_INTERVAL: u32 = 1;
const CMD_GET_EPOCH_SEC: u32 = 2;
const CMD_GET_EPOCH_MS: u32 = 3;
const CMD_SET_EPOCH_SEC: u32 = 4;
const CMD_SET_EPOCH_MS: u32 = 5;

/// The clock behind citron ports 0x20 (command) and 0x21 (data).
///
/// Until the guest overrides the epoch, readbacks come straight from the
/// host clock. Once overridden, the clock becomes fully emulated and
/// only advances under [`Rtc::tick`].
#[derive(Default)]
pub struct Rtc {
    modified: bool,
    current_sec: u32,
    current_ms: u32,
    interval_ms: u32,
    interval_count: u32,
    port_a: u32,
}

impl Rtc {
    pub fn new() -> Rtc {
        Rtc::default()
    }

    pub fn reset(&mut self) {
        self.interval_ms = 0;
        self.interval_count = 0;
        self.port_a = 0;
    }

    /// Advances emulated time by `ms` host milliseconds. Called by the
    /// outer loop between CPU batches, so interval interrupts are
    /// coarse-grained but monotonic.
    pub fn tick(&mut self, lsic: &mut Lsic, ms: u32) {
        if self.modified {
            self.current_ms += ms;
            if self.current_ms >= 1000 {
                self.current_ms -= 1000;
                self.current_sec = self.current_sec.wrapping_add(1);
            }
        }

        self.interval_count += ms;
        if self.interval_count >= self.interval_ms {
            lsic.raise(RTC_IRQ_VECTOR);
            self.interval_count -= self.interval_ms;
        }
    }

    fn host_epoch_sec(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }

    fn host_epoch_ms(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or(0)
    }

    pub(crate) fn read(&mut self, port: u32, _size: BusSize) -> Result<u32, BusFault> {
        if port == 0x20 {
            Ok(0)
        } else {
            Ok(self.port_a)
        }
    }

    pub(crate) fn write(&mut self, port: u32, _size: BusSize, value: u32) -> Result<(), BusFault> {
        if port != 0x20 {
            self.port_a = value;
            return Ok(());
        }

        match value {
            CMD_SET_INTERVAL => {
                self.interval_ms = self.port_a;
                self.interval_count = 0;
                Ok(())
            }
            CMD_GET_EPOCH_SEC => {
                self.port_a = if self.modified {
                    self.current_sec
                } else {
                    self.host_epoch_sec()
                };
                Ok(())
            }
            CMD_GET_EPOCH_MS => {
                self.port_a = if self.modified {
                    self.current_ms
                } else {
                    self.host_epoch_ms()
                };
                Ok(())
            }
            CMD_SET_EPOCH_SEC => {
                self.current_sec = self.port_a;
                self.modified = true;
                Ok(())
            }
            CMD_SET_EPOCH_MS => {
                self.current_ms = self.port_a;
                self.modified = true;
                Ok(())
            }
            _ => Err(BusFault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(rtc: &mut Rtc, port_a: u32, command: u32) -> u32 {
        rtc.write(0x21, BusSize::Long, port_a).unwrap();
        rtc.write(0x20, BusSize::Long, command).unwrap();
        rtc.read(0x21, BusSize::Long).unwrap()
    }

    #[test]
    fn interval_raises_vector_one() {
        let mut rtc = Rtc::new();
        let mut lsic = Lsic::new();

        run(&mut rtc, 100, CMD_SET_INTERVAL);
        rtc.tick(&mut lsic, 60);
        assert!(!lsic.interrupt_pending());

        rtc.tick(&mut lsic, 60);
        assert!(lsic.interrupt_pending());
        assert_eq!(Ok(RTC_IRQ_VECTOR), lsic.mem_read(0x10, BusSize::Long));

        // The 20 ms carry survives into the next period.
        lsic.mem_write(0x10, BusSize::Long, RTC_IRQ_VECTOR).unwrap();
        rtc.tick(&mut lsic, 80);
        assert!(lsic.interrupt_pending());
    }

    #[test]
    fn unprogrammed_interval_fires_on_every_tick() {
        // Out of reset both the accumulator and the interval are zero,
        // so each tick trivially reaches the interval.
        let mut rtc = Rtc::new();
        let mut lsic = Lsic::new();
        rtc.tick(&mut lsic, 1000);
        assert!(lsic.interrupt_pending());
        assert_eq!(Ok(RTC_IRQ_VECTOR), lsic.mem_read(0x10, BusSize::Long));
    }

    #[test]
    fn overridden_epoch_advances_under_tick() {
        let mut rtc = Rtc::new();
        let mut lsic = Lsic::new();

        run(&mut rtc, 1000, CMD_SET_EPOCH_SEC);
        run(&mut rtc, 900, CMD_SET_EPOCH_MS);
        rtc.tick(&mut lsic, 250);

        assert_eq!(1001, run(&mut rtc, 0, CMD_GET_EPOCH_SEC));
        assert_eq!(150, run(&mut rtc, 0, CMD_GET_EPOCH_MS));
    }

    #[test]
    fn host_clock_until_overridden() {
        let mut rtc = Rtc::new();
        // The host epoch is comfortably past 2020-01-01.
        assert!(run(&mut rtc, 0, CMD_GET_EPOCH_SEC) > 1_577_836_800);
    }

    #[test]
    fn unknown_commands_fault() {
        let mut rtc = Rtc::new();
        assert_eq!(Err(BusFault), rtc.write(0x20, BusSize::Long, 9));
    }
}

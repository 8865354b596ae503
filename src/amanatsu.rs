//! The amanatsu hub: a 16-slot peripheral multiplexer behind five citron
//! ports, carrying the keyboard and mouse.
//!
//! Every slot exposes the same tiny surface (a magic number, two data
//! ports, an action strobe and an interrupt line); the guest selects a
//! slot through port 0x30 and talks to it through 0x31..0x34. Slot 0 is
//! always the hub controller, which hands out interrupt lines 48+slot
//! and performs hub-wide reset.
//!
//! Slots are a closed set owned by the hub; the controller reaches its
//! siblings through the hub state rather than through shared handles.

use crate::bus::{BusFault, BusSize};
use crate::error::MachineError;
use crate::interrupts::Lsic;

/// Device magic advertised by the keyboard.
pub const KEYBOARD_MAGIC: u32 = 0x8FC4_8FC4;

/// Device magic advertised by the mouse ("MOUS").
pub const MOUSE_MAGIC: u32 = 0x4D4F_5553;

const SLOT_COUNT: usize = 16;
const SLOT_CONTROLLER: usize = 0;
const SLOT_KEYBOARD: usize = 1;
const SLOT_MOUSE: usize = 2;

/// Highest internal key code minus one; the scan loop and the state
/// tables cover indices 0..=85.
const KEY_TABLE_LEN: usize = 86;

/// A key on the workstation keyboard, independent of any host windowing
/// layer. The host input pump translates its own scancodes into these;
/// anything it cannot translate is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    Semicolon, Space, Tab, Minus, Equals,
    LeftBracket, RightBracket, Backslash, NonUsHash,
    Slash, Period, Apostrophe, Comma, Grave,
    Return, Backspace, CapsLock, Escape,
    Left, Right, Down, Up,
    LeftCtrl, RightCtrl, LeftShift, RightShift, LeftAlt, RightAlt,
    KpDivide, KpMinus, KpEnter, KpPeriod,
    Kp0, Kp1, Kp2, Kp3, Kp4, Kp5, Kp6, Kp7, Kp8, Kp9,
}

impl Key {
    /// Fixed internal scan code. Keypad keys alias their main-row
    /// equivalents.
    pub fn code(self) -> u16 {
        use Key::*;
        match self {
            A => 0x01, B => 0x02, C => 0x03, D => 0x04, E => 0x05,
            F => 0x06, G => 0x07, H => 0x08, I => 0x09, J => 0x0A,
            K => 0x0B, L => 0x0C, M => 0x0D, N => 0x0E, O => 0x0F,
            P => 0x10, Q => 0x11, R => 0x12, S => 0x13, T => 0x14,
            U => 0x15, V => 0x16, W => 0x17, X => 0x18, Y => 0x19,
            Z => 0x1A,
            Num0 | Kp0 => 0x1B, Num1 | Kp1 => 0x1C, Num2 | Kp2 => 0x1D,
            Num3 | Kp3 => 0x1E, Num4 | Kp4 => 0x1F, Num5 | Kp5 => 0x20,
            Num6 | Kp6 => 0x21, Num7 | Kp7 => 0x22, Num8 | Kp8 => 0x23,
            Num9 | Kp9 => 0x24,
            Semicolon => 0x25, Space => 0x26, Tab => 0x27,
            Minus | KpMinus => 0x28, Equals => 0x29,
            LeftBracket => 0x2A, RightBracket => 0x2B,
            Backslash | NonUsHash => 0x2C,
            Slash | KpDivide => 0x2E, Period | KpPeriod => 0x2F,
            Apostrophe => 0x30, Comma => 0x31, Grave => 0x32,
            Return | KpEnter => 0x33, Backspace => 0x34,
            CapsLock => 0x35, Escape => 0x36,
            Left => 0x37, Right => 0x38, Down => 0x39, Up => 0x3A,
            LeftCtrl => 0x51, RightCtrl => 0x52,
            LeftShift => 0x53, RightShift => 0x54,
            LeftAlt => 0x55, RightAlt => 0x56,
        }
    }
}

/// Per-scancode keyboard state: the current level plus one outstanding
/// press and one outstanding release edge.
struct KeyboardState {
    is_pressed: [bool; KEY_TABLE_LEN],
    outstanding_press: [bool; KEY_TABLE_LEN],
    outstanding_release: [bool; KEY_TABLE_LEN],
}

impl KeyboardState {
    fn new() -> KeyboardState {
        KeyboardState {
            is_pressed: [false; KEY_TABLE_LEN],
            outstanding_press: [false; KEY_TABLE_LEN],
            outstanding_release: [false; KEY_TABLE_LEN],
        }
    }

    fn handle_key(&mut self, key: Key, pressed: bool) {
        let index = (key.code() - 1) as usize;
        self.is_pressed[index] = pressed;
        if pressed {
            self.outstanding_press[index] = true;
        } else {
            self.outstanding_release[index] = true;
        }
    }

    fn action(&mut self, port_a: &mut u32, value: u32) {
        match value {
            1 => {
                // Drain one event, releases first.
                for i in 0..KEY_TABLE_LEN {
                    if self.outstanding_release[i] {
                        *port_a = i as u32 | 0x8000;
                        self.outstanding_release[i] = false;
                        self.outstanding_press[i] = false;
                        return;
                    } else if self.outstanding_press[i] {
                        *port_a = i as u32;
                        self.outstanding_press[i] = false;
                        return;
                    }
                }
                *port_a = 0xFFFF;
            }
            2 => {
                *self = KeyboardState::new();
                *port_a = 0xFFFF;
            }
            3 => {
                if *port_a < KEY_TABLE_LEN as u32 {
                    *port_a = self.is_pressed[*port_a as usize] as u32;
                }
            }
            _ => {}
        }
    }
}

enum SlotKind {
    Empty,
    Controller,
    Keyboard(KeyboardState),
    Mouse,
}

struct AmanatsuSlot {
    magic: u32,
    port_a: u32,
    port_b: u32,
    interrupt_line: u32,
    kind: SlotKind,
}

impl AmanatsuSlot {
    fn empty() -> AmanatsuSlot {
        AmanatsuSlot {
            magic: 0,
            port_a: 0,
            port_b: 0,
            interrupt_line: 0,
            kind: SlotKind::Empty,
        }
    }

    fn occupied(&self) -> bool {
        !matches!(self.kind, SlotKind::Empty)
    }
}

/// The hub behind citron ports 0x30..=0x34.
pub struct Amanatsu {
    slots: [AmanatsuSlot; SLOT_COUNT],
    selected: usize,
}

impl Default for Amanatsu {
    fn default() -> Self {
        Self::new()
    }
}

impl Amanatsu {
    /// A hub with the controller installed at slot 0.
    pub fn new() -> Amanatsu {
        let mut slots: [AmanatsuSlot; SLOT_COUNT] = std::array::from_fn(|_| AmanatsuSlot::empty());
        slots[SLOT_CONTROLLER].kind = SlotKind::Controller;

        Amanatsu {
            slots,
            selected: 0,
        }
    }

    fn install(&mut self, slot: usize, magic: u32, kind: SlotKind) -> Result<(), MachineError> {
        if self.slots[slot].occupied() {
            return Err(MachineError::SlotInUse(slot));
        }
        self.slots[slot] = AmanatsuSlot {
            magic,
            kind,
            ..AmanatsuSlot::empty()
        };
        Ok(())
    }

    /// Installs the keyboard at slot 1.
    pub fn attach_keyboard(&mut self) -> Result<(), MachineError> {
        self.install(SLOT_KEYBOARD, KEYBOARD_MAGIC, SlotKind::Keyboard(KeyboardState::new()))?;
        self.slots[SLOT_KEYBOARD].port_a = 0xFFFF;
        Ok(())
    }

    /// Installs the mouse stub at slot 2.
    pub fn attach_mouse(&mut self) -> Result<(), MachineError> {
        self.install(SLOT_MOUSE, MOUSE_MAGIC, SlotKind::Mouse)
    }

    /// Ingests a host key edge and pulses the keyboard's interrupt line
    /// when the controller has assigned one.
    pub fn key_event(&mut self, lsic: &mut Lsic, key: Key, pressed: bool) {
        for slot in &mut self.slots {
            if let SlotKind::Keyboard(kb) = &mut slot.kind {
                kb.handle_key(key, pressed);
                if slot.interrupt_line != 0 {
                    lsic.raise(slot.interrupt_line);
                }
                return;
            }
        }
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if let SlotKind::Keyboard(kb) = &mut slot.kind {
                *kb = KeyboardState::new();
                slot.port_a = 0xFFFF;
            }
        }
    }

    pub(crate) fn read(&mut self, port: u32, _size: BusSize) -> Result<u32, BusFault> {
        let slot = &self.slots[self.selected];
        match port {
            0x30 => Ok(self.selected as u32),
            0x31 => Ok(slot.magic),
            0x32 if slot.occupied() => Ok(0),
            0x33 if slot.occupied() => Ok(slot.port_a),
            0x34 if slot.occupied() => Ok(slot.port_b),
            _ => Err(BusFault),
        }
    }

    pub(crate) fn write(&mut self, port: u32, _size: BusSize, value: u32) -> Result<(), BusFault> {
        match port {
            0x30 if (value as usize) < SLOT_COUNT => {
                self.selected = value as usize;
                Ok(())
            }
            0x32 => self.action(self.selected, value),
            0x33 if self.slots[self.selected].occupied() => {
                self.slots[self.selected].port_a = value;
                Ok(())
            }
            0x34 if self.slots[self.selected].occupied() => {
                self.slots[self.selected].port_b = value;
                Ok(())
            }
            _ => Err(BusFault),
        }
    }

    fn action(&mut self, index: usize, value: u32) -> Result<(), BusFault> {
        // The controller acts on the whole hub, so route it before
        // borrowing the slot.
        if matches!(self.slots[index].kind, SlotKind::Controller) {
            return self.controller_action(value);
        }

        let AmanatsuSlot { port_a, kind, .. } = &mut self.slots[index];
        match kind {
            SlotKind::Empty | SlotKind::Controller => Err(BusFault),
            SlotKind::Mouse => {
                *port_a = 0;
                Ok(())
            }
            SlotKind::Keyboard(kb) => {
                kb.action(port_a, value);
                Ok(())
            }
        }
    }

    fn controller_action(&mut self, value: u32) -> Result<(), BusFault> {
        let target = self.slots[SLOT_CONTROLLER].port_b as usize;
        match value {
            1 => {
                // Hand the device its interrupt line.
                if target < SLOT_COUNT && self.slots[target].occupied() {
                    self.slots[target].interrupt_line = 48 + target as u32;
                    Ok(())
                } else {
                    Err(BusFault)
                }
            }
            2 => {
                self.reset();
                Ok(())
            }
            3 => {
                if target < SLOT_COUNT && self.slots[target].occupied() {
                    self.slots[target].interrupt_line = 0;
                    Ok(())
                } else {
                    Err(BusFault)
                }
            }
            _ => Err(BusFault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Amanatsu {
        let mut hub = Amanatsu::new();
        hub.attach_keyboard().unwrap();
        hub.attach_mouse().unwrap();
        hub
    }

    fn select(hub: &mut Amanatsu, slot: u32) {
        hub.write(0x30, BusSize::Long, slot).unwrap();
    }

    fn next_event(hub: &mut Amanatsu) -> u32 {
        hub.write(0x32, BusSize::Long, 1).unwrap();
        hub.read(0x33, BusSize::Long).unwrap()
    }

    #[test]
    fn selection_and_magic() {
        let mut hub = hub();
        select(&mut hub, 1);
        assert_eq!(Ok(1), hub.read(0x30, BusSize::Long));
        assert_eq!(Ok(KEYBOARD_MAGIC), hub.read(0x31, BusSize::Long));

        select(&mut hub, 2);
        assert_eq!(Ok(MOUSE_MAGIC), hub.read(0x31, BusSize::Long));

        // Empty slots advertise magic 0; selecting past 15 faults.
        select(&mut hub, 9);
        assert_eq!(Ok(0), hub.read(0x31, BusSize::Long));
        assert_eq!(Err(BusFault), hub.write(0x30, BusSize::Long, 16));
    }

    #[test]
    fn release_events_drain_before_presses() {
        let mut hub = hub();
        let mut lsic = Lsic::new();

        hub.key_event(&mut lsic, Key::B, true);
        hub.key_event(&mut lsic, Key::A, false);

        select(&mut hub, 1);
        let a = (Key::A.code() - 1) as u32;
        let b = (Key::B.code() - 1) as u32;
        assert_eq!(a | 0x8000, next_event(&mut hub));
        assert_eq!(b, next_event(&mut hub));
        assert_eq!(0xFFFF, next_event(&mut hub));
    }

    #[test]
    fn release_also_clears_a_pending_press() {
        let mut hub = hub();
        let mut lsic = Lsic::new();

        // Tap: press and release before the guest polls.
        hub.key_event(&mut lsic, Key::Q, true);
        hub.key_event(&mut lsic, Key::Q, false);

        select(&mut hub, 1);
        let q = (Key::Q.code() - 1) as u32;
        assert_eq!(q | 0x8000, next_event(&mut hub));
        assert_eq!(0xFFFF, next_event(&mut hub));
    }

    #[test]
    fn is_down_query_reads_the_level() {
        let mut hub = hub();
        let mut lsic = Lsic::new();
        hub.key_event(&mut lsic, Key::Space, true);

        select(&mut hub, 1);
        let space = (Key::Space.code() - 1) as u32;
        hub.write(0x33, BusSize::Long, space).unwrap();
        hub.write(0x32, BusSize::Long, 3).unwrap();
        assert_eq!(Ok(1), hub.read(0x33, BusSize::Long));

        hub.key_event(&mut lsic, Key::Space, false);
        hub.write(0x33, BusSize::Long, space).unwrap();
        hub.write(0x32, BusSize::Long, 3).unwrap();
        assert_eq!(Ok(0), hub.read(0x33, BusSize::Long));
    }

    #[test]
    fn controller_assigns_and_revokes_interrupt_lines() {
        let mut hub = hub();
        let mut lsic = Lsic::new();

        // No line assigned yet: events are silent.
        hub.key_event(&mut lsic, Key::A, true);
        assert!(!lsic.interrupt_pending());

        // Controller (slot 0) enables interrupts for slot 1.
        select(&mut hub, 0);
        hub.write(0x34, BusSize::Long, 1).unwrap();
        hub.write(0x32, BusSize::Long, 1).unwrap();

        hub.key_event(&mut lsic, Key::A, true);
        assert!(lsic.interrupt_pending());
        assert_eq!(Ok(48 + 1), lsic.mem_read(0x10, BusSize::Long));

        // And disables them again.
        lsic.mem_write(0x10, BusSize::Long, 49).unwrap();
        hub.write(0x32, BusSize::Long, 3).unwrap();
        hub.key_event(&mut lsic, Key::A, true);
        assert!(!lsic.interrupt_pending());
    }

    #[test]
    fn keypad_aliases_share_codes() {
        assert_eq!(Key::Return.code(), Key::KpEnter.code());
        assert_eq!(Key::Num7.code(), Key::Kp7.code());
        assert_eq!(Key::Slash.code(), Key::KpDivide.code());
    }

    #[test]
    fn hub_reset_drains_the_keyboard() {
        let mut hub = hub();
        let mut lsic = Lsic::new();
        hub.key_event(&mut lsic, Key::Z, true);

        select(&mut hub, 0);
        hub.write(0x32, BusSize::Long, 2).unwrap();

        select(&mut hub, 1);
        assert_eq!(0xFFFF, next_event(&mut hub));
    }

    #[test]
    fn double_attachment_is_refused() {
        let mut hub = hub();
        assert!(matches!(
            hub.attach_keyboard(),
            Err(MachineError::SlotInUse(1))
        ));
    }
}

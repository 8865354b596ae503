//! The XR/17032-style CPU core: decode and execute, exception and
//! interrupt delivery, the two-level MMU walk, and the LL/SC pair.
//!
//! The core is generic over [`AddressBus`] + [`InterruptSource`], so it
//! runs against the real [`Bus`](crate::bus::Bus) in a machine and
//! against a flat test memory in unit tests.
//!
//! # Stepping model
//!
//! [`Cpu::step`] executes one instruction. Pending exceptions and
//! unmasked interrupts are delivered *before* the fetch, so an
//! interrupt raised during step N is observed at the top of step N+1,
//! never mid-instruction. A guest memory access that faults latches the
//! exception and ends the step; the only error `step` itself returns is
//! the fatal nested-exception condition.

use crate::bus::{AddressBus, BusSize, InterruptSource};
use crate::common::{
    less_than, shift, sign_ext_16, sign_ext_18, sign_ext_23, sign_ext_5, Exception, CTL_ASID,
    CTL_CPUID, CTL_EBADADDR, CTL_ECAUSE, CTL_EPC, CTL_ERS, CTL_EVEC, CTL_FWVEC, CTL_PGTB, CTL_RS,
    REG_LR, RS_INT, RS_MMU, RS_USER,
};
use crate::error::MachineError;

/// Program counter at power-on: offset 0 of the boot ROM window.
pub const RESET_PC: u32 = 0xFFFE_0000;

/// Value the CPUID control register reads back.
pub const CPUID: u32 = 0x8006_0000;

pub struct Cpu {
    pc: u32,
    regs: [u32; 32],
    ctl: [u32; 32],
    exc: Option<Exception>,
    halted: bool,
    locked: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Cpu {
        let mut cpu = Cpu {
            pc: 0,
            regs: [0; 32],
            ctl: [0; 32],
            exc: None,
            halted: false,
            locked: false,
        };
        cpu.reset();
        cpu
    }

    /// Power-on reset. Also reached architecturally when an exception
    /// arrives while the relevant vector register is still zero.
    pub fn reset(&mut self) {
        self.pc = RESET_PC;
        self.ctl[CTL_RS] = 0;
        self.ctl[CTL_EVEC] = 0;
        self.ctl[CTL_CPUID] = CPUID;
        self.exc = None;
        self.halted = false;
        self.locked = false;
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Reads a general register; R0 always reads zero.
    pub fn reg(&self, index: usize) -> u32 {
        self.regs[index]
    }

    /// Host/debugger register write. Writes to R0 are discarded.
    pub fn set_reg(&mut self, index: usize, value: u32) {
        self.write_reg(index, value);
    }

    pub fn ctl_reg(&self, index: usize) -> u32 {
        self.ctl[index]
    }

    pub fn set_ctl_reg(&mut self, index: usize, value: u32) {
        self.ctl[index] = value;
    }

    /// True once a HLT has retired. Halt is terminal: further steps are
    /// no-ops until [`Cpu::reset`].
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    #[inline]
    fn write_reg(&mut self, index: usize, value: u32) {
        // R0 is a hardwired zero sink.
        if index != 0 {
            self.regs[index] = value;
        }
    }

    /// Executes one instruction.
    pub fn step<B: AddressBus + InterruptSource>(
        &mut self,
        bus: &mut B,
    ) -> Result<(), MachineError> {
        if self.halted {
            return Ok(());
        }

        if self.exc.is_some() || (self.ctl[CTL_RS] & RS_INT != 0 && bus.interrupt_pending()) {
            self.deliver();
        }

        let current_pc = self.pc;
        self.pc = self.pc.wrapping_add(4);

        let Some(instruction) = self.mem_read(bus, current_pc, BusSize::Long)? else {
            return Ok(());
        };

        let major = instruction & 0b111;
        let major_op = instruction & 0b111111;

        if major == 0b111 {
            // JAL: link in LR; the target keeps the current bank bit.
            self.regs[REG_LR] = self.pc;
            self.pc = (current_pc & 0x8000_0000) | ((instruction >> 3) << 2);
            Ok(())
        } else if major == 0b110 {
            // J
            self.pc = (current_pc & 0x8000_0000) | ((instruction >> 3) << 2);
            Ok(())
        } else if major_op == 0b111001 {
            self.op_register(bus, instruction)
        } else if major_op == 0b110001 {
            self.op_extended(bus, instruction)
        } else if major_op == 0b101001 {
            self.op_privileged(instruction)
        } else {
            self.op_major(bus, major_op, instruction, current_pc)
        }
    }

    /// Exception/interrupt delivery, run before the fetch.
    fn deliver(&mut self) {
        let mut new_state = self.ctl[CTL_RS] & !0b11;

        let vector = if self.exc == Some(Exception::Fwcall) {
            new_state &= !0b111;
            self.ctl[CTL_FWVEC]
        } else {
            if new_state & 0x80 != 0 {
                new_state &= !0b111;
            }
            self.ctl[CTL_EVEC]
        };

        if vector == 0 {
            // Nothing to vector into: the machine starts over.
            self.reset();
        } else {
            let cause = self.exc.unwrap_or(Exception::Interrupt);
            self.ctl[CTL_EPC] = self.pc;
            self.ctl[CTL_ECAUSE] = cause as u32;
            self.ctl[CTL_ERS] = self.ctl[CTL_RS];
            self.ctl[CTL_RS] = new_state;
            self.pc = vector;
        }

        self.exc = None;
    }

    /// Latches an exception for delivery at the top of the next step.
    ///
    /// Raising an unrecoverable kind while another exception is already
    /// latched means the machine cannot make progress (a bus error
    /// while delivering a bus error, say); that is the one fatal
    /// runtime condition.
    fn raise(&mut self, exception: Exception) -> Result<(), MachineError> {
        let nested = self.exc.is_some();
        self.exc = Some(exception);

        if !exception.recoverable_when_nested() {
            log::debug!("raised exception {exception:?} at pc {:#010x}", self.pc);
            if nested {
                self.dump_state();
                return Err(MachineError::NestedException(exception));
            }
        }
        Ok(())
    }

    fn dump_state(&self) {
        log::error!("unrecoverable CPU exception; register dump:");
        for row in 0..8 {
            log::error!(
                "  {:08x} {:08x} {:08x} {:08x}",
                self.regs[row * 4],
                self.regs[row * 4 + 1],
                self.regs[row * 4 + 2],
                self.regs[row * 4 + 3]
            );
        }
        log::error!("  RS       = {:08x}", self.ctl[CTL_RS]);
        log::error!("  ECAUSE   = {:08x}", self.ctl[CTL_ECAUSE]);
        log::error!("  ERS      = {:08x}", self.ctl[CTL_ERS]);
        log::error!("  EPC      = {:08x}", self.ctl[CTL_EPC]);
        log::error!("  EVEC     = {:08x}", self.ctl[CTL_EVEC]);
        log::error!("  PGTB     = {:08x}", self.ctl[CTL_PGTB]);
        log::error!("  ASID     = {:08x}", self.ctl[CTL_ASID]);
        log::error!("  EBADADDR = {:08x}", self.ctl[CTL_EBADADDR]);
        log::error!("  CPUID    = {:08x}", self.ctl[CTL_CPUID]);
        log::error!("  FWVEC    = {:08x}", self.ctl[CTL_FWVEC]);
    }

    /// Two-level page walk. Returns the physical address, or `None`
    /// with the appropriate fault latched.
    fn translate<B: AddressBus>(
        &mut self,
        bus: &mut B,
        addr: u32,
        writing: bool,
    ) -> Result<Option<u32>, MachineError> {
        let fault = if writing {
            Exception::PageWrite
        } else {
            Exception::PageFault
        };

        let pde_addr = self.ctl[CTL_PGTB].wrapping_add((addr >> 22) << 2);
        let pde = match bus.mem_read(pde_addr, BusSize::Long) {
            Ok(pde) => pde,
            Err(_) => {
                self.ctl[CTL_EBADADDR] = pde_addr;
                self.raise(Exception::BusError)?;
                return Ok(None);
            }
        };
        if pde & 1 == 0 {
            self.ctl[CTL_EBADADDR] = addr;
            self.raise(fault)?;
            return Ok(None);
        }

        let pte_addr = ((pde >> 5) << 12).wrapping_add(((addr >> 12) & 0x3FF) << 2);
        let pte = match bus.mem_read(pte_addr, BusSize::Long) {
            Ok(pte) => pte,
            Err(_) => {
                self.ctl[CTL_EBADADDR] = pte_addr;
                self.raise(Exception::BusError)?;
                return Ok(None);
            }
        };
        if pte & 1 == 0 {
            self.ctl[CTL_EBADADDR] = addr;
            self.raise(fault)?;
            return Ok(None);
        }

        Ok(Some((((pte >> 5) & 0xFFFFF) << 12) | (addr & 0xFFF)))
    }

    /// Guest load: guard band, optional translation, then the bus.
    /// `None` means the access faulted and the exception is latched.
    fn mem_read<B: AddressBus>(
        &mut self,
        bus: &mut B,
        addr: u32,
        size: BusSize,
    ) -> Result<Option<u32>, MachineError> {
        // Guard band against null and wrapped pointers, MMU or not.
        if !(0x1000..0xFFFF_F000).contains(&addr) {
            self.ctl[CTL_EBADADDR] = addr;
            self.raise(Exception::PageFault)?;
            return Ok(None);
        }

        let addr = if self.ctl[CTL_RS] & RS_MMU != 0 {
            match self.translate(bus, addr, false)? {
                Some(physical) => physical,
                None => return Ok(None),
            }
        } else {
            addr
        };

        match bus.mem_read(addr, size) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                self.ctl[CTL_EBADADDR] = addr;
                self.raise(Exception::BusError)?;
                Ok(None)
            }
        }
    }

    /// Guest store; `false` means the access faulted.
    fn mem_write<B: AddressBus>(
        &mut self,
        bus: &mut B,
        addr: u32,
        size: BusSize,
        value: u32,
    ) -> Result<bool, MachineError> {
        if !(0x1000..0xFFFF_F000).contains(&addr) {
            self.ctl[CTL_EBADADDR] = addr;
            self.raise(Exception::PageWrite)?;
            return Ok(false);
        }

        let addr = if self.ctl[CTL_RS] & RS_MMU != 0 {
            match self.translate(bus, addr, true)? {
                Some(physical) => physical,
                None => return Ok(false),
            }
        } else {
            addr
        };

        match bus.mem_write(addr, size, value) {
            Ok(()) => Ok(true),
            Err(_) => {
                self.ctl[CTL_EBADADDR] = addr;
                self.raise(Exception::BusError)?;
                Ok(false)
            }
        }
    }

    /// Register-register group (major 0b111001): logic, arithmetic,
    /// compares, shifts and the register-indexed load/store forms. The
    /// operand from rB passes through the barrel shifter when the
    /// encoded amount is nonzero.
    fn op_register<B: AddressBus>(
        &mut self,
        bus: &mut B,
        instruction: u32,
    ) -> Result<(), MachineError> {
        let function = instruction >> 28;
        let shift_type = (instruction >> 26) & 0b11;
        let shift_count = (instruction >> 21) & 0b11111;

        let rd = ((instruction >> 6) & 0b11111) as usize;
        let ra = ((instruction >> 11) & 0b11111) as usize;
        let rb = ((instruction >> 16) & 0b11111) as usize;

        let value = if shift_count != 0 {
            shift(self.regs[rb], shift_count, shift_type)
        } else {
            self.regs[rb]
        };

        match function {
            0 => self.write_reg(rd, !(self.regs[ra] | value)), // NOR
            1 => self.write_reg(rd, self.regs[ra] | value),    // OR
            2 => self.write_reg(rd, self.regs[ra] ^ value),    // XOR
            3 => self.write_reg(rd, self.regs[ra] & value),    // AND
            4 => self.write_reg(rd, less_than(self.regs[ra], value, true)), // SLT signed
            5 => self.write_reg(rd, less_than(self.regs[ra], value, false)), // SLT
            6 => self.write_reg(rd, self.regs[ra].wrapping_sub(value)),     // SUB
            7 => self.write_reg(rd, self.regs[ra].wrapping_add(value)),     // ADD
            8 => self.write_reg(rd, shift(self.regs[rb], self.regs[ra], shift_type)), // LSH etc.
            9 => {
                // MOV long[rA + rB], rD
                self.mem_write(bus, self.regs[ra].wrapping_add(value), BusSize::Long, self.regs[rd])?;
            }
            10 => {
                // MOV int[rA + rB], rD
                self.mem_write(
                    bus,
                    self.regs[ra].wrapping_add(value),
                    BusSize::Int,
                    self.regs[rd] & 0xFFFF,
                )?;
            }
            11 => {
                // MOV byte[rA + rB], rD
                self.mem_write(
                    bus,
                    self.regs[ra].wrapping_add(value),
                    BusSize::Byte,
                    self.regs[rd] & 0xFF,
                )?;
            }
            13 | 14 | 15 => {
                // MOV rD, {long,int,byte}[rA + rB]
                if rd != 0 {
                    let size = match function {
                        13 => BusSize::Long,
                        14 => BusSize::Int,
                        _ => BusSize::Byte,
                    };
                    let Some(value) =
                        self.mem_read(bus, self.regs[ra].wrapping_add(value), size)?
                    else {
                        return Ok(());
                    };
                    self.regs[rd] = value;
                }
            }
            _ => self.raise(Exception::InvalidInstruction)?,
        }
        Ok(())
    }

    /// Extended group (major 0b110001): traps, LL/SC and the multiply/
    /// divide unit. Division and modulo by zero produce 0 silently;
    /// that is architectural, not an exception.
    fn op_extended<B: AddressBus>(
        &mut self,
        bus: &mut B,
        instruction: u32,
    ) -> Result<(), MachineError> {
        let function = instruction >> 28;

        let rd = ((instruction >> 6) & 0b11111) as usize;
        let ra = ((instruction >> 11) & 0b11111) as usize;
        let rb = ((instruction >> 16) & 0b11111) as usize;

        match function {
            0 => self.raise(Exception::Syscall)?,    // SYS
            1 => self.raise(Exception::Breakpoint)?, // BRK
            8 => {
                // SC: store only while the reservation holds, then
                // report the reservation state. RFE clears it.
                if self.locked
                    && !self.mem_write(bus, self.regs[ra], BusSize::Long, self.regs[rb])?
                {
                    return Ok(());
                }
                self.write_reg(rd, self.locked as u32);
            }
            9 => {
                // LL
                self.locked = true;
                if rd != 0 {
                    let Some(value) = self.mem_read(bus, self.regs[ra], BusSize::Long)? else {
                        return Ok(());
                    };
                    self.regs[rd] = value;
                }
            }
            11 => {
                // MOD
                let value = match self.regs[rb] {
                    0 => 0,
                    divisor => self.regs[ra] % divisor,
                };
                self.write_reg(rd, value);
            }
            12 => {
                // DIV signed
                let value = match self.regs[rb] {
                    0 => 0,
                    divisor => (self.regs[ra] as i32).wrapping_div(divisor as i32) as u32,
                };
                self.write_reg(rd, value);
            }
            13 => {
                // DIV
                let value = match self.regs[rb] {
                    0 => 0,
                    divisor => self.regs[ra] / divisor,
                };
                self.write_reg(rd, value);
            }
            15 => self.write_reg(rd, self.regs[ra].wrapping_mul(self.regs[rb])), // MUL
            _ => self.raise(Exception::InvalidInstruction)?,
        }
        Ok(())
    }

    /// Privileged group (major 0b101001). User mode lands in INVPRVG
    /// before any function decode.
    fn op_privileged(&mut self, instruction: u32) -> Result<(), MachineError> {
        if self.ctl[CTL_RS] & RS_USER != 0 {
            self.raise(Exception::InvalidPrivilege)?;
            return Ok(());
        }

        let function = instruction >> 28;

        let rd = ((instruction >> 6) & 0b11111) as usize;
        let ra = ((instruction >> 11) & 0b11111) as usize;
        let rb = ((instruction >> 16) & 0b11111) as usize;

        match function {
            10 => self.raise(Exception::Fwcall)?, // FWC
            11 => {
                // RFE
                self.locked = false;
                self.pc = self.ctl[CTL_EPC];
                self.ctl[CTL_RS] = self.ctl[CTL_ERS];
            }
            12 => {
                // HLT
                log::debug!("CPU halted at pc {:#010x}", self.pc);
                self.halted = true;
            }
            13 => {
                // FTLB: nothing cached to flush without a TLB.
            }
            14 => self.ctl[rb] = self.regs[ra], // MTCR
            15 => {
                // MFCR
                if rd != 0 {
                    self.regs[rd] = self.ctl[rb];
                }
            }
            _ => self.raise(Exception::InvalidInstruction)?,
        }
        Ok(())
    }

    /// Everything matched by the low six bits: branches, immediate
    /// arithmetic, and the immediate-offset load/store forms.
    fn op_major<B: AddressBus>(
        &mut self,
        bus: &mut B,
        major_op: u32,
        instruction: u32,
        current_pc: u32,
    ) -> Result<(), MachineError> {
        let imm = instruction >> 16;
        let rd = ((instruction >> 6) & 0b11111) as usize;
        let ra = ((instruction >> 11) & 0b11111) as usize;

        let branch_target =
            || current_pc.wrapping_add(sign_ext_23((instruction >> 11) << 2));

        match major_op {
            61 => {
                // BEQ
                if self.regs[rd] == 0 {
                    self.pc = branch_target();
                }
            }
            53 => {
                // BNE
                if self.regs[rd] != 0 {
                    self.pc = branch_target();
                }
            }
            45 => {
                // BLT
                if (self.regs[rd] as i32) < 0 {
                    self.pc = branch_target();
                }
            }
            60 => self.write_reg(rd, self.regs[ra].wrapping_add(imm)), // ADDI
            52 => self.write_reg(rd, self.regs[ra].wrapping_sub(imm)), // SUBI
            44 => self.write_reg(rd, less_than(self.regs[ra], imm, false)), // SLTI
            36 => self.write_reg(rd, less_than(self.regs[ra], sign_ext_16(imm), true)), // SLTI signed
            28 => self.write_reg(rd, self.regs[ra] & imm), // ANDI
            20 => self.write_reg(rd, self.regs[ra] ^ imm), // XORI
            12 => self.write_reg(rd, self.regs[ra] | imm), // ORI
            4 => self.write_reg(rd, self.regs[ra] | imm << 16), // LUI
            56 => {
                // JALR
                self.write_reg(rd, self.pc);
                self.pc = self.regs[ra].wrapping_add(sign_ext_18(imm << 2));
            }
            59 | 51 | 43 => {
                // MOV rD, {byte,int,long}[rA + imm]
                if rd != 0 {
                    let (size, scaled) = match major_op {
                        59 => (BusSize::Byte, imm),
                        51 => (BusSize::Int, imm << 1),
                        _ => (BusSize::Long, imm << 2),
                    };
                    let Some(value) =
                        self.mem_read(bus, self.regs[ra].wrapping_add(scaled), size)?
                    else {
                        return Ok(());
                    };
                    self.regs[rd] = value;
                }
            }
            58 => {
                // MOV byte[rD + imm], rA
                self.mem_write(bus, self.regs[rd].wrapping_add(imm), BusSize::Byte, self.regs[ra])?;
            }
            50 => {
                // MOV int[rD + imm], rA
                self.mem_write(
                    bus,
                    self.regs[rd].wrapping_add(imm << 1),
                    BusSize::Int,
                    self.regs[ra],
                )?;
            }
            42 => {
                // MOV long[rD + imm], rA
                self.mem_write(
                    bus,
                    self.regs[rd].wrapping_add(imm << 2),
                    BusSize::Long,
                    self.regs[ra],
                )?;
            }
            26 => {
                // MOV byte[rD + imm], small
                self.mem_write(
                    bus,
                    self.regs[rd].wrapping_add(imm),
                    BusSize::Byte,
                    sign_ext_5(ra as u32),
                )?;
            }
            18 => {
                // MOV int[rD + imm], small
                self.mem_write(
                    bus,
                    self.regs[rd].wrapping_add(imm << 1),
                    BusSize::Int,
                    sign_ext_5(ra as u32),
                )?;
            }
            10 => {
                // MOV long[rD + imm], small
                self.mem_write(
                    bus,
                    self.regs[rd].wrapping_add(imm << 2),
                    BusSize::Long,
                    sign_ext_5(ra as u32),
                )?;
            }
            _ => self.raise(Exception::InvalidInstruction)?,
        }
        Ok(())
    }
}

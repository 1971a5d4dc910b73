use crate::decode::{
    mnemonic, AluOp, Condition, Fields, CLASS_ALU, CLASS_CONTROL, CLASS_MISC, CLASS_MOVE,
};
use crate::memory::Memory;
use crate::metrics::{record_instruction, Timer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    // Register file indexed by the 3-bit register code; slot 6 is never used
    pub registers: [u8; 8],
    pub pc: u16,     // Program Counter
    pub sp: u16,     // Stack Pointer
    pub status: u8,  // Flag byte, laid out as the processor status word
    pub interrupts_enabled: bool,
}

// Status byte flags (processor status word layout: S Z 0 AC 0 P 1 CY)
pub const CARRY_FLAG: u8 = 0x01;
pub const UNUSED_FLAG: u8 = 0x02;
pub const PARITY_FLAG: u8 = 0x04;
pub const AUX_CARRY_FLAG: u8 = 0x10;
pub const ZERO_FLAG: u8 = 0x40;
pub const SIGN_FLAG: u8 = 0x80;

const STATUS_MASK: u8 = SIGN_FLAG | ZERO_FLAG | AUX_CARRY_FLAG | PARITY_FLAG | CARRY_FLAG;

pub const INITIAL_SP: u16 = 0xFFFF;

/// Register codes as they appear in the source and destination fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    B = 0,
    C = 1,
    D = 2,
    E = 3,
    H = 4,
    L = 5,
    A = 7,
}

/// An 8-bit operand: a register, or the memory cell addressed by HL (code 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Memory,
}

impl Operand {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Operand::Reg(Reg::B),
            1 => Operand::Reg(Reg::C),
            2 => Operand::Reg(Reg::D),
            3 => Operand::Reg(Reg::E),
            4 => Operand::Reg(Reg::H),
            5 => Operand::Reg(Reg::L),
            6 => Operand::Memory,
            _ => Operand::Reg(Reg::A),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPair {
    BC = 0,
    DE = 1,
    HL = 2,
    SP = 3,
}

impl RegPair {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => RegPair::BC,
            1 => RegPair::DE,
            2 => RegPair::HL,
            _ => RegPair::SP,
        }
    }
}

/// What a single instruction asks of whoever is driving the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halted,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            registers: [0; 8],
            pc: 0,
            sp: INITIAL_SP,
            status: UNUSED_FLAG,
            interrupts_enabled: true,
        }
    }

    /// Zeroes the register file and resets PC and SP. Flags and the
    /// interrupt enable are left as they are.
    pub fn clear(&mut self) {
        self.registers = [0; 8];
        self.pc = 0;
        self.sp = INITIAL_SP;
    }

    // Getters
    pub fn get_pc(&self) -> u16 { self.pc }
    pub fn get_sp(&self) -> u16 { self.sp }
    pub fn get_status(&self) -> u8 { self.status }
    pub fn zero(&self) -> bool { self.get_flag(ZERO_FLAG) }
    pub fn sign(&self) -> bool { self.get_flag(SIGN_FLAG) }
    pub fn parity(&self) -> bool { self.get_flag(PARITY_FLAG) }
    pub fn carry(&self) -> bool { self.get_flag(CARRY_FLAG) }
    pub fn auxiliary_carry(&self) -> bool { self.get_flag(AUX_CARRY_FLAG) }

    // Flag operations
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    pub fn reg(&self, reg: Reg) -> u8 {
        self.registers[reg as usize]
    }

    pub fn set_reg(&mut self, reg: Reg, value: u8) {
        self.registers[reg as usize] = value;
    }

    /// Raw register file access by 3-bit code. Panics on an index outside 0..8.
    pub fn register(&self, index: usize) -> u8 {
        self.registers[index]
    }

    pub fn get_pair(&self, pair: RegPair) -> u16 {
        let join = |hi: Reg, lo: Reg| ((self.reg(hi) as u16) << 8) | self.reg(lo) as u16;
        match pair {
            RegPair::BC => join(Reg::B, Reg::C),
            RegPair::DE => join(Reg::D, Reg::E),
            RegPair::HL => join(Reg::H, Reg::L),
            RegPair::SP => self.sp,
        }
    }

    pub fn set_pair(&mut self, pair: RegPair, value: u16) {
        let hi = (value >> 8) as u8;
        let lo = (value & 0xFF) as u8;
        let (hi_reg, lo_reg) = match pair {
            RegPair::BC => (Reg::B, Reg::C),
            RegPair::DE => (Reg::D, Reg::E),
            RegPair::HL => (Reg::H, Reg::L),
            RegPair::SP => {
                self.sp = value;
                return;
            }
        };
        self.set_reg(hi_reg, hi);
        self.set_reg(lo_reg, lo);
    }

    pub fn read_operand(&self, operand: Operand, memory: &Memory) -> u8 {
        match operand {
            Operand::Reg(reg) => self.reg(reg),
            Operand::Memory => memory.read(self.get_pair(RegPair::HL)),
        }
    }

    pub fn write_operand(&mut self, operand: Operand, memory: &mut Memory, value: u8) {
        match operand {
            Operand::Reg(reg) => self.set_reg(reg, value),
            Operand::Memory => memory.write(self.get_pair(RegPair::HL), value),
        }
    }

    // Stack operations: the high byte goes to SP, the low byte to SP-1
    pub fn push(&mut self, memory: &mut Memory, value: u16) {
        memory.write(self.sp, (value >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        memory.write(self.sp, (value & 0xFF) as u8);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pop(&mut self, memory: &Memory) -> u16 {
        self.sp = self.sp.wrapping_add(1);
        let low = memory.read(self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let high = memory.read(self.sp) as u16;
        (high << 8) | low
    }

    /// Accumulator in the high byte, flags in the low byte.
    pub fn psw(&self) -> u16 {
        ((self.reg(Reg::A) as u16) << 8) | self.status as u16
    }

    pub fn set_psw(&mut self, value: u16) {
        self.set_reg(Reg::A, (value >> 8) as u8);
        self.status = (value as u8 & STATUS_MASK) | UNUSED_FLAG;
    }

    // Operand fetch: PC is left on the last byte consumed
    fn fetch_u8(&mut self, memory: &Memory) -> u8 {
        self.pc = self.pc.wrapping_add(1);
        memory.read(self.pc)
    }

    fn fetch_u16(&mut self, memory: &Memory) -> u16 {
        let low = self.fetch_u8(memory) as u16;
        let high = self.fetch_u8(memory) as u16;
        (high << 8) | low
    }

    // Control transfers store target - 1; the post-instruction increment lands on target
    fn transfer(&mut self, target: u16) {
        self.pc = target.wrapping_sub(1);
    }

    fn jump(&mut self, memory: &mut Memory) {
        let target = self.fetch_u16(memory);
        self.transfer(target);
    }

    fn call(&mut self, memory: &mut Memory) {
        let target = self.fetch_u16(memory);
        let return_address = self.pc.wrapping_add(1);
        self.push(memory, return_address);
        self.transfer(target);
    }

    fn ret(&mut self, memory: &mut Memory) {
        let target = self.pop(memory);
        self.transfer(target);
    }

    /// Executes one fetch-decode-execute cycle.
    pub fn step(&mut self, memory: &mut Memory) -> StepOutcome {
        let opcode = memory.read(self.pc);
        let timer = Timer::new();

        let outcome = match self.execute_fixed(opcode, memory) {
            Some(outcome) => outcome,
            None => {
                self.execute_general(opcode, memory);
                StepOutcome::Continue
            }
        };

        self.pc = self.pc.wrapping_add(1);

        record_instruction(opcode, mnemonic(opcode), timer.elapsed());
        outcome
    }

    // Opcodes with no regular bit-field form. None means no match.
    fn execute_fixed(&mut self, opcode: u8, memory: &mut Memory) -> Option<StepOutcome> {
        match opcode {
            // LDA a
            0x3A => {
                let address = self.fetch_u16(memory);
                self.set_reg(Reg::A, memory.read(address));
            }

            // STA a
            0x32 => {
                let address = self.fetch_u16(memory);
                memory.write(address, self.reg(Reg::A));
            }

            // LHLD a
            0x2A => {
                let address = self.fetch_u16(memory);
                self.set_reg(Reg::L, memory.read(address));
                self.set_reg(Reg::H, memory.read(address.wrapping_add(1)));
            }

            // SHLD a
            0x22 => {
                let address = self.fetch_u16(memory);
                memory.write(address, self.reg(Reg::L));
                memory.write(address.wrapping_add(1), self.reg(Reg::H));
            }

            // XCHG
            0xEB => {
                let de = self.get_pair(RegPair::DE);
                let hl = self.get_pair(RegPair::HL);
                self.set_pair(RegPair::DE, hl);
                self.set_pair(RegPair::HL, de);
            }

            // Immediate accumulator arithmetic: ADI, ACI, SUI, SBI, ANI, XRI, ORI, CPI
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.fetch_u8(memory);
                self.accumulate(AluOp::from_bits(Fields::of(opcode).dest), value);
            }

            // DAA is not implemented; decimal adjust leaves A and the flags alone
            0x27 => {}

            // RLC, RRC, RAL, RAR
            0x07 | 0x0F | 0x17 | 0x1F => {
                let a = self.reg(Reg::A);
                let through_carry = opcode & 0x10 != 0;
                let result = if opcode & 0x08 == 0 {
                    self.rotate_left(a, through_carry)
                } else {
                    self.rotate_right(a, through_carry)
                };
                self.set_reg(Reg::A, result);
            }

            // CMA
            0x2F => {
                let a = self.reg(Reg::A);
                self.set_reg(Reg::A, !a);
            }

            // CMC
            0x3F => {
                let carry = self.get_flag(CARRY_FLAG);
                self.set_flag(CARRY_FLAG, !carry);
            }

            // STC
            0x37 => self.set_flag(CARRY_FLAG, true),

            // JMP a
            0xC3 => self.jump(memory),

            // CALL a
            0xCD => self.call(memory),

            // RET
            0xC9 => self.ret(memory),

            // PCHL
            0xE9 => {
                let hl = self.get_pair(RegPair::HL);
                self.transfer(hl);
            }

            // XTHL
            0xE3 => {
                let hl = self.get_pair(RegPair::HL);
                let top = self.pop(memory);
                self.set_pair(RegPair::HL, top);
                self.push(memory, hl);
            }

            // SPHL
            0xF9 => {
                let hl = self.get_pair(RegPair::HL);
                self.set_pair(RegPair::SP, hl);
            }

            // IN pa / OUT pa: no devices are attached, the port byte is skipped
            0xDB | 0xD3 => {
                self.fetch_u8(memory);
            }

            // EI
            0xFB => self.interrupts_enabled = true,

            // DI
            0xF3 => self.interrupts_enabled = false,

            // HLT
            0x76 => return Some(StepOutcome::Halted),

            // NOP
            0x00 => {}

            _ => return None,
        }
        Some(StepOutcome::Continue)
    }

    // Opcodes of the forms XXDDDSSS, XXDDDXXX and XXRPXXXX
    fn execute_general(&mut self, opcode: u8, memory: &mut Memory) {
        let fields = Fields::of(opcode);
        let pair = RegPair::from_bits(fields.pair);
        let dest = Operand::from_bits(fields.dest);
        let src = Operand::from_bits(fields.src);

        match fields.class {
            // MOV D, S
            CLASS_MOVE => {
                let value = self.read_operand(src, memory);
                self.write_operand(dest, memory, value);
            }

            CLASS_MISC => {
                // 00RPXXXX
                match fields.low_nibble {
                    // LXI RP, #
                    0x1 => {
                        let value = self.fetch_u16(memory);
                        self.set_pair(pair, value);
                    }
                    // LDAX RP
                    0xA => {
                        let value = memory.read(self.get_pair(pair));
                        self.set_reg(Reg::A, value);
                    }
                    // STAX RP
                    0x2 => memory.write(self.get_pair(pair), self.reg(Reg::A)),
                    // INX RP
                    0x3 => {
                        let value = self.get_pair(pair).wrapping_add(1);
                        self.set_pair(pair, value);
                    }
                    // DCX RP
                    0xB => {
                        let value = self.get_pair(pair).wrapping_sub(1);
                        self.set_pair(pair, value);
                    }
                    // DAD RP
                    0x9 => {
                        let hl = self.get_pair(RegPair::HL);
                        let other = self.get_pair(pair);
                        let result = self.double_add(hl, other);
                        self.set_pair(RegPair::HL, result);
                    }
                    _ => {}
                }

                // 00DDDXXX
                match fields.src {
                    // MVI D, #
                    0b110 => {
                        let value = self.fetch_u8(memory);
                        self.write_operand(dest, memory, value);
                    }
                    // INR D
                    0b100 => {
                        let value = self.read_operand(dest, memory);
                        let result = self.increment(value);
                        self.write_operand(dest, memory, result);
                    }
                    // DCR D
                    0b101 => {
                        let value = self.read_operand(dest, memory);
                        let result = self.decrement(value);
                        self.write_operand(dest, memory, result);
                    }
                    _ => {}
                }
            }

            // 10OOOSSS
            CLASS_ALU => {
                let value = self.read_operand(src, memory);
                self.accumulate(AluOp::from_bits(fields.dest), value);
            }

            CLASS_CONTROL => {
                // 11CCCXXX
                let condition = Condition::from_bits(fields.dest);
                match fields.src {
                    // Jccc a
                    0b010 => {
                        if condition.holds(self.status) {
                            self.jump(memory);
                        } else {
                            self.fetch_u16(memory);
                        }
                    }
                    // Cccc a
                    0b100 => {
                        if condition.holds(self.status) {
                            self.call(memory);
                        } else {
                            self.fetch_u16(memory);
                        }
                    }
                    // Rccc
                    0b000 => {
                        if condition.holds(self.status) {
                            self.ret(memory);
                        }
                    }
                    // RST n
                    0b111 => {
                        let return_address = self.pc.wrapping_add(1);
                        self.push(memory, return_address);
                        self.transfer(fields.dest as u16 * 8);
                    }
                    _ => {}
                }

                // 11RPXXXX; pair 3 is the processor status word here
                match fields.low_nibble {
                    // PUSH RP
                    0x5 => {
                        let value = match pair {
                            RegPair::SP => self.psw(),
                            other => self.get_pair(other),
                        };
                        self.push(memory, value);
                    }
                    // POP RP
                    0x1 => {
                        let value = self.pop(memory);
                        match pair {
                            RegPair::SP => self.set_psw(value),
                            other => self.set_pair(other, value),
                        }
                    }
                    _ => {}
                }
            }

            _ => {}
        }
    }

    // Applies an accumulator operation; compare keeps A and only sets flags
    fn accumulate(&mut self, op: AluOp, value: u8) {
        let a = self.reg(Reg::A);
        let result = match op {
            AluOp::Add => self.add(a, value, false),
            AluOp::AddWithCarry => self.add(a, value, true),
            AluOp::Subtract => self.subtract(a, value, false),
            AluOp::SubtractWithBorrow => self.subtract(a, value, true),
            AluOp::And => self.and(a, value),
            AluOp::Xor => self.xor(a, value),
            AluOp::Or => self.or(a, value),
            AluOp::Compare => {
                self.subtract(a, value, false);
                return;
            }
        };
        self.set_reg(Reg::A, result);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

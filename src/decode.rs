//! Bit-field views of an opcode byte.
//!
//! The general instruction forms are `XXDDDSSS` (class, destination, source)
//! and `XXRPXXXX` (class, register pair, low nibble).

use crate::cpu::{CARRY_FLAG, PARITY_FLAG, SIGN_FLAG, ZERO_FLAG};

/// Major classes selected by the two high bits.
pub const CLASS_MISC: u8 = 0b00;
pub const CLASS_MOVE: u8 = 0b01;
pub const CLASS_ALU: u8 = 0b10;
pub const CLASS_CONTROL: u8 = 0b11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fields {
    pub class: u8,
    pub dest: u8,
    pub src: u8,
    pub low_nibble: u8,
    pub pair: u8,
}

impl Fields {
    pub fn of(opcode: u8) -> Self {
        Fields {
            class: (opcode & 0xC0) >> 6,
            dest: (opcode & 0x38) >> 3,
            src: opcode & 0x07,
            low_nibble: opcode & 0x0F,
            pair: (opcode >> 4) & 0x03,
        }
    }
}

/// Condition codes of the `11CCCXXX` jump/call/return forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    NotZero,
    Zero,
    NotCarry,
    Carry,
    ParityOdd,
    ParityEven,
    Positive,
    Negative,
}

impl Condition {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0b000 => Condition::NotZero,
            0b001 => Condition::Zero,
            0b010 => Condition::NotCarry,
            0b011 => Condition::Carry,
            0b100 => Condition::ParityOdd,
            0b101 => Condition::ParityEven,
            0b110 => Condition::Positive,
            _ => Condition::Negative,
        }
    }

    /// Evaluates the condition against a status byte.
    pub fn holds(self, status: u8) -> bool {
        let set = |flag: u8| status & flag != 0;
        match self {
            Condition::NotZero => !set(ZERO_FLAG),
            Condition::Zero => set(ZERO_FLAG),
            Condition::NotCarry => !set(CARRY_FLAG),
            Condition::Carry => set(CARRY_FLAG),
            Condition::ParityOdd => !set(PARITY_FLAG),
            Condition::ParityEven => set(PARITY_FLAG),
            Condition::Positive => !set(SIGN_FLAG),
            Condition::Negative => set(SIGN_FLAG),
        }
    }
}

/// Accumulator operations of the `10OOOSSS` form, selected by the destination field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    AddWithCarry,
    Subtract,
    SubtractWithBorrow,
    And,
    Xor,
    Or,
    Compare,
}

impl AluOp {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0b000 => AluOp::Add,
            0b001 => AluOp::AddWithCarry,
            0b010 => AluOp::Subtract,
            0b011 => AluOp::SubtractWithBorrow,
            0b100 => AluOp::And,
            0b101 => AluOp::Xor,
            0b110 => AluOp::Or,
            _ => AluOp::Compare,
        }
    }
}

const JUMPS: [&str; 8] = ["JNZ", "JZ", "JNC", "JC", "JPO", "JPE", "JP", "JM"];
const CALLS: [&str; 8] = ["CNZ", "CZ", "CNC", "CC", "CPO", "CPE", "CP", "CM"];
const RETURNS: [&str; 8] = ["RNZ", "RZ", "RNC", "RC", "RPO", "RPE", "RP", "RM"];
const ALU_REGISTER: [&str; 8] = ["ADD", "ADC", "SUB", "SBB", "ANA", "XRA", "ORA", "CMP"];

/// Mnemonic for any opcode byte; bytes with no defined instruction give `"???"`.
pub fn mnemonic(opcode: u8) -> &'static str {
    match opcode {
        0x00 => "NOP",
        0x07 => "RLC",
        0x0F => "RRC",
        0x17 => "RAL",
        0x1F => "RAR",
        0x22 => "SHLD",
        0x27 => "DAA",
        0x2A => "LHLD",
        0x2F => "CMA",
        0x32 => "STA",
        0x37 => "STC",
        0x3A => "LDA",
        0x3F => "CMC",
        0x76 => "HLT",
        0xC3 => "JMP",
        0xC6 => "ADI",
        0xC9 => "RET",
        0xCD => "CALL",
        0xCE => "ACI",
        0xD3 => "OUT",
        0xD6 => "SUI",
        0xDB => "IN",
        0xDE => "SBI",
        0xE3 => "XTHL",
        0xE6 => "ANI",
        0xE9 => "PCHL",
        0xEB => "XCHG",
        0xEE => "XRI",
        0xF3 => "DI",
        0xF6 => "ORI",
        0xF9 => "SPHL",
        0xFB => "EI",
        0xFE => "CPI",
        _ => general_mnemonic(Fields::of(opcode)),
    }
}

fn general_mnemonic(fields: Fields) -> &'static str {
    match fields.class {
        CLASS_MOVE => "MOV",
        CLASS_ALU => ALU_REGISTER[fields.dest as usize],
        CLASS_MISC => match (fields.low_nibble, fields.src) {
            (0x1, _) => "LXI",
            (0x2, _) => "STAX",
            (0x3, _) => "INX",
            (0x9, _) => "DAD",
            (0xA, _) => "LDAX",
            (0xB, _) => "DCX",
            (_, 0b100) => "INR",
            (_, 0b101) => "DCR",
            (_, 0b110) => "MVI",
            _ => "???",
        },
        _ => match (fields.src, fields.low_nibble) {
            (0b000, _) => RETURNS[fields.dest as usize],
            (0b010, _) => JUMPS[fields.dest as usize],
            (0b100, _) => CALLS[fields.dest as usize],
            (0b111, _) => "RST",
            (_, 0x1) => "POP",
            (_, 0x5) => "PUSH",
            _ => "???",
        },
    }
}

//! Arithmetic and logic on the accumulator path.
//!
//! Every operation here touches only the status byte of the [`Cpu`]; operands
//! and results are passed by value so the instruction engine decides where
//! they come from and where they go.

use crate::cpu::{Cpu, AUX_CARRY_FLAG, CARRY_FLAG, PARITY_FLAG, SIGN_FLAG, ZERO_FLAG};

/// Even parity over the low eight bits.
pub fn parity(value: u8) -> bool {
    value.count_ones() % 2 == 0
}

impl Cpu {
    // Zero, sign and parity from the result; carry and auxiliary carry cleared.
    fn set_result_flags(&mut self, value: u8) {
        self.set_flag(ZERO_FLAG, value == 0);
        self.set_flag(SIGN_FLAG, value & 0x80 != 0);
        self.set_flag(PARITY_FLAG, parity(value));
        self.set_flag(CARRY_FLAG, false);
        self.set_flag(AUX_CARRY_FLAG, false);
    }

    /// `a + b`, plus the carry flag when `with_carry` is set. Rewrites all five flags.
    pub fn add(&mut self, a: u8, b: u8, with_carry: bool) -> u8 {
        let carry_in = if with_carry && self.get_flag(CARRY_FLAG) { 1 } else { 0 };
        let result = a as u16 + b as u16 + carry_in;
        let aux_result = (a & 0x0F) as u16 + (b & 0x0F) as u16 + carry_in;
        let result8 = (result & 0xFF) as u8;

        self.set_result_flags(result8);
        self.set_flag(CARRY_FLAG, result > 0xFF);
        self.set_flag(AUX_CARRY_FLAG, aux_result > 0x0F);
        result8
    }

    /// `a - b` as an add of the two's complement of `b`.
    ///
    /// The carry flag is complemented before delegating to [`Cpu::add`], so a
    /// borrow-in is taken from the inverted carry and the carry left behind
    /// follows the add convention (set when the complemented sum overflowed).
    pub fn subtract(&mut self, a: u8, b: u8, with_borrow: bool) -> u8 {
        let negated = (!b).wrapping_add(1);
        let carry = self.get_flag(CARRY_FLAG);
        self.set_flag(CARRY_FLAG, !carry);
        self.add(a, negated, with_borrow)
    }

    pub fn and(&mut self, a: u8, b: u8) -> u8 {
        let result = a & b;
        self.set_result_flags(result);
        result
    }

    pub fn or(&mut self, a: u8, b: u8) -> u8 {
        let result = a | b;
        self.set_result_flags(result);
        result
    }

    pub fn xor(&mut self, a: u8, b: u8) -> u8 {
        let result = a ^ b;
        self.set_result_flags(result);
        result
    }

    /// Rotates left by one. Bit 7 always lands in carry; bit 0 comes from the
    /// old carry when rotating through it, otherwise from bit 7.
    pub fn rotate_left(&mut self, value: u8, through_carry: bool) -> u8 {
        let bit7 = value >> 7;
        let fill = if through_carry {
            self.get_flag(CARRY_FLAG) as u8
        } else {
            bit7
        };
        self.set_flag(CARRY_FLAG, bit7 != 0);
        (value << 1) | fill
    }

    pub fn rotate_right(&mut self, value: u8, through_carry: bool) -> u8 {
        let bit0 = value & 1;
        let fill = if through_carry {
            self.get_flag(CARRY_FLAG) as u8
        } else {
            bit0
        };
        self.set_flag(CARRY_FLAG, bit0 != 0);
        (value >> 1) | (fill << 7)
    }

    /// 16-bit add for DAD. Only carry is affected.
    pub fn double_add(&mut self, a: u16, b: u16) -> u16 {
        let result = a as u32 + b as u32;
        self.set_flag(CARRY_FLAG, result > 0xFFFF);
        (result & 0xFFFF) as u16
    }

    /// INR: add one without disturbing carry.
    pub fn increment(&mut self, value: u8) -> u8 {
        let carry = self.get_flag(CARRY_FLAG);
        let result = self.add(value, 1, false);
        self.set_flag(CARRY_FLAG, carry);
        result
    }

    /// DCR: subtract one without disturbing carry.
    pub fn decrement(&mut self, value: u8) -> u8 {
        let carry = self.get_flag(CARRY_FLAG);
        let result = self.subtract(value, 1, false);
        self.set_flag(CARRY_FLAG, carry);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity() {
        assert!(parity(0x00));
        assert!(parity(0x03));
        assert!(!parity(0x07));
        assert!(parity(0xFF));
        assert!(!parity(0x80));
    }

    #[test]
    fn test_add_sets_carry_and_aux_carry() {
        let mut cpu = Cpu::new();

        assert_eq!(cpu.add(0xFF, 0x01, false), 0x00);
        assert!(cpu.zero());
        assert!(cpu.carry());
        assert!(cpu.auxiliary_carry());
        assert!(cpu.parity());
        assert!(!cpu.sign());

        assert_eq!(cpu.add(0x05, 0x03, false), 0x08);
        assert!(!cpu.zero());
        assert!(!cpu.carry());
        assert!(!cpu.auxiliary_carry());
    }

    #[test]
    fn test_add_with_carry_uses_carry_in() {
        let mut cpu = Cpu::new();
        cpu.set_flag(CARRY_FLAG, true);
        assert_eq!(cpu.add(0x0E, 0x01, true), 0x10);
        assert!(cpu.auxiliary_carry());
        assert!(!cpu.carry());

        cpu.set_flag(CARRY_FLAG, true);
        assert_eq!(cpu.add(0x0E, 0x01, false), 0x0F);
        assert!(!cpu.auxiliary_carry());
    }

    #[test]
    fn test_subtract_inverted_carry_convention() {
        let mut cpu = Cpu::new();

        // 5 - 3: the complemented sum overflows, so carry reads set
        assert_eq!(cpu.subtract(5, 3, false), 2);
        assert!(cpu.carry());

        // 3 - 5 wraps and the complemented sum does not overflow
        assert_eq!(cpu.subtract(3, 5, false), 0xFE);
        assert!(!cpu.carry());
        assert!(cpu.sign());

        assert_eq!(cpu.subtract(0x42, 0x42, false), 0);
        assert!(cpu.zero());
    }

    #[test]
    fn test_subtract_with_borrow_takes_inverted_carry() {
        let mut cpu = Cpu::new();

        // carry clear is inverted to set before the add, so one extra is added
        cpu.set_flag(CARRY_FLAG, false);
        assert_eq!(cpu.subtract(10, 4, true), 7);

        cpu.set_flag(CARRY_FLAG, true);
        assert_eq!(cpu.subtract(10, 4, true), 6);
    }

    #[test]
    fn test_subtract_aux_carry_from_complemented_nibbles() {
        let mut cpu = Cpu::new();

        // 0x0 + 0xF: no nibble overflow
        assert_eq!(cpu.subtract(0x10, 0x01, false), 0x0F);
        assert!(!cpu.auxiliary_carry());

        // 0x1 + 0xF overflows the low nibble
        assert_eq!(cpu.subtract(0x11, 0x01, false), 0x10);
        assert!(cpu.auxiliary_carry());

        assert_eq!(cpu.subtract(0x05, 0x03, false), 0x02);
        assert!(cpu.auxiliary_carry());
    }

    #[test]
    fn test_subtract_with_borrow_aux_carry_counts_carry_in() {
        let mut cpu = Cpu::new();

        // carry clear becomes a carry-in of one: 0x0 + 0xF + 1
        cpu.set_flag(CARRY_FLAG, false);
        assert_eq!(cpu.subtract(0x10, 0x01, true), 0x10);
        assert!(cpu.auxiliary_carry());

        // carry set becomes no carry-in: 0x0 + 0xF
        cpu.set_flag(CARRY_FLAG, true);
        assert_eq!(cpu.subtract(0x10, 0x01, true), 0x0F);
        assert!(!cpu.auxiliary_carry());
    }

    #[test]
    fn test_logical_ops_clear_carries() {
        let mut cpu = Cpu::new();
        cpu.set_flag(CARRY_FLAG, true);
        cpu.set_flag(AUX_CARRY_FLAG, true);

        assert_eq!(cpu.and(0xF0, 0x3C), 0x30);
        assert!(!cpu.carry());
        assert!(!cpu.auxiliary_carry());
        assert!(cpu.parity());

        assert_eq!(cpu.or(0x80, 0x01), 0x81);
        assert!(cpu.sign());

        assert_eq!(cpu.xor(0x5A, 0x5A), 0x00);
        assert!(cpu.zero());
    }

    #[test]
    fn test_rotate_left_through_carry() {
        let mut cpu = Cpu::new();
        let value = cpu.rotate_left(0x80, true);
        assert_eq!(value, 0x00);
        assert!(cpu.carry());

        let value = cpu.rotate_left(value, true);
        assert_eq!(value, 0x01);
        assert!(!cpu.carry());
    }

    #[test]
    fn test_rotate_left_wraps_bit7() {
        let mut cpu = Cpu::new();
        assert_eq!(cpu.rotate_left(0x81, false), 0x03);
        assert!(cpu.carry());
    }

    #[test]
    fn test_rotate_right() {
        let mut cpu = Cpu::new();
        assert_eq!(cpu.rotate_right(0x01, false), 0x80);
        assert!(cpu.carry());

        cpu.set_flag(CARRY_FLAG, false);
        assert_eq!(cpu.rotate_right(0x01, true), 0x00);
        assert!(cpu.carry());
        assert_eq!(cpu.rotate_right(0x00, true), 0x80);
        assert!(!cpu.carry());
    }

    #[test]
    fn test_rotates_leave_other_flags() {
        let mut cpu = Cpu::new();
        cpu.set_flag(ZERO_FLAG, true);
        cpu.set_flag(SIGN_FLAG, true);
        cpu.rotate_left(0x55, false);
        assert!(cpu.zero());
        assert!(cpu.sign());
    }

    #[test]
    fn test_double_add_only_touches_carry() {
        let mut cpu = Cpu::new();
        cpu.set_flag(ZERO_FLAG, true);
        assert_eq!(cpu.double_add(0xFFFF, 0x0002), 0x0001);
        assert!(cpu.carry());
        assert!(cpu.zero());

        assert_eq!(cpu.double_add(0x1000, 0x0234), 0x1234);
        assert!(!cpu.carry());
    }

    #[test]
    fn test_increment_decrement_preserve_carry() {
        let mut cpu = Cpu::new();
        cpu.set_flag(CARRY_FLAG, true);
        assert_eq!(cpu.increment(0xFF), 0x00);
        assert!(cpu.zero());
        assert!(cpu.carry());

        cpu.set_flag(CARRY_FLAG, false);
        assert_eq!(cpu.decrement(0x00), 0xFF);
        assert!(cpu.sign());
        assert!(!cpu.carry());
    }
}

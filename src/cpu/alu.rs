//! The 4-bit ALU's decimal-corrected addition, shared by `DA`/`DAC`/`DSC`.

/// BCD-corrected add: `a + b + carry_in`, returning `(nibble, carry_out)`.
/// `10*carry_out + nibble == a + b + carry_in` for `a, b` in `0..=9`.
#[must_use]
pub fn decimal_add(a: u8, b: u8, carry_in: u8) -> (u8, u8) {
    let sum = u32::from(a) + u32::from(b) + u32::from(carry_in);
    let carry_out = u8::from(sum > 9);
    let nibble = if carry_out == 1 { sum - 10 } else { sum } as u8;
    (nibble, carry_out)
}

/// Decimal subtract with carry: `a - b - borrow`, via 9's complement of `b`.
#[must_use]
pub fn decimal_sub(a: u8, b: u8, carry_in: u8) -> (u8, u8) {
    let nines_comp = 9 - b;
    decimal_add(a, nines_comp, carry_in)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_add_matches_bcd_arithmetic_for_all_digit_pairs() {
        for a in 0..=9u8 {
            for b in 0..=9u8 {
                for c in 0..=1u8 {
                    let (out, co) = decimal_add(a, b, c);
                    assert!(out <= 9);
                    assert!(co <= 1);
                    assert_eq!(10 * u32::from(co) + u32::from(out), u32::from(a) + u32::from(b) + u32::from(c));
                }
            }
        }
    }

    #[test]
    fn decimal_add_carry_chain_example() {
        // R0=9, R1=2: DA -> out=1, carry=1
        assert_eq!(decimal_add(9, 2, 0), (1, 1));
        // R2=5, R3=4, carry-in=1: DAC -> 5+4+1=10 -> out=0, carry=1
        assert_eq!(decimal_add(5, 4, 1), (0, 1));
    }
}

//! Bit addressing over byte strings, most significant bit first.

#[inline]
pub fn bit_is_set(bits: &[u8], i: usize) -> bool {
    bits[i / 8] & (1 << (7 - i % 8)) != 0
}

#[inline]
pub fn set_bit(bits: &mut [u8], i: usize) {
    bits[i / 8] |= 1 << (7 - i % 8);
}

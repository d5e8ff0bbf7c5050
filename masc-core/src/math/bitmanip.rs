/// Inserts two zero-bits before any two bits of `val`. Only the lower 21 bits of `val` are kept
pub fn expand_bits_by_3(mut val: u64) -> u64 {
    val &= 0x1FFFFF;
    val = (val | (val << 32)) & 0x00FF00000000FFFF;
    val = (val | (val << 16)) & 0x00FF0000FF0000FF;
    val = (val | (val << 8)) & 0xF00F00F00F00F00F;
    val = (val | (val << 4)) & 0x30C30C30C30C30C3;
    val = (val | (val << 2)) & 0x1249249249249249;
    val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_bits_by_3() {
        assert_eq!(0, expand_bits_by_3(0));
        assert_eq!(0b1001001, expand_bits_by_3(0b111));
        assert_eq!(1 << 60, expand_bits_by_3(1 << 20));
        // Bits above the 21st are dropped
        assert_eq!(0, expand_bits_by_3(1 << 21));
    }
}

#[inline]
pub(crate) fn to_u32_le(src: &[u8]) -> u32 {
    assert_eq!(src.len(), 4);
    let mut bytes = [0; 4];
    bytes.copy_from_slice(src);
    u32::from_le_bytes(bytes)
}

#[inline]
pub(crate) fn to_u64_le(src: &[u8]) -> u64 {
    assert_eq!(src.len(), 8);
    let mut bytes = [0; 8];
    bytes.copy_from_slice(src);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
pub(crate) fn bytes_to_vec_u32_le(src: &[u8]) -> Vec<u32> {
    assert_eq!(src.len() % 4, 0);
    src.chunks_exact(4).map(to_u32_le).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_int_le() {
        assert_eq!(to_u32_le(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(to_u64_le(&1u64.to_le_bytes()), 1);
        assert_eq!(bytes_to_vec_u32_le(&[1, 0, 0, 0, 2, 0, 0, 0]), vec![1, 2]);
    }
}

use crate::*;
use num_bigint::BigUint;

/// Most sub-fields a single packed element may carry
pub const MAX_PACKED_FIELDS: usize = 5;

/// Total bits available below the field modulus
pub const MAX_PACKED_BITS: u32 = 253;

/// Pack small values into one field element, the first value in the lowest bits
pub fn pack_fields(values: &[u64], bit_widths: &[u32]) -> Result<Fr, Error> {
    check_widths(bit_widths)?;
    if values.len() != bit_widths.len() {
        return Err(Error::ValueOutOfRange(format!(
            "{} values for {} bit widths",
            values.len(),
            bit_widths.len()
        )));
    }

    let mut packed = BigUint::from(0u64);
    let mut offset = 0;
    for (value, width) in values.iter().zip(bit_widths) {
        if *width < 64 && *value >> width != 0 {
            return Err(Error::ValueOutOfRange(format!(
                "{} does not fit in {} bits",
                value, width
            )));
        }
        packed |= BigUint::from(*value) << offset;
        offset += width;
    }
    fr_from_biguint(&packed)
}

/// Inverse of `pack_fields`.
///
/// Bits set above the total width mean the element was not produced by
/// `pack_fields` with these widths.
pub fn unpack_fields(packed: &Fr, bit_widths: &[u32]) -> Result<Vec<u64>, Error> {
    check_widths(bit_widths)?;
    let total: u32 = bit_widths.iter().sum();
    let value = BigUint::from(*packed);
    if value.bits() > total as u64 {
        return Err(Error::ValueOutOfRange(format!(
            "packed element has {} bits, expected at most {}",
            value.bits(),
            total
        )));
    }

    let mut offset = 0;
    let mut values = Vec::with_capacity(bit_widths.len());
    for width in bit_widths {
        values.push(extract_bits(packed, offset, *width));
        offset += width;
    }
    Ok(values)
}

/// Read `width` bits starting at `offset`, ignoring everything else
pub fn extract_bits(packed: &Fr, offset: u32, width: u32) -> u64 {
    let value = BigUint::from(*packed) >> offset;
    let mask = if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    let low = value.iter_u64_digits().next().unwrap_or(0);
    low & mask
}

fn check_widths(bit_widths: &[u32]) -> Result<(), Error> {
    if bit_widths.len() > MAX_PACKED_FIELDS {
        return Err(Error::ValueOutOfRange(format!(
            "cannot pack more than {} values",
            MAX_PACKED_FIELDS
        )));
    }
    if bit_widths.iter().any(|w| *w == 0 || *w > 64) {
        return Err(Error::ValueOutOfRange(
            "bit widths must be between 1 and 64".into(),
        ));
    }
    let total: u32 = bit_widths.iter().sum();
    if total > MAX_PACKED_BITS {
        return Err(Error::ValueOutOfRange(format!(
            "{} bits do not fit in a field element",
            total
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pack_layout() {
        let packed = pack_fields(&[1, 2, 3], &[50, 50, 50]).unwrap();
        let expected = BigUint::from(1u64)
            + (BigUint::from(2u64) << 50)
            + (BigUint::from(3u64) << 100);
        assert_eq!(BigUint::from(packed), expected);
        assert_eq!(unpack_fields(&packed, &[50, 50, 50]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(matches!(
            pack_fields(&[1 << 50], &[50]),
            Err(Error::ValueOutOfRange(_))
        ));
        assert!(pack_fields(&[1, 1, 1, 1, 1, 1], &[8; 6]).is_err());
        assert!(pack_fields(&[1, 2], &[50]).is_err());
        assert!(pack_fields(&[0; 5], &[64, 64, 64, 64, 64]).is_err());
    }

    #[test]
    fn test_malformed_packed_element() {
        let packed = pack_fields(&[5, 7], &[8, 8]).unwrap();
        assert!(unpack_fields(&packed, &[8]).is_err());
        assert_eq!(extract_bits(&packed, 8, 8), 7);
        assert_eq!(extract_bits(&packed, 0, 4), 5);
    }

    proptest! {
        #[test]
        fn prop_pack_unpack(values in proptest::collection::vec(0u64..(1u64 << 50), 1..=5)) {
            let widths = vec![50u32; values.len()];
            let packed = pack_fields(&values, &widths).unwrap();
            prop_assert_eq!(unpack_fields(&packed, &widths).unwrap(), values);
        }
    }
}

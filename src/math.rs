use num_bigint::{BigInt, BigUint};
use num_traits::{Signed, Zero};
use std::cmp::min;
use std::mem;

pub fn div_ceil(x: &BigUint, y: &BigUint) -> BigUint {
    x / y + min(x % y, 1u8.into())
}

/// `x - y`, or zero when `y > x`.
pub fn saturating_sub(x: &BigUint, y: &BigUint) -> BigUint {
    if x > y {
        x - y
    } else {
        BigUint::zero()
    }
}

pub fn inv_egcd(x: &BigUint, m: &BigUint) -> Option<BigUint> {
    let m = BigInt::from(m.clone());
    let zero = BigInt::from(0);
    let (mut t, mut tn) = (zero.clone(), BigInt::from(1));
    let (mut r, mut rn) = (m.clone(), BigInt::from(x % m.magnitude()));
    while rn != zero {
        let quo = &r / &rn;
        mem::swap(&mut t, &mut tn);
        mem::swap(&mut r, &mut rn);
        tn -= &quo * &t;
        rn -= &quo * &r;
    }
    if r != 1u8.into() {
        return None;
    };
    if t.is_negative() {
        t += &m;
    }
    t.to_biguint()
}

/// Big-endian encoding left-padded with zeros to exactly `len` bytes.
/// Values wider than `len` keep their full encoding.
pub fn to_bytes_be_padded(x: &BigUint, len: usize) -> Vec<u8> {
    let bytes = x.to_bytes_be();
    if x.is_zero() {
        return vec![0; len];
    }
    if bytes.len() >= len {
        return bytes;
    }
    let mut padded = vec![0; len - bytes.len()];
    padded.extend(bytes);
    padded
}

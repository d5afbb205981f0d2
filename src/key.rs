use crate::error::{Error, Result};
use num_bigint::BigUint;

/// Public-key parameters shared by every component of an attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContext {
    pub n: BigUint,
    pub e: BigUint,
    /// Byte length of `n`.
    pub k: usize,
    /// `2^(8*(k-2))`
    pub b: BigUint,
}

pub fn modulus_len(n: &BigUint) -> usize {
    ((n.bits() + 7) / 8) as usize
}

impl KeyContext {
    pub fn new(n: BigUint, e: BigUint) -> Result<Self> {
        let k = modulus_len(&n);
        if k < 2 {
            return Err(Error::Config(format!("modulus {} is shorter than two bytes", n)));
        }
        let b = BigUint::from(1u8) << (8 * (k - 2));
        Ok(KeyContext { n, e, k, b })
    }

    /// `c * s^e mod n`
    pub fn blind(&self, c: &BigUint, s: &BigUint) -> BigUint {
        c * s.modpow(&self.e, &self.n) % &self.n
    }

    pub fn encrypt(&self, m: &BigUint) -> BigUint {
        m.modpow(&self.e, &self.n)
    }

    pub fn two_b(&self) -> BigUint {
        2u8 * &self.b
    }

    pub fn three_b(&self) -> BigUint {
        3u8 * &self.b
    }
}

//! GF(2^16) arithmetic for PAR2 Reed–Solomon coding.
//!
//! The field is generated by the PAR2-mandated primitive polynomial
//! 0x1100B (x^16 + x^12 + x^3 + x + 1). Multiplication and division
//! go through 65536-entry log/antilog tables built once on first use;
//! addition is XOR.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};
use std::sync::OnceLock;

/// PAR2 generator polynomial for GF(2^16). Fixed by the file format.
const GENERATOR: u32 = 0x1100B;

const COUNT: usize = 1 << 16;
const LIMIT: u16 = (COUNT - 1) as u16;

/// Log/antilog tables powering multiply and divide.
pub struct GaloisTable {
    pub log: Vec<u16>,
    pub antilog: Vec<u16>,
}

impl GaloisTable {
    fn build() -> Self {
        let mut log = vec![0u16; COUNT];
        let mut antilog = vec![0u16; COUNT];

        let mut b = 1u32;
        for l in 0..LIMIT {
            log[b as usize] = l;
            antilog[l as usize] = b as u16;

            b <<= 1;
            if b & COUNT as u32 != 0 {
                b ^= GENERATOR;
            }
        }
        log[0] = LIMIT;
        antilog[LIMIT as usize] = 0;

        GaloisTable { log, antilog }
    }

    pub fn global() -> &'static GaloisTable {
        static TABLE: OnceLock<GaloisTable> = OnceLock::new();
        TABLE.get_or_init(GaloisTable::build)
    }
}

/// An element of GF(2^16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Galois16(u16);

impl Galois16 {
    pub fn new(value: u16) -> Self {
        Galois16(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Raise to an integer power.
    pub fn pow(&self, exponent: u16) -> Self {
        if self.0 == 0 {
            return Galois16(0);
        }
        let table = GaloisTable::global();
        let log = table.log[self.0 as usize] as u32;
        let result = (log * exponent as u32) % LIMIT as u32;
        Galois16(table.antilog[result as usize])
    }

    /// Antilog of the raw value, used when generating Vandermonde
    /// base values from their logarithms.
    pub fn alog(&self) -> u16 {
        GaloisTable::global().antilog[self.0 as usize]
    }
}

impl Add for Galois16 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Galois16(self.0 ^ rhs.0)
    }
}

impl AddAssign for Galois16 {
    fn add_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

// In a field of characteristic 2, subtraction is addition.
impl Sub for Galois16 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Galois16(self.0 ^ rhs.0)
    }
}

impl SubAssign for Galois16 {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl Mul for Galois16 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if self.0 == 0 || rhs.0 == 0 {
            return Galois16(0);
        }
        let table = GaloisTable::global();
        let sum = (table.log[self.0 as usize] as usize + table.log[rhs.0 as usize] as usize)
            % LIMIT as usize;
        Galois16(table.antilog[sum])
    }
}

impl MulAssign for Galois16 {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Div for Galois16 {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        assert!(rhs.0 != 0, "division by zero in GF(2^16)");
        if self.0 == 0 {
            return Galois16(0);
        }
        let table = GaloisTable::global();
        let diff = (table.log[self.0 as usize] as i32 - table.log[rhs.0 as usize] as i32
            + LIMIT as i32)
            % LIMIT as i32;
        Galois16(table.antilog[diff as usize])
    }
}

impl DivAssign for Galois16 {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl From<u16> for Galois16 {
    fn from(value: u16) -> Self {
        Galois16(value)
    }
}

impl From<Galois16> for u16 {
    fn from(value: Galois16) -> Self {
        value.0
    }
}

impl std::fmt::Display for Galois16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Multiply a slice of little-endian 16-bit words by `factor` and XOR
/// the products into `output`. This is the inner loop of both the
/// recovery encode and the repair fan-out; slices must have even
/// length and `output` must be at least as long as `input`.
pub fn process_slice(factor: Galois16, input: &[u8], output: &mut [u8]) {
    debug_assert!(input.len() % 2 == 0);
    debug_assert!(output.len() >= input.len());

    if factor.value() == 0 {
        return;
    }

    let table = GaloisTable::global();
    let log_factor = table.log[factor.value() as usize] as usize;

    for (i, o) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
        let word = u16::from_le_bytes([i[0], i[1]]);
        if word == 0 {
            continue;
        }
        let product = table.antilog[(table.log[word as usize] as usize + log_factor) % LIMIT as usize];
        let current = u16::from_le_bytes([o[0], o[1]]);
        o.copy_from_slice(&(current ^ product).to_le_bytes());
    }
}

/// Greatest common divisor, used to pick Vandermonde base logarithms
/// coprime with 65535.
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    if a == 0 || b == 0 {
        return 0;
    }
    while a != 0 && b != 0 {
        if a > b {
            a %= b;
        } else {
            b %= a;
        }
    }
    a + b
}

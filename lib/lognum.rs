//! Signed real numbers stored by logarithm.

use std::{
    fmt,
    io::{ Read, Write },
    ops::{ Div, Mul },
};
use crate::io::{ Persist, PersistResult, read_f64, read_i32, write_f64, write_i32 };

/// A real number `sign * exp(lognum)`, able to represent magnitudes far
/// outside the range of `f64`.
///
/// Zero is represented by a sign of `0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LogNumber {
    lognum: f64,
    sign: i32,
}

impl Default for LogNumber {
    fn default() -> Self { Self::from_real(1.0) }
}

impl LogNumber {
    /// Create a new number directly from its logarithm and sign.
    ///
    /// `sign` is normalized to `-1`, `0`, or `+1`.
    pub fn new(lognum: f64, sign: i32) -> Self {
        let sign = sign.signum();
        if sign == 0 { Self { lognum: 0.0, sign } } else { Self { lognum, sign } }
    }

    /// Convert from an ordinary real number.
    pub fn from_real(x: f64) -> Self {
        if x == 0.0 {
            Self { lognum: 0.0, sign: 0 }
        } else {
            Self { lognum: x.abs().ln(), sign: if x < 0.0 { -1 } else { 1 } }
        }
    }

    /// Convert to an ordinary real number.
    ///
    /// May overflow to infinity or underflow to zero.
    pub fn real(&self) -> f64 { f64::from(self.sign) * self.lognum.exp() }

    /// Return the logarithm of the magnitude.
    pub fn log_num(&self) -> f64 { self.lognum }

    /// Return the sign, `-1`, `0`, or `+1`.
    pub fn sign(&self) -> i32 { self.sign }

    /// Return `true` if `self` represents zero.
    pub fn is_zero(&self) -> bool { self.sign == 0 }
}

impl From<f64> for LogNumber {
    fn from(x: f64) -> Self { Self::from_real(x) }
}

impl Mul for LogNumber {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(self.lognum + rhs.lognum, self.sign * rhs.sign)
    }
}

impl Div for LogNumber {
    type Output = Self;

    /// *Panics if `rhs` is zero.*
    fn div(self, rhs: Self) -> Self {
        assert!(!rhs.is_zero(), "division of a LogNumber by zero");
        Self::new(self.lognum - rhs.lognum, self.sign * rhs.sign)
    }
}

impl fmt::Display for LogNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sign {
            0 => write!(f, "0"),
            s => write!(f, "{}exp({})", if s < 0 { "-" } else { "" }, self.lognum),
        }
    }
}

impl Persist for LogNumber {
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized
    {
        write_f64(w, self.lognum)?;
        write_i32(w, self.sign)?;
        Ok(())
    }

    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized
    {
        let lognum = read_f64(r)?;
        let sign = read_i32(r)?;
        Ok(Self::new(lognum, sign))
    }
}

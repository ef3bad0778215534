//! Additive quantum numbers labeling symmetry sectors.
//!
//! A [`QN`] carries a spin projection `sz`, a particle number `nf`, and the
//! fermion parity `nfp` of that particle number. Charges combine additively,
//! so a block-sparse tensor only stores blocks whose charges (weighted by the
//! [arrows][crate::leg::Arrow] of their legs) sum to a fixed flux.
//!
//! ```
//! use tensor_bond::qn::QN;
//!
//! let q = QN::new(1, 3) + QN::new(-1, 1);
//! assert_eq!(q, QN::new(0, 4));
//! assert_eq!(q.nfp(), 0);
//! ```

use std::{
    fmt,
    io::{ Read, Write },
    ops::{ Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign },
};
use crate::io::{ Persist, PersistResult, read_i32, write_i32 };

/// A conserved, additive charge.
///
/// Parity is always kept consistent with `nf` (`|nf| mod 2`) whenever the
/// particle number is tracked; when only parity is tracked (`nf == 0`) it may
/// be set independently.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QN {
    sz: i32,
    nf: i32,
    nfp: i32,
}

impl QN {
    /// Create a new quantum number, deriving the parity from `nf`.
    pub fn new(sz: i32, nf: i32) -> Self {
        Self { sz, nf, nfp: (nf % 2).abs() }
    }

    /// Create a new quantum number with an explicit parity.
    ///
    /// *Panics if `nf` is non-zero and its parity disagrees with `nfp`.*
    pub fn with_parity(sz: i32, nf: i32, nfp: i32) -> Self {
        let nfp = (nfp % 2).abs();
        assert!(
            nf == 0 || (nf % 2).abs() == nfp,
            "inconsistent fermion parity {nfp} for particle number {nf}",
        );
        Self { sz, nf, nfp }
    }

    /// Return the spin projection.
    pub fn sz(&self) -> i32 { self.sz }

    /// Return the particle number.
    pub fn nf(&self) -> i32 { self.nf }

    /// Return the fermion parity, `0` (even) or `1` (odd).
    pub fn nfp(&self) -> i32 { self.nfp }

    /// Return the fermion parity as a sign, `+1` (even) or `-1` (odd).
    pub fn fp(&self) -> i32 { if self.nfp == 0 { 1 } else { -1 } }

    /// Return the charge-conjugated quantum number.
    ///
    /// Parity is invariant under negation.
    pub fn negated(self) -> Self { -self }
}

impl AddAssign for QN {
    fn add_assign(&mut self, rhs: Self) {
        self.sz += rhs.sz;
        self.nf += rhs.nf;
        self.nfp = (self.nfp + rhs.nfp).abs() % 2;
    }
}

impl SubAssign for QN {
    fn sub_assign(&mut self, rhs: Self) {
        self.sz -= rhs.sz;
        self.nf -= rhs.nf;
        self.nfp = (self.nfp - rhs.nfp).abs() % 2;
    }
}

impl Add for QN {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sub for QN {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl Neg for QN {
    type Output = Self;

    fn neg(self) -> Self {
        Self { sz: -self.sz, nf: -self.nf, nfp: self.nfp }
    }
}

// scaling only ever flips the sign of a charge
impl MulAssign<i32> for QN {
    fn mul_assign(&mut self, rhs: i32) {
        assert!(rhs * rhs == 1, "QN can only be scaled by ±1, got {rhs}");
        self.sz *= rhs;
        self.nf *= rhs;
    }
}

impl Mul<i32> for QN {
    type Output = Self;

    fn mul(mut self, rhs: i32) -> Self {
        self *= rhs;
        self
    }
}

impl Mul<QN> for i32 {
    type Output = QN;

    fn mul(self, rhs: QN) -> QN { rhs * self }
}

impl Div<i32> for QN {
    type Output = Self;

    fn div(mut self, rhs: i32) -> Self {
        self *= rhs;
        self
    }
}

impl std::iter::Sum for QN {
    fn sum<I>(iter: I) -> Self
    where I: Iterator<Item = Self>
    {
        iter.fold(Self::default(), Add::add)
    }
}

impl fmt::Display for QN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:+}:{}:{})",
            self.sz,
            self.nf,
            if self.nfp == 1 { "-" } else { "+" },
        )
    }
}

impl Persist for QN {
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized
    {
        write_i32(w, self.sz)?;
        write_i32(w, self.nf)?;
        write_i32(w, self.nfp)?;
        Ok(())
    }

    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized
    {
        let sz = read_i32(r)?;
        let nf = read_i32(r)?;
        let nfp = read_i32(r)?;
        Ok(Self { sz, nf, nfp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_recomputes_parity() {
        let q = QN::new(1, 3) + QN::new(-1, 1);
        assert_eq!(q, QN::new(0, 4));
        assert_eq!(q.nfp(), 0);
        assert_eq!(q.fp(), 1);
    }

    #[test]
    fn subtraction_and_negation() {
        let a = QN::new(2, 1);
        let b = QN::new(1, 2);
        let d = a - b;
        assert_eq!(d.sz(), 1);
        assert_eq!(d.nf(), -1);
        assert_eq!(d.nfp(), 1);
        assert_eq!(-(-a), a);
        assert_eq!((-a).nfp(), a.nfp());
        assert_eq!(a + (-a), QN::default());
    }

    #[test]
    fn sign_scaling() {
        let q = QN::new(3, -5);
        assert_eq!(q * -1, -q);
        assert_eq!(-1 * q, -q);
        assert_eq!(q / -1, -q);
        assert_eq!(q * 1, q);
    }

    #[test]
    #[should_panic]
    fn scaling_by_two_panics() {
        let _ = QN::new(1, 1) * 2;
    }

    #[test]
    fn parity_only_charge() {
        let q = QN::with_parity(0, 0, 1);
        assert_eq!(q.fp(), -1);
        assert_eq!((q + q).nfp(), 0);
    }

    #[test]
    fn ordering_and_display() {
        assert!(QN::new(0, 1) < QN::new(1, 0));
        assert!(QN::new(1, 0) < QN::new(1, 1));
        assert_eq!(QN::new(1, 3).to_string(), "(+1:3:-)");
    }
}

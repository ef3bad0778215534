//! Grouping several legs into one.
//!
//! A [`Combiner`] holds up to [`NMAX`] "left" legs and, once initialized, a
//! single "right" leg whose dimension is the product of theirs. Applying it to
//! a tensor either fuses the left legs into the right leg or, if the tensor
//! already carries the right leg, splits it back apart. Both directions are
//! pure reshapes.
//!
//! ```
//! use tensor_bond::{ combiner::Combiner, leg::Leg, tensor::Tensor };
//!
//! let (i, j, k) = (Leg::site("i", 2), Leg::site("j", 3), Leg::link("k", 4));
//! let t: Tensor<Leg, f64>
//!     = Tensor::new([i.clone(), j.clone(), k.clone()], |ix| ix[0] as f64 + ix[2] as f64);
//! let comb = Combiner::from_legs([i, j]).unwrap();
//! let grouped = comb.apply(&t).unwrap();
//! assert_eq!(grouped.shape(), vec![6, 4]);
//! let ungrouped = comb.apply(&grouped).unwrap();
//! assert!(ungrouped.approx_eq(&t, 0.0));
//! ```

use std::fmt;
use num_traits::{ One, Zero };
use once_cell::sync::OnceCell;
use thiserror::Error;
use crate::{
    leg::{ Arrow, Category, Leg, LegError },
    symleg::SymLegError,
    tensor::{ Idx, Tensor, TensorError },
};

/// Maximum number of left legs in a combiner.
pub const NMAX: usize = 8;

/// Default name of a combiner's right leg.
pub const DEFAULT_NAME: &str = "combined";

#[derive(Debug, Error)]
pub enum CombinerError {
    /// Returned when adding a left leg to a combiner that already holds
    /// [`NMAX`] of them.
    #[error("error in combiner: already reached max number of left legs ({NMAX})")]
    Capacity,

    /// Returned when adding the null leg as a left leg.
    #[error("error in combiner: cannot combine the null leg")]
    NullLeg,

    /// Returned when initializing a combiner with no left legs.
    #[error("error in combiner: no left legs to combine")]
    NoLegs,

    /// Returned when the right leg is requested before initialization.
    #[error("error in combiner: right leg requested prior to init")]
    NotInit,

    /// Returned when a left-leg position is out of range.
    #[error("error in combiner: no left leg at position {0}")]
    NoSuchLeft(usize),

    /// Right-leg creation errors.
    #[error("leg error: {0}")]
    LegError(#[from] LegError),

    /// Condensed-leg creation errors.
    #[error("symmetry leg error: {0}")]
    SymLegError(#[from] SymLegError),

    /// Errors from the reshape itself.
    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),
}
use CombinerError::*;
pub type CombinerResult<T> = Result<T, CombinerError>;

/// Fuses a group of plain legs into one and back.
#[derive(Clone, Debug, Default)]
pub struct Combiner {
    lefts: Vec<Leg>,
    right: OnceCell<Leg>,
}

impl Combiner {
    /// Create a new, empty combiner.
    pub fn new() -> Self { Self::default() }

    /// Create a new combiner over up to [`NMAX`] left legs.
    pub fn from_legs<I>(legs: I) -> CombinerResult<Self>
    where I: IntoIterator<Item = Leg>
    {
        let mut comb = Self::new();
        legs.into_iter().try_for_each(|leg| comb.add_left(leg))?;
        Ok(comb)
    }

    /// Append a left leg.
    ///
    /// This discards any previously computed right leg.
    pub fn add_left(&mut self, leg: Leg) -> CombinerResult<()> {
        if leg.is_null() { return Err(NullLeg); }
        if self.lefts.len() == NMAX { return Err(Capacity); }
        self.right = OnceCell::new();
        self.lefts.push(leg);
        Ok(())
    }

    /// Compute the right leg, if not already done.
    ///
    /// Plain legs always point outward, so the arrow is accepted only for
    /// symmetry with [`SymCombiner::init`][crate::symcombiner::SymCombiner::init].
    /// Does nothing if the combiner has already been initialized since the
    /// last call to [`Self::add_left`].
    pub fn init(&self, name: &str, category: Category, _arrow: Arrow, prime: i32)
        -> CombinerResult<&Leg>
    {
        self.right.get_or_try_init(|| {
            if self.lefts.is_empty() { return Err(NoLegs); }
            let dim: usize = self.lefts.iter().map(Leg::dim).product();
            Ok(Leg::with_prime(name, dim, category, prime)?)
        })
    }

    /// Initialize with a link-category right leg named [`DEFAULT_NAME`].
    pub fn init_default(&self) -> CombinerResult<&Leg> {
        self.init(DEFAULT_NAME, Category::Link, Arrow::Out, 0)
    }

    /// Return `true` if the right leg has been computed.
    pub fn is_init(&self) -> bool { self.right.get().is_some() }

    /// Return the right leg.
    pub fn right(&self) -> CombinerResult<&Leg> { self.right.get().ok_or(NotInit) }

    /// Return the `j`-th left leg (1-based).
    pub fn left(&self, j: usize) -> CombinerResult<&Leg> {
        j.checked_sub(1)
            .and_then(|k| self.lefts.get(k))
            .ok_or(NoSuchLeft(j))
    }

    /// Return all left legs.
    pub fn lefts(&self) -> &[Leg] { &self.lefts }

    /// Return the number of left legs.
    pub fn rl(&self) -> usize { self.lefts.len() }

    /// Return the 1-based position of a left leg.
    pub fn find_index(&self, leg: &Leg) -> Option<usize> {
        self.lefts.iter().position(|l| l == leg).map(|k| k + 1)
    }

    /// Return `true` if `leg` is one of the left legs.
    pub fn has_leg(&self, leg: &Leg) -> bool { self.lefts.contains(leg) }

    /// Remove all left legs and the right leg.
    pub fn reset(&mut self) {
        self.lefts.clear();
        self.right = OnceCell::new();
    }

    /// Conjugation of a plain combiner only ensures it is initialized.
    pub fn conj(&self) -> CombinerResult<()> {
        self.init_default().map(|_| ())
    }

    /// Group or ungroup `t`.
    ///
    /// If `t` carries the right leg, it is split into the left legs in its
    /// place; otherwise the left legs are fused into the right leg at the
    /// position of the earliest one. An uninitialized combiner is initialized
    /// with [`Self::init_default`] first.
    pub fn apply<A>(&self, t: &Tensor<Leg, A>) -> CombinerResult<Tensor<Leg, A>>
    where A: Clone + Zero
    {
        let right = self.init_default()?;
        if t.has_index(right) {
            Ok(t.split_leg(right, &self.lefts)?)
        } else {
            Ok(t.fuse_legs(&self.lefts, right.clone())?)
        }
    }

    /// Return the combiner as a tensor over the left legs and the right leg,
    /// equal to one where the right value is the flattened left values.
    pub fn to_tensor<A>(&self) -> CombinerResult<Tensor<Leg, A>>
    where A: Clone + Zero + One
    {
        let right = self.init_default()?.clone();
        let dims: Vec<usize> = self.lefts.iter().map(Leg::dim).collect();
        let legs = self.lefts.iter().cloned().chain([right]);
        Ok(Tensor::new(legs, |ix| {
            let Some((r, lefts)) = ix.split_last() else { return A::zero(); };
            let flat = lefts.iter().zip(&dims).fold(0_usize, |acc, (i, d)| acc * d + i);
            if flat == *r { A::one() } else { A::zero() }
        }))
    }
}

impl fmt::Display for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.right.get() {
            Some(r) => writeln!(f, "Right leg: {r}")?,
            None => writeln!(f, "Right leg not initialized")?,
        }
        writeln!(f, "Left legs:")?;
        for l in self.lefts.iter() {
            writeln!(f, " {} ({})", l, l.label())?;
        }
        Ok(())
    }
}

//! Dense tensors over arbitrary leg types.
//!
//! A [`Tensor<T, A>`] holds an array of elements of type `A` together with one
//! leg of type `T: `[`Idx`] per array axis. Contraction pairs up all legs that
//! compare equal between two tensors, so priming a leg (see
//! [`Tensor::prime_leg`]) is the way to keep two copies of the same leg apart.
//!
//! The contraction kernel itself, [`contract_arrays`], is shared with
//! [`BlockTensor`][crate::block::BlockTensor], which applies it sector by
//! sector.

use std::{
    fmt,
    ops::Range,
};
use itertools::Itertools;
use ndarray::{ self as nd, Dimension };
use ndarray_linalg::types::Scalar;
use num_traits::{ One, Zero };
use thiserror::Error;
use crate::{
    Elem,
    leg::{ Leg, PrimeFilter },
    real_f64,
};

#[derive(Debug, Error)]
pub enum TensorError {
    /// Returned when the number of supplied elements doesn't match the shape
    /// implied by the legs.
    #[error("error in tensor creation: expected {expected} elements, got {got}")]
    ElemCount { expected: usize, got: usize },

    /// Returned when the same leg would appear twice on one tensor.
    #[error("error in tensor operation: repeated leg {0}")]
    DuplicateLeg(String),

    /// Returned when a requested leg isn't held by the tensor.
    #[error("error in tensor operation: missing leg {0}")]
    MissingLeg(String),

    /// Returned when a leg substitution would change the number of elements.
    #[error("error in tensor operation: leg {0} should have dimension {1}, got {2}")]
    DimMismatch(String, usize, usize),

    /// Returned when permuting to a set of legs different from the tensor's
    /// own.
    #[error("error in tensor operation: leg sets differ")]
    LegSetMismatch,

    /// Returned when a block's shape doesn't match the sectors it is filed
    /// under.
    #[error("error in block insertion: shape {0:?} doesn't match sector dimensions {1:?}")]
    BlockShape(Vec<usize>, Vec<usize>),

    /// Returned when a block key has the wrong length or names a sector that
    /// doesn't exist.
    #[error("error in block insertion: invalid sector key {0:?}")]
    BlockKey(Vec<usize>),

    /// Array reshaping errors.
    #[error("array shape error: {0}")]
    ShapeError(#[from] nd::ShapeError),
}
use TensorError::*;
pub type TensorResult<T> = Result<T, TensorError>;

/// Describes a tensor leg.
///
/// Implemented by [`Leg`] and [`SymmetryLeg`][crate::symleg::SymmetryLeg],
/// whose identities are created at runtime, and by [`DynIdx`], a plain
/// `(label, dimension)` pair useful for quick experiments. Legs are matched
/// for contraction by `==`.
pub trait Idx: Clone + Eq {
    /// Return the number of values the leg can take.
    fn dim(&self) -> usize;

    /// Return an identifying label for the leg. This method is used only for
    /// printing purposes.
    fn label(&self) -> String;

    /// Return an iterator over all possible leg values. The default
    /// implementation returns `0..self.dim()`.
    fn iter(&self) -> Range<usize> { 0..self.dim() }
}

/// A dynamically dimensioned tensor leg type, identified by its label and
/// dimension.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DynIdx(
    /// Identifier label.
    pub String,
    /// Leg dimension.
    pub usize,
);

impl Idx for DynIdx {
    fn dim(&self) -> usize { self.1 }

    fn label(&self) -> String { self.0.clone() }
}

/// Contract two arrays over paired axes.
///
/// Axis `ax_a[k]` of `a` is summed against axis `ax_b[k]` of `b`. The result
/// carries the remaining axes of `a` in order, followed by the remaining axes
/// of `b` in order. With no paired axes this is the outer product.
///
/// *Panics if paired axes have different lengths.*
pub fn contract_arrays<A>(
    a: &nd::ArrayD<A>,
    ax_a: &[usize],
    b: &nd::ArrayD<A>,
    ax_b: &[usize],
) -> TensorResult<nd::ArrayD<A>>
where A: nd::LinalgScalar
{
    let free_a: Vec<usize> = (0..a.ndim()).filter(|k| !ax_a.contains(k)).collect();
    let free_b: Vec<usize> = (0..b.ndim()).filter(|k| !ax_b.contains(k)).collect();
    let m: usize = free_a.iter().map(|k| a.shape()[*k]).product();
    let s: usize = ax_a.iter().map(|k| a.shape()[*k]).product();
    let n: usize = free_b.iter().map(|k| b.shape()[*k]).product();

    // move summed axes to the inside of the matrix product
    let perm_a: Vec<usize> = free_a.iter().chain(ax_a).copied().collect();
    let perm_b: Vec<usize> = ax_b.iter().chain(free_b.iter()).copied().collect();
    let mat_a: nd::Array2<A>
        = a.view()
        .permuted_axes(perm_a)
        .as_standard_layout()
        .into_owned()
        .into_shape((m, s))?;
    let mat_b: nd::Array2<A>
        = b.view()
        .permuted_axes(perm_b)
        .as_standard_layout()
        .into_owned()
        .into_shape((s, n))?;
    let shape: Vec<usize>
        = free_a.iter().map(|k| a.shape()[*k])
        .chain(free_b.iter().map(|k| b.shape()[*k]))
        .collect();
    Ok(mat_a.dot(&mat_b).into_shape(shape)?)
}

fn find_duplicate<T: Idx>(legs: &[T]) -> Option<&T> {
    legs.iter().enumerate()
        .find_map(|(k, l)| legs[k + 1..].contains(l).then_some(l))
}

/// Basic dense tensor.
///
/// A `Tensor<T, A>` consists of some number of quantities of type `A` and a
/// series of legs belonging to a type `T` that implements [`Idx`]. Rank 0
/// (scalar) and rank > 0 (array) quantities are stored separately.
#[derive(Clone, PartialEq, Eq)]
pub struct Tensor<T, A>(TensorData<T, A>);

impl<T, A> fmt::Debug for Tensor<T, A>
where
    T: fmt::Debug,
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(")?;
        match &self.0 {
            TensorData::Scalar(a) => {
                fmt::Debug::fmt(a, f)?;
                write!(f, ", rank=0, legs=[]")?;
            },
            TensorData::Tensor(legs, a) => {
                writeln!(f)?;
                fmt::Debug::fmt(a, f)?;
                write!(f, ",\nrank={}, legs={:?}", legs.len(), legs)?;
                writeln!(f)?;
            },
        }
        write!(f, ")")
    }
}

impl<T, A> fmt::Display for Tensor<T, A>
where
    T: Idx,
    A: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            TensorData::Scalar(a) => {
                fmt::Display::fmt(a, f)?;
                write!(f, " {{ }}")?;
            },
            TensorData::Tensor(legs, a) => {
                fmt::Display::fmt(a, f)?;
                let labels = legs.iter().map(|leg| leg.label()).join(", ");
                write!(f, " {{ {labels} }}")?;
            },
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq)]
enum TensorData<T, A> {
    Scalar(A),
    Tensor(Vec<T>, nd::ArrayD<A>),
}

impl<T, A> From<TensorData<T, A>> for Tensor<T, A> {
    fn from(data: TensorData<T, A>) -> Self { Self(data) }
}

/// Iterator type over the legs of a given [`Tensor`].
///
/// The iterator item type is `&T`.
pub struct Legs<'a, T>(LegsData<'a, T>);

enum LegsData<'a, T> {
    Scalar,
    Tensor(std::slice::Iter<'a, T>),
}

impl<'a, T> Iterator for Legs<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.0 {
            LegsData::Scalar => None,
            LegsData::Tensor(iter) => iter.next(),
        }
    }
}

impl<T, A> Tensor<T, A>
where T: Idx
{
    /// Create a new tensor using a function over given legs.
    ///
    /// The function receives 0-based values for every leg, in order.
    pub fn new<I, F>(legs: I, mut elems: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&[usize]) -> A,
    {
        let legs: Vec<T> = legs.into_iter().collect();
        if legs.is_empty() {
            TensorData::Scalar(elems(&[])).into()
        } else {
            let shape: Vec<usize> = legs.iter().map(|leg| leg.dim()).collect();
            let data: nd::ArrayD<A>
                = nd::ArrayD::from_shape_fn(shape, |idx| elems(idx.slice()));
            TensorData::Tensor(legs, data).into()
        }
    }

    /// Create a new tensor from elements listed in row-major order (the last
    /// leg varies fastest).
    pub fn from_elems<I>(legs: I, elems: Vec<A>) -> TensorResult<Self>
    where I: IntoIterator<Item = T>
    {
        let legs: Vec<T> = legs.into_iter().collect();
        if let Some(dup) = find_duplicate(&legs) {
            return Err(DuplicateLeg(dup.label()));
        }
        let shape: Vec<usize> = legs.iter().map(|leg| leg.dim()).collect();
        let expected: usize = shape.iter().product();
        if elems.len() != expected {
            return Err(ElemCount { expected, got: elems.len() });
        }
        if legs.is_empty() {
            let mut elems = elems;
            return elems.pop()
                .map(|a| TensorData::Scalar(a).into())
                .ok_or(ElemCount { expected, got: 0 });
        }
        let data = nd::ArrayD::from_shape_vec(shape, elems)?;
        Ok(TensorData::Tensor(legs, data).into())
    }

    /// Create a new rank-0 (scalar) tensor.
    pub fn new_scalar(val: A) -> Self { TensorData::Scalar(val).into() }

    /// Return `true` if `self` has rank 0.
    pub fn is_scalar(&self) -> bool { matches!(self.0, TensorData::Scalar(_)) }

    /// Return `true` if `self` has the given leg.
    pub fn has_index(&self, leg: &T) -> bool { self.position(leg).is_some() }

    /// Return the position of a leg.
    pub fn position(&self, leg: &T) -> Option<usize> {
        match &self.0 {
            TensorData::Scalar(_) => None,
            TensorData::Tensor(legs, _) => legs.iter().position(|l| l == leg),
        }
    }

    /// Return the rank of `self`.
    pub fn rank(&self) -> usize {
        match &self.0 {
            TensorData::Scalar(_) => 0,
            TensorData::Tensor(legs, _) => legs.len(),
        }
    }

    /// Return the shape (dimensions of each leg) of `self` in a vector.
    ///
    /// If `self` is a scalar, the returned vector is empty.
    pub fn shape(&self) -> Vec<usize> {
        match &self.0 {
            TensorData::Scalar(_) => Vec::new(),
            TensorData::Tensor(legs, _)
                => legs.iter().map(|leg| leg.dim()).collect(),
        }
    }

    /// Return the total number of stored elements.
    pub fn len(&self) -> usize {
        match &self.0 {
            TensorData::Scalar(_) => 1,
            TensorData::Tensor(_, data) => data.len(),
        }
    }

    /// Return `true` if `self` stores no elements.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Return an iterator over all legs.
    ///
    /// If `self` is a scalar, the iterator is empty.
    pub fn legs(&self) -> Legs<'_, T> {
        match &self.0 {
            TensorData::Scalar(_) => Legs(LegsData::Scalar),
            TensorData::Tensor(legs, _) => Legs(LegsData::Tensor(legs.iter())),
        }
    }

    fn legs_mut(&mut self) -> &mut [T] {
        match &mut self.0 {
            TensorData::Scalar(_) => &mut [],
            TensorData::Tensor(legs, _) => legs.as_mut_slice(),
        }
    }

    /// Return a reference to the element at the given 0-based leg values,
    /// listed in the order of [`Self::legs`].
    pub fn get(&self, idx: &[usize]) -> Option<&A> {
        match &self.0 {
            TensorData::Scalar(a) => idx.is_empty().then_some(a),
            TensorData::Tensor(_, data) => data.get(idx),
        }
    }

    /// Replace every leg with the output of `f`.
    ///
    /// Fails if any replacement changes a leg's dimension.
    pub fn map_legs<F>(self, mut f: F) -> TensorResult<Self>
    where F: FnMut(T) -> T
    {
        match self.0 {
            TensorData::Scalar(a) => Ok(TensorData::Scalar(a).into()),
            TensorData::Tensor(legs, data) => {
                let new_legs: Vec<T>
                    = legs.into_iter()
                    .map(|leg| {
                        let dim = leg.dim();
                        let new = f(leg);
                        if new.dim() == dim {
                            Ok(new)
                        } else {
                            Err(DimMismatch(new.label(), dim, new.dim()))
                        }
                    })
                    .collect::<TensorResult<_>>()?;
                Ok(TensorData::Tensor(new_legs, data).into())
            },
        }
    }
}

impl<T, A> Tensor<T, A>
where
    T: Idx,
    A: Clone + Zero,
{
    /// Create a new tensor of zeros.
    pub fn zeros<I>(legs: I) -> Self
    where I: IntoIterator<Item = T>
    {
        Self::new(legs, |_| A::zero())
    }

    fn from_parts(legs: Vec<T>, data: nd::ArrayD<A>) -> Self {
        if legs.is_empty() {
            let a: A = data.into_iter().next().unwrap_or_else(A::zero);
            TensorData::Scalar(a).into()
        } else {
            TensorData::Tensor(legs, data).into()
        }
    }

    /// Decompose `self` into its legs and a plain array.
    ///
    /// Scalars give no legs and a 0-dimensional array.
    pub fn into_flat(self) -> (Vec<T>, nd::ArrayD<A>) {
        match self.0 {
            TensorData::Scalar(a) => (Vec::new(), nd::arr0(a).into_dyn()),
            TensorData::Tensor(legs, data) => (legs, data),
        }
    }

    /// Return a copy of `self` with its legs rearranged into the given order.
    pub fn permuted_to(&self, order: &[T]) -> TensorResult<Self> {
        match &self.0 {
            TensorData::Scalar(_) if order.is_empty() => Ok(self.clone()),
            TensorData::Scalar(_) => Err(LegSetMismatch),
            TensorData::Tensor(legs, data) => {
                if order.len() != legs.len() { return Err(LegSetMismatch); }
                let perm: Vec<usize>
                    = order.iter()
                    .map(|leg| legs.iter().position(|l| l == leg).ok_or(LegSetMismatch))
                    .collect::<TensorResult<_>>()?;
                if !perm.iter().all_unique() { return Err(LegSetMismatch); }
                let data: nd::ArrayD<A>
                    = data.view()
                    .permuted_axes(perm)
                    .as_standard_layout()
                    .into_owned();
                Ok(TensorData::Tensor(order.to_vec(), data).into())
            },
        }
    }

    /// Merge the legs in `group` into the single leg `fused`.
    ///
    /// The fused leg takes the place of the earliest member of `group`; the
    /// fused value is the row-major flattening of the group's values, with the
    /// first member of `group` varying slowest.
    pub fn fuse_legs(&self, group: &[T], fused: T) -> TensorResult<Self> {
        let dim: usize = group.iter().map(Idx::dim).product();
        if dim != fused.dim() {
            return Err(DimMismatch(fused.label(), dim, fused.dim()));
        }
        if let Some(dup) = find_duplicate(group) {
            return Err(DuplicateLeg(dup.label()));
        }
        let (legs, data) = match &self.0 {
            TensorData::Tensor(legs, data) => (legs, data),
            TensorData::Scalar(_) if group.is_empty() => {
                return Ok(self.clone().into_array_with(fused));
            },
            TensorData::Scalar(_) => {
                return Err(MissingLeg(group[0].label()));
            },
        };
        let pos: Vec<usize>
            = group.iter()
            .map(|g| legs.iter().position(|l| l == g).ok_or_else(|| MissingLeg(g.label())))
            .collect::<TensorResult<_>>()?;
        if legs.contains(&fused) { return Err(DuplicateLeg(fused.label())); }
        let first: usize = pos.iter().copied().min().unwrap_or(0);
        let rest: Vec<usize> = (0..legs.len()).filter(|k| !pos.contains(k)).collect();
        let ins: usize = rest.iter().filter(|k| **k < first).count();
        let perm: Vec<usize>
            = rest[..ins].iter()
            .chain(pos.iter())
            .chain(rest[ins..].iter())
            .copied()
            .collect();
        let mut shape: Vec<usize> = rest.iter().map(|k| legs[*k].dim()).collect();
        shape.insert(ins, dim);
        let mut new_legs: Vec<T> = rest.iter().map(|k| legs[*k].clone()).collect();
        new_legs.insert(ins, fused);
        let data: nd::ArrayD<A>
            = data.view()
            .permuted_axes(perm)
            .as_standard_layout()
            .into_owned()
            .into_shape(shape)?;
        Ok(Self::from_parts(new_legs, data))
    }

    /// Split the leg `fused` into the legs in `group`, inserted in its place.
    ///
    /// This is the inverse of [`Self::fuse_legs`].
    pub fn split_leg(&self, fused: &T, group: &[T]) -> TensorResult<Self> {
        let dim: usize = group.iter().map(Idx::dim).product();
        if dim != fused.dim() {
            return Err(DimMismatch(fused.label(), fused.dim(), dim));
        }
        let k = self.position(fused).ok_or_else(|| MissingLeg(fused.label()))?;
        let (legs, data) = self.clone().into_flat();
        let mut new_legs: Vec<T> = legs;
        new_legs.splice(k..k + 1, group.iter().cloned());
        if let Some(dup) = find_duplicate(&new_legs) {
            return Err(DuplicateLeg(dup.label()));
        }
        let shape: Vec<usize> = new_legs.iter().map(Idx::dim).collect();
        let data: nd::ArrayD<A>
            = data.as_standard_layout()
            .into_owned()
            .into_shape(shape)?;
        Ok(Self::from_parts(new_legs, data))
    }

    // a scalar promoted to a rank-1 tensor over a dimension-1 leg
    fn into_array_with(self, leg: T) -> Self {
        let (_, data) = self.into_flat();
        let data = data.into_shape(vec![1]).unwrap_or_else(|_| nd::ArrayD::zeros(vec![1]));
        TensorData::Tensor(vec![leg], data).into()
    }
}

impl<T, A> Tensor<T, A>
where
    T: Idx,
    A: Clone + Zero + One,
{
    /// Create the identity map between two legs of equal dimension.
    pub fn delta(a: T, b: T) -> TensorResult<Self> {
        if a.dim() != b.dim() {
            return Err(DimMismatch(b.label(), a.dim(), b.dim()));
        }
        if a == b { return Err(DuplicateLeg(a.label())); }
        Ok(Self::new([a, b], |ix| if ix[0] == ix[1] { A::one() } else { A::zero() }))
    }
}

impl<T, A> Tensor<T, A>
where
    T: Idx,
    A: nd::LinalgScalar,
{
    /// Contract `self` with `other` over all common legs.
    ///
    /// The result carries the remaining legs of `self` in order, followed by
    /// the remaining legs of `other` in order. Tensors with no legs in common
    /// give their outer product.
    pub fn contract(&self, other: &Self) -> TensorResult<Self> {
        match (&self.0, &other.0) {
            (TensorData::Scalar(a), TensorData::Scalar(b)) => {
                Ok(TensorData::Scalar(*a * *b).into())
            },
            (TensorData::Scalar(a), TensorData::Tensor(legs, b)) => {
                Ok(TensorData::Tensor(legs.clone(), b.mapv(|bk| *a * bk)).into())
            },
            (TensorData::Tensor(legs, a), TensorData::Scalar(b)) => {
                Ok(TensorData::Tensor(legs.clone(), a.mapv(|ak| ak * *b)).into())
            },
            (TensorData::Tensor(legs_a, a), TensorData::Tensor(legs_b, b)) => {
                let (ax_a, ax_b): (Vec<usize>, Vec<usize>)
                    = legs_a.iter().enumerate()
                    .filter_map(|(k, leg)| {
                        legs_b.iter().position(|l| l == leg).map(|j| (k, j))
                    })
                    .unzip();
                let data = contract_arrays(a, &ax_a, b, &ax_b)?;
                let legs: Vec<T>
                    = legs_a.iter().enumerate()
                    .filter(|(k, _)| !ax_a.contains(k))
                    .chain(legs_b.iter().enumerate().filter(|(k, _)| !ax_b.contains(k)))
                    .map(|(_, leg)| leg.clone())
                    .collect();
                Ok(Self::from_parts(legs, data))
            },
        }
    }

    /// Multiply every element by `a`.
    pub fn scale(&mut self, a: A) {
        match &mut self.0 {
            TensorData::Scalar(x) => { *x = *x * a; },
            TensorData::Tensor(_, data) => { data.mapv_inplace(|x| x * a); },
        }
    }
}

impl<T, A> Tensor<T, A>
where
    T: Idx,
    A: Elem,
{
    /// Return a new tensor containing the element-wise conjugation of `self`.
    pub fn conj(&self) -> Self {
        match &self.0 {
            TensorData::Scalar(z) => TensorData::Scalar(z.conj()).into(),
            TensorData::Tensor(legs, z) => {
                TensorData::Tensor(legs.clone(), z.mapv(|zk| zk.conj())).into()
            },
        }
    }

    /// Return the Frobenius norm.
    pub fn norm(&self) -> f64 {
        let sq: f64 = match &self.0 {
            TensorData::Scalar(z) => real_f64(z.square()),
            TensorData::Tensor(_, z) => z.iter().map(|zk| real_f64(zk.square())).sum(),
        };
        sq.sqrt()
    }

    /// Return `true` if `self` and `other` carry the same legs (in any order)
    /// and all corresponding elements differ by at most `tol` in magnitude.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        let order: Vec<T> = self.legs().cloned().collect();
        let Ok(other) = other.permuted_to(&order) else { return false; };
        match (&self.0, &other.0) {
            (TensorData::Scalar(a), TensorData::Scalar(b)) => {
                real_f64(Scalar::abs(*a - *b)) <= tol
            },
            (TensorData::Tensor(_, a), TensorData::Tensor(_, b)) => {
                a.iter().zip(b.iter())
                    .all(|(ak, bk)| real_f64(Scalar::abs(*ak - *bk)) <= tol)
            },
            _ => false,
        }
    }
}

impl<A> Tensor<Leg, A> {
    /// Raise the prime level of the leg equal to `leg` by `inc`.
    pub fn prime_leg(&mut self, leg: &Leg, inc: i32) {
        self.legs_mut().iter_mut()
            .filter(|l| *l == leg)
            .for_each(|l| l.prime(PrimeFilter::Both, inc));
    }

    /// Raise the prime level of every leg admitted by `filter` by `inc`.
    pub fn prime(&mut self, filter: PrimeFilter, inc: i32) {
        self.legs_mut().iter_mut().for_each(|l| l.prime(filter, inc));
    }

    /// Reset the prime level of every leg admitted by `filter`.
    pub fn noprime(&mut self, filter: PrimeFilter) {
        self.legs_mut().iter_mut().for_each(|l| l.noprime(filter));
    }

    /// Move prime level `old` to `new` on every leg admitted by `filter`.
    pub fn map_prime(&mut self, old: i32, new: i32, filter: PrimeFilter) {
        self.legs_mut().iter_mut().for_each(|l| l.map_prime(old, new, filter));
    }
}

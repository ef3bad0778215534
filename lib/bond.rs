//! Capabilities a tensor type needs in order to be factorized across a bond.
//!
//! [`SvdWorker::decompose`][crate::worker::SvdWorker::decompose] is written
//! once against [`BondTensor`], which is implemented both for dense
//! [`Tensor<Leg, A>`] and for block-sparse [`BlockTensor<A>`].

use std::fmt;
use num_traits::Zero;
use crate::{
    Elem,
    block::BlockTensor,
    combiner::{ Combiner, CombinerResult },
    denmat::{ self, Diagonalized, TruncParams },
    leg::{ Arrow, Category, Leg },
    symcombiner::SymCombiner,
    symleg::SymmetryLeg,
    tensor::{ Tensor, TensorResult },
    worker::WorkerResult,
};

/// A leg type that can sit on a bond.
pub trait BondLeg: Clone + Eq + fmt::Debug {
    /// Return the dimension.
    fn dim(&self) -> usize;

    /// Return the category.
    fn category(&self) -> Category;

    /// Return the name, without primes.
    fn raw_name(&self) -> &str;

    /// Return `true` for real/imaginary marker legs.
    fn is_reim(&self) -> bool;

    /// Return the orientation.
    fn arrow(&self) -> Arrow;

    /// Create a fresh one-dimensional link leg, used when two factors do not
    /// yet share a bond.
    fn placeholder(name: &str) -> Self;
}

impl BondLeg for Leg {
    fn dim(&self) -> usize { Leg::dim(self) }

    fn category(&self) -> Category { Leg::category(self) }

    fn raw_name(&self) -> &str { Leg::raw_name(self) }

    fn is_reim(&self) -> bool { Leg::is_reim(self) }

    fn arrow(&self) -> Arrow { Leg::arrow(self) }

    fn placeholder(name: &str) -> Self { Leg::link(name, 1) }
}

impl BondLeg for SymmetryLeg {
    fn dim(&self) -> usize { SymmetryLeg::dim(self) }

    fn category(&self) -> Category { SymmetryLeg::category(self) }

    fn raw_name(&self) -> &str { SymmetryLeg::raw_name(self) }

    fn is_reim(&self) -> bool { SymmetryLeg::is_reim(self) }

    fn arrow(&self) -> Arrow { SymmetryLeg::arrow(self) }

    fn placeholder(name: &str) -> Self {
        SymmetryLeg::from_leg(Leg::link(name, 1), Arrow::Out)
    }
}

/// A combiner acting on tensors of type `Tn`.
pub trait Grouping<Tn>: Default {
    /// Leg type grouped by the combiner.
    type Leg;

    /// Append a left leg.
    fn add_left(&mut self, leg: Self::Leg) -> CombinerResult<()>;

    /// Compute the right leg if needed, and return it.
    fn init(&self, name: &str, category: Category, arrow: Arrow, prime: i32)
        -> CombinerResult<Self::Leg>;

    /// Group or ungroup a tensor.
    fn apply(&self, t: &Tn) -> CombinerResult<Tn>;

    /// Return the combiner in tensor form.
    fn to_tensor(&self) -> CombinerResult<Tn>;
}

impl<A> Grouping<Tensor<Leg, A>> for Combiner
where A: Elem
{
    type Leg = Leg;

    fn add_left(&mut self, leg: Leg) -> CombinerResult<()> {
        Combiner::add_left(self, leg)
    }

    fn init(&self, name: &str, category: Category, arrow: Arrow, prime: i32)
        -> CombinerResult<Leg>
    {
        Combiner::init(self, name, category, arrow, prime).cloned()
    }

    fn apply(&self, t: &Tensor<Leg, A>) -> CombinerResult<Tensor<Leg, A>> {
        Combiner::apply(self, t)
    }

    fn to_tensor(&self) -> CombinerResult<Tensor<Leg, A>> {
        Combiner::to_tensor(self)
    }
}

impl<A> Grouping<BlockTensor<A>> for SymCombiner
where A: Elem
{
    type Leg = SymmetryLeg;

    fn add_left(&mut self, leg: SymmetryLeg) -> CombinerResult<()> {
        SymCombiner::add_left(self, leg)
    }

    fn init(&self, name: &str, category: Category, arrow: Arrow, prime: i32)
        -> CombinerResult<SymmetryLeg>
    {
        SymCombiner::init(self, name, category, arrow, prime).cloned()
    }

    fn apply(&self, t: &BlockTensor<A>) -> CombinerResult<BlockTensor<A>> {
        SymCombiner::apply(self, t)
    }

    fn to_tensor(&self) -> CombinerResult<BlockTensor<A>> {
        SymCombiner::to_tensor(self)
    }
}

/// A tensor type that can be factorized across a bond.
pub trait BondTensor: Clone {
    /// Leg type.
    type Leg: BondLeg;

    /// Matching combiner type.
    type Combiner: Grouping<Self, Leg = Self::Leg>;

    /// Return a list of all legs, in order.
    fn leg_list(&self) -> Vec<Self::Leg>;

    /// Return `true` if `self` has `leg`.
    fn has_leg(&self, leg: &Self::Leg) -> bool;

    /// Return `true` if `self` stores no elements at all.
    fn is_void(&self) -> bool;

    /// Set every element to zero.
    fn zero_out(&mut self);

    /// Contract over all common legs.
    fn contract(&self, other: &Self) -> TensorResult<Self>;

    /// Conjugate elements (and leg orientations, where present).
    fn conj(&self) -> Self;

    /// Raise the prime level of one leg.
    fn prime_leg(&mut self, leg: &Self::Leg, inc: i32);

    /// Diagonalize `self` as a density matrix over `active` and `active'`.
    fn diag_denmat(&self, active: &Self::Leg, params: &TruncParams)
        -> WorkerResult<Diagonalized<Self>>;
}

impl<A> BondTensor for Tensor<Leg, A>
where A: Elem
{
    type Leg = Leg;
    type Combiner = Combiner;

    fn leg_list(&self) -> Vec<Leg> { self.legs().cloned().collect() }

    fn has_leg(&self, leg: &Leg) -> bool { self.has_index(leg) }

    fn is_void(&self) -> bool { self.is_empty() }

    fn zero_out(&mut self) { self.scale(A::zero()); }

    fn contract(&self, other: &Self) -> TensorResult<Self> {
        Tensor::contract(self, other)
    }

    fn conj(&self) -> Self { Tensor::conj(self) }

    fn prime_leg(&mut self, leg: &Leg, inc: i32) {
        Tensor::prime_leg(self, leg, inc)
    }

    fn diag_denmat(&self, active: &Leg, params: &TruncParams)
        -> WorkerResult<Diagonalized<Self>>
    {
        denmat::diag_dense(self, active, params)
    }
}

impl<A> BondTensor for BlockTensor<A>
where A: Elem
{
    type Leg = SymmetryLeg;
    type Combiner = SymCombiner;

    fn leg_list(&self) -> Vec<SymmetryLeg> { self.legs().to_vec() }

    fn has_leg(&self, leg: &SymmetryLeg) -> bool { self.has_index(leg) }

    fn is_void(&self) -> bool { self.is_empty() }

    fn zero_out(&mut self) { self.scale(A::zero()); }

    fn contract(&self, other: &Self) -> TensorResult<Self> {
        BlockTensor::contract(self, other)
    }

    fn conj(&self) -> Self { BlockTensor::conj(self) }

    fn prime_leg(&mut self, leg: &SymmetryLeg, inc: i32) {
        BlockTensor::prime_leg(self, leg, inc)
    }

    fn diag_denmat(&self, active: &SymmetryLeg, params: &TruncParams)
        -> WorkerResult<Diagonalized<Self>>
    {
        denmat::diag_blocks(self, active, params)
    }
}

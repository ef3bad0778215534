//! Block-sparse tensors over [`SymmetryLeg`]s.
//!
//! Only blocks in which every leg sits in one of its charge sectors are stored,
//! keyed by the list of sector positions (one per leg). Contraction multiplies
//! blocks whose keys agree on the contracted legs, so charge sectors never mix.

use std::fmt;
use ndarray as nd;
use ndarray_linalg::types::Scalar;
use num_traits::Zero;
use rustc_hash::FxHashMap;
use crate::{
    Elem,
    leg::{ Leg, PrimeFilter },
    qn::QN,
    real_f64,
    symleg::SymmetryLeg,
    tensor::{ Tensor, TensorError, TensorResult, contract_arrays },
};

/// A tensor over symmetry legs, storing only charge-sector blocks.
#[derive(Clone)]
pub struct BlockTensor<A> {
    legs: Vec<SymmetryLeg>,
    blocks: FxHashMap<Vec<usize>, nd::ArrayD<A>>,
}

impl<A> fmt::Debug for BlockTensor<A>
where A: fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BlockTensor(legs={:?},", self.legs)?;
        let mut keys: Vec<&Vec<usize>> = self.blocks.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(f, "  {:?} => {:?}", key, self.blocks[key])?;
        }
        write!(f, ")")
    }
}

impl<A> BlockTensor<A> {
    /// Create a new tensor with no stored blocks.
    pub fn new<I>(legs: I) -> Self
    where I: IntoIterator<Item = SymmetryLeg>
    {
        Self { legs: legs.into_iter().collect(), blocks: FxHashMap::default() }
    }

    /// Return the rank of `self`.
    pub fn rank(&self) -> usize { self.legs.len() }

    /// Return the legs of `self`.
    pub fn legs(&self) -> &[SymmetryLeg] { &self.legs }

    /// Return `true` if `self` has the given leg.
    pub fn has_index(&self, leg: &SymmetryLeg) -> bool { self.legs.contains(leg) }

    /// Return the position of a leg.
    pub fn position(&self, leg: &SymmetryLeg) -> Option<usize> {
        self.legs.iter().position(|l| l == leg)
    }

    /// Return the number of stored blocks.
    pub fn num_blocks(&self) -> usize { self.blocks.len() }

    /// Return `true` if no blocks are stored.
    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

    /// Return the block stored under a sector key, if any.
    pub fn block(&self, key: &[usize]) -> Option<&nd::ArrayD<A>> {
        self.blocks.get(key)
    }

    /// Return an iterator over all stored blocks and their sector keys.
    ///
    /// The iteration order is unspecified.
    pub fn blocks(&self) -> impl Iterator<Item = (&[usize], &nd::ArrayD<A>)> + '_ {
        self.blocks.iter().map(|(key, data)| (key.as_slice(), data))
    }

    /// Return the total charge `Σ arrow · qn` of the sectors named by `key`.
    pub fn flux_of(&self, key: &[usize]) -> QN {
        self.legs.iter().zip(key)
            .filter_map(|(leg, k)| {
                leg.block_qn(*k).ok().map(|q| q * leg.arrow().sign())
            })
            .sum()
    }

    /// Return the charge of an arbitrary stored block, if any.
    pub fn flux(&self) -> Option<QN> {
        self.blocks.keys().next().map(|key| self.flux_of(key))
    }

    /// Return the sector dimensions named by `key`.
    pub fn block_shape(&self, key: &[usize]) -> TensorResult<Vec<usize>> {
        if key.len() != self.legs.len() {
            return Err(TensorError::BlockKey(key.to_vec()));
        }
        self.legs.iter().zip(key)
            .map(|(leg, k)| {
                leg.block_dim(*k).map_err(|_| TensorError::BlockKey(key.to_vec()))
            })
            .collect()
    }

    /// Store a block, replacing any existing block under the same key.
    ///
    /// Fails if the key doesn't name a sector of every leg or the block's
    /// shape doesn't match the sector dimensions.
    pub fn insert_block(&mut self, key: &[usize], data: nd::ArrayD<A>)
        -> TensorResult<()>
    {
        let shape = self.block_shape(key)?;
        if data.shape() != shape.as_slice() {
            return Err(TensorError::BlockShape(data.shape().to_vec(), shape));
        }
        self.blocks.insert(key.to_vec(), data);
        Ok(())
    }

    fn legs_mut(&mut self) -> impl Iterator<Item = &mut SymmetryLeg> + '_ {
        self.legs.iter_mut()
    }

    /// Raise the prime level of the leg equal to `leg` by `inc`.
    pub fn prime_leg(&mut self, leg: &SymmetryLeg, inc: i32) {
        self.legs_mut()
            .filter(|l| *l == leg)
            .for_each(|l| l.prime(PrimeFilter::Both, inc));
    }

    /// Raise the prime level of every leg admitted by `filter` by `inc`.
    pub fn prime(&mut self, filter: PrimeFilter, inc: i32) {
        self.legs_mut().for_each(|l| l.prime(filter, inc));
    }

    /// Reset the prime level of every leg admitted by `filter`.
    pub fn noprime(&mut self, filter: PrimeFilter) {
        self.legs_mut().for_each(|l| l.noprime(filter));
    }
}

impl<A> BlockTensor<A>
where A: Clone + Zero
{
    /// Expand into a dense tensor over the wrapper legs.
    pub fn to_dense(&self) -> Tensor<Leg, A> {
        let legs: Vec<Leg> = self.legs.iter().map(|l| l.leg().clone()).collect();
        let shape: Vec<usize> = legs.iter().map(Leg::dim).collect();
        let mut data: nd::ArrayD<A> = nd::ArrayD::zeros(shape);
        for (key, block) in self.blocks.iter() {
            let mut view = data.view_mut();
            for (ax, (leg, k)) in self.legs.iter().zip(key).enumerate() {
                let off = leg.offset_of_block(*k);
                let len = block.shape()[ax];
                view.slice_axis_inplace(nd::Axis(ax), nd::Slice::from(off..off + len));
            }
            view.assign(block);
        }
        // `data` is in standard layout and matches `legs` exactly
        Tensor::from_elems(legs, data.into_raw_vec())
            .unwrap_or_else(|_| Tensor::new_scalar(A::zero()))
    }
}

impl<A> BlockTensor<A>
where A: nd::LinalgScalar
{
    /// Contract `self` with `other` over all common legs, sector by sector.
    ///
    /// The result carries the remaining legs of `self` in order, followed by
    /// the remaining legs of `other` in order.
    pub fn contract(&self, other: &Self) -> TensorResult<Self> {
        let (ax_a, ax_b): (Vec<usize>, Vec<usize>)
            = self.legs.iter().enumerate()
            .filter_map(|(k, leg)| other.position(leg).map(|j| (k, j)))
            .unzip();
        let legs: Vec<SymmetryLeg>
            = self.legs.iter().enumerate()
            .filter(|(k, _)| !ax_a.contains(k))
            .chain(other.legs.iter().enumerate().filter(|(k, _)| !ax_b.contains(k)))
            .map(|(_, leg)| leg.clone())
            .collect();
        let mut blocks: FxHashMap<Vec<usize>, nd::ArrayD<A>> = FxHashMap::default();
        for (key_a, a) in self.blocks.iter() {
            for (key_b, b) in other.blocks.iter() {
                let matched
                    = ax_a.iter().zip(ax_b.iter())
                    .all(|(ka, kb)| key_a[*ka] == key_b[*kb]);
                if !matched { continue; }
                let key: Vec<usize>
                    = key_a.iter().enumerate()
                    .filter(|(k, _)| !ax_a.contains(k))
                    .chain(key_b.iter().enumerate().filter(|(k, _)| !ax_b.contains(k)))
                    .map(|(_, s)| *s)
                    .collect();
                let c = contract_arrays(a, &ax_a, b, &ax_b)?;
                blocks.entry(key)
                    .and_modify(|acc| { *acc = &*acc + &c; })
                    .or_insert(c);
            }
        }
        Ok(Self { legs, blocks })
    }

    /// Multiply every element by `a`.
    pub fn scale(&mut self, a: A) {
        self.blocks.values_mut().for_each(|data| data.mapv_inplace(|x| x * a));
    }
}

impl<A> BlockTensor<A>
where A: Elem
{
    /// Conjugate every element and reverse every leg.
    ///
    /// Legs are replaced by their [duals][SymmetryLeg::dual], so the flux of
    /// every block is negated and a leg of `self` cancels against its copy in
    /// the result when the two are contracted.
    pub fn conj(&self) -> Self {
        Self {
            legs: self.legs.iter().map(SymmetryLeg::dual).collect(),
            blocks: self.blocks.iter()
                .map(|(key, data)| (key.clone(), data.mapv(|x| x.conj())))
                .collect(),
        }
    }

    /// Return the Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.blocks.values()
            .flat_map(|data| data.iter())
            .map(|x| real_f64(Scalar::square(*x)))
            .sum::<f64>()
            .sqrt()
    }
}

//! Grouping several symmetry legs into one condensed leg.
//!
//! A [`SymCombiner`] is the block-sparse counterpart of
//! [`Combiner`][crate::combiner::Combiner]. Every combination of left sectors
//! carries a total charge `q = arrow_R · Σ arrow_i q_i`; all combinations with
//! equal charge are stacked into a single sector of the right leg, so the
//! right leg has one sector per distinct charge.

use std::fmt;
use itertools::Itertools;
use ndarray::{ self as nd, Dimension };
use num_traits::{ One, Zero };
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use crate::{
    block::BlockTensor,
    combiner::{ CombinerError, CombinerResult, DEFAULT_NAME, NMAX },
    leg::{ Arrow, Category, Leg },
    qn::QN,
    symleg::{ Block, SymmetryLeg },
    tensor::TensorError,
};

// where one combination of left sectors lands in the right leg
#[derive(Copy, Clone, Debug)]
struct Slot {
    sector: usize,
    offset: usize,
    size: usize,
}

#[derive(Clone, Debug)]
struct Condensed {
    right: SymmetryLeg,
    slots: FxHashMap<Vec<usize>, Slot>,
    // left-sector combinations stacked into each right sector, in order
    members: Vec<Vec<Vec<usize>>>,
}

/// Fuses a group of symmetry legs into one condensed leg and back.
#[derive(Clone, Debug, Default)]
pub struct SymCombiner {
    lefts: Vec<SymmetryLeg>,
    right: OnceCell<Condensed>,
}

impl SymCombiner {
    /// Create a new, empty combiner.
    pub fn new() -> Self { Self::default() }

    /// Create a new combiner over up to [`NMAX`] left legs.
    pub fn from_legs<I>(legs: I) -> CombinerResult<Self>
    where I: IntoIterator<Item = SymmetryLeg>
    {
        let mut comb = Self::new();
        legs.into_iter().try_for_each(|leg| comb.add_left(leg))?;
        Ok(comb)
    }

    /// Append a left leg, discarding any previously computed right leg.
    pub fn add_left(&mut self, leg: SymmetryLeg) -> CombinerResult<()> {
        if leg.is_null() { return Err(CombinerError::NullLeg); }
        if self.lefts.len() == NMAX { return Err(CombinerError::Capacity); }
        self.right = OnceCell::new();
        self.lefts.push(leg);
        Ok(())
    }

    fn condensed(&self, name: &str, category: Category, arrow: Arrow, prime: i32)
        -> CombinerResult<&Condensed>
    {
        self.right.get_or_try_init(|| {
            if self.lefts.is_empty() { return Err(CombinerError::NoLegs); }
            let mut charges: Vec<QN> = Vec::new();
            let mut dims: Vec<usize> = Vec::new();
            let mut members: Vec<Vec<Vec<usize>>> = Vec::new();
            let mut slots: FxHashMap<Vec<usize>, Slot> = FxHashMap::default();
            let combos
                = self.lefts.iter()
                .map(|l| 0..l.block_count())
                .multi_cartesian_product();
            for combo in combos {
                let (q, size): (QN, usize)
                    = self.lefts.iter().zip(&combo)
                    .fold((QN::default(), 1), |(q, size), (l, k)| {
                        let b = &l.blocks().as_slice()[*k];
                        (q + b.qn() * l.arrow().sign(), size * b.dim())
                    });
                let q = q * arrow.sign();
                let sector = match charges.iter().position(|c| *c == q) {
                    Some(s) => s,
                    None => {
                        charges.push(q);
                        dims.push(0);
                        members.push(Vec::new());
                        charges.len() - 1
                    },
                };
                slots.insert(combo.clone(), Slot { sector, offset: dims[sector], size });
                dims[sector] += size;
                members[sector].push(combo);
            }
            let blocks: Vec<Block>
                = charges.iter().zip(&dims)
                .map(|(q, d)| -> CombinerResult<Block> {
                    Ok(Block::new(Leg::with_prime(name, *d, category, prime)?, *q))
                })
                .collect::<CombinerResult<_>>()?;
            let right = SymmetryLeg::new(name, blocks, arrow)?;
            Ok(Condensed { right, slots, members })
        })
    }

    /// Compute the condensed right leg, if not already done.
    ///
    /// Does nothing if the combiner has already been initialized since the
    /// last call to [`Self::add_left`].
    pub fn init(&self, name: &str, category: Category, arrow: Arrow, prime: i32)
        -> CombinerResult<&SymmetryLeg>
    {
        self.condensed(name, category, arrow, prime).map(|c| &c.right)
    }

    /// Initialize with an outward link-category right leg named
    /// [`DEFAULT_NAME`].
    pub fn init_default(&self) -> CombinerResult<&SymmetryLeg> {
        self.init(DEFAULT_NAME, Category::Link, Arrow::Out, 0)
    }

    /// Return `true` if the right leg has been computed.
    pub fn is_init(&self) -> bool { self.right.get().is_some() }

    /// Return the right leg.
    pub fn right(&self) -> CombinerResult<&SymmetryLeg> {
        self.right.get().map(|c| &c.right).ok_or(CombinerError::NotInit)
    }

    /// Return the `j`-th left leg (1-based).
    pub fn left(&self, j: usize) -> CombinerResult<&SymmetryLeg> {
        j.checked_sub(1)
            .and_then(|k| self.lefts.get(k))
            .ok_or(CombinerError::NoSuchLeft(j))
    }

    /// Return all left legs.
    pub fn lefts(&self) -> &[SymmetryLeg] { &self.lefts }

    /// Return the number of left legs.
    pub fn rl(&self) -> usize { self.lefts.len() }

    /// Return the 1-based position of a left leg.
    pub fn find_index(&self, leg: &SymmetryLeg) -> Option<usize> {
        self.lefts.iter().position(|l| l == leg).map(|k| k + 1)
    }

    /// Return `true` if `leg` is one of the left legs.
    pub fn has_leg(&self, leg: &SymmetryLeg) -> bool { self.lefts.contains(leg) }

    /// Remove all left legs and the right leg.
    pub fn reset(&mut self) {
        self.lefts.clear();
        self.right = OnceCell::new();
    }

    /// Conjugate every left leg and the right leg, initializing first if
    /// needed.
    pub fn conj(&mut self) -> CombinerResult<()> {
        self.init_default()?;
        self.lefts.iter_mut().for_each(SymmetryLeg::conjugate);
        if let Some(c) = self.right.get_mut() { c.right.conjugate(); }
        Ok(())
    }

    /// Group or ungroup `t`.
    ///
    /// If `t` carries the right leg, it is split into the left legs in its
    /// place; otherwise the left legs are fused into the right leg at the
    /// position of the earliest one. Every block is moved by a plain copy.
    pub fn apply<A>(&self, t: &BlockTensor<A>) -> CombinerResult<BlockTensor<A>>
    where A: Clone + Zero
    {
        let cond = self.condensed(DEFAULT_NAME, Category::Link, Arrow::Out, 0)?;
        match t.position(&cond.right) {
            Some(k) => self.ungroup(cond, t, k),
            None => self.group(cond, t),
        }
    }

    fn group<A>(&self, cond: &Condensed, t: &BlockTensor<A>)
        -> CombinerResult<BlockTensor<A>>
    where A: Clone + Zero
    {
        let pos: Vec<usize>
            = self.lefts.iter()
            .map(|l| t.position(l).ok_or_else(|| TensorError::MissingLeg(l.name())))
            .collect::<Result<_, _>>()?;
        let first: usize = pos.iter().copied().min().unwrap_or(0);
        let rest: Vec<usize> = (0..t.rank()).filter(|k| !pos.contains(k)).collect();
        let ins: usize = rest.iter().filter(|k| **k < first).count();
        let perm: Vec<usize>
            = rest[..ins].iter()
            .chain(pos.iter())
            .chain(rest[ins..].iter())
            .copied()
            .collect();
        let mut legs: Vec<SymmetryLeg> = rest.iter().map(|k| t.legs()[*k].clone()).collect();
        legs.insert(ins, cond.right.clone());
        let mut out: BlockTensor<A> = BlockTensor::new(legs);

        let mut stacked: FxHashMap<Vec<usize>, nd::ArrayD<A>> = FxHashMap::default();
        for (key, data) in t.blocks() {
            let combo: Vec<usize> = pos.iter().map(|p| key[*p]).collect();
            let slot = cond.slots.get(&combo)
                .ok_or_else(|| TensorError::BlockKey(key.to_vec()))?;
            let mut new_key: Vec<usize> = rest.iter().map(|k| key[*k]).collect();
            new_key.insert(ins, slot.sector);
            let mut shape: Vec<usize> = rest.iter().map(|k| data.shape()[*k]).collect();
            shape.insert(ins, slot.size);
            let fused: nd::ArrayD<A>
                = data.view()
                .permuted_axes(perm.clone())
                .as_standard_layout()
                .into_owned()
                .into_shape(shape)
                .map_err(TensorError::from)?;
            let full_shape = out.block_shape(&new_key)?;
            stacked.entry(new_key)
                .or_insert_with(|| nd::ArrayD::zeros(full_shape))
                .slice_axis_mut(nd::Axis(ins), nd::Slice::from(slot.offset..slot.offset + slot.size))
                .assign(&fused);
        }
        for (key, data) in stacked.into_iter() {
            out.insert_block(&key, data)?;
        }
        Ok(out)
    }

    fn ungroup<A>(&self, cond: &Condensed, t: &BlockTensor<A>, k: usize)
        -> CombinerResult<BlockTensor<A>>
    where A: Clone + Zero
    {
        let legs: Vec<SymmetryLeg>
            = t.legs()[..k].iter()
            .chain(self.lefts.iter())
            .chain(t.legs()[k + 1..].iter())
            .cloned()
            .collect();
        let mut out: BlockTensor<A> = BlockTensor::new(legs);
        for (key, data) in t.blocks() {
            for combo in cond.members[key[k]].iter() {
                let slot = cond.slots[combo];
                let part = data.slice_axis(
                    nd::Axis(k),
                    nd::Slice::from(slot.offset..slot.offset + slot.size),
                );
                let new_key: Vec<usize>
                    = key[..k].iter()
                    .chain(combo.iter())
                    .chain(key[k + 1..].iter())
                    .copied()
                    .collect();
                let shape = out.block_shape(&new_key)?;
                let block: nd::ArrayD<A>
                    = part.as_standard_layout()
                    .into_owned()
                    .into_shape(shape)
                    .map_err(TensorError::from)?;
                out.insert_block(&new_key, block)?;
            }
        }
        Ok(out)
    }

    /// Return the combiner as a block tensor over the left legs, reversed, and
    /// the right leg.
    ///
    /// Every block has zero flux, so contracting a tensor with it preserves
    /// the tensor's flux.
    pub fn to_tensor<A>(&self) -> CombinerResult<BlockTensor<A>>
    where A: Clone + Zero + One
    {
        let cond = self.condensed(DEFAULT_NAME, Category::Link, Arrow::Out, 0)?;
        let legs
            = self.lefts.iter().map(SymmetryLeg::dual)
            .chain([cond.right.clone()]);
        let mut out: BlockTensor<A> = BlockTensor::new(legs);
        for (combo, slot) in cond.slots.iter() {
            let dims: Vec<usize>
                = self.lefts.iter().zip(combo)
                .map(|(l, k)| l.blocks().as_slice()[*k].dim())
                .collect();
            let mut key: Vec<usize> = combo.clone();
            key.push(slot.sector);
            let shape = out.block_shape(&key)?;
            let block: nd::ArrayD<A>
                = nd::ArrayD::from_shape_fn(shape, |ix| {
                    let ix = ix.slice();
                    let (r, lefts) = ix.split_at(ix.len() - 1);
                    let flat = lefts.iter().zip(&dims).fold(0_usize, |acc, (i, d)| acc * d + i);
                    if slot.offset + flat == r[0] { A::one() } else { A::zero() }
                });
            out.insert_block(&key, block)?;
        }
        Ok(out)
    }
}

impl fmt::Display for SymCombiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.right.get() {
            Some(c) => write!(f, "Right leg: {}", c.right)?,
            None => writeln!(f, "Right leg not initialized")?,
        }
        writeln!(f, "Left legs:")?;
        for l in self.lefts.iter() {
            write!(f, "{l}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin(name: &str, arrow: Arrow) -> SymmetryLeg {
        SymmetryLeg::new(
            name,
            [
                Block::new(Leg::site(&format!("{name}+"), 1), QN::new(1, 0)),
                Block::new(Leg::site(&format!("{name}-"), 1), QN::new(-1, 0)),
            ],
            arrow,
        )
        .unwrap()
    }

    #[test]
    fn condenses_equal_charges() {
        let comb = SymCombiner::from_legs([spin("a", Arrow::Out), spin("b", Arrow::Out)]).unwrap();
        let right = comb.init_default().unwrap();
        // +2, 0 (twice), -2
        assert_eq!(right.block_count(), 3);
        assert_eq!(right.dim(), 4);
        assert_eq!(right.find_by_qn(QN::new(0, 0)).unwrap().dim(), 2);
        assert_eq!(right.arrow(), Arrow::Out);
    }

    #[test]
    fn opposite_arrows_cancel() {
        let comb = SymCombiner::from_legs([spin("a", Arrow::Out), spin("b", Arrow::In)]).unwrap();
        let right = comb.init("r", Category::Site, Arrow::In, 0).unwrap();
        // a - b in {+2, 0, -2}, flipped by the inward right arrow
        assert_eq!(right.block_count(), 3);
        assert_eq!(right.block_qn(0).unwrap(), QN::new(0, 0));
        assert_eq!(right.block_qn(1).unwrap(), QN::new(-2, 0));
    }

    #[test]
    fn tensor_form_is_neutral() {
        let comb = SymCombiner::from_legs([spin("a", Arrow::Out), spin("b", Arrow::In)]).unwrap();
        let delta: BlockTensor<f64> = comb.to_tensor().unwrap();
        assert_eq!(delta.num_blocks(), 4);
        assert!(delta.blocks().all(|(key, _)| delta.flux_of(key) == QN::default()));
    }

    #[test]
    fn conj_flips_all_arrows() {
        let mut comb = SymCombiner::from_legs([spin("a", Arrow::Out)]).unwrap();
        comb.conj().unwrap();
        assert_eq!(comb.left(1).unwrap().arrow(), Arrow::In);
        assert_eq!(comb.right().unwrap().arrow(), Arrow::In);
    }
}

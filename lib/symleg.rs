//! Legs decomposed into quantum-number sectors.
//!
//! A [`SymmetryLeg`] is a direct sum of plain [`Leg`]s ("blocks"), each tagged
//! with a [`QN`], together with an [`Arrow`] giving the direction in which
//! charge flows through the leg. The leg as a whole is itself identified by a
//! wrapper [`Leg`] whose dimension is the sum of the block dimensions;
//! equality, hashing, and ordering of `SymmetryLeg`s are those of the wrapper.
//!
//! The block list is shared between copies and cloned on the first mutation
//! of a shared copy.

use std::{
    fmt,
    hash::{ Hash, Hasher },
    io::{ Read, Write },
    sync::Arc,
};
use once_cell::sync::Lazy;
use thiserror::Error;
use crate::{
    io::{ Persist, PersistError, PersistResult, read_i32, read_u64, write_i32, write_u64 },
    leg::{ Arrow, Category, Leg, LegError, PrimeFilter },
    qn::QN,
    tensor::Idx,
};

#[derive(Debug, Error)]
pub enum SymLegError {
    /// Returned when attempting to create a symmetry leg with no blocks.
    #[error("error in symmetry leg creation: no blocks given")]
    NoBlocks,

    /// Returned when blocks of differing categories are combined.
    #[error("error in symmetry leg creation: blocks must share category {0}, got {1}")]
    CategoryMismatch(Category, Category),

    /// Returned when no block carries a requested charge.
    #[error("error in symmetry leg lookup: no block with charge {0}")]
    NoSuchQN(QN),

    /// Returned when a plain leg is not one of the blocks.
    #[error("error in symmetry leg lookup: {0:?} is not a block")]
    NoSuchBlock(Leg),

    /// Returned when a block position is out of bounds.
    #[error("error in symmetry leg lookup: block {0} out of range for {1} blocks")]
    BlockOutOfRange(usize, usize),

    /// Returned when a leg value falls outside `1..=dim`.
    #[error("error in symmetry leg value: {val} is out of range for dimension {dim}")]
    ValueOutOfRange { val: usize, dim: usize },

    /// Returned when an operation needs an identity but got the null leg.
    #[error("error in symmetry leg: operation on a null leg")]
    NullLeg,

    /// Wrapper-leg creation errors.
    #[error("leg error: {0}")]
    LegError(#[from] LegError),
}
use SymLegError::*;
pub type SymLegResult<T> = Result<T, SymLegError>;

/// A single quantum-number sector of a [`SymmetryLeg`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    leg: Leg,
    qn: QN,
}

impl Block {
    /// Pair a plain leg with a charge.
    pub fn new(leg: Leg, qn: QN) -> Self { Self { leg, qn } }

    /// Return the plain leg of the sector.
    pub fn leg(&self) -> &Leg { &self.leg }

    /// Return the charge of the sector.
    pub fn qn(&self) -> QN { self.qn }

    /// Return the dimension of the sector.
    pub fn dim(&self) -> usize { self.leg.dim() }
}

impl Persist for Block {
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized
    {
        self.leg.write_to(w)?;
        self.qn.write_to(w)
    }

    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized
    {
        let leg = Leg::read_from(r)?;
        let qn = QN::read_from(r)?;
        Ok(Self { leg, qn })
    }
}

/// A leg carrying quantum-number block structure and an orientation.
#[derive(Clone)]
pub struct SymmetryLeg {
    leg: Leg,
    arrow: Arrow,
    blocks: Arc<Vec<Block>>,
}

// Null, ReIm, ReImP, ReImPP
static FLYWEIGHTS: Lazy<[SymmetryLeg; 4]> = Lazy::new(|| {
    let wrap = |leg: Leg| SymmetryLeg {
        leg: leg.clone(),
        arrow: Arrow::In,
        blocks: Arc::new(vec![Block::new(leg, QN::default())]),
    };
    [
        wrap(Leg::null()),
        wrap(Leg::reim()),
        wrap(Leg::reim_p()),
        wrap(Leg::reim_pp()),
    ]
});

impl SymmetryLeg {
    /// Create a new symmetry leg from a list of sectors.
    ///
    /// The wrapper leg gets a fresh identity with the category and prime level
    /// of the last block. Fails if `blocks` is empty or the blocks do not all
    /// share the same category.
    pub fn new<I>(name: &str, blocks: I, arrow: Arrow) -> SymLegResult<Self>
    where I: IntoIterator<Item = Block>
    {
        let blocks: Vec<Block> = blocks.into_iter().collect();
        let first = blocks.first().ok_or(NoBlocks)?;
        let category = first.leg.category();
        if let Some(bad) = blocks.iter().find(|b| b.leg.category() != category) {
            return Err(CategoryMismatch(category, bad.leg.category()));
        }
        let dim: usize = blocks.iter().map(Block::dim).sum();
        let prime = blocks.last().map(|b| b.leg.prime_level()).unwrap_or(0);
        let leg = Leg::with_prime(name, dim, category, prime)?;
        Ok(Self { leg, arrow, blocks: Arc::new(blocks) })
    }

    /// Create a new symmetry leg with a single sector.
    pub fn single(name: &str, leg: Leg, qn: QN, arrow: Arrow)
        -> SymLegResult<Self>
    {
        Self::new(name, [Block::new(leg, qn)], arrow)
    }

    /// Wrap a plain leg as a symmetry leg with one neutral sector.
    ///
    /// The wrapper and the only block share the identity of `leg`.
    pub fn from_leg(leg: Leg, arrow: Arrow) -> Self {
        let blocks = vec![Block::new(leg.clone(), QN::default())];
        Self { leg, arrow, blocks: Arc::new(blocks) }
    }

    /// The null symmetry leg.
    pub fn null() -> Self { FLYWEIGHTS[0].clone() }

    /// The real/imaginary marker at prime level 0.
    pub fn reim() -> Self { FLYWEIGHTS[1].clone() }

    /// The real/imaginary marker at prime level 1.
    pub fn reim_p() -> Self { FLYWEIGHTS[2].clone() }

    /// The real/imaginary marker at prime level 2.
    pub fn reim_pp() -> Self { FLYWEIGHTS[3].clone() }

    /// Return the wrapper leg.
    pub fn leg(&self) -> &Leg { &self.leg }

    /// Return the total dimension.
    pub fn dim(&self) -> usize { self.leg.dim() }

    /// Return the category shared by all blocks.
    pub fn category(&self) -> Category { self.leg.category() }

    /// Return the prime level.
    pub fn prime_level(&self) -> i32 { self.leg.prime_level() }

    /// Return the name with prime marks.
    pub fn name(&self) -> String { self.leg.name() }

    /// Return the name without prime marks.
    pub fn raw_name(&self) -> &str { self.leg.raw_name() }

    /// Return the orientation.
    pub fn arrow(&self) -> Arrow { self.arrow }

    /// Return `true` if `self` is the null symmetry leg.
    pub fn is_null(&self) -> bool { self.leg.is_null() }

    /// Return `true` if `self` is a real/imaginary marker.
    pub fn is_reim(&self) -> bool { self.leg.is_reim() }

    /// Return the number of sectors.
    pub fn block_count(&self) -> usize { self.blocks.len() }

    /// Return an iterator over all sectors.
    pub fn blocks(&self) -> std::slice::Iter<'_, Block> { self.blocks.iter() }

    /// Return the `k`-th sector (0-based).
    pub fn block(&self, k: usize) -> SymLegResult<&Block> {
        self.blocks.get(k).ok_or(BlockOutOfRange(k, self.blocks.len()))
    }

    /// Return the plain leg of the `k`-th sector (0-based).
    pub fn block_leg(&self, k: usize) -> SymLegResult<&Leg> {
        self.block(k).map(|b| &b.leg)
    }

    /// Return the charge of the `k`-th sector (0-based).
    pub fn block_qn(&self, k: usize) -> SymLegResult<QN> {
        self.block(k).map(|b| b.qn)
    }

    /// Return the dimension of the `k`-th sector (0-based).
    pub fn block_dim(&self, k: usize) -> SymLegResult<usize> {
        self.block(k).map(Block::dim)
    }

    /// Return the first sector leg carrying charge `qn`.
    pub fn find_by_qn(&self, qn: QN) -> SymLegResult<&Leg> {
        self.blocks.iter()
            .find(|b| b.qn == qn)
            .map(|b| &b.leg)
            .ok_or(NoSuchQN(qn))
    }

    /// Return the position of the sector whose leg is `leg`.
    pub fn position_of(&self, leg: &Leg) -> Option<usize> {
        self.blocks.iter().position(|b| &b.leg == leg)
    }

    /// Return `true` if `leg` is one of the sectors.
    pub fn has_leg(&self, leg: &Leg) -> bool { self.position_of(leg).is_some() }

    /// Return `true` if some sector shares an identity with `leg`, regardless
    /// of prime level.
    pub fn has_leg_noprime(&self, leg: &Leg) -> bool {
        self.blocks.iter().any(|b| b.leg.noprime_eq(leg))
    }

    /// Return the charge of the sector whose leg is `leg`.
    pub fn qn_of(&self, leg: &Leg) -> SymLegResult<QN> {
        self.position_of(leg)
            .map(|k| self.blocks[k].qn)
            .ok_or_else(|| NoSuchBlock(leg.clone()))
    }

    /// Return the total dimension of all sectors preceding `leg`.
    pub fn offset_of(&self, leg: &Leg) -> SymLegResult<usize> {
        let k = self.position_of(leg).ok_or_else(|| NoSuchBlock(leg.clone()))?;
        Ok(self.offset_of_block(k))
    }

    /// Return the total dimension of all sectors preceding the `k`-th.
    pub fn offset_of_block(&self, k: usize) -> usize {
        self.blocks.iter().take(k).map(Block::dim).sum()
    }

    /// Return the largest sector dimension.
    pub fn biggest_block_dim(&self) -> usize {
        self.blocks.iter().map(Block::dim).max().unwrap_or(0)
    }

    /// Flip the orientation and negate every sector charge.
    pub fn conjugate(&mut self) {
        self.arrow = self.arrow.flipped();
        Arc::make_mut(&mut self.blocks).iter_mut()
            .for_each(|b| { b.qn = -b.qn; });
    }

    /// Return a conjugated copy of `self`.
    pub fn conj(&self) -> Self {
        let mut new = self.clone();
        new.conjugate();
        new
    }

    /// Return a copy with the orientation reversed and the sector charges
    /// kept.
    ///
    /// This is the leg as seen from the other end of a bond: its contribution
    /// `arrow · qn` to a block's flux is the negative of `self`'s, so the two
    /// cancel when contracted. [`conj`][Self::conj] leaves the contribution
    /// unchanged instead.
    pub fn dual(&self) -> Self {
        let mut new = self.clone();
        new.arrow = new.arrow.flipped();
        new
    }

    /// Negate every sector charge, leaving the orientation unchanged.
    pub fn negate(&mut self) {
        Arc::make_mut(&mut self.blocks).iter_mut()
            .for_each(|b| { b.qn = -b.qn; });
    }

    /// Set the orientation.
    pub fn set_arrow(&mut self, arrow: Arrow) { self.arrow = arrow; }

    /// Raise the prime level of the wrapper and every sector by `inc` if
    /// admitted by `filter`.
    pub fn prime(&mut self, filter: PrimeFilter, inc: i32) {
        self.leg.prime(filter, inc);
        Arc::make_mut(&mut self.blocks).iter_mut()
            .for_each(|b| b.leg.prime(filter, inc));
    }

    /// Return a copy of `self` with all prime levels raised by `inc`.
    pub fn primed(&self, inc: i32) -> Self {
        let mut new = self.clone();
        new.prime(PrimeFilter::Both, inc);
        new
    }

    /// Reset all prime levels to zero if admitted by `filter`.
    pub fn noprime(&mut self, filter: PrimeFilter) {
        self.leg.noprime(filter);
        Arc::make_mut(&mut self.blocks).iter_mut()
            .for_each(|b| b.leg.noprime(filter));
    }

    /// Return a copy of `self` with all prime levels reset to zero.
    pub fn deprimed(&self) -> Self {
        let mut new = self.clone();
        new.noprime(PrimeFilter::Both);
        new
    }

    /// Move all prime levels equal to `old` to `new` if admitted by `filter`.
    pub fn map_prime(&mut self, old: i32, new: i32, filter: PrimeFilter) {
        self.leg.map_prime(old, new, filter);
        Arc::make_mut(&mut self.blocks).iter_mut()
            .for_each(|b| b.leg.map_prime(old, new, filter));
    }

    /// Return `true` if `self` and `other` share a wrapper identity, regardless
    /// of prime level.
    pub fn noprime_eq(&self, other: &Self) -> bool {
        self.leg.noprime_eq(&other.leg)
    }

    /// Return a value of the leg, `1 ≤ val ≤ dim`.
    pub fn val(&self, val: usize) -> SymLegResult<SymLegVal> {
        SymLegVal::new(self.clone(), val)
    }

    /// Return a diagnostic summary of the sector dimensions.
    pub fn show_m(&self) -> String {
        let sectors: Vec<String>
            = self.blocks.iter()
            .map(|b| format!("{}:{}", b.qn, b.dim()))
            .collect();
        format!("{} | {}", self.dim(), sectors.join(" "))
    }

    pub(crate) fn shares_blocks(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.blocks, &other.blocks)
    }
}

impl PartialEq for SymmetryLeg {
    fn eq(&self, other: &Self) -> bool { self.leg == other.leg }
}

impl Eq for SymmetryLeg { }

impl Hash for SymmetryLeg {
    fn hash<H: Hasher>(&self, state: &mut H) { self.leg.hash(state); }
}

impl PartialOrd for SymmetryLeg {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SymmetryLeg {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.leg.cmp(&other.leg) }
}

impl fmt::Debug for SymmetryLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetryLeg({}, {}, {})", self.name(), self.arrow, self.show_m())
    }
}

impl fmt::Display for SymmetryLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() { return write!(f, "SymmetryLeg: (null)"); }
        writeln!(f, "SymmetryLeg: {} <{}>", self.leg, self.arrow)?;
        for b in self.blocks.iter() {
            writeln!(f, " {} {}", b.leg, b.qn)?;
        }
        Ok(())
    }
}

impl Idx for SymmetryLeg {
    fn dim(&self) -> usize { self.leg.dim() }

    fn label(&self) -> String { self.leg.name() }
}

impl Persist for SymmetryLeg {
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized
    {
        self.leg.write_to(w)?;
        write_i32(w, self.arrow.sign())?;
        write_u64(w, self.blocks.len() as u64)?;
        self.blocks.iter().try_for_each(|b| b.write_to(w))
    }

    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized
    {
        let leg = Leg::read_from(r)?;
        let arrow = Arrow::from_code(read_i32(r)?)?;
        let count = read_u64(r)?;
        let blocks: Vec<Block>
            = (0..count).map(|_| Block::read_from(r)).collect::<PersistResult<_>>()?;
        let total: usize = blocks.iter().map(Block::dim).sum();
        if total != leg.dim() {
            return Err(PersistError::Inconsistent(
                format!("sector dimensions sum to {total}, expected {}", leg.dim())
            ));
        }
        Ok(Self { leg, arrow, blocks: Arc::new(blocks) })
    }
}

/// A symmetry leg paired with one of its values (1-based).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymLegVal {
    sleg: SymmetryLeg,
    val: usize,
}

impl SymLegVal {
    /// Pair a symmetry leg with a value.
    ///
    /// Fails if `val` is not in `1..=sleg.dim()`.
    pub fn new(sleg: SymmetryLeg, val: usize) -> SymLegResult<Self> {
        if val < 1 || val > sleg.dim() {
            return Err(ValueOutOfRange { val, dim: sleg.dim() });
        }
        Ok(Self { sleg, val })
    }

    /// Return the symmetry leg.
    pub fn sleg(&self) -> &SymmetryLeg { &self.sleg }

    /// Return the global 1-based value.
    pub fn val(&self) -> usize { self.val }

    /// Return the sector containing the value, the 1-based value local to
    /// that sector, and the sector's charge.
    pub fn block_val(&self) -> (&Leg, usize, QN) {
        let mut rem = self.val;
        for b in self.sleg.blocks() {
            if rem <= b.dim() { return (&b.leg, rem, b.qn); }
            rem -= b.dim();
        }
        unreachable!("value checked against the total dimension on creation")
    }

    /// Return the charge of the sector containing the value.
    pub fn qn(&self) -> QN { self.block_val().2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin_half() -> SymmetryLeg {
        let up = Leg::site("up", 1);
        let dn = Leg::site("dn", 2);
        SymmetryLeg::new(
            "s",
            [Block::new(up, QN::new(1, 0)), Block::new(dn, QN::new(-1, 0))],
            Arrow::Out,
        )
        .unwrap()
    }

    #[test]
    fn offsets_and_dimension() {
        let s = spin_half();
        assert_eq!(s.dim(), 3);
        let last = s.block_leg(1).unwrap().clone();
        assert_eq!(s.offset_of(&last).unwrap() + last.dim(), s.dim());
        assert_eq!(s.biggest_block_dim(), 2);
        assert_eq!(s.find_by_qn(QN::new(-1, 0)).unwrap(), &last);
        assert!(matches!(s.find_by_qn(QN::new(3, 0)), Err(NoSuchQN(_))));
    }

    #[test]
    fn conjugation_is_copy_on_write() {
        let s = spin_half();
        let c = s.conj();
        assert!(!s.shares_blocks(&c));
        assert_eq!(c.arrow(), Arrow::In);
        assert_eq!(c.block_qn(0).unwrap(), QN::new(-1, 0));
        assert_eq!(s.block_qn(0).unwrap(), QN::new(1, 0));
        let cc = c.conj();
        assert_eq!(cc.arrow(), s.arrow());
        assert!(cc.blocks().zip(s.blocks()).all(|(a, b)| a.qn() == b.qn()));
    }

    #[test]
    fn dual_cancels_flux_contribution() {
        let s = spin_half();
        let d = s.dual();
        assert_eq!(d, s);
        assert_eq!(d.arrow(), Arrow::In);
        assert!(s.shares_blocks(&d));
        for k in 0..s.block_count() {
            let q = s.block_qn(k).unwrap() * s.arrow().sign();
            let p = d.block_qn(k).unwrap() * d.arrow().sign();
            assert_eq!(q + p, QN::default());
        }
        let c = s.conj();
        assert_eq!(c.block_qn(1).unwrap() * c.arrow().sign(), s.block_qn(1).unwrap());
    }

    #[test]
    fn mixed_categories_rejected() {
        let res = SymmetryLeg::new(
            "bad",
            [
                Block::new(Leg::site("a", 1), QN::default()),
                Block::new(Leg::link("b", 1), QN::default()),
            ],
            Arrow::Out,
        );
        assert!(matches!(res, Err(CategoryMismatch(Category::Site, Category::Link))));
    }

    #[test]
    fn values_map_into_sectors() {
        let s = spin_half();
        let v = s.val(3).unwrap();
        let (leg, local, qn) = v.block_val();
        assert_eq!(leg.raw_name(), "dn");
        assert_eq!(local, 2);
        assert_eq!(qn, QN::new(-1, 0));
        assert!(s.val(4).is_err());
    }
}

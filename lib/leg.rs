//! Tensor legs with globally unique identities.
//!
//! A [`Leg`] is a cheap handle onto a shared, immutable identity record (a
//! random 128-bit id, a dimension, a [`Category`], and a name) plus a mutable
//! *prime level*. Two legs compare equal when they share an identity and
//! prime level; priming a copy of a leg is the usual way to create a
//! distinguishable partner (e.g. the bra side of a density matrix).
//!
//! ```
//! use tensor_bond::leg::{ Category, Leg, PrimeFilter };
//!
//! let s = Leg::new("s1", 2, Category::Site).unwrap();
//! let mut sp = s.clone();
//! sp.prime(PrimeFilter::Both, 1);
//! assert_ne!(s, sp);
//! assert!(s.noprime_eq(&sp));
//! assert_eq!(sp.name(), "s1'");
//! sp.noprime(PrimeFilter::Both);
//! assert_eq!(s, sp);
//! ```

use std::{
    cmp::Ordering,
    fmt,
    hash::{ Hash, Hasher },
    io::{ Read, Write },
    ops::Mul,
    sync::{ Arc, atomic::{ AtomicU64, Ordering as AtomicOrdering } },
};
use once_cell::sync::Lazy;
use rand::Rng;
use thiserror::Error;
use crate::{
    io::{ Persist, PersistError, PersistResult, read_i32, read_len, read_name, write_i32, write_len, write_name },
    tensor::Idx,
};

#[derive(Debug, Error)]
pub enum LegError {
    /// Returned when attempting to create a leg of category
    /// [`Category::ReIm`] directly; these are only available through
    /// [`Leg::reim`] and friends.
    #[error("error in leg creation: ReIm legs are fixed singletons")]
    ReImCreation,

    /// Returned when attempting to create a leg with zero dimension.
    #[error("error in leg creation: zero-dimensional leg")]
    ZeroDim,

    /// Returned when a leg value falls outside `1..=dim`.
    #[error("error in leg value: {val} is out of range for dimension {dim}")]
    ValueOutOfRange { val: usize, dim: usize },
}
use LegError::*;
pub type LegResult<T> = Result<T, LegError>;

/// Orientation of a leg in a symmetry-decorated network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Arrow {
    In = -1,
    Out = 1,
}

impl Arrow {
    /// The arrow obtained by multiplying `In` with `Out`.
    pub const SWITCH: Self = Self::In;

    /// Return the opposite arrow.
    pub fn flipped(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }

    /// Return `-1` for `In` and `+1` for `Out`.
    pub fn sign(self) -> i32 { self as i32 }

    pub(crate) fn from_code(code: i32) -> PersistResult<Self> {
        match code {
            -1 => Ok(Self::In),
            1 => Ok(Self::Out),
            x => Err(PersistError::UnknownArrow(x)),
        }
    }
}

impl Mul for Arrow {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if self.sign() * rhs.sign() == -1 { Self::In } else { Self::Out }
    }
}

impl fmt::Display for Arrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "In"),
            Self::Out => write!(f, "Out"),
        }
    }
}

/// Role of a leg in a network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// A virtual bond between two tensors.
    Link,
    /// A physical degree of freedom.
    Site,
    /// The real/imaginary marker leg of a split complex tensor.
    ReIm,
}

impl Category {
    /// Return the integer code used in the binary layout.
    pub fn code(self) -> i32 {
        match self {
            Self::Link => 1,
            Self::Site => 2,
            Self::ReIm => 3,
        }
    }

    /// Decode an integer code from the binary layout.
    pub fn from_code(code: i32) -> PersistResult<Self> {
        match code {
            1 => Ok(Self::Link),
            2 => Ok(Self::Site),
            3 => Ok(Self::ReIm),
            x => Err(PersistError::UnknownCategory(x)),
        }
    }

    /// Return the category name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Link => "Link",
            Self::Site => "Site",
            Self::ReIm => "ReIm",
        }
    }

    // offset relative to `Site`, used in the fingerprint
    fn offset(self) -> f64 {
        match self {
            Self::Link => -1.0,
            Self::Site => 0.0,
            Self::ReIm => 1.0,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Selects which legs a priming operation acts on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimeFilter {
    /// Only [`Category::Link`] legs.
    Link,
    /// Only [`Category::Site`] legs.
    Site,
    /// Both link and site legs.
    Both,
    /// No legs.
    None,
}

impl PrimeFilter {
    /// Return `true` if legs of category `cat` are affected by `self`.
    ///
    /// [`Category::ReIm`] legs are never affected.
    pub fn admits(self, cat: Category) -> bool {
        match (self, cat) {
            (_, Category::ReIm) => false,
            (Self::Both, _) => true,
            (Self::Link, Category::Link) => true,
            (Self::Site, Category::Site) => true,
            _ => false,
        }
    }
}

static PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31,
    37, 41, 43, 47, 53, 59, 61, 67, 71, 73,
    79, 83, 89, 97, 101, 103, 107, 109, 113,
    127, 131, 137, 139, 149, 151, 157, 163,
    167, 173, 179, 181, 191, 193, 197, 199,
    211, 223, 227, 229, 233, 239, 241, 251,
];

// deterministic real-valued hash of an identity, in [-1, 1]
fn fingerprint(id: u128, category: Category) -> f64 {
    let mut pn: usize = 1;
    let mut arg: f64 = 0.0;
    for byte in id.to_be_bytes().iter().rev() {
        pn += 1;
        arg += f64::from(*byte) * f64::from(PRIMES[pn]).recip().sqrt();
    }
    pn += 1;
    arg *= f64::from(PRIMES[pn]).recip().sqrt();
    pn += 1;
    arg += category.offset() * f64::from(PRIMES[pn]).recip().sqrt();
    arg.sin()
}

static ID_BASE: Lazy<u128> = Lazy::new(|| rand::thread_rng().gen());
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

// successive ids are offsets from a random per-process base
fn next_id() -> u128 {
    let k = ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    ID_BASE.wrapping_add(u128::from(k))
}

// shared identity record behind every `Leg` handle
#[derive(Debug)]
pub(crate) struct LegData {
    id: u128,
    category: Category,
    dim: usize,
    fingerprint: f64,
    name: String,
}

impl LegData {
    fn new(name: String, dim: usize, category: Category, id: u128) -> Self {
        let fingerprint = fingerprint(id, category);
        Self { id, category, dim, fingerprint, name }
    }
}

const REIM_ID: u128 = 0x10 << 120;

// Null, ReIm, ReImP, ReImPP
static FLYWEIGHTS: Lazy<[Arc<LegData>; 4]> = Lazy::new(|| {
    let null = LegData {
        id: 0,
        category: Category::Site,
        dim: 1,
        fingerprint: 0.0,
        name: "Null".to_string(),
    };
    [
        Arc::new(null),
        Arc::new(LegData::new("ReIm".to_string(), 2, Category::ReIm, REIM_ID)),
        Arc::new(LegData::new("ReImP".to_string(), 2, Category::ReIm, REIM_ID)),
        Arc::new(LegData::new("ReImPP".to_string(), 2, Category::ReIm, REIM_ID)),
    ]
});

/// A single tensor leg.
///
/// Cloning a `Leg` is cheap: the identity record is shared and only the prime
/// level is copied. The record is freed once its last handle is dropped,
/// except for the process-wide singletons returned by [`Leg::null`],
/// [`Leg::reim`], [`Leg::reim_p`], and [`Leg::reim_pp`].
#[derive(Clone)]
pub struct Leg {
    data: Arc<LegData>,
    prime: i32,
}

impl Leg {
    /// Create a new leg with a fresh identity.
    ///
    /// Fails if `dim` is zero or `category` is [`Category::ReIm`].
    pub fn new(name: &str, dim: usize, category: Category) -> LegResult<Self> {
        Self::with_prime(name, dim, category, 0)
    }

    /// Like [`Self::new`], but starting at prime level `prime`.
    pub fn with_prime(name: &str, dim: usize, category: Category, prime: i32)
        -> LegResult<Self>
    {
        if category == Category::ReIm { return Err(ReImCreation); }
        if dim == 0 { return Err(ZeroDim); }
        let data = LegData::new(name.to_string(), dim, category, next_id());
        Ok(Self { data: Arc::new(data), prime })
    }

    /// Create a new link leg.
    ///
    /// *Panics if `dim` is zero.*
    pub fn link(name: &str, dim: usize) -> Self {
        Self::new(name, dim, Category::Link)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Create a new site leg.
    ///
    /// *Panics if `dim` is zero.*
    pub fn site(name: &str, dim: usize) -> Self {
        Self::new(name, dim, Category::Site)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// The null leg, carrying no identity.
    pub fn null() -> Self {
        Self { data: Arc::clone(&FLYWEIGHTS[0]), prime: 0 }
    }

    /// The real/imaginary marker leg at prime level 0.
    pub fn reim() -> Self {
        Self { data: Arc::clone(&FLYWEIGHTS[1]), prime: 0 }
    }

    /// The real/imaginary marker leg at prime level 1.
    pub fn reim_p() -> Self {
        Self { data: Arc::clone(&FLYWEIGHTS[2]), prime: 1 }
    }

    /// The real/imaginary marker leg at prime level 2.
    pub fn reim_pp() -> Self {
        Self { data: Arc::clone(&FLYWEIGHTS[3]), prime: 2 }
    }

    /// Return the number of values the leg can take.
    pub fn dim(&self) -> usize { self.data.dim }

    /// Return the category of the leg.
    pub fn category(&self) -> Category { self.data.category }

    /// Return the prime level of the leg.
    pub fn prime_level(&self) -> i32 { self.prime }

    /// Set the prime level of the leg.
    pub fn set_prime_level(&mut self, prime: i32) { self.prime = prime; }

    /// Return the 128-bit identity of the leg.
    pub fn id(&self) -> u128 { self.data.id }

    /// Return the real-valued fingerprint of the identity.
    pub fn fingerprint(&self) -> f64 { self.data.fingerprint }

    /// Return the ordering key, combining the fingerprint and prime level.
    pub fn unique_real(&self) -> f64 {
        self.data.fingerprint * f64::from(1 + self.prime)
    }

    /// Return the name of the leg without prime marks.
    pub fn raw_name(&self) -> &str { &self.data.name }

    /// Return the name of the leg followed by one `'` per prime level.
    pub fn name(&self) -> String {
        let marks = usize::try_from(self.prime).unwrap_or(0);
        format!("{}{}", self.data.name, "'".repeat(marks))
    }

    /// Return `true` if `self` is the null leg.
    pub fn is_null(&self) -> bool { Arc::ptr_eq(&self.data, &FLYWEIGHTS[0]) }

    /// Return `true` if `self` is one of the real/imaginary marker legs.
    pub fn is_reim(&self) -> bool { self.category() == Category::ReIm }

    /// Plain legs always point out.
    pub fn arrow(&self) -> Arrow { Arrow::Out }

    /// Return `true` if `self` and `other` share an identity, regardless of
    /// prime level.
    pub fn noprime_eq(&self, other: &Self) -> bool {
        self.data.fingerprint == other.data.fingerprint
    }

    /// Return `true` if the two handles point to the same identity record.
    pub fn shares_record(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Add `inc` to the prime level if the category is admitted by `filter`.
    pub fn prime(&mut self, filter: PrimeFilter, inc: i32) {
        if filter.admits(self.category()) { self.prime += inc; }
    }

    /// Return a copy of `self` with prime level raised by `inc`.
    pub fn primed(&self, inc: i32) -> Self {
        let mut new = self.clone();
        new.prime(PrimeFilter::Both, inc);
        new
    }

    /// Reset the prime level to zero if the category is admitted by `filter`.
    pub fn noprime(&mut self, filter: PrimeFilter) {
        let inc = -self.prime;
        self.prime(filter, inc);
    }

    /// Return a copy of `self` at prime level zero.
    pub fn deprimed(&self) -> Self {
        let mut new = self.clone();
        new.prime = 0;
        new
    }

    /// Change the prime level from `old` to `new` if it is currently `old` and
    /// the category is admitted by `filter`.
    pub fn map_prime(&mut self, old: i32, new: i32, filter: PrimeFilter) {
        if self.prime == old && filter.admits(self.category()) {
            self.prime = new;
        }
    }

    /// Return a value of the leg, `1 ≤ val ≤ dim`.
    pub fn val(&self, val: usize) -> LegResult<LegVal> {
        LegVal::new(self.clone(), val)
    }

    /// Return a short diagnostic description of the dimension.
    pub fn show_m(&self) -> String { format!("m={}", self.dim()) }

    // last two bytes of the identity, for display only
    fn short_id(&self) -> u16 { (self.data.id & 0xffff) as u16 }
}

impl PartialEq for Leg {
    fn eq(&self, other: &Self) -> bool {
        self.data.fingerprint == other.data.fingerprint
            && self.prime == other.prime
    }
}

impl Eq for Leg { }

impl Hash for Leg {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.fingerprint.to_bits().hash(state);
        self.prime.hash(state);
    }
}

impl PartialOrd for Leg {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Leg {
    fn cmp(&self, other: &Self) -> Ordering {
        self.unique_real().total_cmp(&other.unique_real())
            .then_with(|| {
                self.data.fingerprint.total_cmp(&other.data.fingerprint)
            })
            .then_with(|| self.prime.cmp(&other.prime))
    }
}

impl fmt::Debug for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Leg({}, {}, m={})", self.name(), self.category(), self.dim())
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        if !name.trim().is_empty() { write!(f, "{name}/")?; }
        let marks = usize::try_from(self.prime).unwrap_or(0);
        write!(
            f,
            "{}{}-{:04x}:{}",
            self.category(),
            "'".repeat(marks),
            self.short_id(),
            self.dim(),
        )
    }
}

impl Idx for Leg {
    fn dim(&self) -> usize { self.data.dim }

    fn label(&self) -> String { self.name() }
}

impl Persist for Leg {
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized
    {
        if self.is_null() { return Err(PersistError::NullLeg); }
        write_i32(w, self.prime)?;
        write_i32(w, self.category().code())?;
        w.write_all(&self.data.id.to_le_bytes())?;
        write_len(w, self.dim())?;
        write_name(w, self.raw_name())?;
        Ok(())
    }

    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized
    {
        let prime = read_i32(r)?;
        let category = Category::from_code(read_i32(r)?)?;
        let mut id_bytes = [0_u8; 16];
        r.read_exact(&mut id_bytes)?;
        let id = u128::from_le_bytes(id_bytes);
        let dim = read_len(r)?;
        let name = read_name(r)?;
        if category == Category::ReIm {
            return match prime {
                0 => Ok(Self::reim()),
                1 => Ok(Self::reim_p()),
                2 => Ok(Self::reim_pp()),
                p => Err(PersistError::IllegalReImPrime(p)),
            };
        }
        if dim == 0 {
            return Err(PersistError::Inconsistent("zero leg dimension".into()));
        }
        let data = LegData::new(name, dim, category, id);
        Ok(Self { data: Arc::new(data), prime })
    }
}

/// A leg paired with one of its values (1-based).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LegVal {
    leg: Leg,
    val: usize,
}

impl LegVal {
    /// Pair a leg with a value.
    ///
    /// Fails if `val` is not in `1..=leg.dim()`.
    pub fn new(leg: Leg, val: usize) -> LegResult<Self> {
        if val < 1 || val > leg.dim() {
            return Err(ValueOutOfRange { val, dim: leg.dim() });
        }
        Ok(Self { leg, val })
    }

    /// Return the leg.
    pub fn leg(&self) -> &Leg { &self.leg }

    /// Return the 1-based value.
    pub fn val(&self) -> usize { self.val }

    /// Return a copy with the leg primed once.
    pub fn primed(&self) -> Self {
        Self { leg: self.leg.primed(1), val: self.val }
    }
}

//! Truncated factorization of two-site tensors.
//!
//! An [`SvdWorker`] holds the truncation policy shared by every bond of a
//! chain, along with the truncation error and kept spectrum last recorded at
//! each bond. [`SvdWorker::decompose`] splits a composite tensor into two
//! factors joined by a new bond leg, by diagonalizing the reduced density
//! matrix on the side that is to be orthogonalized.
//!
//! ```text
//!   composite          factor A        factor B
//!   ----[AA]----   ->  ----[A]--mid--[B]----
//!       |  |               |          |
//! ```

use std::io::{ Read, Write };
use ndarray_linalg::error::LinalgError;
use thiserror::Error;
use tracing::debug;
use crate::{
    bond::{ BondLeg, BondTensor, Grouping },
    combiner::CombinerError,
    denmat::{ Diagonalized, TruncParams },
    io::{
        Persist,
        PersistError,
        PersistResult,
        read_bool,
        read_f64,
        read_i32,
        read_len,
        read_vec,
        write_bool,
        write_f64,
        write_i32,
        write_len,
        write_vec,
    },
    leg::{ Arrow, Category, LegError },
    lognum::LogNumber,
    symleg::SymLegError,
    tensor::TensorError,
};

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Returned when a bond index is outside `1..=N`.
    #[error("error in worker: bond {bond} out of range for {n} bonds")]
    BondOutOfRange { bond: usize, n: usize },

    /// Returned when setting a zero reference norm.
    #[error("error in worker: reference norm must be nonzero")]
    ZeroRefNorm,

    /// Returned when a density matrix couples two different charge sectors.
    #[error("error in worker: density matrix block {0:?} is off-diagonal in charge")]
    OffDiagonalBlock(Vec<usize>),

    /// Returned when a density matrix has no diagonal blocks to diagonalize.
    #[error("error in worker: density matrix has no diagonal blocks")]
    EmptyDensityMatrix,

    /// Leg errors.
    #[error("leg error: {0}")]
    LegError(#[from] LegError),

    /// Symmetry leg errors.
    #[error("symmetry leg error: {0}")]
    SymLegError(#[from] SymLegError),

    /// Combiner errors.
    #[error("combiner error: {0}")]
    CombinerError(#[from] CombinerError),

    /// Contraction errors.
    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),

    /// Eigensolver errors.
    #[error("linalg error: {0}")]
    LinalgError(#[from] LinalgError),
}
use WorkerError::*;
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Which factor loses the orthogonality center.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Orthogonalize factor A; the center moves to factor B.
    FromLeft,
    /// Orthogonalize factor B; the center moves to factor A.
    FromRight,
    /// Orthogonalize factor B, as for `FromRight`.
    Neither,
    /// Choose the side that leaves the orientation of the shared bond leg
    /// unchanged. This never takes the end-of-chain shortcut.
    Either,
}

/// Per-bond truncated density-matrix factorization.
#[derive(Clone, Debug, PartialEq)]
pub struct SvdWorker {
    truncerr: Vec<f64>,
    eigs_kept: Vec<Vec<f64>>,
    params: TruncParams,
}

impl SvdWorker {
    /// Create a new worker for `n` bonds with default truncation parameters.
    pub fn new(n: usize) -> Self {
        Self {
            truncerr: vec![0.0; n],
            eigs_kept: vec![Vec::new(); n],
            params: TruncParams::default(),
        }
    }

    /// Create a new worker for `n` bonds.
    ///
    /// Fails if `params.ref_norm` is zero.
    pub fn with_params(n: usize, params: TruncParams) -> WorkerResult<Self> {
        if params.ref_norm.is_zero() { return Err(ZeroRefNorm); }
        Ok(Self { params, ..Self::new(n) })
    }

    /// Return the number of bonds.
    pub fn num_bonds(&self) -> usize { self.truncerr.len() }

    fn bond_idx(&self, b: usize) -> WorkerResult<usize> {
        (1..=self.num_bonds()).contains(&b)
            .then(|| b - 1)
            .ok_or(BondOutOfRange { bond: b, n: self.num_bonds() })
    }

    /// Return the current truncation parameters.
    pub fn params(&self) -> &TruncParams { &self.params }

    /// Replace the truncation parameters.
    ///
    /// Fails if `params.ref_norm` is zero.
    pub fn set_params(&mut self, params: TruncParams) -> WorkerResult<()> {
        if params.ref_norm.is_zero() { return Err(ZeroRefNorm); }
        self.params = params;
        Ok(())
    }

    pub fn cutoff(&self) -> f64 { self.params.cutoff }

    pub fn set_cutoff(&mut self, cutoff: f64) { self.params.cutoff = cutoff; }

    pub fn min_m(&self) -> usize { self.params.min_m }

    pub fn set_min_m(&mut self, min_m: usize) { self.params.min_m = min_m; }

    pub fn max_m(&self) -> usize { self.params.max_m }

    pub fn set_max_m(&mut self, max_m: usize) { self.params.max_m = max_m; }

    pub fn truncate(&self) -> bool { self.params.truncate }

    pub fn set_truncate(&mut self, truncate: bool) {
        self.params.truncate = truncate;
    }

    pub fn show_eigs(&self) -> bool { self.params.show_eigs }

    pub fn set_show_eigs(&mut self, show_eigs: bool) {
        self.params.show_eigs = show_eigs;
    }

    pub fn do_rel_cutoff(&self) -> bool { self.params.do_rel_cutoff }

    pub fn set_do_rel_cutoff(&mut self, do_rel_cutoff: bool) {
        self.params.do_rel_cutoff = do_rel_cutoff;
    }

    pub fn absolute_cutoff(&self) -> bool { self.params.absolute_cutoff }

    pub fn set_absolute_cutoff(&mut self, absolute_cutoff: bool) {
        self.params.absolute_cutoff = absolute_cutoff;
    }

    pub fn ref_norm(&self) -> LogNumber { self.params.ref_norm }

    /// Set the reference norm for relative truncation.
    ///
    /// Fails if `ref_norm` is zero.
    pub fn set_ref_norm(&mut self, ref_norm: LogNumber) -> WorkerResult<()> {
        if ref_norm.is_zero() { return Err(ZeroRefNorm); }
        self.params.ref_norm = ref_norm;
        Ok(())
    }

    /// Return the truncation error last recorded at bond `b` (1-based).
    pub fn truncerr(&self, b: usize) -> WorkerResult<f64> {
        self.bond_idx(b).map(|k| self.truncerr[k])
    }

    /// Return the eigenvalues last kept at bond `b` (1-based), in descending
    /// order.
    pub fn eigs_kept(&self, b: usize) -> WorkerResult<&[f64]> {
        self.bond_idx(b).map(|k| self.eigs_kept[k].as_slice())
    }

    /// Return the largest number of eigenvalues kept at any bond.
    pub fn max_eigs_kept(&self) -> usize {
        self.eigs_kept.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Return the largest truncation error recorded at any bond.
    pub fn max_truncerr(&self) -> f64 {
        self.truncerr.iter().copied().fold(0.0, f64::max)
    }

    fn record(&mut self, k: usize, truncerr: f64, eigs: Vec<f64>) {
        self.truncerr[k] = truncerr;
        self.eigs_kept[k] = eigs;
    }

    /// Factorize `aa` across bond `b` (1-based) into `a` and `bt`.
    ///
    /// On entry, `a` and `bt` must carry the legs each factor is to end up
    /// with; only their legs are read. A link leg shared by both is taken as
    /// the current bond leg, which is replaced by a new one. If they share no
    /// link leg, a one-dimensional placeholder named `mid` stands in for it.
    ///
    /// The factor being orthogonalized (`a` for [`Direction::FromLeft`], `bt`
    /// otherwise) receives the kept eigenvectors of the density matrix over
    /// its own legs; the other receives the rest of `aa`. If the orthogonalized
    /// factor has no link legs of its own, no diagonalization is needed and the
    /// factorization is a pure reshape, recording a flat spectrum.
    ///
    /// For block-sparse tensors the orthogonalized factor has zero flux and the
    /// other carries the flux of `aa`; the two copies of the new bond leg have
    /// opposite arrows and equal charges.
    ///
    /// A composite tensor with no stored elements zeroes both factors and
    /// records a single eigenvalue of 1.
    pub fn decompose<T>(
        &mut self,
        b: usize,
        aa: &T,
        a: &mut T,
        bt: &mut T,
        dir: Direction,
    ) -> WorkerResult<()>
    where T: BondTensor
    {
        let k = self.bond_idx(b)?;
        if aa.is_void() {
            a.zero_out();
            bt.zero_out();
            self.record(k, 0.0, vec![1.0]);
            debug!(bond = b, kept = 1, "decompose: composite tensor has no elements");
            return Ok(());
        }

        let legs_b = bt.leg_list();
        let mid: T::Leg
            = a.leg_list().into_iter()
            .find(|l| l.category() == Category::Link && legs_b.contains(l))
            .unwrap_or_else(|| T::Leg::placeholder("mid"));

        let (dir, edge_allowed)
            = match dir {
                Direction::Either if mid.arrow() == Arrow::Out => (Direction::FromRight, false),
                Direction::Either => (Direction::FromLeft, false),
                d => (d, true),
            };
        let (to_orth, newoc): (&mut T, &mut T)
            = match dir {
                Direction::FromLeft => (a, bt),
                _ => (bt, a),
            };

        let mut comb = T::Combiner::default();
        let mut unique_links: usize = 0;
        for l in to_orth.leg_list() {
            if newoc.has_leg(&l) || l.is_reim() { continue; }
            if l.category() == Category::Link { unique_links += 1; }
            comb.add_left(l)?;
        }
        let active = comb.init(mid.raw_name(), Category::Link, Arrow::Out, 0)?;

        if unique_links == 0 && edge_allowed {
            let m = active.dim();
            *newoc = comb.apply(aa)?;
            *to_orth = comb.to_tensor()?.conj();
            self.record(k, 0.0, vec![1.0 / m as f64; m]);
            debug!(bond = b, kept = m, "decompose: end-of-chain reshape");
            return Ok(());
        }

        let aac = comb.apply(aa)?;
        let mut aacc = aac.conj();
        aacc.prime_leg(&active, 1);
        let rho = aac.contract(&aacc)?;

        let params
            = if self.params.truncate {
                self.params
            } else {
                self.params.forced(mid.dim())
            };
        let Diagonalized { truncerr, eigs, u } = rho.diag_denmat(&active, &params)?;

        *to_orth = comb.apply(&u)?;
        *newoc = u.conj().contract(&aac)?;
        debug!(
            bond = b,
            kept = eigs.len(),
            truncerr,
            direction = ?dir,
            "decompose: density matrix diagonalized"
        );
        self.record(k, truncerr, eigs);
        Ok(())
    }

    /// Factorize across the first bond.
    pub fn decompose_single<T>(&mut self, aa: &T, a: &mut T, bt: &mut T, dir: Direction)
        -> WorkerResult<()>
    where T: BondTensor
    {
        self.decompose(1, aa, a, bt, dir)
    }
}

impl Persist for SvdWorker {
    fn write_to<W>(&self, w: &mut W) -> PersistResult<()>
    where W: Write + ?Sized
    {
        write_len(w, self.num_bonds())?;
        self.truncerr.iter().try_for_each(|e| write_f64(w, *e))?;
        write_f64(w, self.params.cutoff)?;
        write_len(w, self.params.min_m)?;
        write_len(w, self.params.max_m)?;
        write_bool(w, self.params.truncate)?;
        write_bool(w, self.params.show_eigs)?;
        write_bool(w, self.params.do_rel_cutoff)?;
        write_bool(w, self.params.absolute_cutoff)?;
        self.params.ref_norm.write_to(w)?;
        self.eigs_kept.iter().try_for_each(|eigs| write_vec(w, eigs))?;
        Ok(())
    }

    fn read_from<R>(r: &mut R) -> PersistResult<Self>
    where R: Read + ?Sized
    {
        let n = read_len(r)?;
        let truncerr: Vec<f64> = (0..n).map(|_| read_f64(r)).collect::<PersistResult<_>>()?;
        let cutoff = read_f64(r)?;
        let min_m = read_len(r)?;
        let max_m = read_len(r)?;
        let truncate = read_bool(r)?;
        let show_eigs = read_bool(r)?;
        let do_rel_cutoff = read_bool(r)?;
        let absolute_cutoff = read_bool(r)?;
        let ref_norm = LogNumber::read_from(r)?;
        if ref_norm.is_zero() {
            return Err(PersistError::Inconsistent("zero reference norm".into()));
        }
        let eigs_kept: Vec<Vec<f64>>
            = (0..n).map(|_| read_vec(r)).collect::<PersistResult<_>>()?;
        let params = TruncParams {
            cutoff,
            min_m,
            max_m,
            truncate,
            show_eigs,
            do_rel_cutoff,
            absolute_cutoff,
            ref_norm,
        };
        Ok(Self { truncerr, eigs_kept, params })
    }
}

//! Density-matrix diagonalization and spectrum truncation.
//!
//! The eigendecomposition itself is done by `ndarray-linalg`'s Hermitian
//! solver; this module decides how many eigenpairs survive and packages them
//! back into a tensor joined to a fresh bond leg.

use std::cmp::Ordering;
use ndarray as nd;
use ndarray_linalg::{ Eigh, UPLO };
use tracing::info;
use crate::{
    Elem,
    block::BlockTensor,
    leg::Leg,
    lognum::LogNumber,
    real_f64,
    symleg::{ Block, SymmetryLeg },
    tensor::{ Tensor, TensorError },
    worker::{ WorkerError, WorkerResult },
};

/// Default truncation cutoff.
pub const MIN_CUT: f64 = 1e-20;

/// Default maximum number of kept eigenvalues.
pub const MAX_M: usize = 5000;

/// Truncation policy for a density-matrix decomposition.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncParams {
    /// Weight (or eigenvalue, in absolute mode) below which eigenvalues are
    /// discarded.
    pub cutoff: f64,
    /// Minimum number of eigenvalues to keep, if available.
    pub min_m: usize,
    /// Hard maximum on the number of eigenvalues kept.
    pub max_m: usize,
    /// If `false`, decompositions keep exactly the current bond dimension.
    pub truncate: bool,
    /// Log the kept spectrum after every diagonalization.
    pub show_eigs: bool,
    /// Normalize discarded weight by the density-matrix trace instead of
    /// `ref_norm`.
    pub do_rel_cutoff: bool,
    /// Compare raw eigenvalues to `cutoff` instead of cumulative weight.
    pub absolute_cutoff: bool,
    /// Reference norm for relative truncation.
    pub ref_norm: LogNumber,
}

impl Default for TruncParams {
    fn default() -> Self {
        Self {
            cutoff: MIN_CUT,
            min_m: 1,
            max_m: MAX_M,
            truncate: true,
            show_eigs: false,
            do_rel_cutoff: false,
            absolute_cutoff: false,
            ref_norm: LogNumber::default(),
        }
    }
}

impl TruncParams {
    /// Set the cutoff.
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Set the minimum kept dimension.
    pub fn with_min_m(mut self, min_m: usize) -> Self {
        self.min_m = min_m;
        self
    }

    /// Set the maximum kept dimension.
    pub fn with_max_m(mut self, max_m: usize) -> Self {
        self.max_m = max_m;
        self
    }

    /// Turn truncation on or off.
    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Turn spectrum logging on or off.
    pub fn with_show_eigs(mut self, show_eigs: bool) -> Self {
        self.show_eigs = show_eigs;
        self
    }

    /// Turn trace normalization on or off.
    pub fn with_do_rel_cutoff(mut self, do_rel_cutoff: bool) -> Self {
        self.do_rel_cutoff = do_rel_cutoff;
        self
    }

    /// Turn absolute-cutoff mode on or off.
    pub fn with_absolute_cutoff(mut self, absolute_cutoff: bool) -> Self {
        self.absolute_cutoff = absolute_cutoff;
        self
    }

    /// Set the reference norm.
    pub fn with_ref_norm(mut self, ref_norm: LogNumber) -> Self {
        self.ref_norm = ref_norm;
        self
    }

    /// Return the policy used when truncation is turned off: accept every
    /// eigenvalue, but keep exactly `dim` of them.
    pub fn forced(self, dim: usize) -> Self {
        Self { cutoff: -1.0, min_m: dim, max_m: dim, ..self }
    }
}

/// Truncate a spectrum according to `params`, returning the truncation
/// error.
///
/// `eigs` must be sorted in descending order. Negative values (round-off from
/// the eigensolver) are set to zero first. At least one eigenvalue is always
/// kept. The truncation error is the discarded weight divided by the total
/// weight.
pub fn truncate_spectrum(eigs: &mut Vec<f64>, params: &TruncParams) -> f64 {
    eigs.iter_mut().for_each(|e| { *e = e.max(0.0); });
    let trace: f64 = eigs.iter().sum();
    let scale: f64 = {
        let s = if params.do_rel_cutoff { trace } else { params.ref_norm.real().abs() };
        if s == 0.0 { 1.0 } else { s }
    };
    let mut kept: usize = eigs.len();
    let mut discarded: f64 = 0.0;
    while kept > 1 {
        let next = eigs[kept - 1];
        let small
            = if params.absolute_cutoff {
                next < params.cutoff
            } else {
                (discarded + next) / scale < params.cutoff
            };
        if kept > params.max_m || (kept > params.min_m && small) {
            discarded += next;
            kept -= 1;
        } else {
            break;
        }
    }
    let n_discarded = eigs.len() - kept;
    eigs.truncate(kept);
    let truncerr = if trace > 0.0 { discarded / trace } else { 0.0 };
    if params.show_eigs {
        info!(
            kept,
            discarded = n_discarded,
            truncerr,
            eigs = ?eigs,
            "density matrix spectrum"
        );
    }
    truncerr
}

/// Output of a density-matrix diagonalization.
#[derive(Clone, Debug)]
pub struct Diagonalized<T> {
    /// Discarded weight over total weight.
    pub truncerr: f64,
    /// Kept eigenvalues, in descending order.
    pub eigs: Vec<f64>,
    /// Kept eigenvectors, over the active leg and a new bond leg.
    pub u: T,
}

fn descending(a: &f64, b: &f64) -> Ordering { b.total_cmp(a) }

/// Diagonalize a dense density matrix over `active` and `active'`.
///
/// The new bond leg is a fresh leg named after `active` with the kept
/// dimension.
pub fn diag_dense<A>(
    rho: &Tensor<Leg, A>,
    active: &Leg,
    params: &TruncParams,
) -> WorkerResult<Diagonalized<Tensor<Leg, A>>>
where A: Elem
{
    let m = active.dim();
    let (_, data) = rho.permuted_to(&[active.clone(), active.primed(1)])?.into_flat();
    let mat: nd::Array2<A>
        = data.into_shape((m, m)).map_err(TensorError::from)?;
    let (evals, evecs) = mat.eigh(UPLO::Lower)?;
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| descending(&real_f64(evals[i]), &real_f64(evals[j])));
    let mut eigs: Vec<f64> = order.iter().map(|&k| real_f64(evals[k])).collect();
    let truncerr = truncate_spectrum(&mut eigs, params);
    let newmid = Leg::new(active.raw_name(), eigs.len(), active.category())?;
    let u: Tensor<Leg, A>
        = Tensor::new([active.clone(), newmid], |ix| evecs[[ix[0], order[ix[1]]]]);
    Ok(Diagonalized { truncerr, eigs, u })
}

// eigenpairs of one charge sector, sorted descending
struct Sector<A> {
    sector: usize,
    eigs: Vec<f64>,
    order: Vec<usize>,
    evecs: nd::Array2<A>,
}

/// Diagonalize a block-sparse density matrix over `active` and `active'`,
/// sector by sector.
///
/// Fails if `rho` stores a block coupling two different sectors, which
/// happens only when the composite tensor it was built from does not have a
/// single flux.
///
/// The kept eigenpairs are chosen from the merged spectrum of all sectors.
/// The new bond leg has one block for every sector that keeps at least one
/// eigenpair, carrying that sector's charge, and the opposite orientation to
/// `active`.
pub fn diag_blocks<A>(
    rho: &BlockTensor<A>,
    active: &SymmetryLeg,
    params: &TruncParams,
) -> WorkerResult<Diagonalized<BlockTensor<A>>>
where A: Elem
{
    let primed = active.primed(1);
    let missing = |l: &SymmetryLeg| TensorError::MissingLeg(l.name());
    let pa = rho.position(active).ok_or_else(|| missing(active))?;
    let pp = rho.position(&primed).ok_or_else(|| missing(&primed))?;
    if rho.rank() != 2 { return Err(TensorError::LegSetMismatch.into()); }

    let mut sectors: Vec<Sector<A>> = Vec::new();
    for (key, data) in rho.blocks() {
        if key[pa] != key[pp] {
            return Err(WorkerError::OffDiagonalBlock(key.to_vec()));
        }
        let mat: nd::Array2<A>
            = data.view()
            .permuted_axes(vec![pa, pp])
            .into_dimensionality::<nd::Ix2>()
            .map_err(TensorError::from)?
            .as_standard_layout()
            .into_owned();
        let (evals, evecs) = mat.eigh(UPLO::Lower)?;
        let mut order: Vec<usize> = (0..evals.len()).collect();
        order.sort_by(|&i, &j| descending(&real_f64(evals[i]), &real_f64(evals[j])));
        let eigs: Vec<f64> = order.iter().map(|&k| real_f64(evals[k])).collect();
        sectors.push(Sector { sector: key[pa], eigs, order, evecs });
    }
    if sectors.is_empty() { return Err(WorkerError::EmptyDensityMatrix); }
    sectors.sort_by_key(|s| s.sector);

    // (eigenvalue, position in `sectors`, rank within that sector)
    let mut merged: Vec<(f64, usize, usize)>
        = sectors.iter().enumerate()
        .flat_map(|(s, sec)| {
            sec.eigs.iter().enumerate().map(move |(r, e)| (*e, s, r))
        })
        .collect();
    merged.sort_by(|a, b| descending(&a.0, &b.0));
    let mut eigs: Vec<f64> = merged.iter().map(|(e, ..)| *e).collect();
    let truncerr = truncate_spectrum(&mut eigs, params);

    // eigenvalues are taken in descending order within each sector, so
    // keeping the top of the merged list keeps a prefix of every sector
    let mut n_kept: Vec<usize> = vec![0; sectors.len()];
    merged.iter().take(eigs.len()).for_each(|(_, s, _)| { n_kept[*s] += 1; });

    let mut blocks: Vec<Block> = Vec::new();
    let mut surviving: Vec<(usize, usize)> = Vec::new();
    for (s, (sec, n)) in sectors.iter().zip(&n_kept).enumerate() {
        if *n == 0 { continue; }
        let leg = Leg::new(active.raw_name(), *n, active.category())?;
        blocks.push(Block::new(leg, active.block_qn(sec.sector)?));
        surviving.push((s, *n));
    }
    let newmid = SymmetryLeg::new(active.raw_name(), blocks, active.arrow().flipped())?;

    let mut u: BlockTensor<A> = BlockTensor::new([active.clone(), newmid]);
    for (j, (s, n)) in surviving.into_iter().enumerate() {
        let sec = &sectors[s];
        let block: nd::Array2<A>
            = nd::Array2::from_shape_fn(
                (sec.evecs.nrows(), n),
                |(i, k)| sec.evecs[[i, sec.order[k]]],
            );
        u.insert_block(&[sec.sector, j], block.into_dyn())?;
    }
    Ok(Diagonalized { truncerr, eigs, u })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use crate::{ leg::Arrow, qn::QN };
    use super::*;

    fn spectrum() -> Vec<f64> { vec![0.5, 0.3, 0.1, 0.06, 0.04] }

    #[test]
    fn cutoff_zero_keeps_everything() {
        let mut eigs = spectrum();
        let params = TruncParams::default().with_cutoff(0.0);
        let err = truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs.len(), 5);
        assert_eq!(err, 0.0);
    }

    #[test]
    fn relative_cutoff_accumulates() {
        let mut eigs = spectrum();
        let params = TruncParams::default().with_cutoff(0.12);
        let err = truncate_spectrum(&mut eigs, &params);
        // 0.04 + 0.06 = 0.10 < 0.12, adding 0.1 would exceed
        assert_eq!(eigs.len(), 3);
        assert_abs_diff_eq!(err, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn absolute_cutoff_compares_values() {
        let mut eigs = spectrum();
        let params
            = TruncParams::default()
            .with_cutoff(0.07)
            .with_absolute_cutoff(true);
        truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs, vec![0.5, 0.3, 0.1]);
    }

    #[test]
    fn bounds_are_respected() {
        let mut eigs = spectrum();
        let params = TruncParams::default().with_cutoff(0.0).with_max_m(2);
        let err = truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs.len(), 2);
        assert_abs_diff_eq!(err, 0.2, epsilon = 1e-12);

        let mut eigs = spectrum();
        let params = TruncParams::default().with_cutoff(10.0).with_min_m(4);
        truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs.len(), 4);

        let mut eigs = spectrum();
        let params = TruncParams::default().with_cutoff(10.0).with_min_m(0);
        truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs.len(), 1);
    }

    #[test]
    fn monotone_in_cutoff() {
        let mut prev_kept = usize::MAX;
        let mut prev_err = -1.0;
        for cutoff in [0.0, 1e-3, 0.05, 0.11, 0.3, 0.9] {
            let mut eigs = spectrum();
            let params = TruncParams::default().with_cutoff(cutoff);
            let err = truncate_spectrum(&mut eigs, &params);
            assert!(eigs.len() <= prev_kept);
            assert!(err >= prev_err);
            prev_kept = eigs.len();
            prev_err = err;
        }
    }

    #[test]
    fn forced_keeps_dimension() {
        let mut eigs = spectrum();
        let params = TruncParams::default().with_cutoff(0.5).forced(3);
        truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs.len(), 3);
    }

    #[test]
    fn negative_roundoff_is_clamped() {
        let mut eigs = vec![1.0, -1e-17];
        let params = TruncParams::default().with_cutoff(0.0);
        let err = truncate_spectrum(&mut eigs, &params);
        assert_eq!(eigs, vec![1.0, 0.0]);
        assert_eq!(err, 0.0);
    }

    #[test]
    fn dense_diagonalization() {
        let a = Leg::link("a", 2);
        let rho: Tensor<Leg, f64>
            = Tensor::from_elems([a.clone(), a.primed(1)], vec![2.0, 1.0, 1.0, 2.0])
            .unwrap();
        let d = diag_dense(&rho, &a, &TruncParams::default()).unwrap();
        assert_abs_diff_eq!(d.eigs[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.eigs[1], 1.0, epsilon = 1e-12);
        assert_eq!(d.u.shape(), vec![2, 2]);
        let v0 = d.u.get(&[0, 0]).unwrap().abs();
        assert_abs_diff_eq!(v0, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
    }

    fn charged(name: &str) -> SymmetryLeg {
        SymmetryLeg::new(
            name,
            [
                Block::new(Leg::link(&format!("{name}0"), 1), QN::new(0, 0)),
                Block::new(Leg::link(&format!("{name}1"), 2), QN::new(1, 0)),
            ],
            Arrow::Out,
        )
        .unwrap()
    }

    #[test]
    fn block_diagonalization_by_sector() {
        let a = charged("a");
        let mut rho: BlockTensor<f64> = BlockTensor::new([a.clone(), a.primed(1).dual()]);
        rho.insert_block(&[0, 0], nd::arr2(&[[0.25]]).into_dyn()).unwrap();
        rho.insert_block(&[1, 1], nd::arr2(&[[0.5, 0.0], [0.0, 0.125]]).into_dyn()).unwrap();
        let d = diag_blocks(&rho, &a, &TruncParams::default().with_max_m(2)).unwrap();
        assert_eq!(d.eigs.len(), 2);
        assert_abs_diff_eq!(d.eigs[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(d.eigs[1], 0.25, epsilon = 1e-12);
        let mid = &d.u.legs()[1];
        assert_eq!(mid.arrow(), Arrow::In);
        assert_eq!(mid.block_count(), 2);
        assert!(d.u.blocks().all(|(key, _)| d.u.flux_of(key) == QN::default()));
    }

    #[test]
    fn off_diagonal_block_is_an_error() {
        let a = charged("a");
        let mut rho: BlockTensor<f64> = BlockTensor::new([a.clone(), a.primed(1).dual()]);
        rho.insert_block(&[0, 0], nd::arr2(&[[1.0]]).into_dyn()).unwrap();
        rho.insert_block(&[0, 1], nd::arr2(&[[0.1, 0.2]]).into_dyn()).unwrap();
        let res = diag_blocks(&rho, &a, &TruncParams::default());
        assert!(matches!(res, Err(WorkerError::OffDiagonalBlock(key)) if key == vec![0, 1]));
    }
}

use approx::assert_abs_diff_eq;
use ndarray as nd;
use num_complex::Complex64 as C64;
use tensor_bond::{
    block::BlockTensor,
    leg::{ Arrow, Leg },
    observer::{ EnergyObserver, SweepObserver },
    qn::QN,
    symleg::{ Block, SymmetryLeg },
    tensor::Tensor,
    worker::{ Direction, SvdWorker, WorkerError },
};

fn wave(ix: &[usize]) -> f64 {
    let h = ix.iter().fold(1_usize, |acc, i| acc * 7 + i * 3 + 1);
    (h as f64 * 0.37).sin() + 0.1
}

fn shared_leg(a: &Tensor<Leg, f64>, b: &Tensor<Leg, f64>) -> Leg {
    a.legs().find(|l| b.has_index(l)).cloned().unwrap()
}

// checks that `t` is an isometry from its other legs onto `mid`
fn assert_isometry(t: &Tensor<Leg, f64>, mid: &Leg) {
    let mut tc = t.conj();
    tc.prime_leg(mid, 1);
    let gram = t.contract(&tc).unwrap();
    let id: Tensor<Leg, f64> = Tensor::delta(mid.clone(), mid.primed(1)).unwrap();
    assert!(gram.approx_eq(&id, 1e-10));
}

#[test]
fn link_legs_are_diagonalized() {
    let (l, s1, s2, r)
        = (Leg::link("l", 2), Leg::site("s1", 2), Leg::site("s2", 2), Leg::link("r", 2));
    let aa: Tensor<Leg, f64>
        = Tensor::new([l.clone(), s1.clone(), s2.clone(), r.clone()], wave);
    let mut a: Tensor<Leg, f64> = Tensor::zeros([l, s1]);
    let mut b: Tensor<Leg, f64> = Tensor::zeros([s2, r]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();

    let mid = shared_leg(&a, &b);
    assert_eq!(mid.dim(), 4);
    assert_eq!(mid.raw_name(), "mid");
    assert_eq!(worker.eigs_kept(1).unwrap().len(), 4);
    assert_abs_diff_eq!(worker.truncerr(1).unwrap(), 0.0, epsilon = 1e-12);
    assert!(a.contract(&b).unwrap().approx_eq(&aa, 1e-10));
    assert_isometry(&a, &mid);

    let eigs = worker.eigs_kept(1).unwrap();
    assert!(eigs.windows(2).all(|w| w[0] >= w[1]));
    let weight: f64 = eigs.iter().sum();
    assert_abs_diff_eq!(weight, aa.norm().powi(2), epsilon = 1e-10);
}

#[test]
fn chain_edge_is_a_reshape() {
    let (s1, s2) = (Leg::site("s1", 2), Leg::site("s2", 2));
    let aa: Tensor<Leg, f64> = Tensor::new([s1.clone(), s2.clone()], wave);
    let mut a: Tensor<Leg, f64> = Tensor::zeros([s1]);
    let mut b: Tensor<Leg, f64> = Tensor::zeros([s2]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.set_max_m(4);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();

    assert!(shared_leg(&a, &b).dim() <= 4);
    assert_eq!(worker.eigs_kept(1).unwrap(), &[0.5, 0.5]);
    assert_eq!(worker.truncerr(1).unwrap(), 0.0);
    assert!(a.contract(&b).unwrap().approx_eq(&aa, 1e-12));
}

#[test]
fn either_resolves_and_skips_edge() {
    let (s1, s2) = (Leg::site("s1", 2), Leg::site("s2", 2));
    let aa: Tensor<Leg, f64> = Tensor::new([s1.clone(), s2.clone()], wave);
    let mut a: Tensor<Leg, f64> = Tensor::zeros([s1]);
    let mut b: Tensor<Leg, f64> = Tensor::zeros([s2]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::Either).unwrap();

    // plain legs point out, so the right factor is orthogonalized
    let mid = shared_leg(&a, &b);
    assert_isometry(&b, &mid);
    assert!(a.contract(&b).unwrap().approx_eq(&aa, 1e-10));
    let weight: f64 = worker.eigs_kept(1).unwrap().iter().sum();
    assert_abs_diff_eq!(weight, aa.norm().powi(2), epsilon = 1e-10);
}

#[test]
fn untruncated_keeps_bond_dimension() {
    let (l, s1, s2, r)
        = (Leg::link("l", 3), Leg::site("s1", 2), Leg::site("s2", 2), Leg::link("r", 3));
    let mid = Leg::link("bond", 2);
    let aa: Tensor<Leg, f64>
        = Tensor::new([l.clone(), s1.clone(), s2.clone(), r.clone()], wave);
    let mut a: Tensor<Leg, f64> = Tensor::zeros([l, s1, mid.clone()]);
    let mut b: Tensor<Leg, f64> = Tensor::zeros([mid, s2, r]);

    let mut worker = SvdWorker::new(1);
    worker.set_truncate(false);
    worker.set_cutoff(0.5);
    worker.set_max_m(1);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();

    let newmid = shared_leg(&a, &b);
    assert_eq!(newmid.dim(), 2);
    assert_eq!(newmid.raw_name(), "bond");
    assert_eq!(worker.eigs_kept(1).unwrap().len(), 2);
    assert_eq!(worker.cutoff(), 0.5);
    assert_eq!(worker.max_m(), 1);
}

#[test]
fn kept_dimension_is_bounded_and_monotone() {
    let (l, s1, s2, r)
        = (Leg::link("l", 3), Leg::site("s1", 2), Leg::site("s2", 2), Leg::link("r", 3));
    let aa: Tensor<Leg, f64>
        = Tensor::new([l.clone(), s1.clone(), s2.clone(), r.clone()], wave);

    let mut prev_kept = usize::MAX;
    let mut prev_err = -1.0;
    for cutoff in [0.0, 1e-6, 1e-3, 1e-2, 1e-1] {
        let mut a: Tensor<Leg, f64> = Tensor::zeros([l.clone(), s1.clone()]);
        let mut b: Tensor<Leg, f64> = Tensor::zeros([s2.clone(), r.clone()]);
        let mut worker = SvdWorker::new(1);
        worker.set_cutoff(cutoff);
        worker.set_max_m(5);
        worker.set_min_m(2);
        worker.set_do_rel_cutoff(true);
        worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();
        let kept = worker.eigs_kept(1).unwrap().len();
        let err = worker.truncerr(1).unwrap();
        assert!((2..=5).contains(&kept));
        assert_eq!(shared_leg(&a, &b).dim(), kept);
        assert!(kept <= prev_kept);
        assert!(err >= prev_err);
        prev_kept = kept;
        prev_err = err;
    }
}

#[test]
fn complex_elements() {
    let (l, s1, s2, r)
        = (Leg::link("l", 2), Leg::site("s1", 2), Leg::site("s2", 2), Leg::link("r", 2));
    let aa: Tensor<Leg, C64>
        = Tensor::new(
            [l.clone(), s1.clone(), s2.clone(), r.clone()],
            |ix| C64::new(wave(ix), wave(&[ix[3], ix[2], ix[1], ix[0]])),
        );
    let mut a: Tensor<Leg, C64> = Tensor::zeros([l, s1]);
    let mut b: Tensor<Leg, C64> = Tensor::zeros([s2, r]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();
    assert!(a.contract(&b).unwrap().approx_eq(&aa, 1e-10));
    let weight: f64 = worker.eigs_kept(1).unwrap().iter().sum();
    assert_abs_diff_eq!(weight, aa.norm().powi(2), epsilon = 1e-10);
}

#[test]
fn bond_index_is_checked() {
    let (s1, s2) = (Leg::site("s1", 2), Leg::site("s2", 2));
    let aa: Tensor<Leg, f64> = Tensor::new([s1.clone(), s2.clone()], wave);
    let mut a: Tensor<Leg, f64> = Tensor::zeros([s1]);
    let mut b: Tensor<Leg, f64> = Tensor::zeros([s2]);
    let mut worker = SvdWorker::new(1);
    let res = worker.decompose(2, &aa, &mut a, &mut b, Direction::FromLeft);
    assert!(matches!(res, Err(WorkerError::BondOutOfRange { bond: 2, n: 1 })));
    assert!(worker.decompose_single(&aa, &mut a, &mut b, Direction::FromLeft).is_ok());
}

fn spin(name: &str) -> SymmetryLeg {
    SymmetryLeg::new(
        name,
        [
            Block::new(Leg::site(&format!("{name}+"), 1), QN::new(1, 0)),
            Block::new(Leg::site(&format!("{name}-"), 1), QN::new(-1, 0)),
        ],
        Arrow::Out,
    )
    .unwrap()
}

// a charge-conserving three-leg tensor: q(l) = q(s1) + q(s2)
fn block_setup() -> (BlockTensor<f64>, SymmetryLeg, SymmetryLeg, SymmetryLeg) {
    let l = SymmetryLeg::new(
        "l",
        [
            Block::new(Leg::link("l0", 2), QN::new(0, 0)),
            Block::new(Leg::link("l2", 1), QN::new(2, 0)),
        ],
        Arrow::In,
    )
    .unwrap();
    let (s1, s2) = (spin("s1"), spin("s2"));
    let mut aa: BlockTensor<f64> = BlockTensor::new([l.clone(), s1.clone(), s2.clone()]);
    aa.insert_block(&[0, 0, 1], nd::arr3(&[[[0.8]], [[-0.3]]]).into_dyn()).unwrap();
    aa.insert_block(&[0, 1, 0], nd::arr3(&[[[0.2]], [[0.5]]]).into_dyn()).unwrap();
    aa.insert_block(&[1, 0, 0], nd::arr3(&[[[1.1]]]).into_dyn()).unwrap();
    (aa, l, s1, s2)
}

// every stored block carries the same flux; return it
fn single_flux(t: &BlockTensor<f64>) -> QN {
    let q = t.flux().unwrap();
    assert!(t.blocks().all(|(key, _)| t.flux_of(key) == q));
    q
}

fn shared_sym_leg(a: &BlockTensor<f64>, b: &BlockTensor<f64>) -> (SymmetryLeg, SymmetryLeg) {
    let on_a = a.legs().iter().find(|l| b.has_index(l)).cloned().unwrap();
    let on_b = b.legs()[b.position(&on_a).unwrap()].clone();
    (on_a, on_b)
}

#[test]
fn block_sectors_are_diagonalized_separately() {
    let (aa, l, s1, s2) = block_setup();
    let mut a: BlockTensor<f64> = BlockTensor::new([l, s1]);
    let mut b: BlockTensor<f64> = BlockTensor::new([s2]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();

    assert_eq!(worker.eigs_kept(1).unwrap().len(), 5);
    let full = a.contract(&b).unwrap().to_dense();
    assert!(full.approx_eq(&aa.to_dense(), 1e-10));
}

#[test]
fn block_factors_conserve_charge() {
    for dir in [Direction::FromLeft, Direction::FromRight] {
        let (aa, l, s1, s2) = block_setup();
        let flux = single_flux(&aa);
        let r = SymmetryLeg::new(
            "r",
            [
                Block::new(Leg::link("r0", 1), QN::new(0, 0)),
                Block::new(Leg::link("r1", 1), QN::new(1, 0)),
            ],
            Arrow::Out,
        )
        .unwrap();
        // extend by a neutral outer link so both sides need a diagonalization
        let mut aar: BlockTensor<f64>
            = BlockTensor::new([l.clone(), s1.clone(), s2.clone(), r.clone()]);
        for (key, data) in aa.blocks() {
            let mut k = key.to_vec();
            k.push(0);
            let shape: Vec<usize> = data.shape().iter().copied().chain([1]).collect();
            aar.insert_block(&k, data.clone().into_shape(shape).unwrap()).unwrap();
        }
        let mut a: BlockTensor<f64> = BlockTensor::new([l.clone(), s1.clone()]);
        let mut b: BlockTensor<f64> = BlockTensor::new([s2.clone(), r.clone()]);

        let mut worker = SvdWorker::new(1);
        worker.set_cutoff(0.0);
        worker.decompose(1, &aar, &mut a, &mut b, dir).unwrap();

        let (mid_a, mid_b) = shared_sym_leg(&a, &b);
        assert_eq!(mid_a.arrow(), mid_b.arrow().flipped());
        assert!(mid_a.blocks().zip(mid_b.blocks()).all(|(x, y)| x.qn() == y.qn()));
        assert_eq!(single_flux(&a) + single_flux(&b), flux);
        let full = a.contract(&b).unwrap().to_dense();
        assert!(full.approx_eq(&aar.to_dense(), 1e-10));
    }
}

#[test]
fn block_chain_edge_is_a_reshape() {
    let (aa, l, s1, s2) = block_setup();
    let mut a: BlockTensor<f64> = BlockTensor::new([l, s1]);
    let mut b: BlockTensor<f64> = BlockTensor::new([s2]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromRight).unwrap();

    // the right factor has only a site leg, which splits into two sectors
    assert_eq!(worker.eigs_kept(1).unwrap(), &[0.5, 0.5]);
    assert_eq!(worker.truncerr(1).unwrap(), 0.0);
    let (mid_a, mid_b) = shared_sym_leg(&a, &b);
    assert_eq!(mid_a.dim(), 2);
    assert_eq!(mid_a.raw_name(), "mid");
    assert_eq!(mid_b.arrow(), Arrow::In);
    assert_eq!(single_flux(&a) + single_flux(&b), single_flux(&aa));
    let full = a.contract(&b).unwrap().to_dense();
    assert!(full.approx_eq(&aa.to_dense(), 1e-12));
}

#[test]
fn block_either_keeps_mid_arrow() {
    for arrow in [Arrow::In, Arrow::Out] {
        let (aa, l, s1, s2) = block_setup();
        let bond = SymmetryLeg::new(
            "bond",
            [Block::new(Leg::link("bond0", 1), QN::new(0, 0))],
            arrow,
        )
        .unwrap();
        let mut a: BlockTensor<f64> = BlockTensor::new([l, s1, bond.clone()]);
        let mut b: BlockTensor<f64> = BlockTensor::new([bond.dual(), s2]);

        let mut worker = SvdWorker::new(1);
        worker.set_cutoff(0.0);
        worker.decompose(1, &aa, &mut a, &mut b, Direction::Either).unwrap();

        let (mid_a, mid_b) = shared_sym_leg(&a, &b);
        assert_eq!(mid_a.raw_name(), "bond");
        assert_eq!(mid_a.arrow(), arrow);
        assert_eq!(mid_b.arrow(), arrow.flipped());
        assert_eq!(single_flux(&a) + single_flux(&b), single_flux(&aa));
        let full = a.contract(&b).unwrap().to_dense();
        assert!(full.approx_eq(&aa.to_dense(), 1e-10));
        let weight: f64 = worker.eigs_kept(1).unwrap().iter().sum();
        assert_abs_diff_eq!(weight, aa.norm().powi(2), epsilon = 1e-10);
    }
}

#[test]
fn block_truncation_keeps_dominant_sectors() {
    let (aa, l, s1, s2) = block_setup();
    let mut a: BlockTensor<f64> = BlockTensor::new([l, s1]);
    let mut b: BlockTensor<f64> = BlockTensor::new([s2]);

    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.set_max_m(2);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();

    // each sector of the composite has rank one
    let mid = a.legs().iter().find(|l| b.has_index(l)).cloned().unwrap();
    assert_eq!(mid.dim(), 2);
    assert_eq!(mid.block_count(), 2);
    assert_eq!(mid.arrow(), Arrow::In);
    assert_abs_diff_eq!(worker.truncerr(1).unwrap(), 0.0, epsilon = 1e-12);
    let full = a.contract(&b).unwrap().to_dense();
    assert!(full.approx_eq(&aa.to_dense(), 1e-10));
}

#[test]
fn empty_composite_keeps_one() {
    let (_, l, s1, s2) = block_setup();
    let aa: BlockTensor<f64> = BlockTensor::new([l.clone(), s1.clone(), s2.clone()]);
    let mut a: BlockTensor<f64> = BlockTensor::new([l, s1]);
    a.insert_block(&[1, 0], nd::arr2(&[[3.0]]).into_dyn()).unwrap();
    let mut b: BlockTensor<f64> = BlockTensor::new([s2]);

    let mut worker = SvdWorker::new(1);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();
    assert_eq!(worker.eigs_kept(1).unwrap(), &[1.0]);
    assert_eq!(a.norm(), 0.0);
}

#[test]
fn observer_sees_kept_dimension() {
    let (aa, l, s1, s2) = block_setup();
    let mut a: BlockTensor<f64> = BlockTensor::new([l, s1]);
    let mut b: BlockTensor<f64> = BlockTensor::new([s2]);
    let mut worker = SvdWorker::new(1);
    worker.set_cutoff(0.0);
    worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();

    let mut obs = EnergyObserver::new(1e-8);
    obs.set_quiet(true);
    obs.observe(1, 1, 1, &worker, -1.0);
    assert_eq!(obs.max_kept(), 5);
    assert!(!obs.should_stop(1, -1.0));
    assert_eq!(obs.max_kept(), 0);
}

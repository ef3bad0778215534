use tensor_bond::{
    leg::{ Arrow, Category, Leg, LegError, PrimeFilter },
    qn::QN,
    symleg::{ Block, SymLegError, SymmetryLeg },
};

fn sectors() -> SymmetryLeg {
    SymmetryLeg::new(
        "b",
        [
            Block::new(Leg::link("b0", 3), QN::new(0, 0)),
            Block::new(Leg::link("b1", 2), QN::new(1, 1)),
            Block::new(Leg::link("b2", 4), QN::new(-1, 1)),
        ],
        Arrow::In,
    )
    .unwrap()
}

#[test]
fn priming_preserves_identity() {
    let l = Leg::link("l", 3);
    let mut p = l.clone();
    p.prime(PrimeFilter::Both, 2);
    assert_ne!(p, l);
    assert_eq!(p.fingerprint(), l.fingerprint());
    assert_eq!(p.name(), "l''");
    assert_eq!(p.deprimed(), l);

    let mut s = Leg::site("s", 2);
    s.prime(PrimeFilter::Link, 1);
    assert_eq!(s.prime_level(), 0);
    s.prime(PrimeFilter::Site, 1);
    assert_eq!(s.prime_level(), 1);
    s.map_prime(1, 4, PrimeFilter::Both);
    assert_eq!(s.prime_level(), 4);
    s.noprime(PrimeFilter::Both);
    assert_eq!(s.prime_level(), 0);
}

#[test]
fn generic_constructor_rejects_reim_and_zero() {
    assert!(matches!(Leg::new("x", 2, Category::ReIm), Err(LegError::ReImCreation)));
    assert!(matches!(Leg::new("x", 0, Category::Link), Err(LegError::ZeroDim)));
    assert!(Leg::null().is_null());
    assert!(Leg::reim().is_reim());
}

#[test]
fn leg_values_are_range_checked() {
    let l = Leg::site("l", 2);
    assert_eq!(l.val(2).unwrap().val(), 2);
    assert!(l.val(0).is_err());
    assert!(l.val(3).is_err());
}

#[test]
fn sector_dimensions_sum() {
    let s = sectors();
    let total: usize = s.blocks().map(Block::dim).sum();
    assert_eq!(total, s.dim());
    assert_eq!(s.block_count(), 3);
    let last = s.block_leg(2).unwrap();
    assert_eq!(s.offset_of(last).unwrap() + last.dim(), s.dim());
    assert_eq!(s.offset_of(s.block_leg(1).unwrap()).unwrap(), 3);
    assert_eq!(s.qn_of(s.block_leg(1).unwrap()).unwrap(), QN::new(1, 1));
    assert!(matches!(s.offset_of(&Leg::link("z", 1)), Err(SymLegError::NoSuchBlock(_))));
    assert!(matches!(s.block_qn(3), Err(SymLegError::BlockOutOfRange(3, 3))));
}

#[test]
fn double_conjugation_is_identity() {
    let s = sectors();
    let cc = s.conj().conj();
    assert_eq!(cc, s);
    assert_eq!(cc.arrow(), Arrow::In);
    for k in 0..s.block_count() {
        assert_eq!(cc.block_qn(k).unwrap(), s.block_qn(k).unwrap());
    }
}

#[test]
fn priming_reaches_every_sector() {
    let mut s = sectors();
    s.prime(PrimeFilter::Link, 1);
    assert_eq!(s.prime_level(), 1);
    assert!(s.blocks().all(|b| b.leg().prime_level() == 1));
    s.noprime(PrimeFilter::Both);
    assert!(s.blocks().all(|b| b.leg().prime_level() == 0));
}

#[test]
fn charge_arithmetic() {
    let q = QN::new(1, 3) + QN::new(-1, 1);
    assert_eq!(q, QN::new(0, 4));
    assert_eq!(q.nfp(), 0);
    assert_eq!(q.fp(), 1);
    assert_eq!(-QN::new(2, 1), QN::with_parity(-2, -1, 1));
}

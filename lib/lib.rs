//! Truncated density-matrix factorization of tensor-network bonds.
//!
//! The central type is [`SvdWorker`][worker::SvdWorker], which splits a
//! two-site tensor into a pair of factors joined by a truncated bond leg,
//! keeping the dominant eigenvectors of the reduced density matrix on one side
//! of the bond. It works over plain legs ([`Leg`][leg::Leg], with dense
//! [`Tensor`][tensor::Tensor]s) and over quantum-number-decorated legs
//! ([`SymmetryLeg`][symleg::SymmetryLeg], with block-sparse
//! [`BlockTensor`][block::BlockTensor]s) through the [`BondTensor`][bond::BondTensor]
//! capability trait.
//!
//! ```
//! use tensor_bond::{
//!     leg::Leg,
//!     tensor::Tensor,
//!     worker::{ Direction, SvdWorker },
//! };
//!
//! let l = Leg::link("l", 2);
//! let r = Leg::link("r", 2);
//! let aa: Tensor<Leg, f64>
//!     = Tensor::from_elems([l.clone(), r.clone()], vec![0.6, 0.0, 0.0, 0.8])
//!     .unwrap();
//! let mut a: Tensor<Leg, f64> = Tensor::zeros([l]);
//! let mut b: Tensor<Leg, f64> = Tensor::zeros([r]);
//!
//! let mut worker = SvdWorker::new(1);
//! worker.set_cutoff(0.0);
//! worker.decompose(1, &aa, &mut a, &mut b, Direction::FromLeft).unwrap();
//! assert_eq!(worker.eigs_kept(1).unwrap().len(), 2);
//! assert!(a.contract(&b).unwrap().approx_eq(&aa, 1e-12));
//! ```

use ndarray_linalg::types::{ Lapack, Scalar };
use num_traits::ToPrimitive;

pub use num_complex::{ Complex32 as C32, Complex64 as C64 };

pub mod io;
pub mod qn;
pub mod leg;
pub mod symleg;
pub mod lognum;

pub mod tensor;
pub mod block;

pub mod combiner;
pub mod symcombiner;

pub mod bond;
pub mod denmat;
pub mod worker;
pub mod observer;

/// Element types usable in a truncated factorization: real or complex floats
/// with LAPACK support.
///
/// This is implemented automatically for `f32`, `f64`, [`C32`], and [`C64`].
pub trait Elem: Scalar + Lapack { }

impl<A> Elem for A where A: Scalar + Lapack { }

// all real types used by `Elem` fit in an f64
pub(crate) fn real_f64<R: ToPrimitive>(x: R) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

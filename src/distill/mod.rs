//! Probability density distillation
//!
//! The student is trained to match the teacher's per-sample Gaussian
//! predictions on the student's own output, plus a spectral loss keeping
//! the generated waveform close to the reference in magnitude.
//!
//! ## Alignment
//!
//! Teacher output `t` predicts sample `t + 1`, while student output `t`
//! describes sample `t`. The KL therefore pairs teacher step `t` with student
//! step `t + 1`, and the first student step is never compared.
//!
//! ## Example
//!
//! ```no_run
//! use wavedistill::distill::DistillationLoss;
//! # use wavedistill::model::{FlowOutput, GaussianParams, SignalDims};
//! # fn demo(
//! #     student: FlowOutput,
//! #     teacher: GaussianParams,
//! #     target: ndarray::Array2<f32>,
//! # ) -> wavedistill::Result<()> {
//! let loss_fn = DistillationLoss::new(-7.0, 22050);
//! let dims = SignalDims::new(1, target.ncols());
//! let loss = loss_fn.forward(&student, &teacher, &target, &[target.ncols()], dims)?;
//! println!("kl {:.4}", loss.kl.item());
//! # Ok(())
//! # }
//! ```

mod kl;
mod loss;
mod mask;
mod power;

pub use kl::{gaussian_kl, masked_gaussian_kl};
pub use loss::{DistillationLoss, LossBreakdown};
pub use mask::shifted_mask;
pub use power::{PowerLoss, SpectralBand};

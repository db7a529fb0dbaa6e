//! Adam optimizer with coupled L2 weight decay and optional AMSGrad

use super::Optimizer;
use crate::Tensor;
use ndarray::{Array1, Zip};

/// Adam optimizer
///
/// Weight decay is applied as an L2 term added to the gradient before the
/// moment updates, so it is scaled by the adaptive denominator:
///
/// g_t = ∇θ + λ θ_{t-1}
/// m_t = β1 m_{t-1} + (1 - β1) g_t
/// v_t = β2 v_{t-1} + (1 - β2) g_t²
/// θ_t = θ_{t-1} - lr / (1 - β1^t) · m_t / (√(v̂_t / (1 - β2^t)) + ε)
///
/// where v̂_t is v_t, or the running maximum of v_t with AMSGrad.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    amsgrad: bool,
    t: u64,
    m: Vec<Option<Array1<f32>>>,
    v: Vec<Option<Array1<f32>>>,
    v_max: Vec<Option<Array1<f32>>>,
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            weight_decay: 0.0,
            amsgrad: false,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
            v_max: Vec::new(),
        }
    }

    /// Create Adam with default parameters
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    /// Add an L2 penalty to every gradient
    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Keep the running maximum of the second moment
    #[must_use]
    pub fn with_amsgrad(mut self, amsgrad: bool) -> Self {
        self.amsgrad = amsgrad;
        self
    }

    fn ensure_slots(&mut self, n: usize) {
        if self.m.len() < n {
            self.m.resize(n, None);
            self.v.resize(n, None);
            self.v_max.resize(n, None);
        }
    }

    /// Get optimizer step counter.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.t
    }

    /// Set optimizer step counter (for checkpoint resume).
    pub fn set_step_count(&mut self, t: u64) {
        self.t = t;
    }

    #[must_use]
    pub fn first_moments(&self) -> &[Option<Array1<f32>>] {
        &self.m
    }

    #[must_use]
    pub fn second_moments(&self) -> &[Option<Array1<f32>>] {
        &self.v
    }

    #[must_use]
    pub fn max_second_moments(&self) -> &[Option<Array1<f32>>] {
        &self.v_max
    }

    pub fn set_first_moment(&mut self, idx: usize, data: Array1<f32>) {
        self.ensure_slots(idx + 1);
        self.m[idx] = Some(data);
    }

    pub fn set_second_moment(&mut self, idx: usize, data: Array1<f32>) {
        self.ensure_slots(idx + 1);
        self.v[idx] = Some(data);
    }

    pub fn set_max_second_moment(&mut self, idx: usize, data: Array1<f32>) {
        self.ensure_slots(idx + 1);
        self.v_max[idx] = Some(data);
    }

    #[must_use]
    pub fn amsgrad(&self) -> bool {
        self.amsgrad
    }

    /// Drop moments and the step counter
    pub fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
        self.v_max.clear();
    }
}

impl Optimizer for Adam {
    fn step_refs(&mut self, params: &mut [&mut Tensor]) {
        self.ensure_slots(params.len());
        self.t += 1;

        // beta^t has underflowed to zero long before i32::MAX
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2_sqrt = (1.0 - self.beta2.powi(t)).sqrt();
        let step_size = self.lr / bias_correction1;

        for (i, param) in params.iter_mut().enumerate() {
            if !param.requires_grad() {
                continue;
            }
            let Some(mut grad) = param.grad() else {
                continue;
            };
            if self.weight_decay != 0.0 {
                grad.scaled_add(self.weight_decay, param.data());
            }

            let n = grad.len();
            let m = self.m[i].get_or_insert_with(|| Array1::zeros(n));
            let v = self.v[i].get_or_insert_with(|| Array1::zeros(n));
            let (beta1, beta2) = (self.beta1, self.beta2);

            Zip::from(&mut *m).and(&mut *v).and(&grad).for_each(|m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
            });

            let second = if self.amsgrad {
                let v_max = self.v_max[i].get_or_insert_with(|| Array1::zeros(n));
                Zip::from(&mut *v_max).and(&*v).for_each(|vm, &v| *vm = vm.max(v));
                &*v_max
            } else {
                &*v
            };

            let epsilon = self.epsilon;
            let data = param.data_mut();
            Zip::from(data).and(&*m).and(second).for_each(|p, &m, &v| {
                let denom = v.sqrt() / bias_correction2_sqrt + epsilon;
                *p -= step_size * m / denom;
            });
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

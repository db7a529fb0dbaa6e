//! Gradient clipping

use crate::Tensor;

/// Clip gradients by global norm on borrowed parameter references.
///
/// global_norm = sqrt(Σ ‖g_i‖²) over parameters that require gradients and
/// hold one. When it exceeds `max_norm`, every such gradient is scaled by
/// `max_norm / global_norm`.
///
/// Returns the global norm before clipping.
pub fn clip_grad_norm_refs(params: &mut [&mut Tensor], max_norm: f32) -> f32 {
    let total_norm_sq: f32 = params
        .iter()
        .filter(|p| p.requires_grad())
        .filter_map(|p| p.grad())
        .map(|g| g.iter().map(|&x| x * x).sum::<f32>())
        .sum();

    let global_norm = total_norm_sq.sqrt();

    if global_norm > max_norm {
        let clip_coef = max_norm / global_norm;
        for param in params.iter_mut().filter(|p| p.requires_grad()) {
            if let Some(grad) = param.grad() {
                param.set_grad(grad * clip_coef);
            }
        }
    }

    global_norm
}

/// Global gradient norm without clipping
pub fn grad_norm_refs(params: &[&mut Tensor]) -> f32 {
    params
        .iter()
        .filter(|p| p.requires_grad())
        .filter_map(|p| p.grad())
        .map(|g| g.iter().map(|&x| x * x).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}

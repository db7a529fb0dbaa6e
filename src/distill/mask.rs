//! Validity masks derived from per-example lengths

use ndarray::Array2;

/// Mask of the pairs compared by the KL term: position `t` pairs teacher
/// step `t` with student step `t + 1`, valid while `t + 1 < length`.
///
/// Shape `[batch, max_len - 1]`.
pub fn shifted_mask(lengths: &[usize], max_len: usize) -> Array2<f32> {
    if max_len == 0 {
        return Array2::zeros((lengths.len(), 0));
    }
    Array2::from_shape_fn((lengths.len(), max_len - 1), |(b, t)| {
        if t + 1 < lengths[b] {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_shifted_mask_drops_first_step() {
        let mask = shifted_mask(&[3, 1], 4);
        assert_eq!(mask, array![[1.0, 1.0, 0.0], [0.0, 0.0, 0.0]]);
        assert_eq!(shifted_mask(&[0], 0).dim(), (1, 0));
    }
}

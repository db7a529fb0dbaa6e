//! Batch assembly: cropping, time-resolution adjustment, padding, encoding

use super::audio::{ensure_divisible, AudioFrontEnd};
use super::batch::Batch;
use super::utterance::Utterance;
use crate::config::HParams;
use crate::error::{Error, Result};
use ndarray::{s, Array2, Array3};
use rand::Rng;

/// Turns lists of utterances into padded [`Batch`]es
#[derive(Debug, Clone, PartialEq)]
pub struct Collator {
    /// Feed conditioning features
    pub local_conditioning: bool,
    /// Feed speaker ids
    pub global_conditioning: bool,
    /// Conditioning frames relate to samples by a fixed hop
    pub hop_aligned: bool,
    /// Crop window in samples
    pub max_time_steps: Option<usize>,
    /// One-hot channel count for quantized input
    pub one_hot_channels: Option<usize>,
}

impl Collator {
    pub fn from_hparams(hp: &HParams) -> Self {
        Self {
            local_conditioning: hp.local_conditioning(),
            global_conditioning: hp.global_conditioning(),
            hop_aligned: hp.hop_aligned(),
            max_time_steps: hp.max_time_steps(),
            one_hot_channels: hp.input_type.is_quantized().then_some(hp.quantize_channels),
        }
    }

    /// Collate `(dataset index, utterance)` pairs into a batch
    pub fn collate<R: Rng + ?Sized>(
        &self,
        examples: Vec<(usize, Utterance)>,
        front_end: &dyn AudioFrontEnd,
        rng: &mut R,
    ) -> Result<Batch> {
        if examples.is_empty() {
            return Err(Error::Consistency("cannot collate an empty batch".into()));
        }

        let mut prepared = Vec::with_capacity(examples.len());
        for (index, utt) in examples {
            let speaker_id = utt.speaker_id;
            let (waveform, conditioning) = self.prepare(index, utt, front_end, rng)?;
            prepared.push((waveform, conditioning, speaker_id));
        }

        let lengths: Vec<usize> = prepared.iter().map(|(x, _, _)| x.len()).collect();
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        let batch_size = prepared.len();

        let channels = self.one_hot_channels.unwrap_or(1);
        let mut inputs = Array3::<f32>::zeros((batch_size, channels, max_len));
        let mut targets = Array3::<f32>::zeros((batch_size, max_len, 1));
        for (b, (x, _, _)) in prepared.iter().enumerate() {
            for (t, &value) in x.iter().enumerate() {
                targets[[b, t, 0]] = value;
                match self.one_hot_channels {
                    Some(q) => {
                        let class = value.round().clamp(0.0, (q - 1) as f32) as usize;
                        inputs[[b, class, t]] = 1.0;
                    }
                    None => inputs[[b, 0, t]] = value,
                }
            }
        }

        let conditioning = if self.local_conditioning {
            let max_frames = prepared
                .iter()
                .map(|(_, c, _)| c.as_ref().map_or(0, Array2::nrows))
                .max()
                .unwrap_or(0);
            let dim = prepared
                .iter()
                .find_map(|(_, c, _)| c.as_ref().map(Array2::ncols))
                .unwrap_or(0);
            let mut padded = Array3::<f32>::zeros((batch_size, dim, max_frames));
            for (b, (_, c, _)) in prepared.iter().enumerate() {
                if let Some(c) = c {
                    if c.ncols() != dim {
                        return Err(Error::Consistency(format!(
                            "conditioning feature dims differ within a batch: {} vs {dim}",
                            c.ncols()
                        )));
                    }
                    padded.slice_mut(s![b, .., ..c.nrows()]).assign(&c.t());
                }
            }
            Some(padded)
        } else {
            None
        };

        let speaker_ids = if self.global_conditioning {
            let ids = prepared
                .iter()
                .map(|(_, _, g)| *g)
                .collect::<Option<Vec<usize>>>()
                .ok_or_else(|| {
                    Error::Consistency(
                        "speaker conditioning is enabled but an utterance has no speaker id".into(),
                    )
                })?;
            Some(ids)
        } else {
            None
        };

        Ok(Batch { inputs, targets, conditioning, speaker_ids, lengths })
    }

    /// Crop, trim and align one utterance
    fn prepare<R: Rng + ?Sized>(
        &self,
        index: usize,
        utt: Utterance,
        front_end: &dyn AudioFrontEnd,
        rng: &mut R,
    ) -> Result<(Vec<f32>, Option<Array2<f32>>)> {
        if !self.local_conditioning {
            let range = front_end.trim(&utt.waveform).ok_or(Error::EmptyUtterance { index })?;
            let mut x = utt.waveform[range].to_vec();
            if let Some(max) = self.max_time_steps {
                if x.len() > max {
                    let start = rng.random_range(0..x.len() - max);
                    x = x[start..start + max].to_vec();
                }
            }
            return Ok((x, None));
        }

        let c = utt.conditioning.ok_or_else(|| {
            Error::Consistency(format!("utterance {index} has no conditioning features"))
        })?;
        let x = utt.waveform;

        if self.hop_aligned {
            let hop = front_end.hop_size();
            check_hop_alignment(index, x.len(), c.nrows(), hop)?;
            if let Some(max) = self.max_time_steps {
                let max_steps = ensure_divisible(max, hop);
                if max_steps == 0 {
                    return Err(Error::ConfigError(format!(
                        "crop window {max} is shorter than one hop ({hop})"
                    )));
                }
                if x.len() > max_steps {
                    let max_frames = max_steps / hop;
                    let start = rng.random_range(0..c.nrows() - max_frames);
                    let ts = start * hop;
                    let x = x[ts..ts + max_frames * hop].to_vec();
                    let c = c.slice(s![start..start + max_frames, ..]).to_owned();
                    return Ok((x, Some(c)));
                }
            }
            return Ok((x, Some(c)));
        }

        let (mut x, mut c) =
            front_end.adjust_time_resolution(&x, &c).ok_or(Error::EmptyUtterance { index })?;
        if let Some(max) = self.max_time_steps {
            if x.len() > max {
                let start = rng.random_range(0..x.len() - max);
                x = x[start..start + max].to_vec();
                c = c.slice(s![start..start + max, ..]).to_owned();
            }
        }
        Ok((x, Some(c)))
    }
}

/// `len(x) % frames == 0 && len(x) / frames == hop`
fn check_hop_alignment(index: usize, samples: usize, frames: usize, hop: usize) -> Result<()> {
    if samples == 0 {
        return Err(Error::EmptyUtterance { index });
    }
    if frames == 0 || samples % frames != 0 || samples / frames != hop {
        return Err(Error::Consistency(format!(
            "utterance {index}: {samples} samples and {frames} frames do not match hop size {hop}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::audio::ThresholdFrontEnd;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn collator() -> Collator {
        Collator {
            local_conditioning: true,
            global_conditioning: false,
            hop_aligned: true,
            max_time_steps: None,
            one_hot_channels: None,
        }
    }

    fn conditioned(samples: usize, hop: usize, dim: usize) -> Utterance {
        let x: Vec<f32> = (0..samples).map(|t| ((t % 7) as f32 - 3.0) / 10.0).collect();
        let c = Array2::from_shape_fn((samples / hop, dim), |(f, d)| (f * dim + d) as f32);
        Utterance::from_waveform(x).with_conditioning(c)
    }

    #[test]
    fn test_pads_to_longest_with_zeros() {
        let fe = ThresholdFrontEnd::new(4, 0.0, 0.0);
        let batch = collator()
            .collate(
                vec![(0, conditioned(16, 4, 3)), (1, conditioned(8, 4, 3))],
                &fe,
                &mut StdRng::seed_from_u64(0),
            )
            .unwrap();

        assert_eq!(batch.lengths, vec![16, 8]);
        assert_eq!(batch.inputs.shape(), &[2, 1, 16]);
        assert_eq!(batch.targets.shape(), &[2, 16, 1]);
        assert!(batch.inputs.slice(s![1, 0, 8..]).iter().all(|&v| v == 0.0));
        assert!(batch.targets.slice(s![1, 8.., 0]).iter().all(|&v| v == 0.0));

        let c = batch.conditioning.unwrap();
        assert_eq!(c.shape(), &[2, 3, 4]);
        // channel-first: frame 1, feature 2 of the first utterance
        assert_eq!(c[[0, 2, 1]], 5.0);
        assert!(c.slice(s![1, .., 2..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_hop_aligned_crop_is_frame_aligned() {
        let fe = ThresholdFrontEnd::new(4, 0.0, 0.0);
        let collator = Collator { max_time_steps: Some(10), ..collator() };
        let utt = conditioned(40, 4, 2);
        let original = utt.waveform.clone();

        for seed in 0..20 {
            let batch = collator
                .collate(vec![(0, utt.clone())], &fe, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            // 10 rounds down to 8 samples = 2 frames
            assert_eq!(batch.lengths, vec![8]);
            let c = batch.conditioning.unwrap();
            assert_eq!(c.shape(), &[1, 2, 2]);
            let frame = (c[[0, 0, 0]] as usize) / 2;
            let start = frame * 4;
            assert!(start + 8 <= 40);
            assert_eq!(batch.targets[[0, 0, 0]], original[start]);
        }
    }

    #[test]
    fn test_hop_mismatch_is_consistency_error() {
        let fe = ThresholdFrontEnd::new(5, 0.0, 0.0);
        let err = collator()
            .collate(vec![(3, conditioned(16, 4, 1))], &fe, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(ref m) if m.contains("utterance 3")));
    }

    #[test]
    fn test_unconditioned_trim_and_crop() {
        let fe = ThresholdFrontEnd::new(1, 0.0, 0.05);
        let collator = Collator {
            local_conditioning: false,
            max_time_steps: Some(3),
            ..collator()
        };
        let utt = Utterance::from_waveform(vec![0.0, 0.0, 0.5, 0.6, 0.7, 0.8, 0.0]);
        let batch = collator.collate(vec![(0, utt)], &fe, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(batch.lengths, vec![3]);
        assert!(batch.conditioning.is_none());
        assert!(batch.targets.iter().all(|&v| v >= 0.5));
    }

    #[test]
    fn test_silent_utterance_is_fatal() {
        let fe = ThresholdFrontEnd::new(1, 0.0, 0.1);
        let collator = Collator { local_conditioning: false, ..collator() };
        let silent = vec![(9, Utterance::from_waveform(vec![0.0; 10]))];
        let err = collator.collate(silent, &fe, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::EmptyUtterance { index: 9 }));
    }

    #[test]
    fn test_unaligned_conditioning_is_upsampled() {
        let fe = ThresholdFrontEnd::new(4, 0.0, 0.0);
        let collator = Collator { hop_aligned: false, ..collator() };
        let utt = Utterance::from_waveform(vec![0.1; 9])
            .with_conditioning(Array2::from_shape_fn((3, 1), |(f, _)| f as f32 + 1.0));
        let batch = collator.collate(vec![(0, utt)], &fe, &mut StdRng::seed_from_u64(0)).unwrap();
        let c = batch.conditioning.unwrap();
        assert_eq!(c.shape(), &[1, 1, 9]);
        assert_eq!(
            c.slice(s![0, 0, ..]).to_vec(),
            vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0]
        );
    }

    #[test]
    fn test_one_hot_and_speakers() {
        let fe = ThresholdFrontEnd::new(1, 1.0, 0.0);
        let collator = Collator {
            local_conditioning: false,
            global_conditioning: true,
            one_hot_channels: Some(4),
            ..collator()
        };
        let utt = Utterance::from_waveform(vec![3.0, 0.0, 2.0]).with_speaker(5);
        let batch = collator.collate(vec![(0, utt)], &fe, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(batch.inputs.shape(), &[1, 4, 3]);
        assert_eq!(batch.inputs[[0, 3, 0]], 1.0);
        assert_eq!(batch.inputs[[0, 0, 1]], 1.0);
        assert_eq!(batch.inputs.sum(), 3.0);
        assert_eq!(batch.speaker_ids, Some(vec![5]));

        let missing = Utterance::from_waveform(vec![3.0]);
        assert!(collator.collate(vec![(0, missing)], &fe, &mut StdRng::seed_from_u64(0)).is_err());
    }
}

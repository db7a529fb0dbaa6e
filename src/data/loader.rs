//! Prefetching batch loader
//!
//! Batch `k` of an epoch is built by worker `k % num_workers`. Each worker
//! owns a bounded channel and a seeded RNG; the consumer reads the channels
//! round-robin, so batches arrive in sampler order regardless of which
//! worker finishes first.

use super::audio::AudioFrontEnd;
use super::batch::Batch;
use super::collate::Collator;
use super::dataset::UtteranceSource;
use super::sampler::LengthGroupedSampler;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Batches buffered per worker
const PREFETCH: usize = 2;

/// How an epoch orders its examples
#[derive(Debug, Clone)]
pub enum Ordering {
    /// Length-grouped order for the training phase
    LengthGrouped(LengthGroupedSampler),
    /// Plain shuffle for held-out evaluation
    Shuffled,
}

/// Everything a worker needs to turn indices into a batch
struct Assembly {
    dataset: Arc<dyn UtteranceSource>,
    collator: Collator,
    front_end: Arc<dyn AudioFrontEnd>,
}

impl Assembly {
    fn build(&self, indices: &[usize], rng: &mut StdRng) -> Result<Batch> {
        let examples = indices
            .iter()
            .map(|&i| self.dataset.get(i).map(|u| (i, u)))
            .collect::<Result<Vec<_>>>()?;
        self.collator.collate(examples, self.front_end.as_ref(), rng)
    }
}

/// Reusable per-phase loader; call [`DataLoader::epoch`] once per pass
pub struct DataLoader {
    assembly: Arc<Assembly>,
    ordering: Ordering,
    batch_size: usize,
    num_workers: usize,
}

impl DataLoader {
    pub fn new(
        dataset: Arc<dyn UtteranceSource>,
        collator: Collator,
        front_end: Arc<dyn AudioFrontEnd>,
        ordering: Ordering,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::ConfigError("batch_size must be positive".into()));
        }
        Ok(Self {
            assembly: Arc::new(Assembly { dataset, collator, front_end }),
            ordering,
            batch_size,
            num_workers: 0,
        })
    }

    /// Build batches on `n` background threads; zero builds them inline
    #[must_use]
    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Examples per pass
    pub fn num_examples(&self) -> usize {
        self.assembly.dataset.len()
    }

    /// Batches per pass, counting a short final batch
    pub fn num_batches(&self) -> usize {
        self.num_examples().div_ceil(self.batch_size)
    }

    /// Start one pass over the dataset
    pub fn epoch<R: Rng + ?Sized>(&self, rng: &mut R) -> BatchStream {
        let order = match &self.ordering {
            Ordering::LengthGrouped(sampler) => sampler.order(rng),
            Ordering::Shuffled => {
                let mut order: Vec<usize> = (0..self.num_examples()).collect();
                order.shuffle(rng);
                order
            }
        };
        let batches: Vec<Vec<usize>> =
            order.chunks(self.batch_size).map(<[usize]>::to_vec).collect();
        let total = batches.len();

        if self.num_workers == 0 {
            return BatchStream {
                total,
                next: 0,
                source: Source::Inline {
                    assembly: Arc::clone(&self.assembly),
                    batches,
                    rng: StdRng::seed_from_u64(rng.random()),
                },
            };
        }

        let workers = self.num_workers.min(total.max(1));
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = sync_channel::<Result<Batch>>(PREFETCH);
            let assembly = Arc::clone(&self.assembly);
            let mine: Vec<Vec<usize>> =
                batches.iter().skip(worker).step_by(workers).cloned().collect();
            let mut worker_rng = StdRng::seed_from_u64(rng.random());
            handles.push(std::thread::spawn(move || {
                for indices in mine {
                    let result = assembly.build(&indices, &mut worker_rng);
                    let failed = result.is_err();
                    // consumer hung up
                    if tx.send(result).is_err() || failed {
                        return;
                    }
                }
            }));
            receivers.push(rx);
        }
        tracing::debug!(batches = total, workers, "started loader workers");

        BatchStream { total, next: 0, source: Source::Workers { receivers, handles } }
    }
}

enum Source {
    Inline { assembly: Arc<Assembly>, batches: Vec<Vec<usize>>, rng: StdRng },
    Workers { receivers: Vec<Receiver<Result<Batch>>>, handles: Vec<JoinHandle<()>> },
}

/// Ordered stream of one epoch's batches
pub struct BatchStream {
    total: usize,
    next: usize,
    source: Source,
}

impl BatchStream {
    /// Batches in this pass
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let k = self.next;
        self.next += 1;

        match &mut self.source {
            Source::Inline { assembly, batches, rng } => Some(assembly.build(&batches[k], rng)),
            Source::Workers { receivers, .. } => {
                let worker = k % receivers.len();
                match receivers[worker].recv() {
                    Ok(Ok(batch)) => Some(Ok(batch)),
                    Ok(Err(e)) => {
                        self.next = self.total;
                        Some(Err(e))
                    }
                    Err(_) => {
                        self.next = self.total;
                        Some(Err(Error::LoaderWorker { worker }))
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if let Source::Workers { receivers, handles } = &mut self.source {
            // unblock workers waiting on a full channel
            receivers.clear();
            for handle in handles.drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("loader worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::audio::ThresholdFrontEnd;
    use crate::data::dataset::InMemoryDataset;
    use crate::data::utterance::Utterance;

    fn loader(lengths: &[usize], batch_size: usize, ordering: Ordering) -> DataLoader {
        let utterances = lengths
            .iter()
            .enumerate()
            // every sample carries its utterance index so batches can be traced back
            .map(|(i, &n)| Utterance::from_waveform(vec![i as f32 + 1.0; n]))
            .collect();
        let collator = Collator {
            local_conditioning: false,
            global_conditioning: false,
            hop_aligned: false,
            max_time_steps: None,
            one_hot_channels: None,
        };
        DataLoader::new(
            Arc::new(InMemoryDataset::new(utterances)),
            collator,
            Arc::new(ThresholdFrontEnd::new(1, 0.0, 0.0)),
            ordering,
            batch_size,
        )
        .unwrap()
    }

    fn first_values(batch: &Batch) -> Vec<usize> {
        (0..batch.batch_size()).map(|b| batch.targets[[b, 0, 0]] as usize - 1).collect()
    }

    #[test]
    fn test_inline_and_threaded_streams_agree() {
        let lengths = [5, 3, 9, 1, 4, 7, 2];
        let inline = loader(&lengths, 2, Ordering::Shuffled);
        let threaded = loader(&lengths, 2, Ordering::Shuffled).with_workers(3);

        let a: Vec<Vec<usize>> = inline
            .epoch(&mut StdRng::seed_from_u64(11))
            .map(|b| first_values(&b.unwrap()))
            .collect();
        let b: Vec<Vec<usize>> = threaded
            .epoch(&mut StdRng::seed_from_u64(11))
            .map(|b| first_values(&b.unwrap()))
            .collect();

        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        let mut seen: Vec<usize> = a.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_length_grouped_batches_follow_sampler() {
        let lengths = [8, 1, 8, 1, 8, 1, 8, 1];
        let sampler = LengthGroupedSampler::with_group_size(&lengths, 2, 4).unwrap();
        let loader = loader(&lengths, 2, Ordering::LengthGrouped(sampler)).with_workers(2);
        assert_eq!(loader.num_batches(), 4);

        for batch in loader.epoch(&mut StdRng::seed_from_u64(5)) {
            let batch = batch.unwrap();
            assert_eq!(batch.lengths[0], batch.lengths[1]);
        }
    }

    #[test]
    fn test_worker_error_ends_stream() {
        let mut lengths = vec![4; 6];
        lengths[3] = 0;
        let loader = loader(&lengths, 1, Ordering::Shuffled).with_workers(2);
        let results: Vec<Result<Batch>> = loader.epoch(&mut StdRng::seed_from_u64(0)).collect();
        assert!(results.last().unwrap().is_err());
        assert!(results.iter().filter(|r| r.is_err()).count() == 1);
    }

    #[test]
    fn test_dropping_stream_early_joins_workers() {
        let loader = loader(&[3; 40], 1, Ordering::Shuffled).with_workers(2);
        let mut stream = loader.epoch(&mut StdRng::seed_from_u64(0));
        assert!(stream.next().unwrap().is_ok());
        drop(stream);
    }
}

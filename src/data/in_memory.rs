use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::source::DataSource;
use crate::engine::error::ConfigError;

/// Samples held in memory, served as mini-batches of `batch_size`.
///
/// The last batch of an epoch may be smaller. With `shuffled(seed)` the
/// sample order is permuted every epoch by an RNG seeded from `seed` and the
/// epoch number, so a run is reproducible for a given seed.
#[derive(Debug, Clone)]
pub struct InMemoryDataSource<T> {
    samples: Vec<T>,
    batch_size: usize,
    shuffle_seed: Option<u64>,
}

impl<T: Clone> InMemoryDataSource<T> {
    pub fn new(samples: Vec<T>, batch_size: usize) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(InMemoryDataSource {
            samples,
            batch_size,
            shuffle_seed: None,
        })
    }

    /// Shuffles the sample order at the start of every epoch.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }
        indices
    }
}

impl<T: Clone> DataSource for InMemoryDataSource<T> {
    type Batch = Vec<T>;

    fn len(&self) -> Option<usize> {
        Some(self.samples.len().div_ceil(self.batch_size))
    }

    fn batches(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Vec<T>> + '_> {
        let order = self.epoch_order(epoch);
        let samples = &self.samples;
        let batch_size = self.batch_size;
        Box::new((0..order.len()).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(order.len());
            order[start..end].iter().map(|&i| samples[i].clone()).collect::<Vec<T>>()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_batch_may_be_short() {
        let mut data = InMemoryDataSource::new((0..5).collect::<Vec<i32>>(), 2).unwrap();
        assert_eq!(data.len(), Some(3));
        let batches: Vec<Vec<i32>> = data.batches(1).collect();
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        assert!(matches!(
            InMemoryDataSource::new(vec![1.0], 0),
            Err(ConfigError::ZeroBatchSize)
        ));
    }

    #[test]
    fn shuffling_is_a_seeded_permutation() {
        let samples: Vec<i32> = (0..32).collect();
        let mut a = InMemoryDataSource::new(samples.clone(), 32).unwrap().shuffled(7);
        let mut b = InMemoryDataSource::new(samples.clone(), 32).unwrap().shuffled(7);

        let first: Vec<i32> = a.batches(1).flatten().collect();
        let again: Vec<i32> = b.batches(1).flatten().collect();
        assert_eq!(first, again);

        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, samples);

        let next_epoch: Vec<i32> = a.batches(2).flatten().collect();
        assert_ne!(first, next_epoch);
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut data = InMemoryDataSource::<f64>::new(Vec::new(), 4).unwrap();
        assert_eq!(data.len(), Some(0));
        assert_eq!(data.batches(1).count(), 0);
    }
}

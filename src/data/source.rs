/// Supplies the batches of every epoch.
///
/// `len` is the number of batches one epoch yields; it resolves the epoch
/// length when the workflow config leaves it unset. Sources that cannot know
/// their length return `None` and require an explicit `epoch_length`.
pub trait DataSource {
    type Batch;

    fn len(&self) -> Option<usize>;

    /// A fresh pass over the data for `epoch` (1-based). The engine stops
    /// pulling after `epoch_length` batches; a shorter pass ends the epoch
    /// early.
    fn batches(&mut self, epoch: usize) -> Box<dyn Iterator<Item = Self::Batch> + '_>;
}

/// A list of ready-made batches, replayed in order every epoch.
impl<B: Clone> DataSource for Vec<B> {
    type Batch = B;

    fn len(&self) -> Option<usize> {
        Some(Vec::len(self))
    }

    fn batches(&mut self, _epoch: usize) -> Box<dyn Iterator<Item = B> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// Adapts an iterator factory into a length-less data source.
///
/// Useful for streams whose size is not known up front; the workflow must
/// then be configured with an explicit `epoch_length`.
pub struct StreamSource<F> {
    make: F,
}

impl<F> StreamSource<F> {
    pub fn new(make: F) -> Self {
        StreamSource { make }
    }
}

impl<F, I> DataSource for StreamSource<F>
where
    F: FnMut(usize) -> I,
    I: Iterator + 'static,
{
    type Batch = I::Item;

    fn len(&self) -> Option<usize> {
        None
    }

    fn batches(&mut self, epoch: usize) -> Box<dyn Iterator<Item = I::Item> + '_> {
        Box::new((self.make)(epoch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_replays_every_epoch() {
        let mut data = vec![1, 2, 3];
        assert_eq!(DataSource::len(&data), Some(3));
        assert_eq!(data.batches(1).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(data.batches(2).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn stream_source_has_no_length() {
        let mut data = StreamSource::new(|epoch: usize| (0..).map(move |i| epoch * 100 + i));
        assert_eq!(data.len(), None);
        assert_eq!(data.batches(2).take(2).collect::<Vec<_>>(), vec![200, 201]);
    }
}

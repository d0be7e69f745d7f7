/// Splits `records` into consecutive groups of at most `size` elements.
///
/// Lazy and order-preserving; only the last group may be shorter.
///
/// # Panics
///
/// Panics if `size` is zero. Configuration validation rejects that value.
pub fn chunk<I>(records: I, size: usize) -> Chunks<I::IntoIter>
where
    I: IntoIterator,
{
    assert!(size > 0, "chunk size must be positive");
    Chunks {
        inner: records.into_iter(),
        size,
    }
}

pub struct Chunks<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let group: Vec<_> = self.inner.by_ref().take(self.size).collect();
        if group.is_empty() {
            None
        } else {
            Some(group)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lo, hi) = self.inner.size_hint();
        (lo.div_ceil(self.size), hi.map(|h| h.div_ceil(self.size)))
    }
}

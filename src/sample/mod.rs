//! Corpus sampling: the head, a uniform random slice of the middle, and the
//! tail of a record stream.
//!
//! This is what the interactive preview operates on instead of the full
//! dataset. The middle section is reservoir-sampled but emitted in input
//! order, so a sample reads like a corpus, not like noise.

mod reservoir;

pub use reservoir::Reservoir;

use rand::rngs::StdRng;

/// Ring buffer that withholds the last `k` items of a stream.
///
/// Items pushed once the buffer is full displace the oldest entry, which is
/// handed back to the caller; whatever remains at the end is the tail, in
/// input order.
pub struct Tailer<T> {
    capacity: usize,
    count: usize,
    buf: Vec<T>,
}

impl<T> Tailer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            count: 0,
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Push an item; returns the displaced item once the window is full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        if self.buf.len() < self.capacity {
            self.buf.push(item);
            self.count += 1;
            return None;
        }
        let slot = self.count % self.capacity;
        self.count += 1;
        Some(std::mem::replace(&mut self.buf[slot], item))
    }

    /// The withheld tail, oldest first.
    pub fn into_tail(mut self) -> Vec<T> {
        if self.buf.len() < self.capacity {
            return self.buf;
        }
        let split = self.count % self.capacity;
        let mut tail = self.buf.split_off(split);
        tail.append(&mut self.buf);
        tail
    }
}

/// The three sections of a corpus sample.
pub struct Sections<T> {
    pub head: Vec<T>,
    pub middle: Vec<T>,
    pub tail: Vec<T>,
}

impl<T> Sections<T> {
    /// All sections concatenated, head first.
    pub fn into_vec(self) -> Vec<T> {
        let mut all = self.head;
        all.extend(self.middle);
        all.extend(self.tail);
        all
    }
}

/// Take `k` items from the start, the middle and the end of `items`.
///
/// The middle section is a uniform sample of everything between head and
/// tail, returned in the order the items appeared in. Sections may be shorter
/// than `k` (or empty) when the input runs out.
pub fn sample<T, I>(k: usize, items: I, rng: StdRng) -> Sections<T>
where
    I: IntoIterator<Item = T>,
{
    let mut it = items.into_iter();

    let head: Vec<T> = it.by_ref().take(k).collect();

    let mut tailer = Tailer::new(k);
    let mut reservoir: Reservoir<(usize, T)> = Reservoir::new(k, rng);
    let mut index = 0usize;

    for item in it {
        if let Some(displaced) = tailer.push(item) {
            reservoir.consider((index, displaced));
            index += 1;
        }
    }

    let mut middle = reservoir.into_items();
    middle.sort_by_key(|(i, _)| *i);

    Sections {
        head,
        middle: middle.into_iter().map(|(_, item)| item).collect(),
        tail: tailer.into_tail(),
    }
}

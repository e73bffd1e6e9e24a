//! In-memory observation streams and the per-thread cursors that walk them.
//! Everything here is preloaded at startup (see `data_loader`); training
//! never touches a file directly.

/// One transaction or view record: a user and their basket of items ordered
/// by timestamp (timestamps themselves are dropped once the basket is
/// sorted).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Basket {
    pub user_id: usize,
    pub items: Vec<usize>,
}

/// `(item, user, sub)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub item_id: usize,
    pub user_id: usize,
    pub sub_id: usize,
}

/// `item` followed by one or more search words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchRecord {
    pub item_id: usize,
    pub words: Vec<usize>,
}

/// A round-robin cursor over a fixed-length source. Each worker thread owns
/// one of these per stream, starting at `thread_id * len / threads` and
/// advancing by one modulo `len` per iteration -- no synchronization between
/// threads, duplicate visits accepted.
pub struct Cursor {
    pos: usize,
    len: usize,
}

impl Cursor {
    pub fn new(thread_id: usize, threads: usize, len: usize) -> Self {
        let len = len.max(1);
        let pos = if threads == 0 { 0 } else { thread_id * len / threads };
        Cursor { pos: pos % len, len }
    }

    /// Advances the cursor and returns the (pre-advance) index to read.
    pub fn next(&mut self) -> usize {
        let idx = self.pos;
        self.pos = (self.pos + 1) % self.len;
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_around() {
        let mut c = Cursor::new(0, 1, 3);
        assert_eq!(c.next(), 0);
        assert_eq!(c.next(), 1);
        assert_eq!(c.next(), 2);
        assert_eq!(c.next(), 0);
    }

    #[test]
    fn cursor_starts_at_thread_offset() {
        let c = Cursor::new(2, 4, 100);
        assert_eq!(c.pos, 50);
    }

    #[test]
    fn cursor_handles_empty_source() {
        let mut c = Cursor::new(3, 4, 0);
        assert_eq!(c.next(), 0);
    }
}

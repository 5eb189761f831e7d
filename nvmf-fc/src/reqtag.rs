//! Request-tag pool.
//!
//! Every posted WQE carries a 16-bit request tag in word 9; the matching
//! work completion echoes it back. The pool maps tags to whatever the caller
//! needs at completion time (here, the boxed completion callback).

use slab::Slab;

/// Fixed-capacity pool of request tags.
///
/// Tags are slab keys, so they stay below `capacity` and are reused.
pub struct ReqTagPool<C> {
    slots: Slab<C>,
    capacity: usize,
}

impl<C> std::fmt::Debug for ReqTagPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqTagPool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.slots.len())
            .finish()
    }
}

impl<C> ReqTagPool<C> {
    /// `capacity` must fit the 16-bit tag field.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.capacity - self.slots.len()
    }

    /// Tag the next [`acquire`](Self::acquire) will hand out, without
    /// checking it out.
    pub fn next_tag(&self) -> Option<u16> {
        if self.slots.len() >= self.capacity {
            return None;
        }
        Some(self.slots.vacant_key() as u16)
    }

    /// Check out a tag bound to `ctx`. `None` when the pool is exhausted.
    pub fn acquire(&mut self, ctx: C) -> Option<u16> {
        if self.slots.len() >= self.capacity {
            return None;
        }
        Some(self.slots.insert(ctx) as u16)
    }

    /// Context of a checked-out tag.
    pub fn lookup(&self, tag: u16) -> Option<&C> {
        self.slots.get(tag as usize)
    }

    pub fn lookup_mut(&mut self, tag: u16) -> Option<&mut C> {
        self.slots.get_mut(tag as usize)
    }

    /// Return a tag and hand back its context. Releasing a tag that is not
    /// checked out is a no-op.
    pub fn release(&mut self, tag: u16) -> Option<C> {
        let ctx = self.slots.try_remove(tag as usize);
        if ctx.is_none() {
            tracing::warn!(tag, "release of free request tag");
        }
        ctx
    }

    /// Return every checked-out tag, dropping the contexts. Returns how many
    /// were outstanding.
    pub fn release_all(&mut self) -> usize {
        let n = self.slots.len();
        self.slots.clear();
        n
    }
}

/// Decides which WQEs set the WQEC bit.
///
/// One WQ release completion arrives per `threshold` posted WQEs, so the
/// driver learns about freed WQ slots in batches.
#[derive(Debug, Clone, Copy)]
pub struct WqecCounter {
    count: u16,
    threshold: u16,
}

impl WqecCounter {
    pub fn new(threshold: u16) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    #[inline]
    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Whether the next WQE should carry WQEC.
    #[inline]
    pub fn next_is_wqec(&self) -> bool {
        self.count + 1 >= self.threshold
    }

    /// Record a WQE that made it into the ring.
    pub fn commit(&mut self, wqec: bool) {
        if wqec {
            self.count = 0;
        } else {
            self.count = self.count.saturating_add(1);
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausts_at_capacity() {
        let mut pool = ReqTagPool::new(4);
        let tags: Vec<u16> = (0..4).map(|i| pool.acquire(i).unwrap()).collect();
        assert_eq!(tags, vec![0, 1, 2, 3]);
        assert_eq!(pool.acquire(99), None);
        assert_eq!(pool.available(), 0);

        assert_eq!(pool.release(2), Some(2));
        let tag = pool.acquire(42).unwrap();
        assert_eq!(tag, 2);
        assert_eq!(pool.lookup(tag), Some(&42));
    }

    #[test]
    fn test_next_tag_predicts_acquire() {
        let mut pool = ReqTagPool::new(3);
        assert_eq!(pool.next_tag(), Some(0));
        assert_eq!(pool.next_tag(), Some(0));
        pool.acquire('a').unwrap();
        pool.acquire('b').unwrap();
        pool.release(0);
        let next = pool.next_tag();
        assert_eq!(pool.acquire('c'), next);
        pool.acquire('d').unwrap();
        assert_eq!(pool.next_tag(), None);
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut pool = ReqTagPool::new(2);
        let tag = pool.acquire("a").unwrap();
        assert_eq!(pool.release(tag), Some("a"));
        assert_eq!(pool.release(tag), None);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_lookup_out_of_range() {
        let mut pool: ReqTagPool<u8> = ReqTagPool::new(8);
        assert!(pool.lookup(7).is_none());
        assert!(pool.lookup(u16::MAX).is_none());
        pool.acquire(1).unwrap();
        assert_eq!(pool.lookup(0), Some(&1));
    }

    #[test]
    fn test_capacity_clamped_to_tag_width() {
        let pool: ReqTagPool<()> = ReqTagPool::new(100_000);
        assert_eq!(pool.capacity(), 0xffff);
    }

    #[test]
    fn test_release_all() {
        let mut pool = ReqTagPool::new(8);
        for i in 0..5 {
            pool.acquire(i).unwrap();
        }
        assert_eq!(pool.release_all(), 5);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_wqec_every_fifth() {
        let mut wqec = WqecCounter::new(5);
        let flags: Vec<bool> = (0..10)
            .map(|_| {
                let set = wqec.next_is_wqec();
                wqec.commit(set);
                set
            })
            .collect();
        assert_eq!(
            flags,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn test_wqec_uncommitted_post_does_not_count() {
        let mut wqec = WqecCounter::new(2);
        assert!(!wqec.next_is_wqec());
        // failed post: nothing committed
        assert!(!wqec.next_is_wqec());
        wqec.commit(false);
        assert!(wqec.next_is_wqec());
    }
}

//! Free-list allocator over the integer range `[0, capacity)`.
//!
//! Free blocks are indexed twice: by offset, to find neighbours when a range
//! is returned, and by `(size, offset)`, to find the smallest block that fits a
//! request. Both indices always describe the same non-overlapping set of
//! blocks. Every operation is logarithmic in the number of free blocks.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeAllocation {
    pub unaligned_offset: u64,
    /// Size actually taken from the free list, including alignment padding.
    pub size: u64,
}

impl RangeAllocation {
    pub const INVALID_OFFSET: u64 = u64::MAX;
    pub const INVALID: Self = Self {
        unaligned_offset: Self::INVALID_OFFSET,
        size: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.unaligned_offset != Self::INVALID_OFFSET
    }

    pub fn aligned_offset(&self, alignment: u64) -> u64 {
        align_up(self.unaligned_offset, alignment)
    }
}

#[derive(Debug, Clone)]
pub struct RangeAllocator {
    free_blocks_by_offset: BTreeMap<u64, u64>,
    free_blocks_by_size: BTreeSet<(u64, u64)>,
    capacity: u64,
    free_size: u64,
    cur_min_alignment: u64,
}

impl RangeAllocator {
    pub fn new(capacity: u64) -> Self {
        let mut allocator = Self {
            free_blocks_by_offset: BTreeMap::new(),
            free_blocks_by_size: BTreeSet::new(),
            capacity,
            free_size: capacity,
            cur_min_alignment: 1,
        };
        if capacity > 0 {
            allocator.add_block(0, capacity);
        }
        allocator.reset_current_alignment();
        allocator
    }

    /// Returns [`RangeAllocation::INVALID`] when no free block can hold the
    /// request.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> RangeAllocation {
        assert!(size > 0, "allocation size must be non-zero");
        assert!(
            alignment.is_power_of_two(),
            "alignment {alignment} is not a power of two"
        );

        let size = align_up(size, alignment);
        if self.free_size < size {
            return RangeAllocation::INVALID;
        }

        let alignment_reserve = alignment.saturating_sub(self.cur_min_alignment);
        let Some(&(block_size, offset)) = self
            .free_blocks_by_size
            .range((size + alignment_reserve, 0)..)
            .next()
        else {
            return RangeAllocation::INVALID;
        };

        debug_assert_eq!(offset % self.cur_min_alignment, 0);
        let aligned_offset = align_up(offset, alignment);
        let adjusted_size = size + (aligned_offset - offset);
        debug_assert!(adjusted_size <= size + alignment_reserve);

        self.remove_block(offset, block_size);
        if block_size > adjusted_size {
            self.add_block(offset + adjusted_size, block_size - adjusted_size);
        }
        self.free_size -= adjusted_size;

        if size & (self.cur_min_alignment - 1) != 0 {
            if size.is_power_of_two() {
                debug_assert!(size >= alignment && size < self.cur_min_alignment);
                self.cur_min_alignment = size;
            } else {
                self.cur_min_alignment = self.cur_min_alignment.min(alignment);
            }
        }

        RangeAllocation {
            unaligned_offset: offset,
            size: adjusted_size,
        }
    }

    pub fn free_allocation(&mut self, allocation: RangeAllocation) {
        debug_assert!(allocation.is_valid());
        self.free(allocation.unaligned_offset, allocation.size);
    }

    pub fn free(&mut self, offset: u64, size: u64) {
        debug_assert!(
            offset + size <= self.capacity,
            "range [{offset}, {}) is outside the allocator",
            offset + size
        );

        let next = self
            .free_blocks_by_offset
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .next()
            .map(|(&block_offset, &block_size)| (block_offset, block_size));
        let prev = self
            .free_blocks_by_offset
            .range(..=offset)
            .next_back()
            .map(|(&block_offset, &block_size)| (block_offset, block_size));

        if let Some((next_offset, _)) = next {
            debug_assert!(
                offset + size <= next_offset,
                "freed range overlaps the next free block"
            );
        }
        if let Some((prev_offset, prev_size)) = prev {
            debug_assert!(
                prev_offset + prev_size <= offset,
                "freed range overlaps the previous free block"
            );
        }

        let mut new_offset = offset;
        let mut new_size = size;
        if let Some((prev_offset, prev_size)) =
            prev.filter(|&(prev_offset, prev_size)| prev_offset + prev_size == offset)
        {
            self.remove_block(prev_offset, prev_size);
            new_offset = prev_offset;
            new_size += prev_size;
        }
        if let Some((next_offset, next_size)) =
            next.filter(|&(next_offset, _)| offset + size == next_offset)
        {
            self.remove_block(next_offset, next_size);
            new_size += next_size;
        }
        self.add_block(new_offset, new_size);

        self.free_size += size;
        if self.is_empty() {
            debug_assert_eq!(self.free_blocks_by_offset.len(), 1);
            self.reset_current_alignment();
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn free_size(&self) -> u64 {
        self.free_size
    }

    pub fn used_size(&self) -> u64 {
        self.capacity - self.free_size
    }

    pub fn is_full(&self) -> bool {
        self.free_size == 0
    }

    pub fn is_empty(&self) -> bool {
        self.free_size == self.capacity
    }

    pub fn num_free_blocks(&self) -> usize {
        self.free_blocks_by_offset.len()
    }

    fn add_block(&mut self, offset: u64, size: u64) {
        let previous = self.free_blocks_by_offset.insert(offset, size);
        debug_assert!(previous.is_none(), "free block at {offset} already exists");
        self.free_blocks_by_size.insert((size, offset));
    }

    fn remove_block(&mut self, offset: u64, size: u64) {
        self.free_blocks_by_offset.remove(&offset);
        self.free_blocks_by_size.remove(&(size, offset));
    }

    fn reset_current_alignment(&mut self) {
        self.cur_min_alignment = 1;
        while self.cur_min_alignment * 2 <= self.capacity {
            self.cur_min_alignment *= 2;
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    fn assert_indices_agree(allocator: &RangeAllocator) {
        assert_eq!(
            allocator.free_blocks_by_offset.len(),
            allocator.free_blocks_by_size.len()
        );
        let mut total = 0;
        let mut previous_end = None;
        for (&offset, &size) in &allocator.free_blocks_by_offset {
            assert!(allocator.free_blocks_by_size.contains(&(size, offset)));
            if let Some(end) = previous_end {
                assert!(end < offset, "free blocks are adjacent or overlapping");
            }
            previous_end = Some(offset + size);
            total += size;
        }
        assert_eq!(total, allocator.free_size());
    }

    #[test]
    fn single_block_round_trip() {
        let mut allocator = RangeAllocator::new(128);
        let allocation = allocator.allocate(16, 1);
        assert_eq!(allocation.unaligned_offset, 0);
        assert_eq!(allocation.size, 16);
        assert_eq!(allocator.used_size(), 16);
        allocator.free_allocation(allocation);
        assert!(allocator.is_empty());
        assert_eq!(allocator.num_free_blocks(), 1);
    }

    #[test]
    fn exhaustion_returns_invalid() {
        let mut allocator = RangeAllocator::new(8);
        let first = allocator.allocate(8, 1);
        assert!(first.is_valid());
        assert!(allocator.is_full());
        assert!(!allocator.allocate(1, 1).is_valid());
        allocator.free_allocation(first);
        assert!(allocator.allocate(8, 1).is_valid());
    }

    #[test]
    fn zero_capacity_never_allocates() {
        let mut allocator = RangeAllocator::new(0);
        assert!(!allocator.allocate(1, 1).is_valid());
        assert!(allocator.is_empty());
        assert!(allocator.is_full());
    }

    #[test]
    fn fragmentation_blocks_oversized_requests() {
        let mut allocator = RangeAllocator::new(12);
        let a = allocator.allocate(4, 1);
        let b = allocator.allocate(4, 1);
        let c = allocator.allocate(4, 1);
        allocator.free_allocation(a);
        allocator.free_allocation(c);
        assert_eq!(allocator.free_size(), 8);
        assert!(!allocator.allocate(8, 1).is_valid());
        allocator.free_allocation(b);
        assert_eq!(allocator.num_free_blocks(), 1);
        assert!(allocator.allocate(12, 1).is_valid());
    }

    #[test]
    fn smallest_fitting_block_wins_with_lowest_offset_on_ties() {
        let mut allocator = RangeAllocator::new(64);
        let blocks: Vec<_> = (0..8).map(|_| allocator.allocate(8, 1)).collect();
        allocator.free_allocation(blocks[1]);
        allocator.free_allocation(blocks[3]);
        allocator.free_allocation(blocks[6]);
        allocator.free_allocation(blocks[7]);
        allocator.free_allocation(blocks[5]);
        // Free list is now [8, 16), [24, 32) and [40, 64).
        let small = allocator.allocate(8, 1);
        assert_eq!(small.unaligned_offset, 8);
        let large = allocator.allocate(20, 1);
        assert_eq!(large.unaligned_offset, 40);
        assert_indices_agree(&allocator);
    }

    #[test]
    fn aligned_allocations_contain_aligned_range() {
        let mut allocator = RangeAllocator::new(1024);
        let odd = allocator.allocate(3, 1);
        assert_eq!(odd.unaligned_offset, 0);
        for alignment in [1_u64, 2, 4, 16, 64] {
            let allocation = allocator.allocate(5, alignment);
            assert!(allocation.is_valid());
            let aligned = allocation.aligned_offset(alignment);
            let requested = align_up(5, alignment);
            assert_eq!(aligned % alignment, 0);
            assert!(aligned >= allocation.unaligned_offset);
            assert!(aligned + requested <= allocation.unaligned_offset + allocation.size);
        }
        assert_indices_agree(&allocator);
    }

    #[test]
    fn random_sequences_never_overlap_and_round_trip() {
        let mut rng = Lcg(0x5eed);
        let capacity = 4096;
        let mut allocator = RangeAllocator::new(capacity);
        let mut live: Vec<RangeAllocation> = Vec::new();

        for _ in 0..2000 {
            if live.is_empty() || rng.next() % 3 != 0 {
                let size = 1 + rng.next() % 64;
                let alignment = 1 << (rng.next() % 5);
                let allocation = allocator.allocate(size, alignment);
                if allocation.is_valid() {
                    let aligned = allocation.aligned_offset(alignment);
                    assert_eq!(aligned % alignment, 0);
                    assert!(aligned + size <= allocation.unaligned_offset + allocation.size);
                    live.push(allocation);
                }
            } else {
                let index = (rng.next() as usize) % live.len();
                allocator.free_allocation(live.swap_remove(index));
            }

            let mut sorted = live.clone();
            sorted.sort_by_key(|allocation| allocation.unaligned_offset);
            for pair in sorted.windows(2) {
                assert!(pair[0].unaligned_offset + pair[0].size <= pair[1].unaligned_offset);
            }
            let used: u64 = live.iter().map(|allocation| allocation.size).sum();
            assert_eq!(allocator.used_size(), used);
            assert_indices_agree(&allocator);
        }

        for allocation in live.drain(..) {
            allocator.free_allocation(allocation);
        }
        assert!(allocator.is_empty());
        assert_eq!(allocator.num_free_blocks(), 1);
        assert_eq!(allocator.cur_min_alignment, 4096);
    }
}

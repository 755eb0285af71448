//! Property-based tests for the allocator core.
//!
//! Uses proptest to generate random inputs and verify invariants hold.

use std::cmp::Reverse;

use proptest::prelude::*;
use sable_runtime::bitmap::Bitmap;
use sable_runtime::block::{BlockDescriptor, priority_block_cmp};
use sable_runtime::size_class::{
    BLOCK_SIZE, MAX_SMALL_SIZE, PAGES_IN_BLOCK, class_for_size, size_from_class,
};

type PageMap = Bitmap<512, 8>;

/// Strategy for a valid (index, length) range within 512 bits.
fn bit_range() -> impl Strategy<Value = (usize, usize)> {
    (0usize..512).prop_flat_map(|index| (Just(index), 1usize..=512 - index))
}

/// Strategy for an arbitrary bit pattern.
fn bit_pattern() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 512)
}

fn bitmap_from(bits: &[bool]) -> PageMap {
    let mut map = PageMap::new();
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            map.set_bit(i);
        }
    }
    map
}

proptest! {
    /// Setting a range sets exactly that range and nothing else.
    #[test]
    fn set_range_is_exact(bits in bit_pattern(), (index, length) in bit_range()) {
        let mut map = bitmap_from(&bits);
        let before_low = map.count_bits(0, index);
        let after_start = index + length;
        let before_high = map.count_bits(after_start, 512 - after_start);

        map.set_range(index, length);

        prop_assert_eq!(map.count_bits(index, length), length);
        prop_assert_eq!(map.count_bits(0, index), before_low);
        prop_assert_eq!(map.count_bits(after_start, 512 - after_start), before_high);
    }

    /// find_set returns the first set bit at or after the start.
    #[test]
    fn find_set_is_first(bits in bit_pattern(), start in 0usize..=512) {
        let map = bitmap_from(&bits);
        let found = map.find_set(start);
        match bits[start.min(512)..].iter().position(|&b| b) {
            Some(offset) => prop_assert_eq!(found, start + offset),
            None => prop_assert_eq!(found, 512),
        }
        if found < 512 {
            prop_assert!(map.value_at(found));
            for i in start..found {
                prop_assert!(!map.value_at(i));
            }
        }
    }

    /// find_set_backward returns the last set bit strictly before the start.
    #[test]
    fn find_set_backward_is_last(bits in bit_pattern(), start in 0usize..=512) {
        let map = bitmap_from(&bits);
        let found = map.find_set_backward(start);
        match bits[..start].iter().rposition(|&b| b) {
            Some(position) => prop_assert_eq!(found, position as isize),
            None => prop_assert_eq!(found, -1),
        }
    }

    /// A full-length rolling operation is the whole-array operation,
    /// whatever the starting offset.
    #[test]
    fn rolling_full_length_is_whole_array(bits in bit_pattern(), offset in 0usize..512) {
        let mut rolled = bitmap_from(&bits);
        let mut plain = bitmap_from(&bits);

        prop_assert_eq!(rolled.count_rolling_bits(offset, 512), plain.count_bits(0, 512));

        rolled.set_rolling_range(offset, 512);
        plain.set_range(0, 512);
        prop_assert_eq!(&rolled, &plain);

        rolled.clear_rolling_range(offset, 512);
        plain.clear_range(0, 512);
        prop_assert_eq!(&rolled, &plain);
    }

    /// next_free_range enumerates exactly the maximal zero runs.
    #[test]
    fn next_free_range_enumerates_zero_runs(bits in bit_pattern()) {
        let map = bitmap_from(&bits);

        let mut runs = Vec::new();
        let mut cursor = 0;
        let mut index = 0;
        let mut length = 0;
        while map.next_free_range(cursor, &mut index, &mut length) {
            prop_assert!(length >= 1);
            runs.push((index, length));
            cursor = index + length;
        }

        let mut expected = Vec::new();
        let mut i = 0;
        while i < 512 {
            if !bits[i] {
                let start = i;
                while i < 512 && !bits[i] {
                    i += 1;
                }
                expected.push((start, i - start));
            } else {
                i += 1;
            }
        }
        prop_assert_eq!(runs, expected);
    }
}

/// Replay a random op sequence against a descriptor, tracking the live
/// allocations on the side.
fn replay(ops: &[(bool, u16)]) -> (BlockDescriptor, Vec<(usize, usize)>) {
    replay_at(0, ops)
}

fn replay_at(address: usize, ops: &[(bool, u16)]) -> (BlockDescriptor, Vec<(usize, usize)>) {
    let mut descriptor = BlockDescriptor::new(address, 0);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for &(is_reserve, argument) in ops {
        if is_reserve {
            let pages = 1 + argument as usize % 32;
            if pages <= descriptor.longest_free_range() {
                let index = descriptor.reserve(pages);
                live.push((index, pages));
            }
        } else if !live.is_empty() {
            let victim = argument as usize % live.len();
            let (index, pages) = live.swap_remove(victim);
            descriptor.release(index, pages);
        }
    }
    (descriptor, live)
}

fn actual_longest_free_run(descriptor: &BlockDescriptor) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for page in 0..PAGES_IN_BLOCK {
        if descriptor.is_page_allocated(page) {
            run = 0;
        } else {
            run += 1;
            longest = longest.max(run);
        }
    }
    longest
}

proptest! {
    /// Counters stay consistent with the bitmap through any valid sequence,
    /// and the cached longest free range never under-approximates.
    #[test]
    fn block_counters_and_lfr(ops in prop::collection::vec((any::<bool>(), any::<u16>()), 1..120)) {
        let (descriptor, live) = replay(&ops);

        let live_pages: usize = live.iter().map(|&(_, pages)| pages).sum();
        prop_assert_eq!(descriptor.used_count(), live_pages);
        prop_assert_eq!(descriptor.alloc_count(), live.len());

        let allocated = (0..PAGES_IN_BLOCK)
            .filter(|&page| descriptor.is_page_allocated(page))
            .count();
        prop_assert_eq!(descriptor.used_count(), allocated);

        prop_assert!(descriptor.longest_free_range() >= actual_longest_free_run(&descriptor));

        // No two live allocations overlap.
        let mut pages_seen = vec![false; PAGES_IN_BLOCK];
        for &(index, pages) in &live {
            for page in index..index + pages {
                prop_assert!(!pages_seen[page]);
                pages_seen[page] = true;
                prop_assert!(descriptor.is_page_allocated(page));
            }
        }
    }

    /// The packed priority key orders exactly by
    /// (shorter LFR, more allocations, lower address).
    #[test]
    fn priority_cmp_matches_policy(
        left_ops in prop::collection::vec((any::<bool>(), any::<u16>()), 0..60),
        right_ops in prop::collection::vec((any::<bool>(), any::<u16>()), 0..60),
        same_address in any::<bool>(),
    ) {
        let (left, _) = replay(&left_ops);
        let right_address = if same_address { 0 } else { BLOCK_SIZE };
        let (right, _) = replay_at(right_address, &right_ops);

        let policy = |d: &BlockDescriptor| {
            (d.longest_free_range(), Reverse(d.alloc_count()), d.address())
        };
        prop_assert_eq!(
            priority_block_cmp(&left, &right),
            policy(&left).cmp(&policy(&right))
        );
    }

    /// Size classes are the smallest class covering the size.
    #[test]
    fn size_class_is_minimal_cover(size in 1usize..=MAX_SMALL_SIZE) {
        let class = class_for_size(size);
        let slot = size_from_class(class);
        prop_assert!(slot >= size);
        if class > 0 {
            prop_assert!(size_from_class(class - 1) < size);
        }
    }
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    selector.rs

Abstract:

    File contains the injection target selection strategies.

--*/

use crate::fault_list::FaultListItem;
use crate::frame_table::FrameTable;
use faultline_error::{FaultlineError, FaultlineResult};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Block type filter carried by the job descriptor (0 = CLB, 1 = BRAM,
/// anything else = no filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFilter {
    Clb,
    Bram,
    Any,
}

impl From<u32> for BlockFilter {
    fn from(val: u32) -> Self {
        match val {
            0 => BlockFilter::Clb,
            1 => BlockFilter::Bram,
            _ => BlockFilter::Any,
        }
    }
}

impl BlockFilter {
    pub fn matches(&self, block: u32) -> bool {
        match self {
            BlockFilter::Clb => block == 0,
            BlockFilter::Bram => block == 1,
            BlockFilter::Any => true,
        }
    }
}

/// Target cell model. Flip-flop targets skip readback capture so the
/// state about to be corrupted is not latched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Unknown,
    Lut,
    FlipFlop,
    Bram,
}

impl From<u32> for CellType {
    fn from(val: u32) -> Self {
        match val {
            1 => CellType::Lut,
            2 => CellType::FlipFlop,
            3 => CellType::Bram,
            _ => CellType::Unknown,
        }
    }
}

/// Constraints applied while drawing targets.
#[derive(Debug, Clone, Copy)]
pub struct TargetFilter {
    pub block: BlockFilter,
    pub essential_only: bool,
    pub without_repetition: bool,
    pub cell_type: CellType,
}

/// One fault coordinate produced by a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionTarget {
    pub far: u32,
    pub frame_index: usize,
    pub word: usize,
    pub bit: u32,
    pub cell_type: CellType,
    pub inj_cycle: u32,
}

/// Uniform random selection with rejection of filtered coordinates.
///
/// Seeded so a resumed campaign can replay the draw sequence up to its
/// start index.
pub struct RandomSelector {
    rng: SmallRng,
}

impl RandomSelector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn next_target(
        &mut self,
        table: &mut FrameTable,
        filter: &TargetFilter,
    ) -> FaultlineResult<InjectionTarget> {
        if table.injectable().is_empty() {
            return Err(FaultlineError::SELECTOR_EMPTY_POOL);
        }
        let family = table.family();
        let frame_words = family.frame_words();
        // The original firmware loops forever once the pool dries up;
        // bound the rejection loop instead and report exhaustion. The
        // budget covers the candidate coordinate space many times over,
        // so a live pool is found with overwhelming probability.
        let budget = (table.injectable().len() * frame_words * 32 * 16).max(1 << 16);

        for _ in 0..budget {
            let pool_pos = self.rng.gen_range(0..table.injectable().len());
            let frame_index = table.injectable()[pool_pos];
            let far = table.frames[frame_index].far;
            let addr = family.decode_far(far);
            if !filter.block.matches(addr.block) {
                continue;
            }
            let word = self.rng.gen_range(0..frame_words);
            if family.is_fixed_word(&addr, word) {
                continue;
            }
            let bit = self.rng.gen_range(0..32u32);
            if filter.essential_only && !table.frames[frame_index].is_essential(word, bit) {
                continue;
            }
            if filter.without_repetition {
                if table.frames[frame_index].is_tested(word, bit) {
                    continue;
                }
                table.frames[frame_index].mark_tested(word, bit);
            }
            return Ok(InjectionTarget {
                far,
                frame_index,
                word,
                bit,
                cell_type: filter.cell_type,
                inj_cycle: 0,
            });
        }
        Err(FaultlineError::SELECTOR_EXHAUSTED)
    }
}

/// Deterministic lexicographic scan over (frame, word, bit) restricted
/// to the injectable frame set.
///
/// Word wraps into the next injectable frame; reaching the end of the
/// last frame reports `SELECTOR_EXHAUSTED` (the original returned the
/// previous target unchanged, which callers could not distinguish from
/// progress).
#[derive(Default)]
pub struct ExhaustiveSelector {
    cursor: Option<(usize, usize, u32)>,
}

impl ExhaustiveSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_target(
        &mut self,
        table: &FrameTable,
        filter: &TargetFilter,
    ) -> FaultlineResult<InjectionTarget> {
        let injectable = table.injectable();
        if injectable.is_empty() {
            return Err(FaultlineError::SELECTOR_EMPTY_POOL);
        }
        let family = table.family();
        let frame_words = family.frame_words();

        let (mut frame_index, mut word, mut bit) = match self.cursor {
            Some(cursor) => cursor,
            None => (injectable[0], 0, 0),
        };
        let mut fresh = self.cursor.is_none();

        loop {
            if !fresh {
                bit += 1;
                if bit >= 32 {
                    bit = 0;
                    word += 1;
                }
                if word >= frame_words {
                    word = 0;
                    match injectable.iter().find(|&&idx| idx > frame_index) {
                        Some(&next) => frame_index = next,
                        None => return Err(FaultlineError::SELECTOR_EXHAUSTED),
                    }
                }
            }
            fresh = false;

            let far = table.frames[frame_index].far;
            let addr = family.decode_far(far);
            if !filter.block.matches(addr.block) {
                // No coordinate of this frame can match; step to its end.
                word = frame_words - 1;
                bit = 31;
                continue;
            }
            if family.is_fixed_word(&addr, word) {
                continue;
            }
            if filter.essential_only && !table.frames[frame_index].is_essential(word, bit) {
                continue;
            }

            self.cursor = Some((frame_index, word, bit));
            return Ok(InjectionTarget {
                far,
                frame_index,
                word,
                bit,
                cell_type: filter.cell_type,
                inj_cycle: 0,
            });
        }
    }
}

/// Resolve a flat fault-list item against the reference table.
pub fn target_from_list_item(
    table: &FrameTable,
    item: &FaultListItem,
    cell_type: CellType,
) -> FaultlineResult<InjectionTarget> {
    let frame_index = table
        .index_of_far(item.far)
        .ok_or(FaultlineError::SELECTOR_UNKNOWN_FAR)?;
    Ok(InjectionTarget {
        far: item.far,
        frame_index,
        word: item.word as usize,
        bit: item.bit,
        cell_type,
        inj_cycle: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::far::{DeviceFamily, FrameAddress, BLOCK_CLB};
    use crate::frame_table::ReferenceFrame;

    fn small_table(essential: &[(usize, u32)]) -> FrameTable {
        let family = DeviceFamily::Series7;
        let mut table = FrameTable::new(family);
        for minor in 0..2u32 {
            let far = family.encode_far(&FrameAddress::new(BLOCK_CLB, 0, 0, 20, minor));
            let mut frame = ReferenceFrame::new(far, family.frame_words());
            for &(word, bit) in essential {
                frame.mask[word] |= 1 << bit;
            }
            frame.essential_bits = frame.mask.iter().map(|w| w.count_ones()).sum();
            table.push_frame(frame);
        }
        table.rebuild_index();
        table
    }

    fn any_filter(without_repetition: bool, essential_only: bool) -> TargetFilter {
        TargetFilter {
            block: BlockFilter::Any,
            essential_only,
            without_repetition,
            cell_type: CellType::Unknown,
        }
    }

    #[test]
    fn test_random_respects_essential_filter() {
        let mut table = small_table(&[(7, 3)]);
        let mut selector = RandomSelector::new(7);
        for _ in 0..16 {
            let target = selector
                .next_target(&mut table, &any_filter(false, true))
                .unwrap();
            assert_eq!(target.word, 7);
            assert_eq!(target.bit, 3);
        }
    }

    #[test]
    fn test_random_without_repetition_exhausts() {
        // Pool of exactly one injectable bit per frame, two frames.
        let mut table = small_table(&[(7, 3)]);
        let mut selector = RandomSelector::new(99);
        let filter = any_filter(true, true);

        let first = selector.next_target(&mut table, &filter).unwrap();
        let second = selector.next_target(&mut table, &filter).unwrap();
        assert_ne!(
            (first.frame_index, first.word, first.bit),
            (second.frame_index, second.word, second.bit)
        );
        // Pool is spent now; the selector must report it rather than
        // return a repeat.
        assert_eq!(
            selector.next_target(&mut table, &filter),
            Err(FaultlineError::SELECTOR_EXHAUSTED)
        );
    }

    #[test]
    fn test_random_replay_is_deterministic() {
        let mut table_a = small_table(&[(7, 3), (9, 1)]);
        let mut table_b = small_table(&[(7, 3), (9, 1)]);
        let filter = any_filter(false, true);
        let mut first = RandomSelector::new(1234);
        let mut second = RandomSelector::new(1234);
        for _ in 0..32 {
            assert_eq!(
                first.next_target(&mut table_a, &filter).unwrap(),
                second.next_target(&mut table_b, &filter).unwrap()
            );
        }
    }

    #[test]
    fn test_exhaustive_order_and_exhaustion() {
        let mut table = small_table(&[(0, 0), (0, 1)]);
        // Restrict to one frame to keep the walk short.
        table.frames[1].essential_bits = 0;
        table.rebuild_index();

        let mut selector = ExhaustiveSelector::new();
        let filter = any_filter(false, true);
        let first = selector.next_target(&table, &filter).unwrap();
        let second = selector.next_target(&table, &filter).unwrap();
        assert_eq!((first.word, first.bit), (0, 0));
        assert_eq!((second.word, second.bit), (0, 1));
        // Only two essential bits exist; the scan must end, not repeat
        // the previous target.
        assert_eq!(
            selector.next_target(&table, &filter),
            Err(FaultlineError::SELECTOR_EXHAUSTED)
        );
    }

    #[test]
    fn test_list_item_resolution() {
        let table = small_table(&[(7, 3)]);
        let item = FaultListItem {
            id: 0,
            far: table.frames[1].far,
            word: 9,
            bit: 21,
            timestamp: 0.0,
            result: 0,
        };
        let target = target_from_list_item(&table, &item, CellType::Lut).unwrap();
        assert_eq!(target.frame_index, 1);
        assert_eq!((target.word, target.bit), (9, 21));

        let unknown = FaultListItem {
            far: 0xBAD_F00D,
            ..item
        };
        assert_eq!(
            target_from_list_item(&table, &unknown, CellType::Lut),
            Err(FaultlineError::SELECTOR_UNKNOWN_FAR)
        );
    }

    #[test]
    fn test_exhaustive_skips_fixed_word() {
        let family = DeviceFamily::Series7;
        let mut table = FrameTable::new(family);
        let far = family.encode_far(&FrameAddress::new(BLOCK_CLB, 0, 0, 20, 0));
        let mut frame = ReferenceFrame::new(far, family.frame_words());
        frame.mask = vec![0xFFFF_FFFF; family.frame_words()];
        frame.essential_bits = 32 * family.frame_words() as u32;
        table.push_frame(frame);
        table.rebuild_index();

        let mut selector = ExhaustiveSelector::new();
        let filter = any_filter(false, true);
        loop {
            match selector.next_target(&table, &filter) {
                Ok(target) => assert_ne!(target.word, crate::far::CLB_FIXED_WORD),
                Err(_) => break,
            }
        }
    }
}

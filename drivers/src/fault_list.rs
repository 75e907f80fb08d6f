/*++

Licensed under the Apache-2.0 license.

File Name:

    fault_list.rs

Abstract:

    File contains the externally supplied fault list formats and the
    multi-bit fault grouping.

--*/

use crate::transport::FrameTransport;
use faultline_error::{FaultlineError, FaultlineResult};
use zerocopy::{AsBytes, FromBytes};

/// Sync word at the start of a fault list image.
pub const FAULT_LIST_SYNC_WORD: u32 = 0xFA01_FA01;

/// Byte offset of the first record behind the image header.
const FAULT_LIST_HEADER_BYTES: usize = 0x40;

/// One elementary fault. Descriptors sharing an `id` form one multi-bit
/// fault injected and recovered as a unit.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default, PartialEq)]
pub struct FaultDescriptor {
    pub id: u32,
    pub offset: u32,
    pub cell_type: u32,
    pub fault_model: u32,
    pub cell_y: u32,
    pub cell_label: u32,
    pub slr: u32,
    pub far: u32,
    pub word: u32,
    pub mask: u32,
    pub time: u32,
    pub duration: u32,
    /// Expected golden word content at injection time. A mismatch means
    /// the caller's golden data is stale; logged, not fatal.
    pub reference_word: u32,
}

impl FaultDescriptor {
    /// Resolve the frame-relative bit offset to a (word, bit) pair.
    pub fn word_bit_from_offset(&self) -> (usize, u32) {
        ((self.offset / 32) as usize, self.offset % 32)
    }
}

/// Flat fault list record addressed by index.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default, PartialEq)]
pub struct FaultListItem {
    pub id: u32,
    pub far: u32,
    pub word: u32,
    pub bit: u32,
    pub timestamp: f32,
    pub result: u32,
}

/// Parsed fault list.
pub struct FaultList {
    pub descriptors: Vec<FaultDescriptor>,
    /// Set when the image carried golden reference words; otherwise they
    /// are captured from live frames before the campaign starts.
    pub reference_data_present: bool,
}

impl FaultList {
    /// Parse a fault list image: sync word, record count, reference-data
    /// flag, records at a fixed offset.
    pub fn parse(bytes: &[u8]) -> FaultlineResult<Self> {
        let sync = u32::read_from_prefix(bytes).ok_or(FaultlineError::FORMAT_TRUNCATED)?;
        if sync != FAULT_LIST_SYNC_WORD {
            return Err(FaultlineError::FORMAT_BAD_SYNC);
        }
        let count = u32::read_from_prefix(bytes.get(4..).ok_or(FaultlineError::FORMAT_TRUNCATED)?)
            .ok_or(FaultlineError::FORMAT_TRUNCATED)? as usize;
        let ref_flag =
            u32::read_from_prefix(bytes.get(8..).ok_or(FaultlineError::FORMAT_TRUNCATED)?)
                .ok_or(FaultlineError::FORMAT_TRUNCATED)?;

        let record_bytes = core::mem::size_of::<FaultDescriptor>();
        let mut descriptors = Vec::with_capacity(count);
        let mut offset = FAULT_LIST_HEADER_BYTES;
        for _ in 0..count {
            let desc = FaultDescriptor::read_from_prefix(
                bytes.get(offset..).ok_or(FaultlineError::FORMAT_TRUNCATED)?,
            )
            .ok_or(FaultlineError::FORMAT_TRUNCATED)?;
            descriptors.push(desc);
            offset += record_bytes;
        }

        Ok(Self {
            descriptors,
            reference_data_present: ref_flag != 0,
        })
    }

    /// Capture golden reference words from live frames (host images may
    /// omit them).
    pub fn capture_reference<T: FrameTransport>(
        &mut self,
        transport: &mut T,
    ) -> FaultlineResult<()> {
        for desc in &mut self.descriptors {
            let frame = transport.read_frame(desc.far, false)?;
            desc.reference_word = frame.word(desc.word as usize);
        }
        self.reference_data_present = true;
        Ok(())
    }

    /// Iterate over multi-bit fault groups: maximal runs of descriptors
    /// sharing one id. Slice-based; never reads past the final record.
    pub fn groups(&self) -> FaultGroups<'_> {
        FaultGroups {
            descriptors: &self.descriptors,
            pos: 0,
        }
    }
}

/// Parse the flat fault list shape: same header, `FaultListItem`
/// records addressed by index.
pub fn parse_fault_items(bytes: &[u8]) -> FaultlineResult<Vec<FaultListItem>> {
    let sync = u32::read_from_prefix(bytes).ok_or(FaultlineError::FORMAT_TRUNCATED)?;
    if sync != FAULT_LIST_SYNC_WORD {
        return Err(FaultlineError::FORMAT_BAD_SYNC);
    }
    let count = u32::read_from_prefix(bytes.get(4..).ok_or(FaultlineError::FORMAT_TRUNCATED)?)
        .ok_or(FaultlineError::FORMAT_TRUNCATED)? as usize;

    let record_bytes = core::mem::size_of::<FaultListItem>();
    let mut items = Vec::with_capacity(count);
    let mut offset = FAULT_LIST_HEADER_BYTES;
    for _ in 0..count {
        let item = FaultListItem::read_from_prefix(
            bytes.get(offset..).ok_or(FaultlineError::FORMAT_TRUNCATED)?,
        )
        .ok_or(FaultlineError::FORMAT_TRUNCATED)?;
        items.push(item);
        offset += record_bytes;
    }
    Ok(items)
}

/// Iterator over contiguous same-id descriptor runs.
pub struct FaultGroups<'a> {
    descriptors: &'a [FaultDescriptor],
    pos: usize,
}

impl<'a> Iterator for FaultGroups<'a> {
    type Item = &'a [FaultDescriptor];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.descriptors.len() {
            return None;
        }
        let start = self.pos;
        let id = self.descriptors[start].id;
        let mut end = start + 1;
        while end < self.descriptors.len() && self.descriptors[end].id == id {
            end += 1;
        }
        self.pos = end;
        Some(&self.descriptors[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(descriptors: &[FaultDescriptor], ref_flag: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; FAULT_LIST_HEADER_BYTES];
        bytes[0..4].copy_from_slice(&FAULT_LIST_SYNC_WORD.to_le_bytes());
        bytes[4..8].copy_from_slice(&(descriptors.len() as u32).to_le_bytes());
        bytes[8..12].copy_from_slice(&ref_flag.to_le_bytes());
        for desc in descriptors {
            bytes.extend_from_slice(desc.as_bytes());
        }
        bytes
    }

    fn descriptor(id: u32, far: u32) -> FaultDescriptor {
        FaultDescriptor {
            id,
            far,
            word: 1,
            mask: 0x10,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_and_group() {
        let descs = [
            descriptor(1, 0x100),
            descriptor(1, 0x101),
            descriptor(2, 0x200),
            descriptor(3, 0x300),
            descriptor(3, 0x301),
            descriptor(3, 0x302),
        ];
        let list = FaultList::parse(&image(&descs, 1)).unwrap();
        assert!(list.reference_data_present);
        assert_eq!(list.descriptors.len(), 6);

        let groups: Vec<_> = list.groups().collect();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[2].len(), 3);
        // Group atomicity at the data layer: every member shares the id.
        for group in groups {
            assert!(group.iter().all(|d| d.id == group[0].id));
        }
    }

    #[test]
    fn test_parse_rejects_bad_sync() {
        let mut bytes = image(&[descriptor(1, 0)], 0);
        bytes[0] = 0;
        assert!(matches!(
            FaultList::parse(&bytes),
            Err(err) if err == FaultlineError::FORMAT_BAD_SYNC
        ));
    }

    #[test]
    fn test_parse_rejects_short_image() {
        let mut bytes = image(&[descriptor(1, 0), descriptor(2, 0)], 0);
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(
            FaultList::parse(&bytes),
            Err(err) if err == FaultlineError::FORMAT_TRUNCATED
        ));
    }

    #[test]
    fn test_offset_resolution() {
        let desc = FaultDescriptor {
            offset: 3 * 32 + 17,
            ..Default::default()
        };
        assert_eq!(desc.word_bit_from_offset(), (3, 17));
    }

    #[test]
    fn test_parse_flat_items() {
        let items = [
            FaultListItem {
                id: 0,
                far: 0x100,
                word: 7,
                bit: 3,
                timestamp: 0.5,
                result: 0,
            },
            FaultListItem {
                id: 1,
                far: 0x101,
                word: 9,
                bit: 30,
                timestamp: 1.5,
                result: 0,
            },
        ];
        let mut bytes = vec![0u8; FAULT_LIST_HEADER_BYTES];
        bytes[0..4].copy_from_slice(&FAULT_LIST_SYNC_WORD.to_le_bytes());
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        for item in &items {
            bytes.extend_from_slice(item.as_bytes());
        }

        let parsed = parse_fault_items(&bytes).unwrap();
        assert_eq!(parsed, items);
    }

    #[test]
    fn test_single_trailing_group_terminates() {
        // A final group with no distinct id after it must still be
        // yielded exactly once.
        let list = FaultList {
            descriptors: vec![descriptor(9, 0), descriptor(9, 1)],
            reference_data_present: false,
        };
        let groups: Vec<_> = list.groups().collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }
}

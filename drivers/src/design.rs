/*++

Licensed under the Apache-2.0 license.

File Name:

    design.rs

Abstract:

    File contains the design description (bitmask) image codec: the
    reference frame table, recovery frame list and checkpoint frame list
    produced from synthesis output.

--*/

use crate::far::DeviceFamily;
use crate::frame_table::{FrameFlags, FrameTable, ReferenceFrame};
use faultline_error::{FaultlineError, FaultlineResult};

/// Header layout: three (offset, count) word pairs for the frame
/// descriptor, recovery and checkpoint sections. Offsets are in words
/// from the start of the image.
const HEADER_WORDS: usize = 6;

/// Convert a little-endian byte image into words.
pub fn words_from_bytes(bytes: &[u8]) -> FaultlineResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(FaultlineError::FORMAT_TRUNCATED);
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Parse a design description image into a reference frame table.
pub fn parse_design_image(family: DeviceFamily, words: &[u32]) -> FaultlineResult<FrameTable> {
    if words.len() < HEADER_WORDS {
        return Err(FaultlineError::FORMAT_TRUNCATED);
    }
    let frame_offset = words[0] as usize;
    let frame_count = words[1] as usize;
    let recovery_offset = words[2] as usize;
    let recovery_count = words[3] as usize;
    let checkpoint_offset = words[4] as usize;
    let checkpoint_count = words[5] as usize;

    let n = family.frame_words();
    let record_words = 3 + 2 * n;

    let mut table = FrameTable::new(family);
    let mut pos = frame_offset;
    for _ in 0..frame_count {
        let record = words
            .get(pos..pos + record_words)
            .ok_or(FaultlineError::FORMAT_TRUNCATED)?;
        let mut frame = ReferenceFrame::new(record[0], n);
        frame.flags = FrameFlags::from_bits_truncate(record[1]);
        frame.essential_bits = record[2];
        for k in 0..n {
            frame.data[k] = record[3 + 2 * k];
            frame.mask[k] = record[4 + 2 * k];
        }
        table.push_frame(frame);
        pos = match pos.checked_add(record_words) {
            Some(next) => next,
            None => return Err(FaultlineError::FORMAT_TRUNCATED),
        };
    }

    let recovery_fars = words
        .get(recovery_offset..recovery_offset + recovery_count)
        .ok_or(FaultlineError::FORMAT_TRUNCATED)?;
    for &far in recovery_fars {
        match table.index_of_far(far) {
            Some(index) => table.recovery.push(index),
            // Stale host data; the frame simply cannot be kept clean.
            None => log::warn!("recovery FAR {far:08x} not in the reference table"),
        }
    }

    let checkpoint_fars = words
        .get(checkpoint_offset..checkpoint_offset + checkpoint_count)
        .ok_or(FaultlineError::FORMAT_TRUNCATED)?;
    table.checkpoint_fars = checkpoint_fars.to_vec();

    table.rebuild_index();
    Ok(table)
}

/// Serialize a frame table back into the design description layout.
pub fn build_design_image(table: &FrameTable) -> Vec<u32> {
    let n = table.family().frame_words();
    let record_words = 3 + 2 * n;

    let frame_offset = HEADER_WORDS;
    let recovery_offset = frame_offset + table.frames.len() * record_words;
    let checkpoint_offset = recovery_offset + table.recovery.len();

    let mut words = vec![
        frame_offset as u32,
        table.frames.len() as u32,
        recovery_offset as u32,
        table.recovery.len() as u32,
        checkpoint_offset as u32,
        table.checkpoint_fars.len() as u32,
    ];
    for frame in &table.frames {
        words.push(frame.far);
        words.push(frame.flags.bits());
        words.push(frame.essential_bits);
        for k in 0..n {
            words.push(frame.data[k]);
            words.push(frame.mask[k]);
        }
    }
    for &index in &table.recovery {
        words.push(table.frames[index].far);
    }
    words.extend_from_slice(&table.checkpoint_fars);
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::far::{FrameAddress, BLOCK_BRAM, BLOCK_CLB};

    fn sample_table() -> FrameTable {
        let family = DeviceFamily::Series7;
        let mut table = FrameTable::new(family);
        for (block, major, minor) in [(BLOCK_CLB, 20, 0), (BLOCK_CLB, 20, 1), (BLOCK_BRAM, 2, 0)] {
            let far = family.encode_far(&FrameAddress::new(block, 0, 0, major, minor));
            let mut frame = ReferenceFrame::new(far, family.frame_words());
            frame.data[7] = 0xCAFE_0000 | minor;
            frame.mask[7] = 0x0000_00FF;
            frame.essential_bits = 8;
            frame.flags = FrameFlags::NOT_EMPTY;
            table.push_frame(frame);
        }
        table.recovery.push(2);
        table.checkpoint_fars = vec![table.frames[1].far];
        table.rebuild_index();
        table
    }

    #[test]
    fn test_image_round_trip() {
        let table = sample_table();
        let words = build_design_image(&table);
        let parsed = parse_design_image(table.family(), &words).unwrap();

        assert_eq!(parsed.frames.len(), 3);
        assert_eq!(parsed.clb_frames, 2);
        assert_eq!(parsed.bram_frames, 1);
        assert_eq!(parsed.recovery, vec![2]);
        assert_eq!(parsed.checkpoint_fars, table.checkpoint_fars);
        for (a, b) in parsed.frames.iter().zip(table.frames.iter()) {
            assert_eq!(a.far, b.far);
            assert_eq!(a.data, b.data);
            assert_eq!(a.mask, b.mask);
            assert_eq!(a.essential_bits, b.essential_bits);
        }
        assert_eq!(parsed.injectable(), table.injectable());
    }

    #[test]
    fn test_truncated_image_is_rejected() {
        let table = sample_table();
        let mut words = build_design_image(&table);
        words.truncate(words.len() - 1);
        assert!(matches!(
            parse_design_image(table.family(), &words),
            Err(err) if err == FaultlineError::FORMAT_TRUNCATED
        ));
    }

    #[test]
    fn test_bytes_to_words() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(words_from_bytes(&bytes).unwrap(), vec![0x1234_5678, 1]);
        assert!(words_from_bytes(&bytes[..5]).is_err());
    }
}

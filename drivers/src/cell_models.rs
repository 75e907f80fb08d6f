/*++

Licensed under the Apache-2.0 license.

File Name:

    cell_models.rs

Abstract:

    File contains the UltraScale+ cell-model variants: slice-register
    and block-RAM latch manipulation for cells that plain
    configuration-memory XOR cannot reach.

--*/

use crate::frame::{with_word_bit, word_bit};
use crate::transport::FrameTransport;
use faultline_error::FaultlineResult;

// Per-slice coordinate maps, indexed by (register Y % 16) * 2 + label.
// Device-internal structure data; fixed per family, not derived.

const RB_WORD: [usize; 32] = [
    0, 0, 2, 2, 4, 4, 7, 7, 8, 8, 10, 10,
    12, 12, 15, 15, 16, 16, 18, 18, 20, 20, 23, 23,
    24, 24, 26, 26, 28, 28, 31, 31,
];

const RB_BIT: [u32; 32] = [
    6, 19, 0, 13, 26, 7, 20, 1, 14, 27, 8, 21,
    2, 15, 28, 9, 22, 3, 16, 29, 10, 23, 4, 17,
    30, 11, 24, 5, 18, 31, 12, 25,
];

const SR_WORD: [usize; 32] = [
    1, 1, 3, 3, 5, 5, 8, 8, 9, 9, 11, 11,
    13, 13, 16, 16, 17, 17, 19, 19, 21, 21, 24, 24,
    25, 25, 27, 27, 29, 29, 32, 32,
];

const SR_BIT: [u32; 32] = [
    15, 28, 9, 22, 3, 16, 29, 10, 23, 4, 17, 30,
    11, 24, 5, 18, 31, 12, 25, 6, 19, 0, 13, 26,
    7, 20, 1, 14, 27, 8, 21, 2,
];

const INV_FAR_OFFSET: [u32; 32] = [
    26, 32, 26, 32, 26, 32, 26, 32, 26, 32, 26, 32,
    26, 32, 26, 32, 26, 32, 26, 32, 26, 32, 26, 32,
    26, 32, 26, 32, 26, 32, 26, 32,
];

const INV_WORD: [usize; 32] = [
    0, 3, 6, 9, 12, 15, 18, 21, 24, 27, 30, 33,
    36, 39, 42, 45, 48, 51, 54, 57, 60, 63, 66, 69,
    72, 75, 78, 81, 84, 87, 90, 1,
];

const INV_BIT: [u32; 32] = [
    5, 12, 19, 26, 1, 8, 15, 22, 29, 4, 11, 18,
    25, 0, 7, 14, 21, 28, 3, 10, 17, 24, 31, 6,
    13, 20, 27, 2, 9, 16, 23, 30,
];

const ICLK_FAR_OFFSET: [u32; 32] = [
    26, 32, 26, 32, 26, 32, 26, 32, 26, 32, 26, 32,
    26, 32, 26, 32, 26, 32, 26, 32, 26, 32, 26, 32,
    26, 32, 26, 32, 26, 32, 26, 32,
];

const ICLK_WORD: [usize; 32] = [
    2, 5, 8, 11, 14, 17, 20, 23, 26, 29, 32, 35,
    38, 41, 44, 47, 50, 53, 56, 59, 62, 65, 68, 71,
    74, 77, 80, 83, 86, 89, 0, 3,
];

const ICLK_BIT: [u32; 32] = [
    8, 15, 22, 29, 4, 11, 18, 25, 0, 7, 14, 21,
    28, 3, 10, 17, 24, 31, 6, 13, 20, 27, 2, 9,
    16, 23, 30, 5, 12, 19, 26, 1,
];

const DCON_FAR_OFFSET: [u32; 32] = [
    30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    30, 30, 30, 30, 30, 30, 30, 30,
];

const DCON_WORD: [usize; 32] = [
    11, 13, 15, 17, 19, 21, 23, 25, 27, 29, 31, 33,
    35, 37, 39, 41, 43, 45, 47, 49, 51, 53, 55, 57,
    59, 61, 63, 65, 67, 69, 71, 73,
];

const DCON_BIT: [u32; 32] = [
    17, 28, 7, 18, 29, 8, 19, 30, 9, 20, 31, 10,
    21, 0, 11, 22, 1, 12, 23, 2, 13, 24, 3, 14,
    25, 4, 15, 26, 5, 16, 27, 6,
];

// Block-RAM output latch map and the per-group reset/clock pulse
// coordinates (far offset, word, bit).

const LATCH_MAP: [(usize, u32); 128] = [
    (6, 3), (6, 8), (6, 13), (6, 18), (6, 23), (6, 28), (6, 1), (6, 6),
    (7, 11), (7, 16), (7, 21), (7, 26), (7, 31), (7, 4), (7, 9), (7, 14),
    (19, 19), (19, 24), (19, 29), (19, 2), (19, 7), (19, 12), (19, 17), (19, 22),
    (20, 27), (20, 0), (20, 5), (20, 10), (20, 15), (20, 20), (20, 25), (20, 30),
    (32, 3), (32, 8), (32, 13), (32, 18), (32, 23), (32, 28), (32, 1), (32, 6),
    (33, 11), (33, 16), (33, 21), (33, 26), (33, 31), (33, 4), (33, 9), (33, 14),
    (45, 19), (45, 24), (45, 29), (45, 2), (45, 7), (45, 12), (45, 17), (45, 22),
    (46, 27), (46, 0), (46, 5), (46, 10), (46, 15), (46, 20), (46, 25), (46, 30),
    (58, 3), (58, 8), (58, 13), (58, 18), (58, 23), (58, 28), (58, 1), (58, 6),
    (59, 11), (59, 16), (59, 21), (59, 26), (59, 31), (59, 4), (59, 9), (59, 14),
    (71, 19), (71, 24), (71, 29), (71, 2), (71, 7), (71, 12), (71, 17), (71, 22),
    (72, 27), (72, 0), (72, 5), (72, 10), (72, 15), (72, 20), (72, 25), (72, 30),
    (84, 3), (84, 8), (84, 13), (84, 18), (84, 23), (84, 28), (84, 1), (84, 6),
    (85, 11), (85, 16), (85, 21), (85, 26), (85, 31), (85, 4), (85, 9), (85, 14),
    (5, 19), (5, 24), (5, 29), (5, 2), (5, 7), (5, 12), (5, 17), (5, 22),
    (6, 27), (6, 0), (6, 5), (6, 10), (6, 15), (6, 20), (6, 25), (6, 30),
];

const GROUP_RESET: [(u32, usize, u32); 6] = [
    (1, 10, 7),
    (1, 23, 12),
    (1, 36, 17),
    (1, 49, 22),
    (1, 62, 27),
    (1, 75, 0),
];

const GROUP_CLOCK: [(u32, usize, u32); 6] = [
    (1, 11, 9),
    (1, 24, 14),
    (1, 37, 19),
    (1, 50, 24),
    (1, 63, 29),
    (1, 76, 2),
];

/// One configuration bit addressed relative to a slice's base frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitCoord {
    pub far_offset: u32,
    pub word: usize,
    pub bit: u32,
}

/// Control bits of one slice flip-flop.
#[derive(Debug, Clone, Copy)]
pub struct FfCoords {
    /// Captured register value readback position.
    pub readback: BitCoord,
    /// Set/reset value select.
    pub set_reset: BitCoord,
    /// Slice clock inverter.
    pub clock_inv: BitCoord,
    /// Internal clock gate.
    pub clock_gate: BitCoord,
    /// Clock network disconnect.
    pub disconnect: BitCoord,
}

/// Look up the control bits of flip-flop `ff_index` of the 16-bit
/// register column at slice offset `y`; the column parity selects the
/// primary or secondary map half.
pub fn ff_coords(y: u32, ff_index: u32) -> FfCoords {
    let idx = ((2 * (ff_index % 16) + (y & 1)) % 32) as usize;
    FfCoords {
        readback: BitCoord {
            far_offset: 0,
            word: RB_WORD[idx],
            bit: RB_BIT[idx],
        },
        set_reset: BitCoord {
            far_offset: 0,
            word: SR_WORD[idx],
            bit: SR_BIT[idx],
        },
        clock_inv: BitCoord {
            far_offset: INV_FAR_OFFSET[idx],
            word: INV_WORD[idx],
            bit: INV_BIT[idx],
        },
        clock_gate: BitCoord {
            far_offset: ICLK_FAR_OFFSET[idx],
            word: ICLK_WORD[idx],
            bit: ICLK_BIT[idx],
        },
        disconnect: BitCoord {
            far_offset: DCON_FAR_OFFSET[idx],
            word: DCON_WORD[idx],
            bit: DCON_BIT[idx],
        },
    }
}

fn set_config_bit<T: FrameTransport>(
    transport: &mut T,
    far: u32,
    coord: &BitCoord,
    value: u32,
) -> FaultlineResult<()> {
    let target_far = far + coord.far_offset;
    let mut frame = transport.read_frame(target_far, false)?;
    frame.set_word(coord.word, with_word_bit(frame.word(coord.word), coord.bit, value));
    transport.write_frame(target_far, &frame, false)
}

/// Read back the current 16-bit register value of the slice at `far`,
/// register column `y`, via GCAPTURE readback.
pub fn read_slice_register<T: FrameTransport>(
    transport: &mut T,
    far: u32,
    y: u32,
) -> FaultlineResult<u16> {
    let frame = transport.read_frame(far, true)?;
    let mut value = 0u16;
    for ff in 0..16u32 {
        let coords = ff_coords(y, ff).readback;
        let bit = word_bit(frame.word(coords.word), coords.bit);
        value |= (bit as u16) << ff;
    }
    Ok(value)
}

/// Drive a new 16-bit register value into the slice through the
/// set-reset-then-clock-toggle choreography:
///
/// 1. program each flip-flop's set/reset select to its target value,
/// 2. disconnect the slice clock from the fabric network,
/// 3. toggle the internal clock inverter to latch the selects,
/// 4. reconnect the clock and clear the selects.
pub fn write_slice_register<T: FrameTransport>(
    transport: &mut T,
    far: u32,
    y: u32,
    value: u16,
) -> FaultlineResult<()> {
    // Step 1: set/reset selects.
    for ff in 0..16u32 {
        let coords = ff_coords(y, ff);
        let bit_value = ((value >> ff) & 1) as u32;
        set_config_bit(transport, far, &coords.set_reset, bit_value)?;
    }

    let ctl = ff_coords(y, 0);
    // Step 2: isolate the slice clock.
    set_config_bit(transport, far, &ctl.disconnect, 1)?;
    // Step 3: one internal clock edge re-latches every flip-flop from
    // its select.
    set_config_bit(transport, far, &ctl.clock_inv, 1)?;
    set_config_bit(transport, far, &ctl.clock_inv, 0)?;
    // Step 4: reconnect and clear the selects.
    set_config_bit(transport, far, &ctl.disconnect, 0)?;
    for ff in 0..16u32 {
        let coords = ff_coords(y, ff);
        set_config_bit(transport, far, &coords.set_reset, 0)?;
    }
    Ok(())
}

/// Flip one flip-flop of the slice register at `far`/`y`.
pub fn flip_slice_register<T: FrameTransport>(
    transport: &mut T,
    far: u32,
    y: u32,
    ff_index: u32,
) -> FaultlineResult<()> {
    let current = read_slice_register(transport, far, y)?;
    write_slice_register(transport, far, y, current ^ (1 << (ff_index & 0xF)))
}

/// Flip one block-RAM output latch.
///
/// The latch cells are not reachable by configuration XOR alone: the
/// surrounding 128-entry latch map is saved, the target entry flipped,
/// and a reset+clock pulse walked across the six internal groups before
/// the map is restored around the flipped entry.
pub fn flip_bram_latch<T: FrameTransport>(
    transport: &mut T,
    far: u32,
    latch_index: usize,
) -> FaultlineResult<()> {
    let latch_index = latch_index % LATCH_MAP.len();

    // Save the full latch map.
    let frame = transport.read_frame(far, true)?;
    let mut saved = [0u32; 128];
    for (i, &(word, bit)) in LATCH_MAP.iter().enumerate() {
        saved[i] = word_bit(frame.word(word), bit);
    }

    // Flip the target entry in place.
    let (word, bit) = LATCH_MAP[latch_index];
    let mut modified = frame.clone();
    modified.set_word(word, with_word_bit(modified.word(word), bit, saved[latch_index] ^ 1));
    transport.write_frame(far, &modified, true)?;

    // Pulse reset then clock across the six internal groups.
    for group in 0..GROUP_RESET.len() {
        let (reset_far, reset_word, reset_bit) = GROUP_RESET[group];
        let (clock_far, clock_word, clock_bit) = GROUP_CLOCK[group];
        let reset = BitCoord {
            far_offset: reset_far,
            word: reset_word,
            bit: reset_bit,
        };
        let clock = BitCoord {
            far_offset: clock_far,
            word: clock_word,
            bit: clock_bit,
        };
        set_config_bit(transport, far, &reset, 1)?;
        set_config_bit(transport, far, &clock, 1)?;
        set_config_bit(transport, far, &clock, 0)?;
        set_config_bit(transport, far, &reset, 0)?;
    }

    // Restore the map around the flipped entry.
    let mut restored = transport.read_frame(far, false)?;
    for (i, &(word, bit)) in LATCH_MAP.iter().enumerate() {
        let value = if i == latch_index {
            saved[i] ^ 1
        } else {
            saved[i]
        };
        restored.set_word(word, with_word_bit(restored.word(word), bit, value));
    }
    transport.write_frame(far, &restored, true)
}

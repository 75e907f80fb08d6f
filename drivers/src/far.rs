/*++

Licensed under the Apache-2.0 license.

File Name:

    far.rs

Abstract:

    File contains the frame address register codec and per-family
    configuration memory geometry.

--*/

use bitfield::{bitfield_bitrange, bitfield_fields};

/// Block type of a CLB/interconnect (logic) frame.
pub const BLOCK_CLB: u32 = 0;
/// Block type of a block-RAM content frame.
pub const BLOCK_BRAM: u32 = 1;

/// Fixed bits inside block-RAM ECC/parity words (bit 17 is not
/// configuration data and never reads back as written).
pub const BRAM_FIXED_WORD_MASK: u32 = 0xFFFD_FFFF;

/// Word index not accessible for injection in logic frames.
pub const CLB_FIXED_WORD: usize = 50;

const BRAM_MASKED_WORDS_101: [usize; 10] = [4, 14, 24, 34, 44, 55, 65, 75, 85, 95];
const BRAM_MASKED_WORDS_93: [usize; 9] = [4, 14, 24, 34, 44, 55, 65, 75, 85];

/// Supported device families, selected once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// 7-series parts and Zynq-7000 SoCs (ICAP / DevConfig PCAP).
    Series7,
    /// UltraScale parts.
    UltraScale,
    /// UltraScale+ parts and Zynq UltraScale+ MPSoCs (PCAP / CSU-DMA).
    UltraScalePlus,
}

/// Decoded frame address fields.
///
/// Families without a top/bottom split decode `top` as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameAddress {
    pub block: u32,
    pub top: u32,
    pub row: u32,
    pub major: u32,
    pub minor: u32,
}

impl FrameAddress {
    pub fn new(block: u32, top: u32, row: u32, major: u32, minor: u32) -> Self {
        Self {
            block,
            top,
            row,
            major,
            minor,
        }
    }

    pub fn is_clb(&self) -> bool {
        self.block == BLOCK_CLB
    }

    pub fn is_bram(&self) -> bool {
        self.block == BLOCK_BRAM
    }
}

#[derive(Copy, Clone)]
struct Far7(u32);
bitfield_bitrange! {struct Far7(u32)}
impl Far7 {
    bitfield_fields! {
        u32;
        minor, set_minor: 6, 0;
        major, set_major: 16, 7;
        row, set_row: 21, 17;
        top, set_top: 22, 22;
        block, set_block: 25, 23;
    }
}

#[derive(Copy, Clone)]
struct FarUltraScale(u32);
bitfield_bitrange! {struct FarUltraScale(u32)}
impl FarUltraScale {
    bitfield_fields! {
        u32;
        minor, set_minor: 6, 0;
        major, set_major: 16, 7;
        row, set_row: 22, 17;
        block, set_block: 25, 23;
    }
}

#[derive(Copy, Clone)]
struct FarUltraScalePlus(u32);
bitfield_bitrange! {struct FarUltraScalePlus(u32)}
impl FarUltraScalePlus {
    bitfield_fields! {
        u32;
        minor, set_minor: 7, 0;
        major, set_major: 17, 8;
        row, set_row: 23, 18;
        block, set_block: 26, 24;
    }
}

impl DeviceFamily {
    /// Number of 32-bit words in one configuration frame.
    pub const fn frame_words(&self) -> usize {
        match self {
            DeviceFamily::Series7 => 101,
            DeviceFamily::UltraScale | DeviceFamily::UltraScalePlus => 93,
        }
    }

    /// Extra pad words the configuration engine emits on readback after
    /// the null frame.
    pub const fn readback_pad_words(&self) -> usize {
        match self {
            DeviceFamily::Series7 => 0,
            DeviceFamily::UltraScale | DeviceFamily::UltraScalePlus => 25,
        }
    }

    /// Safe frame address the FAR is parked at after a write.
    pub const fn far_park(&self) -> u32 {
        match self {
            DeviceFamily::Series7 => 0x03BE_0000,
            DeviceFamily::UltraScale | DeviceFamily::UltraScalePlus => 0,
        }
    }

    /// Block-RAM word indexes carrying ECC/parity state.
    pub fn bram_masked_words(&self) -> &'static [usize] {
        match self {
            DeviceFamily::Series7 => &BRAM_MASKED_WORDS_101,
            DeviceFamily::UltraScale | DeviceFamily::UltraScalePlus => &BRAM_MASKED_WORDS_93,
        }
    }

    /// Decode a raw FAR value into its fields.
    ///
    /// Total: malformed input decodes to deterministic (if nonsensical)
    /// fields; validation is the caller's job.
    pub fn decode_far(&self, raw: u32) -> FrameAddress {
        match self {
            DeviceFamily::Series7 => {
                let far = Far7(raw);
                FrameAddress::new(far.block(), far.top(), far.row(), far.major(), far.minor())
            }
            DeviceFamily::UltraScale => {
                let far = FarUltraScale(raw);
                FrameAddress::new(far.block(), 0, far.row(), far.major(), far.minor())
            }
            DeviceFamily::UltraScalePlus => {
                let far = FarUltraScalePlus(raw);
                FrameAddress::new(far.block(), 0, far.row(), far.major(), far.minor())
            }
        }
    }

    /// Encode frame address fields into a raw FAR value.
    pub fn encode_far(&self, addr: &FrameAddress) -> u32 {
        match self {
            DeviceFamily::Series7 => {
                let mut far = Far7(0);
                far.set_block(addr.block);
                far.set_top(addr.top);
                far.set_row(addr.row);
                far.set_major(addr.major);
                far.set_minor(addr.minor);
                far.0
            }
            DeviceFamily::UltraScale => {
                let mut far = FarUltraScale(0);
                far.set_block(addr.block);
                far.set_row(addr.row);
                far.set_major(addr.major);
                far.set_minor(addr.minor);
                far.0
            }
            DeviceFamily::UltraScalePlus => {
                let mut far = FarUltraScalePlus(0);
                far.set_block(addr.block);
                far.set_row(addr.row);
                far.set_major(addr.major);
                far.set_minor(addr.minor);
                far.0
            }
        }
    }

    /// True for word positions that never accept injected data.
    pub fn is_fixed_word(&self, addr: &FrameAddress, word: usize) -> bool {
        if word == CLB_FIXED_WORD {
            return true;
        }
        addr.is_bram() && self.bram_masked_words().contains(&word)
    }

    /// Clears the fixed ECC/parity bits of a block-RAM frame in place.
    ///
    /// Applied to readback data and to probe patterns before they are
    /// written, so round-trip comparisons never see the fixed bits.
    pub fn mask_fixed_words(&self, addr: &FrameAddress, data: &mut [u32]) {
        if !addr.is_bram() {
            return;
        }
        for &word in self.bram_masked_words() {
            if word < data.len() {
                data[word] &= BRAM_FIXED_WORD_MASK;
            }
        }
    }
}

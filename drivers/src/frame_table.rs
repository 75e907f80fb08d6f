/*++

Licensed under the Apache-2.0 license.

File Name:

    frame_table.rs

Abstract:

    File contains the reference frame table and the injectability
    classifier.

--*/

use crate::far::{DeviceFamily, FrameAddress, BLOCK_BRAM, BLOCK_CLB};
use crate::frame::{word_bit, with_word_bit, Frame};
use crate::transport::FrameTransport;
use faultline_error::{FaultlineError, FaultlineResult};

bitflags::bitflags! {
    /// Per-frame status flags (wire-compatible with the design
    /// description image).
    pub struct FrameFlags: u32 {
        /// At least one word of the frame carries configuration data.
        const NOT_EMPTY = 1 << 0;
        /// Pad or excluded frame; skipped by the selectors.
        const EXCLUDED = 1 << 1;
    }
}

/// Golden content and injectability state of one frame.
#[derive(Debug, Clone)]
pub struct ReferenceFrame {
    pub far: u32,
    pub flags: FrameFlags,
    pub essential_bits: u32,
    /// Golden frame content captured at campaign start.
    pub data: Vec<u32>,
    /// Per-bit injectable mask (essential bits).
    pub mask: Vec<u32>,
    /// Per-bit tested mask (sampling without repetition).
    pub tested: Vec<u32>,
}

impl ReferenceFrame {
    pub fn new(far: u32, frame_words: usize) -> Self {
        Self {
            far,
            flags: FrameFlags::empty(),
            essential_bits: 0,
            data: vec![0; frame_words],
            mask: vec![0; frame_words],
            tested: vec![0; frame_words],
        }
    }

    pub fn is_essential(&self, word: usize, bit: u32) -> bool {
        word_bit(self.mask[word], bit) != 0
    }

    pub fn is_tested(&self, word: usize, bit: u32) -> bool {
        word_bit(self.tested[word], bit) != 0
    }

    pub fn mark_tested(&mut self, word: usize, bit: u32) {
        self.tested[word] = with_word_bit(self.tested[word], bit, 1);
    }

    pub fn golden_frame(&self) -> Frame {
        Frame::from_words(self.data.clone())
    }
}

/// Reference frame table held for the duration of one campaign.
pub struct FrameTable {
    family: DeviceFamily,
    pub frames: Vec<ReferenceFrame>,
    /// Indexes of frames eligible for injection.
    injectable: Vec<usize>,
    pub clb_frames: usize,
    pub bram_frames: usize,
    /// Essential-bit totals indexed by block type.
    pub essential_per_block: [u64; 8],
    /// Frames rewritten after every experiment (e.g. ROM-bearing frames).
    pub recovery: Vec<usize>,
    /// State-carrying frames snapshotted for latent-error detection.
    pub checkpoint_fars: Vec<u32>,
}

impl FrameTable {
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            frames: Vec::new(),
            injectable: Vec::new(),
            clb_frames: 0,
            bram_frames: 0,
            essential_per_block: [0; 8],
            recovery: Vec::new(),
            checkpoint_fars: Vec::new(),
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn push_frame(&mut self, frame: ReferenceFrame) {
        let addr = self.family.decode_far(frame.far);
        match addr.block {
            BLOCK_CLB => self.clb_frames += 1,
            BLOCK_BRAM => self.bram_frames += 1,
            _ => {}
        }
        self.essential_per_block[(addr.block & 0x7) as usize] += frame.essential_bits as u64;
        self.frames.push(frame);
    }

    /// Indexes of frames eligible for injection (essential bits present,
    /// not flagged excluded).
    pub fn injectable(&self) -> &[usize] {
        &self.injectable
    }

    pub fn rebuild_index(&mut self) {
        self.injectable = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.essential_bits > 0 && !f.flags.contains(FrameFlags::EXCLUDED))
            .map(|(i, _)| i)
            .collect();
    }

    /// Resolve a FAR to its table index (linear scan; the table is small
    /// and this runs outside the experiment loop).
    pub fn index_of_far(&self, far: u32) -> Option<usize> {
        self.frames.iter().position(|f| f.far == far)
    }

    /// Fixed major-column ranges unsafe to target (clock, IO and boundary
    /// columns), encoded per block type.
    pub fn is_excluded_address(addr: &FrameAddress) -> bool {
        match addr.block {
            BLOCK_CLB => {
                (addr.top == 0 && addr.major < 19)
                    || (addr.top == 1 && addr.row == 0 && addr.major < 19)
                    || (addr.top == 1 && addr.row == 0 && addr.major == 50)
                    || addr.major > 70
                    || addr.major < 3
            }
            BLOCK_BRAM => {
                (addr.top == 0 && addr.major < 2)
                    || (addr.top == 1 && addr.row == 0 && addr.major < 2)
            }
            _ => false,
        }
    }

    /// Probe which words of the frame at `far` round-trip a complemented
    /// pattern unchanged. The frame is restored to its pre-probe content
    /// on every exit path.
    pub fn probe_injectable_words<T: FrameTransport>(
        transport: &mut T,
        far: u32,
    ) -> FaultlineResult<Vec<bool>> {
        let family = transport.family();
        let addr = family.decode_far(far);

        let golden = transport.read_frame(far, false)?;
        let mut probe = golden.complemented();
        family.mask_fixed_words(&addr, probe.words_mut());

        let probe_result = transport
            .write_frame(far, &probe, false)
            .and_then(|_| transport.read_frame(far, false));

        // Never leave probe data live, even when the probe itself failed.
        let restore = transport.write_frame(far, &golden, false);
        let readback = probe_result?;
        if restore.is_err() {
            return Err(FaultlineError::CLASSIFIER_RESTORE_FAILED);
        }

        let stable = (0..golden.len())
            .map(|w| probe.word(w) == readback.word(w) && !family.is_fixed_word(&addr, w))
            .collect();
        Ok(stable)
    }

    /// Classify every frame of the table: flag explicitly excluded
    /// addresses, probe the rest, and flag frames with no injectable
    /// word. With `build_mask` the per-word injectable masks are
    /// rebuilt from the probe result (word granularity).
    pub fn classify<T: FrameTransport>(
        &mut self,
        transport: &mut T,
        build_mask: bool,
    ) -> FaultlineResult<()> {
        for i in 0..self.frames.len() {
            let far = self.frames[i].far;
            let addr = self.family.decode_far(far);

            if Self::is_excluded_address(&addr) {
                self.frames[i].flags.insert(FrameFlags::EXCLUDED);
                continue;
            }

            let stable = Self::probe_injectable_words(transport, far)?;
            let injectable_words = stable.iter().filter(|&&s| s).count();
            if injectable_words == 0 {
                self.frames[i].flags.insert(FrameFlags::EXCLUDED);
            } else {
                self.frames[i].flags.remove(FrameFlags::EXCLUDED);
            }
            if build_mask {
                let frame = &mut self.frames[i];
                for (w, stable_word) in stable.iter().enumerate() {
                    frame.mask[w] = if *stable_word { 0xFFFF_FFFF } else { 0 };
                }
                frame.essential_bits = frame
                    .mask
                    .iter()
                    .map(|w| w.count_ones())
                    .sum();
            }
        }
        self.rebuild_index();
        log::info!(
            "classified frame table: {} CLB frames, {} BRAM frames, {} injectable",
            self.clb_frames,
            self.bram_frames,
            self.injectable.len()
        );
        Ok(())
    }
}

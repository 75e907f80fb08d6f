// Licensed under the Apache-2.0 license

//! Emulated configuration fabric state and the packet-stream
//! interpreter behind the emulated port.

use faultline_drivers::{DeviceFamily, FrameAddress, SYNC_WORD};
use faultline_error::{FaultlineError, FaultlineResult};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet, VecDeque};

// Configuration register addresses (wire encoding).
const REG_FAR: u32 = 1;
const REG_FDRI: u32 = 2;
const REG_FDRO: u32 = 3;
const REG_CMD: u32 = 4;
const REG_CTL0: u32 = 5;
const REG_MASK: u32 = 6;
const REG_IDCODE: u32 = 12;

// Command register values.
const CMD_WCFG: u32 = 1;
const CMD_RCFG: u32 = 4;
const CMD_RCAP: u32 = 6;
const CMD_RCRC: u32 = 7;
const CMD_GRESTORE: u32 = 10;
const CMD_GCAPTURE: u32 = 12;
const CMD_DESYNC: u32 = 13;

/// Device shape of the emulated fabric.
#[derive(Debug, Clone)]
pub struct FabricGeometry {
    pub family: DeviceFamily,
    pub clb_majors: std::ops::Range<u32>,
    pub clb_minors: u32,
    pub bram_majors: std::ops::Range<u32>,
    pub bram_minors: u32,
    pub rows: u32,
}

impl FabricGeometry {
    /// One row, two CLB columns inside the non-excluded range, one BRAM
    /// column.
    pub fn demo(family: DeviceFamily) -> Self {
        Self {
            family,
            clb_majors: 19..21,
            clb_minors: 36,
            bram_majors: 2..3,
            bram_minors: 4,
            rows: 1,
        }
    }

    /// All valid frame addresses, ascending.
    pub fn frame_addresses(&self) -> Vec<u32> {
        let mut fars = Vec::new();
        for row in 0..self.rows {
            for major in self.clb_majors.clone() {
                for minor in 0..self.clb_minors {
                    fars.push(
                        self.family
                            .encode_far(&FrameAddress::new(0, 0, row, major, minor)),
                    );
                }
            }
            for major in self.bram_majors.clone() {
                for minor in 0..self.bram_minors {
                    fars.push(
                        self.family
                            .encode_far(&FrameAddress::new(1, 0, row, major, minor)),
                    );
                }
            }
        }
        fars.sort_unstable();
        fars
    }
}

/// Operation counters exposed for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCounters {
    pub captures: u32,
    pub restores: u32,
    pub desyncs: u32,
    pub programs: u32,
    pub gsr_pulses: u32,
}

/// Complete emulated engine state shared by port and DUT handles.
pub struct FabricState {
    pub family: DeviceFamily,
    fars: Vec<u32>,
    pub frames: BTreeMap<u32, Vec<u32>>,
    pub golden: BTreeMap<u32, Vec<u32>>,
    pub essential: BTreeMap<u32, Vec<u32>>,
    pub checkpoint_fars: HashSet<u32>,
    pub recovery_fars: Vec<u32>,
    pub locked: HashSet<u32>,

    // Engine registers and packet decode state.
    synced: bool,
    far_reg: u32,
    cmd_reg: u32,
    idcode_reg: u32,
    mask_reg: u32,
    ctl_reg: u32,
    last_header: Option<(u32, u32)>,
    pending_reg: Option<(u32, u32)>,
    fdri_remaining: usize,
    fdri_buffer: Vec<u32>,
    readback: VecDeque<u32>,
    armed: usize,

    /// Remaining forced wait_idle timeouts (test knob).
    pub timeout_budget: u32,
    pub counters: ModelCounters,
    pub dut_cycles: u64,
}

impl FabricState {
    pub fn new(geometry: &FabricGeometry, seed: u64) -> Self {
        let family = geometry.family;
        let fars = geometry.frame_addresses();
        let n = family.frame_words();
        let mut rng = SmallRng::seed_from_u64(seed);

        let mut golden = BTreeMap::new();
        let mut essential = BTreeMap::new();
        for &far in &fars {
            let addr = family.decode_far(far);
            let mut data: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
            // Keep the golden image consistent with the transport view of
            // fixed bits.
            family.mask_fixed_words(&addr, &mut data);
            let mask: Vec<u32> = (0..n)
                .map(|w| {
                    if family.is_fixed_word(&addr, w) {
                        0
                    } else if w % 3 == 0 {
                        0x0F0F_0F0F
                    } else {
                        0
                    }
                })
                .collect();
            golden.insert(far, data);
            essential.insert(far, mask);
        }

        Self {
            family,
            frames: golden.clone(),
            golden,
            essential,
            checkpoint_fars: HashSet::new(),
            recovery_fars: Vec::new(),
            locked: HashSet::new(),
            fars,
            synced: false,
            far_reg: 0,
            cmd_reg: 0,
            idcode_reg: 0,
            mask_reg: 0,
            ctl_reg: 0,
            last_header: None,
            pending_reg: None,
            fdri_remaining: 0,
            fdri_buffer: Vec::new(),
            readback: VecDeque::new(),
            armed: 0,
            timeout_budget: 0,
            counters: ModelCounters::default(),
            dut_cycles: 0,
        }
    }

    pub fn frame_addresses(&self) -> &[u32] {
        &self.fars
    }

    fn next_far(&self, far: u32) -> u32 {
        match self.fars.iter().find(|&&f| f > far) {
            Some(&next) => next,
            // Auto-increment parks at the last frame.
            None => far,
        }
    }

    /// Feed a pushed command stream into the engine.
    pub fn interpret(&mut self, words: &[u32]) -> FaultlineResult<()> {
        for &word in words {
            self.interpret_word(word)?;
        }
        Ok(())
    }

    fn interpret_word(&mut self, word: u32) -> FaultlineResult<()> {
        if !self.synced {
            // Dummy, bus width and alignment words before sync.
            if word == SYNC_WORD {
                self.synced = true;
            }
            return Ok(());
        }

        if self.fdri_remaining > 0 {
            self.fdri_buffer.push(word);
            self.fdri_remaining -= 1;
            if self.fdri_remaining == 0 {
                self.commit_fdri()?;
            }
            return Ok(());
        }

        if let Some((reg, remaining)) = self.pending_reg {
            self.write_register(reg, word)?;
            if remaining > 1 {
                self.pending_reg = Some((reg, remaining - 1));
            } else {
                self.pending_reg = None;
            }
            return Ok(());
        }

        let header_type = word >> 29;
        match header_type {
            1 => {
                let opcode = (word >> 27) & 0x3;
                let reg = (word >> 13) & 0x3FFF;
                let count = word & 0x7FF;
                self.last_header = Some((opcode, reg));
                match opcode {
                    0 => {}
                    1 => {
                        if reg != REG_FDRO && count > 0 {
                            self.queue_register_read(reg, count);
                        }
                        // FDRO reads carry their length in the type-2
                        // extension packet.
                    }
                    2 => {
                        if count == 0 {
                            // Length arrives in a type-2 packet.
                        } else if reg == REG_FDRI {
                            self.start_fdri(count as usize);
                        } else {
                            self.pending_reg = Some((reg, count));
                        }
                    }
                    _ => return Err(FaultlineError::MODEL_PROTOCOL),
                }
            }
            2 => {
                let opcode = (word >> 27) & 0x3;
                let count = (word & 0x7FF_FFFF) as usize;
                match (opcode, self.last_header) {
                    (1, Some((_, REG_FDRO))) => self.queue_frame_read(count),
                    (2, Some((_, REG_FDRI))) => self.start_fdri(count),
                    _ => return Err(FaultlineError::MODEL_PROTOCOL),
                }
            }
            _ => return Err(FaultlineError::MODEL_PROTOCOL),
        }
        Ok(())
    }

    fn write_register(&mut self, reg: u32, value: u32) -> FaultlineResult<()> {
        match reg {
            REG_FAR => self.far_reg = value,
            REG_CMD => self.execute_command(value),
            REG_IDCODE => self.idcode_reg = value,
            REG_MASK => self.mask_reg = value,
            REG_CTL0 => self.ctl_reg = value & self.mask_reg,
            _ => {}
        }
        Ok(())
    }

    fn execute_command(&mut self, cmd: u32) {
        self.cmd_reg = cmd;
        match cmd {
            CMD_GCAPTURE => self.counters.captures += 1,
            CMD_GRESTORE => self.counters.restores += 1,
            CMD_DESYNC => {
                self.counters.desyncs += 1;
                self.synced = false;
            }
            CMD_RCAP | CMD_RCRC | CMD_WCFG | CMD_RCFG => {}
            _ => {}
        }
    }

    fn queue_register_read(&mut self, reg: u32, count: u32) {
        for _ in 0..count {
            let value = match reg {
                REG_FAR => self.far_reg,
                REG_CMD => self.cmd_reg,
                REG_IDCODE => self.idcode_reg,
                REG_CTL0 => self.ctl_reg,
                _ => 0,
            };
            self.readback.push_back(value);
        }
    }

    /// FDRO burst: a null frame, the family pad words, then real frames
    /// from the FAR register with auto-increment.
    fn queue_frame_read(&mut self, count: usize) {
        let n = self.family.frame_words();
        let pad = self.family.readback_pad_words();
        let prefix = n + pad;
        for _ in 0..prefix.min(count) {
            self.readback.push_back(0);
        }
        if count <= prefix {
            return;
        }
        let mut remaining = count - prefix;
        while remaining > 0 {
            let chunk = remaining.min(n);
            let data = self
                .frames
                .get(&self.far_reg)
                .cloned()
                .unwrap_or_else(|| vec![0; n]);
            for w in 0..chunk {
                self.readback.push_back(data[w]);
            }
            remaining -= chunk;
            self.far_reg = self.next_far(self.far_reg);
        }
    }

    fn start_fdri(&mut self, count: usize) {
        self.fdri_remaining = count;
        self.fdri_buffer = Vec::with_capacity(count);
    }

    /// Commit a completed FDRI payload: everything but the trailing pad
    /// frame (plus family pad words) lands in configuration memory.
    fn commit_fdri(&mut self) -> FaultlineResult<()> {
        let n = self.family.frame_words();
        let pad = self.family.readback_pad_words();
        let suffix = n + pad;
        let payload = std::mem::take(&mut self.fdri_buffer);
        if payload.len() < suffix {
            return Err(FaultlineError::MODEL_PROTOCOL);
        }
        let writable_words = payload.len() - suffix;
        if writable_words % n != 0 {
            return Err(FaultlineError::MODEL_PROTOCOL);
        }
        for chunk in payload[..writable_words].chunks(n) {
            self.write_frame_words(chunk);
            self.far_reg = self.next_far(self.far_reg);
        }
        Ok(())
    }

    fn write_frame_words(&mut self, data: &[u32]) {
        let far = self.far_reg;
        if self.locked.contains(&far) {
            return;
        }
        let Some(current) = self.frames.get_mut(&far) else {
            return;
        };
        let addr = self.family.decode_far(far);
        let mut incoming = data.to_vec();
        self.family.mask_fixed_words(&addr, &mut incoming);
        for (w, value) in incoming.iter().enumerate() {
            if self.family.is_fixed_word(&addr, w) && !addr.is_bram() {
                // Inaccessible logic word keeps its configured value.
                continue;
            }
            current[w] = *value;
        }
    }

    pub fn arm_readback(&mut self, words: usize) {
        // Re-arming the DMA destination discards anything an aborted
        // transfer left in the channel.
        self.readback.clear();
        self.armed = words;
    }

    pub fn pull(&mut self, out: &mut [u32]) -> FaultlineResult<()> {
        if out.len() > self.armed || self.readback.len() < out.len() {
            return Err(FaultlineError::MODEL_READBACK_UNDERRUN);
        }
        self.armed -= out.len();
        for slot in out.iter_mut() {
            *slot = self.readback.pop_front().unwrap();
        }
        Ok(())
    }

    pub fn wait_idle(&mut self) -> FaultlineResult<()> {
        if self.timeout_budget > 0 {
            self.timeout_budget -= 1;
            return Err(FaultlineError::TRANSPORT_TIMEOUT);
        }
        Ok(())
    }

    /// Full bitstream replay: every frame returns to golden.
    pub fn program(&mut self) {
        self.frames = self.golden.clone();
        self.readback.clear();
        self.fdri_remaining = 0;
        self.fdri_buffer.clear();
        self.pending_reg = None;
        self.synced = false;
        self.counters.programs += 1;
    }

    /// DUT output mismatches: essential bits differing from golden in
    /// non-checkpoint frames.
    pub fn output_mismatches(&self) -> u32 {
        let mut mismatches = 0;
        for (far, live) in &self.frames {
            if self.checkpoint_fars.contains(far) {
                continue;
            }
            let golden = &self.golden[far];
            let mask = &self.essential[far];
            for w in 0..live.len() {
                if (live[w] ^ golden[w]) & mask[w] != 0 {
                    mismatches += 1;
                }
            }
        }
        mismatches
    }
}

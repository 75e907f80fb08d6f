/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the faultline SEU injection engine.

--*/

mod campaign;
mod cell_models;
mod design;
mod dut;
mod far;
mod fault_list;
mod flip;
mod frame;
mod frame_table;
mod job;
mod packet;
mod selector;
mod stats;
mod transport;

mod icap;
mod pcap;

pub use campaign::{Campaign, CampaignConfig, CampaignState, FaultOutcome};
pub use cell_models::{
    ff_coords, flip_bram_latch, flip_slice_register, read_slice_register, write_slice_register,
    BitCoord, FfCoords,
};
pub use design::{build_design_image, parse_design_image, words_from_bytes};
pub use dut::WorkloadDriver;
pub use far::{
    DeviceFamily, FrameAddress, BLOCK_BRAM, BLOCK_CLB, BRAM_FIXED_WORD_MASK, CLB_FIXED_WORD,
};
pub use fault_list::{
    parse_fault_items, FaultDescriptor, FaultGroups, FaultList, FaultListItem,
    FAULT_LIST_SYNC_WORD,
};
pub use flip::{FlipOutcome, InjectionEngine, RecoveryOutcome};
pub use frame::{with_word_bit, word_bit, Frame};
pub use frame_table::{FrameFlags, FrameTable, ReferenceFrame};
pub use icap::Series7Transport;
pub use job::{parse_job_descriptor, CampaignMode, JobDescriptor, JOB_SYNC_WORD};
pub use packet::{
    type1_packet, type2_packet, ConfigCmd, ConfigReg, PacketBuffer, BUS_WIDTH_DETECT,
    BUS_WIDTH_SYNC, DUMMY_WORD, NOOP_WORD, OP_NOP, OP_READ, OP_WRITE, SYNC_WORD,
};
pub use pcap::UltraScalePlusTransport;
pub use selector::{
    target_from_list_item, BlockFilter, CellType, ExhaustiveSelector, InjectionTarget,
    RandomSelector, TargetFilter,
};
pub use stats::{FailureMode, InjectionStatistics};
pub use transport::{
    ConfigPort, FrameTransport, FRAME_OP_TIMEOUT_US, READ_RETRY_ATTEMPTS, RELOAD_TIMEOUT_US,
};

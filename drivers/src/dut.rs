/*++

Licensed under the Apache-2.0 license.

File Name:

    dut.rs

Abstract:

    File contains the device-under-test workload interface consumed by
    the campaign orchestrator.

--*/

use faultline_error::FaultlineResult;

/// Workload and clock control for the device under test.
///
/// Implementations drive reset, stimulus and result comparison against a
/// fixed reference trace, and must be deterministic for a given fault
/// state. Injected at campaign construction.
pub trait WorkloadDriver {
    /// Workload length in DUT clock cycles.
    fn workload_duration(&self) -> u32;

    /// Release exactly `cycles` DUT clock cycles and wait until the
    /// clock has stopped again.
    fn run_cycles(&mut self, cycles: u32) -> FaultlineResult<()>;

    /// Run the complete workload from reset and compare against the
    /// reference trace. Returns the mismatch count.
    fn evaluate(&mut self, stop_at_first_mismatch: bool) -> FaultlineResult<u32>;

    /// Hold the DUT in reset for `cycles` cycles.
    fn reset_dut(&mut self, cycles: u32) -> FaultlineResult<()>;

    /// Pulse the design's global set/reset network. Required after any
    /// flip-flop-capturing bit flip.
    fn trigger_gsr(&mut self) -> FaultlineResult<()>;
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    stats.rs

Abstract:

    File contains the running campaign statistics and confidence-margin
    tracking.

--*/

/// Fault outcome classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Unknown,
    /// No observable effect.
    Masked,
    /// Observable only in internal state, not output.
    Latent,
    /// Workload never completed.
    Hang,
    /// Wrong output without an explicit fault signal.
    Sdc,
    /// Observable directly in DUT output.
    Signalled,
}

impl FailureMode {
    pub fn label(&self) -> &'static str {
        match self {
            FailureMode::Unknown => "Unknown",
            FailureMode::Masked => "Masked",
            FailureMode::Latent => "Latent",
            FailureMode::Hang => "Hang",
            FailureMode::Sdc => "SDC",
            FailureMode::Signalled => "Signalled",
        }
    }

    /// True for outcomes counted as failures.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FailureMode::Hang | FailureMode::Sdc | FailureMode::Signalled
        )
    }
}

/// 99%-confidence z value.
const Z_99: f64 = 2.576;

/// Running counts and derived rates for one campaign.
///
/// Mutated only by the orchestrator; rates carry fractions in [0, 1],
/// the percentage scaling happens at the reporting layer.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionStatistics {
    pub injections: u32,
    pub failures: u32,
    pub masked: u32,
    pub latent: u32,
    pub complete_reconfigurations: u32,
    pub locked_targets: u32,
    /// Total fault population under estimation.
    pub population: f64,
    pub failure_rate: f64,
    pub failure_error_margin: f64,
    pub masked_rate: f64,
    pub masked_error_margin: f64,
    pub latent_rate: f64,
    pub latent_error_margin: f64,
}

impl InjectionStatistics {
    pub fn new(population: f64) -> Self {
        Self {
            injections: 0,
            failures: 0,
            masked: 0,
            latent: 0,
            complete_reconfigurations: 0,
            locked_targets: 0,
            population,
            failure_rate: 0.0,
            failure_error_margin: 0.5,
            masked_rate: 0.0,
            masked_error_margin: 0.5,
            latent_rate: 0.0,
            latent_error_margin: 0.5,
        }
    }

    /// Resume mid-campaign from persisted counters.
    pub fn resume(population: f64, injections: u32, failures: u32, masked: u32, latent: u32) -> Self {
        let mut stats = Self::new(population);
        stats.injections = injections;
        stats.failures = failures;
        stats.masked = masked;
        stats.latent = latent;
        stats.update_estimates();
        stats
    }

    pub fn record(&mut self, mode: FailureMode) {
        self.injections += 1;
        if mode.is_failure() {
            self.failures += 1;
        } else if mode == FailureMode::Latent {
            self.latent += 1;
        } else {
            self.masked += 1;
        }
    }

    /// Recompute rates and 99%-confidence margins with finite-population
    /// correction. A population of 1 or a sample reaching the population
    /// collapses the margins to 0.
    pub fn update_estimates(&mut self) {
        if self.injections == 0 {
            return;
        }
        let n = self.injections as f64;
        self.failure_rate = self.failures as f64 / n;
        self.masked_rate = self.masked as f64 / n;
        self.latent_rate = self.latent as f64 / n;

        if self.population - n > 0.0 && self.population > 1.0 {
            self.failure_error_margin = Self::margin(self.failure_rate, n, self.population);
            self.masked_error_margin = Self::margin(self.masked_rate, n, self.population);
            self.latent_error_margin = Self::margin(self.latent_rate, n, self.population);
        } else {
            self.failure_error_margin = 0.0;
            self.masked_error_margin = 0.0;
            self.latent_error_margin = 0.0;
        }
    }

    fn margin(rate: f64, n: f64, population: f64) -> f64 {
        Z_99 * (rate * (1.0 - rate) * (population - n) / (n * (population - 1.0))).sqrt()
    }

    pub fn failure_rate_pct(&self) -> f64 {
        100.0 * self.failure_rate
    }

    pub fn masked_rate_pct(&self) -> f64 {
        100.0 * self.masked_rate
    }

    pub fn latent_rate_pct(&self) -> f64 {
        100.0 * self.latent_rate
    }
}

// ABOUTME: Linear power model for sandboxed runs
// ABOUTME: Turns average CPU and memory usage into modeled watts and energy in kWh

use crate::error::StatsError;
use crate::types::{PowerCoefficients, PowerEstimate, ResourceLimits, ResourceSummary};

const MIB_PER_GB: f64 = 1024.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone)]
pub struct PowerModel {
    coefficients: PowerCoefficients,
    allocated_cores: f64,
}

impl PowerModel {
    pub fn new(coefficients: PowerCoefficients, limits: &ResourceLimits) -> Self {
        Self {
            coefficients,
            allocated_cores: limits.allocated_cores(),
        }
    }

    pub fn allocated_cores(&self) -> f64 {
        self.allocated_cores
    }

    /// Average power and energy for a run of `duration_secs`
    pub fn estimate(&self, avg_cpu_percent: f64, avg_mem_mib: f64, duration_secs: f64) -> PowerEstimate {
        let avg_cpu_power_watt = (avg_cpu_percent / 100.0)
            * self.allocated_cores
            * self.coefficients.cpu_watts_per_core;
        let avg_ram_power_watt = (avg_mem_mib / MIB_PER_GB) * self.coefficients.ram_watts_per_gb;
        let avg_power_watt =
            avg_cpu_power_watt + avg_ram_power_watt + self.coefficients.baseline_watts;
        let energy_kwh = (avg_power_watt / 1000.0) * (duration_secs / SECONDS_PER_HOUR);

        PowerEstimate {
            allocated_cores: self.allocated_cores,
            avg_cpu_power_watt,
            avg_ram_power_watt,
            avg_power_watt,
            energy_kwh,
        }
    }

    /// Estimate from an aggregated summary; rejects a non-positive duration
    pub fn estimate_run(
        &self,
        summary: &ResourceSummary,
        duration_secs: f64,
    ) -> Result<PowerEstimate, StatsError> {
        if duration_secs <= 0.0 || !duration_secs.is_finite() {
            return Err(StatsError::NonPositiveDuration);
        }
        Ok(self.estimate(summary.avg_cpu_percent, summary.avg_mem_mib, duration_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn model(cpu_quota: i64, cpu_period: i64) -> PowerModel {
        PowerModel::new(
            PowerCoefficients::new(2.0, 3.0, 5.0),
            &ResourceLimits {
                cpu_quota,
                cpu_period,
                memory_mb: 256,
            },
        )
    }

    #[test]
    fn test_worked_example() {
        let estimate = model(50_000, 100_000).estimate(50.0, 512.0, 10.0);

        assert_eq!(estimate.allocated_cores, 0.5);
        assert!((estimate.avg_cpu_power_watt - 0.5).abs() < 1e-12);
        assert!((estimate.avg_ram_power_watt - 1.5).abs() < 1e-12);
        assert!((estimate.avg_power_watt - 7.0).abs() < 1e-12);
        assert!((estimate.energy_kwh - 1.944_444_444e-5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_period_means_no_cpu_power() {
        let estimate = model(50_000, 0).estimate(100.0, 0.0, 60.0);
        assert_eq!(estimate.allocated_cores, 0.0);
        assert_eq!(estimate.avg_cpu_power_watt, 0.0);
        assert_eq!(estimate.avg_power_watt, 5.0);
    }

    #[rstest]
    #[case(0.0, 0.0, 1.0)]
    #[case(25.0, 128.0, 5.0)]
    #[case(100.0, 1024.0, 3600.0)]
    fn test_energy_monotonic(#[case] cpu: f64, #[case] mem: f64, #[case] secs: f64) {
        let model = model(100_000, 100_000);
        let base = model.estimate(cpu, mem, secs).energy_kwh;

        assert!(base >= 0.0);
        assert!(model.estimate(cpu + 10.0, mem, secs).energy_kwh >= base);
        assert!(model.estimate(cpu, mem + 64.0, secs).energy_kwh >= base);
        assert!(model.estimate(cpu, mem, secs + 1.0).energy_kwh >= base);
    }

    #[test]
    fn test_estimate_run_rejects_non_positive_duration() {
        let summary = ResourceSummary {
            samples_collected: 1,
            samples_skipped: 0,
            avg_cpu_percent: 10.0,
            avg_mem_mib: 10.0,
            peak_mem_mib: 10.0,
        };
        let model = model(50_000, 100_000);

        assert_eq!(
            model.estimate_run(&summary, 0.0),
            Err(StatsError::NonPositiveDuration)
        );
        assert!(model.estimate_run(&summary, 1.5).is_ok());
    }
}

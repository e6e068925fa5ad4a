// ABOUTME: Reduces a run's samples into averages and peaks
// ABOUTME: Skips unparsable samples and reports empty or fully unusable inputs

use crate::error::StatsError;
use crate::types::{ResourceSummary, Sample};
use tracing::warn;

/// Average CPU and memory plus peak memory over the valid samples
pub fn summarize(samples: &[Sample]) -> Result<ResourceSummary, StatsError> {
    if samples.is_empty() {
        return Err(StatsError::NoSamples);
    }

    let valid: Vec<&Sample> = samples.iter().filter(|s| s.is_valid()).collect();
    let skipped = samples.len() - valid.len();
    if skipped > 0 {
        warn!(skipped, total = samples.len(), "Skipping unparsable samples");
    }
    if valid.is_empty() {
        return Err(StatsError::Unparsable { skipped });
    }

    let count = valid.len() as f64;
    let avg_cpu_percent = valid.iter().map(|s| s.cpu_percent).sum::<f64>() / count;
    let avg_mem_mib = valid.iter().map(|s| s.mem_used_mib).sum::<f64>() / count;
    let peak_mem_mib = valid.iter().map(|s| s.mem_used_mib).fold(0.0, f64::max);

    Ok(ResourceSummary {
        samples_collected: samples.len(),
        samples_skipped: skipped,
        avg_cpu_percent,
        avg_mem_mib,
        peak_mem_mib,
    })
}

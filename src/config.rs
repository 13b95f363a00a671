//! Parameters for stores, accumulation runs and window scans.

use crate::{PileupError, Result};

/// Default minimum per-source coverage below which a position is flagged `lowRead`.
pub const DEFAULT_LOW_READ_COUNT: u32 = 10;
/// Default non-reference percentage at which a position is flagged `highNonreference`.
pub const DEFAULT_NONREF_PERCENT: u32 = 20;
/// Default number of reference positions per work unit.
pub const DEFAULT_BLOCK_SIZE: u64 = 100_000;
/// Reads fetched beyond each block edge so spanning reads are seen.
pub const BLOCK_BUFFER: u64 = 200;
/// Reads without an MD tag tolerated per source before the run fails.
pub const MAX_MISSING_MD: u64 = 10_000;

/// Thresholds persisted in the store at bootstrap.
///
/// They are recorded in every provenance entry so a contribution can be
/// reversed with the thresholds it was added under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StoreParameters {
    /// Coverage below which a position counts toward `lowRead`.
    pub low_read_count: u32,
    /// Non-reference percentage at which a position counts toward `highNonreference`.
    pub nonref_percent: u32,
}

impl Default for StoreParameters {
    fn default() -> Self {
        Self {
            low_read_count: DEFAULT_LOW_READ_COUNT,
            nonref_percent: DEFAULT_NONREF_PERCENT,
        }
    }
}

impl StoreParameters {
    /// Set the low-read threshold.
    pub fn with_low_read_count(mut self, low_read_count: u32) -> Result<Self> {
        if low_read_count == 0 {
            return Err(PileupError::InvalidConfiguration(
                "low read count must be > 0".to_string(),
            ));
        }
        self.low_read_count = low_read_count;
        Ok(self)
    }

    /// Set the non-reference percentage threshold.
    pub fn with_nonref_percent(mut self, nonref_percent: u32) -> Result<Self> {
        if nonref_percent == 0 || nonref_percent > 100 {
            return Err(PileupError::InvalidConfiguration(format!(
                "non-reference percent must be in 1..=100, got {}",
                nonref_percent
            )));
        }
        self.nonref_percent = nonref_percent;
        Ok(self)
    }
}

/// Settings for one add/remove invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Worker threads in the accumulation pool.
    pub threads: usize,
    /// Reference positions per work unit.
    pub block_size: u64,
    /// Accept sources that already have an unreversed entry.
    pub allow_override: bool,
    /// Bases with quality below this value are counted as `N`.
    pub min_base_quality: u8,
    /// Thresholds for new adds instead of the store's; removes always use
    /// the thresholds recorded with the add they reverse.
    pub thresholds: Option<StoreParameters>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            block_size: DEFAULT_BLOCK_SIZE,
            allow_override: false,
            min_base_quality: 0,
            thresholds: None,
        }
    }
}

impl PipelineConfig {
    /// Set the worker count.
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(PileupError::InvalidConfiguration(
                "thread count must be > 0".to_string(),
            ));
        }
        self.threads = threads;
        Ok(self)
    }

    /// Set the number of positions per work unit.
    pub fn with_block_size(mut self, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(PileupError::InvalidConfiguration(
                "block size must be > 0".to_string(),
            ));
        }
        self.block_size = block_size;
        Ok(self)
    }

    /// Allow sources that are already recorded.
    pub fn with_override(mut self, allow_override: bool) -> Self {
        self.allow_override = allow_override;
        self
    }

    /// Set the base-quality cutoff.
    pub fn with_min_base_quality(mut self, min_base_quality: u8) -> Self {
        self.min_base_quality = min_base_quality;
        self
    }

    /// Override the store thresholds for adds.
    pub fn with_thresholds(mut self, thresholds: StoreParameters) -> Self {
        self.thresholds = Some(thresholds);
        self
    }
}

/// Settings for [`scan`](crate::scan::scan).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Window width in positions.
    pub window: u64,
    /// Minimum candidate positions per emitted window.
    pub min_positions: usize,
    /// Minimum summed depth per emitted window.
    pub min_count: u64,
    /// Regularity score at or above which a window is `Regular`.
    pub regular_score: f64,
    /// Regularity score at or above which a window is `Mixed`.
    pub mixed_score: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window: 100,
            min_positions: 3,
            min_count: 0,
            regular_score: 0.8,
            mixed_score: 0.5,
        }
    }
}

impl ScanConfig {
    /// Set the window width.
    pub fn with_window(mut self, window: u64) -> Result<Self> {
        if window == 0 {
            return Err(PileupError::InvalidConfiguration(
                "window width must be > 0".to_string(),
            ));
        }
        self.window = window;
        Ok(self)
    }

    /// Set the member-position filter.
    pub fn with_min_positions(mut self, min_positions: usize) -> Self {
        self.min_positions = min_positions;
        self
    }

    /// Set the total-count filter.
    pub fn with_min_count(mut self, min_count: u64) -> Self {
        self.min_count = min_count;
        self
    }

    /// Set the classification cut-offs; `regular` must not be below `mixed`.
    pub fn with_score_cutoffs(mut self, regular: f64, mixed: f64) -> Result<Self> {
        let in_unit = |x: f64| (0.0..=1.0).contains(&x);
        if !in_unit(regular) || !in_unit(mixed) || regular < mixed {
            return Err(PileupError::InvalidConfiguration(format!(
                "score cut-offs must satisfy 0 <= mixed ({}) <= regular ({}) <= 1",
                mixed, regular
            )));
        }
        self.regular_score = regular;
        self.mixed_score = mixed;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let params = StoreParameters::default();
        assert_eq!(params.low_read_count, 10);
        assert_eq!(params.nonref_percent, 20);
        let scan = ScanConfig::default();
        assert_eq!(scan.window, 100);
        assert_eq!(scan.min_positions, 3);
    }

    #[test]
    fn builders_reject_out_of_range_values() {
        assert!(PipelineConfig::default().with_threads(0).is_err());
        assert!(PipelineConfig::default().with_block_size(0).is_err());
        assert!(StoreParameters::default().with_nonref_percent(101).is_err());
        assert!(StoreParameters::default().with_low_read_count(0).is_err());
        assert!(ScanConfig::default().with_window(0).is_err());
        assert!(ScanConfig::default().with_score_cutoffs(0.4, 0.6).is_err());
    }

    #[test]
    fn builders_apply_values() {
        let config = PipelineConfig::default()
            .with_threads(4)
            .unwrap()
            .with_block_size(500)
            .unwrap()
            .with_override(true)
            .with_thresholds(StoreParameters::default().with_low_read_count(3).unwrap());
        assert_eq!(config.thresholds.map(|t| t.low_read_count), Some(3));
        assert_eq!(config.threads, 4);
        assert_eq!(config.block_size, 500);
        assert!(config.allow_override);
    }
}

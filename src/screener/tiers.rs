//! Tier lookup from a point total.

use crate::screener::types::TierThreshold;

/// Maps a user's point total to a tier label.
pub trait TierResolver: Send + Sync {
    fn resolve(&self, points: f64) -> String;
}

/// Threshold table: the tier with the highest `min_points` not above the total wins.
/// Totals below every threshold get the lowest tier.
#[derive(Debug, Clone)]
pub struct ThresholdTiers {
    thresholds: Vec<TierThreshold>,
}

impl ThresholdTiers {
    pub fn new(mut thresholds: Vec<TierThreshold>) -> Self {
        thresholds.sort_by(|a, b| a.min_points.total_cmp(&b.min_points));
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[TierThreshold] {
        &self.thresholds
    }
}

impl Default for ThresholdTiers {
    fn default() -> Self {
        Self::new(crate::screener::types::default_tiers())
    }
}

impl TierResolver for ThresholdTiers {
    fn resolve(&self, points: f64) -> String {
        self.thresholds
            .iter()
            .rev()
            .find(|tier| points >= tier.min_points)
            .or_else(|| self.thresholds.first())
            .map(|tier| tier.label.clone())
            .unwrap_or_default()
    }
}

/// Parse a `label:min,label:min` tier list.
pub fn parse_tiers(table: &str) -> anyhow::Result<Vec<TierThreshold>> {
    table.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, min) = entry
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Tier entry '{}' is not label:min", entry))?;
            let min_points: f64 = min
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Tier '{}' has a non-numeric minimum", label))?;
            Ok(TierThreshold::new(label.trim(), min_points))
        })
        .collect()
}

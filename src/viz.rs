//! Terminal visualization of portfolio trajectories.
//!
//! Sparklines for value curves and a compact allocation chart showing how far
//! holdings drift from their target weights between rebalances.

use crate::engine::{PolicyRun, PortfolioResult};
use std::fmt::Write;

/// Characters used for sparkline rendering, ordered from low to high.
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Configuration for sparkline generation.
#[derive(Debug, Clone)]
pub struct SparklineConfig {
    /// Maximum width in characters.
    pub width: usize,
    /// Fixed lower bound; the series minimum when `None`.
    pub min_value: Option<f64>,
    /// Fixed upper bound; the series maximum when `None`.
    pub max_value: Option<f64>,
}

impl Default for SparklineConfig {
    fn default() -> Self {
        Self {
            width: 40,
            min_value: None,
            max_value: None,
        }
    }
}

/// ASCII sparkline of `values`, downsampled to at most `width` characters.
pub fn sparkline(values: &[f64], width: usize) -> String {
    sparkline_with_config(
        values,
        &SparklineConfig {
            width,
            ..Default::default()
        },
    )
}

pub fn sparkline_with_config(values: &[f64], config: &SparklineConfig) -> String {
    if values.is_empty() || config.width == 0 {
        return String::new();
    }

    let sampled = downsample(values, config.width);
    let min_val = config
        .min_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::INFINITY, f64::min));
    let max_val = config
        .max_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let range = max_val - min_val;

    sampled
        .iter()
        .map(|&val| {
            let normalized = if range > 0.0 {
                ((val - min_val) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            SPARKLINE_CHARS[((normalized * 7.0).round() as usize).min(7)]
        })
        .collect()
}

/// Sparklines of both policies on a shared scale, so their heights compare.
pub fn policy_sparklines(result: &PortfolioResult, width: usize) -> (String, String) {
    let all = result
        .rebalanced
        .totals
        .iter()
        .chain(&result.buy_and_hold.totals)
        .cloned();
    let (lo, hi) = all.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let config = SparklineConfig {
        width,
        min_value: Some(lo),
        max_value: Some(hi),
    };
    (
        sparkline_with_config(&result.rebalanced.totals, &config),
        sparkline_with_config(&result.buy_and_hold.totals, &config),
    )
}

/// Average consecutive chunks down to `target_len` points.
fn downsample(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() <= target_len {
        return values.to_vec();
    }

    let chunk_size = values.len() as f64 / target_len as f64;
    (0..target_len)
        .filter_map(|i| {
            let start = (i as f64 * chunk_size).floor() as usize;
            let end = (((i + 1) as f64 * chunk_size).ceil() as usize).min(values.len());
            (start < end).then(|| values[start..end].iter().sum::<f64>() / (end - start) as f64)
        })
        .collect()
}

/// Horizontal bars of each holding's share of the total at date index `index`,
/// with the drift from `targets` in percentage points.
pub fn allocation_chart(run: &PolicyRun, targets: &[f64], index: usize, width: usize) -> String {
    let Some(weights) = run.weights_at(index) else {
        return String::new();
    };

    let mut output = String::new();
    for ((series, weight), target) in run.instruments.iter().zip(&weights).zip(targets) {
        let bar_len = (weight * width as f64).round().max(0.0) as usize;
        let _ = writeln!(
            output,
            "{:<12} {:<width$} {:>6.2}% ({:+.2})",
            series.instrument.id,
            "█".repeat(bar_len.min(width)),
            weight * 100.0,
            (weight - target) * 100.0,
            width = width
        );
    }
    output
}

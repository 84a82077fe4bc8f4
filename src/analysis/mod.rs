use serde::{Deserialize, Serialize};

use crate::protocol::TelemetrySample;
use crate::sequencer::TestMode;

/// Consecutive-sample current deltas below this are treated as noise and
/// excluded from IR estimation.
pub const IR_CURRENT_NOISE_FLOOR_A: f64 = 0.05;

/// Smoothing window applied to traces before curve fitting
const SMOOTHING_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
}

/// Post-run curve fits attached to a sealed test run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAnalysis {
    /// RPM vs voltage fit; slope is the KV estimate
    pub kv: Option<Regression>,
    /// dV vs dI fit over load steps; |slope| is the internal resistance
    pub ir: Option<Regression>,
}

/// Ordinary least-squares fit.
///
/// Returns `None` for fewer than 2 points or a degenerate x-range.
pub fn linear_regression(points: &[(f64, f64)]) -> Option<Regression> {
    let n = points.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n_f;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n_f;

    let ss_xx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if ss_xx == 0.0 {
        return None;
    }
    let ss_xy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    let slope = ss_xy / ss_xx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    Some(Regression {
        slope,
        intercept,
        r2,
    })
}

/// Symmetric moving average with the window clipped at series boundaries.
/// No padding: edge points average over whatever neighbors exist.
pub fn smooth_centered(series: &[f64], window: usize) -> Vec<f64> {
    if series.is_empty() || window <= 1 {
        return series.to_vec();
    }

    let half = window / 2;
    (0..series.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(series.len() - 1);
            let slice = &series[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// KV estimate: slope of RPM vs voltage over the run
pub fn estimate_kv(samples: &[TelemetrySample]) -> Option<Regression> {
    let voltage = smooth_centered(
        &samples.iter().map(|s| s.voltage).collect::<Vec<_>>(),
        SMOOTHING_WINDOW,
    );
    let rpm = smooth_centered(
        &samples.iter().map(|s| s.rpm).collect::<Vec<_>>(),
        SMOOTHING_WINDOW,
    );

    let points: Vec<(f64, f64)> = voltage.into_iter().zip(rpm).collect();
    linear_regression(&points)
}

/// IR estimate: slope of voltage sag vs current step between consecutive
/// samples, keeping only steps where the current moved beyond the noise floor
pub fn estimate_ir(samples: &[TelemetrySample]) -> Option<Regression> {
    let points: Vec<(f64, f64)> = samples
        .windows(2)
        .filter_map(|pair| {
            let di = pair[1].current - pair[0].current;
            let dv = pair[1].voltage - pair[0].voltage;
            (di.abs() > IR_CURRENT_NOISE_FLOOR_A).then_some((di, dv))
        })
        .collect();

    linear_regression(&points)
}

/// Fit the estimates relevant to the run's mode
pub fn analyze(mode: &TestMode, samples: &[TelemetrySample]) -> RunAnalysis {
    match mode {
        TestMode::KvEstimation(_) => RunAnalysis {
            kv: estimate_kv(samples),
            ir: None,
        },
        TestMode::InternalResistance(_) => RunAnalysis {
            kv: None,
            ir: estimate_ir(samples),
        },
        _ => RunAnalysis::default(),
    }
}

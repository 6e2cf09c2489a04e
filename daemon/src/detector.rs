//! Leak-trend detection
//!
//! Fits a least-squares line over the most recent window of self-process
//! readings and projects the slope to MB/min. Crossing the threshold raises
//! one alert; the detector re-arms only after the rate falls back to or
//! below the threshold.

use crate::error::InvalidThreshold;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_THRESHOLD_MB_PER_MIN: f64 = 10.0;
pub const DEFAULT_WINDOW_SAMPLES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LeakState {
    pub is_leak_active: bool,
    /// Last projected growth rate in MB/min; 0.0 before the first evaluation.
    pub last_slope_estimate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakAlertEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub projected_mb_per_min: f64,
    pub threshold_mb_per_min: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Not enough history for a full window; state untouched.
    InsufficientHistory { have: usize, need: usize },
    Unchanged { projected_mb_per_min: f64 },
    Raised(LeakAlertEvent),
    Cleared { projected_mb_per_min: f64 },
}

#[derive(Debug, Clone)]
pub struct LeakDetector {
    threshold_mb_per_min: f64,
    window: usize,
    samples_per_minute: f64,
    state: LeakState,
}

impl LeakDetector {
    /// `window` is clamped to at least two samples.
    pub fn new(threshold_mb_per_min: f64, window: usize, interval: Duration) -> Self {
        let interval_secs = interval.as_secs_f64();
        let samples_per_minute = if interval_secs > 0.0 {
            60.0 / interval_secs
        } else {
            60.0
        };
        Self {
            threshold_mb_per_min,
            window: window.max(2),
            samples_per_minute,
            state: LeakState::default(),
        }
    }

    pub fn set_threshold(&mut self, mb_per_min: f64) -> Result<(), InvalidThreshold> {
        validate_threshold(mb_per_min)?;
        self.threshold_mb_per_min = mb_per_min;
        info!("Leak detection threshold updated to {} MB/min", mb_per_min);
        Ok(())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_mb_per_min
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn state(&self) -> LeakState {
        self.state
    }

    /// Evaluate the newest window of `history` (oldest first).
    pub fn evaluate<'a, I>(&mut self, history: I, now: DateTime<Utc>) -> Evaluation
    where
        I: IntoIterator<Item = &'a f64>,
        I::IntoIter: ExactSizeIterator,
    {
        let history = history.into_iter();
        let have = history.len();
        if have < self.window {
            return Evaluation::InsufficientHistory {
                have,
                need: self.window,
            };
        }
        let recent: Vec<f64> = history.skip(have - self.window).copied().collect();
        let slope = least_squares_slope(&recent).unwrap_or(0.0);
        let projected = slope * self.samples_per_minute;
        self.state.last_slope_estimate = projected;

        let over = projected > self.threshold_mb_per_min;
        match (self.state.is_leak_active, over) {
            (false, true) => {
                self.state.is_leak_active = true;
                let message = format!(
                    "Potential memory leak detected! Projected increase: {:.2}MB/min",
                    projected
                );
                warn!("{}", message);
                Evaluation::Raised(LeakAlertEvent {
                    timestamp: now,
                    message,
                    projected_mb_per_min: projected,
                    threshold_mb_per_min: self.threshold_mb_per_min,
                })
            }
            (true, false) => {
                self.state.is_leak_active = false;
                info!("Memory leak condition cleared ({:.2} MB/min)", projected);
                Evaluation::Cleared {
                    projected_mb_per_min: projected,
                }
            }
            _ => Evaluation::Unchanged {
                projected_mb_per_min: projected,
            },
        }
    }
}

pub fn validate_threshold(mb_per_min: f64) -> Result<(), InvalidThreshold> {
    if mb_per_min.is_finite() && mb_per_min > 0.0 {
        Ok(())
    } else {
        Err(InvalidThreshold(mb_per_min))
    }
}

/// Ordinary least-squares slope of `values` against their index
/// (0, 1, 2, ...). `None` for fewer than two points.
pub fn least_squares_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    Some(num / den)
}

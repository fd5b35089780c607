//! Progress mapping and time estimation.
//!
//! One weighting drives both the overall progress value and the ETA. The
//! default splits a job evenly across the three stages; the split can be
//! overridden from configuration or derived from measured stage durations.
//!
//! Within a job, the time per unit of weight is learned from the stages that
//! already finished. Before any stage finishes, the running stage's own
//! projection is used, and failing that a fixed baseline total.

use std::time::Duration;

use chrono::{DateTime, Utc};

use sclip_models::{Stage, StageEstimates, StageTimings, TimeInfo};

use crate::error::{WorkerError, WorkerResult};

/// Relative share of total job time per stage. Always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageWeights {
    weights: [f64; 3],
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            weights: [1.0 / 3.0; 3],
        }
    }
}

impl StageWeights {
    /// Normalize three non-negative weights with a positive sum.
    pub fn new(transcribing: f64, analyzing: f64, cutting: f64) -> WorkerResult<Self> {
        let raw = [transcribing, analyzing, cutting];
        if raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(WorkerError::config_error("stage weights must be finite and non-negative"));
        }
        let sum: f64 = raw.iter().sum();
        if sum <= 0.0 {
            return Err(WorkerError::config_error("stage weights must not all be zero"));
        }
        Ok(Self {
            weights: raw.map(|w| w / sum),
        })
    }

    /// Parse `"t,a,c"`, e.g. `"0.5,0.3,0.2"` or `"5,3,2"`.
    pub fn parse(s: &str) -> WorkerResult<Self> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| WorkerError::config_error(format!("invalid stage weight: {}", e)))?;
        match parts.as_slice() {
            [t, a, c] => Self::new(*t, *a, *c),
            _ => Err(WorkerError::config_error("expected three comma-separated stage weights")),
        }
    }

    /// Weights proportional to measured stage durations.
    pub fn from_durations(transcribing: Duration, analyzing: Duration, cutting: Duration) -> WorkerResult<Self> {
        Self::new(
            transcribing.as_secs_f64(),
            analyzing.as_secs_f64(),
            cutting.as_secs_f64(),
        )
    }

    pub fn get(&self, stage: Stage) -> f64 {
        self.weights[stage.index()]
    }
}

/// Computes overall progress and timing estimates for one job.
#[derive(Debug, Clone)]
pub struct TimeEstimator {
    weights: StageWeights,
    baseline_total: f64,
}

impl Default for TimeEstimator {
    fn default() -> Self {
        Self::new(StageWeights::default(), Duration::from_secs(300))
    }
}

impl TimeEstimator {
    pub fn new(weights: StageWeights, baseline_total: Duration) -> Self {
        Self {
            weights,
            baseline_total: baseline_total.as_secs_f64().max(1.0),
        }
    }

    pub fn weights(&self) -> &StageWeights {
        &self.weights
    }

    /// Overall progress for a job in `current` at `stage_progress`.
    ///
    /// Every stage before `current` counts as fully done, skipped or not.
    pub fn overall_progress(&self, current: Stage, stage_progress: f64) -> f64 {
        let done: f64 = Stage::ALL
            .iter()
            .take(current.index())
            .map(|s| self.weights.get(*s))
            .sum();
        let p = clamp_unit(stage_progress);
        (done + self.weights.get(current) * p).clamp(0.0, 1.0)
    }

    /// Time estimate at `now`.
    pub fn estimate(
        &self,
        timings: &StageTimings,
        current: Option<Stage>,
        stage_progress: f64,
        now: DateTime<Utc>,
    ) -> TimeInfo {
        let stage_progress = clamp_unit(stage_progress);
        let unit = self.unit_secs(timings, current, stage_progress, now);

        let mut per_stage = [0.0_f64; 3];
        let mut remaining = 0.0;
        for stage in Stage::ALL {
            let span = timings.get(stage);
            let weight = self.weights.get(stage);
            let estimate = if span.skipped {
                0.0
            } else if let Some(actual) = span.duration_secs() {
                actual
            } else if Some(stage) == current {
                let elapsed = span.elapsed_secs(now);
                let projected = if stage_progress > 0.0 {
                    elapsed / stage_progress
                } else {
                    (weight * unit).max(elapsed)
                };
                remaining += (projected - elapsed).max(0.0);
                projected
            } else {
                let future = weight * unit;
                if current.map_or(true, |c| stage.index() > c.index()) && span.started_at.is_none() {
                    remaining += future;
                }
                future
            };
            per_stage[stage.index()] = estimate;
        }

        let elapsed = timings
            .first_start()
            .map(|start| ((now - start).num_milliseconds() as f64 / 1000.0).max(0.0))
            .unwrap_or(0.0);
        let remaining = remaining.max(0.0);

        TimeInfo {
            elapsed,
            remaining,
            eta: now + chrono::Duration::milliseconds((remaining * 1000.0) as i64),
            current_stage: current,
            stage_progress,
            stage_estimates: StageEstimates {
                transcribing: per_stage[0],
                analyzing: per_stage[1],
                cutting: per_stage[2],
                total: per_stage.iter().sum(),
            },
        }
    }

    /// Seconds per unit of weight.
    fn unit_secs(
        &self,
        timings: &StageTimings,
        current: Option<Stage>,
        stage_progress: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        let (actual, weight) = Stage::ALL
            .iter()
            .filter(|s| !timings.get(**s).skipped)
            .filter_map(|s| timings.get(*s).duration_secs().map(|d| (d, self.weights.get(*s))))
            .fold((0.0, 0.0), |(a, w), (d, sw)| (a + d, w + sw));
        if weight > 0.0 {
            return actual / weight;
        }

        if let Some(stage) = current {
            let weight = self.weights.get(stage);
            if stage_progress > 0.0 && weight > 0.0 {
                let projected = timings.get(stage).elapsed_secs(now) / stage_progress;
                return projected / weight;
            }
        }

        self.baseline_total
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sclip_models::StageSpan;

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + chrono::Duration::seconds(secs)
    }

    fn span(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> StageSpan {
        StageSpan {
            started_at: Some(start),
            finished_at: end,
            skipped: false,
        }
    }

    #[test]
    fn test_weights_parse_and_normalize() {
        let w = StageWeights::parse("5, 3, 2").unwrap();
        assert!((w.get(Stage::Transcribing) - 0.5).abs() < 1e-9);
        assert!((w.get(Stage::Cutting) - 0.2).abs() < 1e-9);
        assert!(StageWeights::parse("1,2").is_err());
        assert!(StageWeights::parse("0,0,0").is_err());
        assert!(StageWeights::parse("1,-1,1").is_err());
    }

    #[test]
    fn test_weights_from_durations() {
        let w = StageWeights::from_durations(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Duration::from_secs(10),
        )
        .unwrap();
        assert!((w.get(Stage::Transcribing) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_overall_progress_default_split() {
        let est = TimeEstimator::default();
        assert!((est.overall_progress(Stage::Transcribing, 0.0)).abs() < 1e-9);
        assert!((est.overall_progress(Stage::Analyzing, 0.5) - 0.5).abs() < 1e-9);
        assert!((est.overall_progress(Stage::Cutting, 1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_overall_progress_is_monotonic_across_stages() {
        let est = TimeEstimator::new(StageWeights::parse("6,3,1").unwrap(), Duration::from_secs(300));
        let mut last = 0.0;
        for stage in Stage::ALL {
            for step in 0..=10 {
                let p = est.overall_progress(stage, f64::from(step) / 10.0);
                assert!(p >= last);
                last = p;
            }
        }
    }

    #[test]
    fn test_baseline_before_any_measurement() {
        let est = TimeEstimator::default();
        let now = Utc::now();
        let mut timings = StageTimings::default();
        timings.transcribing = span(now, None);

        let info = est.estimate(&timings, Some(Stage::Transcribing), 0.0, now);
        assert!((info.stage_estimates.total - 300.0).abs() < 1e-6);
        assert!((info.remaining - 300.0).abs() < 1e-6);
        assert_eq!(info.current_stage, Some(Stage::Transcribing));
    }

    #[test]
    fn test_projection_from_current_stage() {
        let est = TimeEstimator::default();
        let t0 = Utc::now();
        let mut timings = StageTimings::default();
        timings.transcribing = span(t0, None);

        // 20s in, a quarter done: the stage projects to 80s, so each third is 80s
        let info = est.estimate(&timings, Some(Stage::Transcribing), 0.25, at(t0, 20));
        assert!((info.stage_estimates.transcribing - 80.0).abs() < 1e-6);
        assert!((info.stage_estimates.analyzing - 80.0).abs() < 1e-6);
        assert!((info.remaining - (60.0 + 160.0)).abs() < 1e-6);
        assert!((info.elapsed - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_rolling_estimate_from_finished_stages() {
        let est = TimeEstimator::default();
        let t0 = Utc::now();
        let mut timings = StageTimings::default();
        timings.transcribing = span(t0, Some(at(t0, 90)));
        timings.analyzing = span(at(t0, 90), None);

        let info = est.estimate(&timings, Some(Stage::Analyzing), 0.0, at(t0, 100));
        assert!((info.stage_estimates.transcribing - 90.0).abs() < 1e-6);
        assert!((info.stage_estimates.analyzing - 90.0).abs() < 1e-6);
        assert!((info.stage_estimates.cutting - 90.0).abs() < 1e-6);
        assert!((info.stage_estimates.total - 270.0).abs() < 1e-6);
        assert!((info.remaining - 170.0).abs() < 1e-6);
    }

    #[test]
    fn test_skipped_stage_counts_zero() {
        let est = TimeEstimator::default();
        let t0 = Utc::now();
        let mut timings = StageTimings::default();
        timings.transcribing.skipped = true;
        timings.analyzing = span(t0, Some(at(t0, 30)));
        timings.cutting = span(at(t0, 30), None);

        let info = est.estimate(&timings, Some(Stage::Cutting), 0.5, at(t0, 40));
        assert_eq!(info.stage_estimates.transcribing, 0.0);
        assert!((info.stage_estimates.cutting - 20.0).abs() < 1e-6);
        assert!((info.remaining - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_remaining_never_negative() {
        let est = TimeEstimator::default();
        let t0 = Utc::now();
        let mut timings = StageTimings::default();
        timings.transcribing = span(t0, Some(at(t0, 10)));
        timings.analyzing = span(at(t0, 10), Some(at(t0, 20)));
        timings.cutting = span(at(t0, 20), None);

        // Cutting overran its weighted estimate; projection clamps to elapsed
        let info = est.estimate(&timings, Some(Stage::Cutting), 0.0, at(t0, 500));
        assert!(info.remaining >= 0.0);
        assert!((info.stage_estimates.cutting - 480.0).abs() < 1e-6);
    }
}

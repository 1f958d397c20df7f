//! Progress estimation from the separation tool's console output.
//!
//! The tool reports nothing machine-readable, so the estimate combines log
//! milestones, tqdm-style percentage bars and elapsed time.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

static RE_TQDM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,3})%\|").unwrap());
static RE_BAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bag of (\d+) models").unwrap());
static RE_LOADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(selected model|downloading|loading)").unwrap());
static RE_SEPARATING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)separat(ing|ed) track").unwrap());

/// Percent bands per phase: `(start, end)`.
pub const STARTING_BAND: (u8, u8) = (0, 5);
pub const LOADING_BAND: (u8, u8) = (5, 15);
pub const SEPARATING_BAND: (u8, u8) = (15, 90);
pub const WRITING_BAND: (u8, u8) = (90, 99);

/// Time constants of the asymptotic rise inside each band.
pub const STARTING_TAU: Duration = Duration::from_secs(2);
pub const LOADING_TAU: Duration = Duration::from_secs(15);
pub const SEPARATING_TAU: Duration = Duration::from_secs(90);
pub const WRITING_TAU: Duration = Duration::from_secs(5);

/// Highest value an estimate may report; 100 is reserved for `done`.
pub const MAX_ESTIMATE: u8 = 99;

/// Returns true for tqdm progress bar lines.
pub fn is_progress_line(line: &str) -> bool {
    RE_TQDM.is_match(line)
}

/// Turns observed output and elapsed time into a percentage.
pub trait ProgressEstimator: Send {
    fn observe_line(&mut self, line: &str, now: Instant);
    fn estimate(&self, now: Instant) -> u8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Starting,
    LoadingModel,
    Separating,
    Writing,
}

impl Phase {
    fn band(&self) -> (u8, u8) {
        match self {
            Phase::Starting => STARTING_BAND,
            Phase::LoadingModel => LOADING_BAND,
            Phase::Separating => SEPARATING_BAND,
            Phase::Writing => WRITING_BAND,
        }
    }

    fn tau(&self) -> Duration {
        match self {
            Phase::Starting => STARTING_TAU,
            Phase::LoadingModel => LOADING_TAU,
            Phase::Separating => SEPARATING_TAU,
            Phase::Writing => WRITING_TAU,
        }
    }
}

/// Default estimator: phases map to bands, time fills each band
/// asymptotically, tqdm bars position the estimate inside the separating band.
#[derive(Debug, Clone)]
pub struct PhaseEstimator {
    phase: Phase,
    phase_started: Instant,
    models: u32,
    finished_bars: u32,
    last_percent: Option<u8>,
}

impl PhaseEstimator {
    pub fn new(now: Instant) -> Self {
        Self {
            phase: Phase::Starting,
            phase_started: now,
            models: 1,
            finished_bars: 0,
            last_percent: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        if phase > self.phase {
            self.phase = phase;
            self.phase_started = now;
        }
    }

    fn observe_bar(&mut self, percent: u8, now: Instant) {
        let percent = percent.min(100);
        if let Some(last) = self.last_percent {
            // A new bar starts when the percentage drops
            if percent < last {
                self.finished_bars = (self.finished_bars + 1).min(self.models);
            }
        }
        self.last_percent = Some(percent);

        if percent == 100 && self.finished_bars + 1 >= self.models {
            self.enter(Phase::Writing, now);
        }
    }

    /// Fraction of the separating work reported by tqdm, if any bar was seen.
    fn bar_fraction(&self) -> Option<f64> {
        let percent = self.last_percent?;
        let models = f64::from(self.models.max(1));
        let done = f64::from(self.finished_bars) + f64::from(percent) / 100.0;
        Some((done / models).clamp(0.0, 1.0))
    }
}

impl ProgressEstimator for PhaseEstimator {
    fn observe_line(&mut self, line: &str, now: Instant) {
        if let Some(caps) = RE_BAG.captures(line) {
            if let Ok(n) = caps[1].parse::<u32>() {
                self.models = n.max(1);
            }
        }

        if let Some(caps) = RE_TQDM.captures(line) {
            self.enter(Phase::Separating, now);
            if let Ok(percent) = caps[1].parse::<u8>() {
                self.observe_bar(percent, now);
            }
            return;
        }

        if RE_SEPARATING.is_match(line) {
            self.enter(Phase::Separating, now);
        } else if RE_LOADING.is_match(line) {
            self.enter(Phase::LoadingModel, now);
        } else {
            // Any output means the process is past startup
            self.enter(Phase::LoadingModel, now);
        }
    }

    fn estimate(&self, now: Instant) -> u8 {
        let (start, end) = self.phase.band();
        let span = f64::from(end - start);

        let value = match (self.phase, self.bar_fraction()) {
            (Phase::Separating, Some(fraction)) => f64::from(start) + span * fraction,
            _ => {
                let elapsed = now.saturating_duration_since(self.phase_started).as_secs_f64();
                let tau = self.phase.tau().as_secs_f64().max(f64::EPSILON);
                f64::from(start) + span * (1.0 - (-elapsed / tau).exp())
            }
        };

        // The next band starts where this one ends
        let value = value.min(f64::from(end) - 1.0).max(f64::from(start));
        (value.floor() as u8).min(MAX_ESTIMATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let now = Instant::now();
        let estimator = PhaseEstimator::new(now);
        assert_eq!(estimator.estimate(now), 0);
        assert_eq!(estimator.phase(), Phase::Starting);
    }

    #[test]
    fn test_time_rises_asymptotically_inside_band() {
        let now = Instant::now();
        let estimator = PhaseEstimator::new(now);

        let early = estimator.estimate(now + Duration::from_secs(1));
        let late = estimator.estimate(now + Duration::from_secs(3600));
        assert!(early <= late);
        assert!(late < STARTING_BAND.1);
    }

    #[test]
    fn test_milestones_advance_phases() {
        let now = Instant::now();
        let mut estimator = PhaseEstimator::new(now);

        estimator.observe_line(
            "Selected model is a bag of 4 models. You will see that many progress bars per track.",
            now,
        );
        assert_eq!(estimator.phase(), Phase::LoadingModel);
        assert!(estimator.estimate(now) >= LOADING_BAND.0);

        estimator.observe_line("Separating track /jobs/a/input.wav", now);
        assert_eq!(estimator.phase(), Phase::Separating);
        assert_eq!(estimator.estimate(now), SEPARATING_BAND.0);
    }

    #[test]
    fn test_phases_never_go_back() {
        let now = Instant::now();
        let mut estimator = PhaseEstimator::new(now);
        estimator.observe_line("Separating track x.wav", now);
        estimator.observe_line("Downloading: weights", now);
        assert_eq!(estimator.phase(), Phase::Separating);
    }

    #[test]
    fn test_tqdm_positions_within_separating_band() {
        let now = Instant::now();
        let mut estimator = PhaseEstimator::new(now);
        estimator.observe_line(
            " 50%|█████     | 117.0/234.0 [00:10<00:10, 11.2seconds/s]",
            now,
        );

        let value = estimator.estimate(now);
        assert_eq!(estimator.phase(), Phase::Separating);
        assert_eq!(value, 15 + 75 / 2);
    }

    #[test]
    fn test_bag_of_models_spreads_bars() {
        let now = Instant::now();
        let mut estimator = PhaseEstimator::new(now);
        estimator.observe_line("Selected model is a bag of 2 models.", now);

        estimator.observe_line("100%|██████████| 10/10", now);
        assert_eq!(estimator.phase(), Phase::Separating);
        let after_first = estimator.estimate(now);

        estimator.observe_line("  0%|          | 0/10", now);
        estimator.observe_line(" 40%|████      | 4/10", now);
        let mid_second = estimator.estimate(now);
        assert!(mid_second > after_first);

        estimator.observe_line("100%|██████████| 10/10", now);
        assert_eq!(estimator.phase(), Phase::Writing);
        assert!(estimator.estimate(now) >= WRITING_BAND.0);
    }

    #[test]
    fn test_never_exceeds_99() {
        let now = Instant::now();
        let mut estimator = PhaseEstimator::new(now);
        estimator.observe_line("100%|██████████| 10/10", now);
        assert_eq!(estimator.phase(), Phase::Writing);
        assert!(estimator.estimate(now + Duration::from_secs(100_000)) <= MAX_ESTIMATE);
    }

    #[test]
    fn test_is_progress_line() {
        assert!(is_progress_line(" 12%|█▏        | 3/25"));
        assert!(!is_progress_line("RuntimeError: CUDA out of memory"));
    }
}

use std::fmt;

/// Stages reported during a sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SweepStage {
    Targets,
}

impl SweepStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Targets => "target classification",
        }
    }
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting progress over a sweep's targets.
///
/// Methods take `&self` because targets may finish on several threads.
pub trait SweepObserver: Sync {
    fn on_stage_start(&self, stage: SweepStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_target_finish(&self, target: &str) {
        let _ = target;
    }
    fn on_stage_finish(&self, stage: SweepStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopSweepObserver;

impl SweepObserver for NoopSweepObserver {}

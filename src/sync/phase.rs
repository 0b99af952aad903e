use serde::Serialize;

/// Steps of a push or pull, in the order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    ComputingLocalChanges,
    NoChanges,
    CheckingRemoteState,
    Uploading,
    Downloading,
    ConflictDetection,
    Resolving,
    Apply,
    Done,
    Aborted,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::ComputingLocalChanges => "computing local changes",
            SyncPhase::NoChanges => "no changes",
            SyncPhase::CheckingRemoteState => "checking remote state",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Downloading => "downloading",
            SyncPhase::ConflictDetection => "conflict detection",
            SyncPhase::Resolving => "resolving",
            SyncPhase::Apply => "apply",
            SyncPhase::Done => "done",
            SyncPhase::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::NoChanges | SyncPhase::Done | SyncPhase::Aborted)
    }
}

/// Records the phases one operation went through.
#[derive(Debug, Clone)]
pub struct PhaseLog {
    phases: Vec<SyncPhase>,
}

impl Default for PhaseLog {
    fn default() -> Self {
        Self {
            phases: vec![SyncPhase::Idle],
        }
    }
}

impl PhaseLog {
    pub fn enter(&mut self, phase: SyncPhase) {
        log::debug!("sync phase: {} -> {}", self.current().as_str(), phase.as_str());
        self.phases.push(phase);
    }

    pub fn current(&self) -> SyncPhase {
        self.phases.last().copied().unwrap_or(SyncPhase::Idle)
    }

    pub fn phases(&self) -> &[SyncPhase] {
        &self.phases
    }

    pub fn into_phases(self) -> Vec<SyncPhase> {
        self.phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_log_records_transitions() {
        let mut log = PhaseLog::default();
        log.enter(SyncPhase::ComputingLocalChanges);
        log.enter(SyncPhase::NoChanges);

        assert_eq!(log.current(), SyncPhase::NoChanges);
        assert!(log.current().is_terminal());
        assert_eq!(
            log.phases(),
            &[SyncPhase::Idle, SyncPhase::ComputingLocalChanges, SyncPhase::NoChanges]
        );
    }
}

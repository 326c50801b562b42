//! Step sequences behind each subcommand.

use clusterdeck::factory::StepType;

/// Steps of a full deployment, in order.
pub const DEPLOY: &[StepType] = &[
    StepType::PullImage,
    StepType::CreateContainer,
    StepType::SyncConfig,
    StepType::StartService,
];

pub const START: &[StepType] = &[StepType::StartService];

pub const STOP: &[StepType] = &[StepType::StopService];

/// Restart pushes configs first so edits in the topology take effect.
pub const RESTART: &[StepType] = &[StepType::SyncConfig, StepType::RestartService];

pub const CLEAN: &[StepType] = &[StepType::StopService, StepType::CleanService];

/// Status first seeds an "Unknown" row per service, then inspects.
pub const STATUS: &[StepType] = &[StepType::InitServiceStatus, StepType::GetServiceStatus];

pub const CHECK: &[StepType] = &[
    StepType::CheckSshConnect,
    StepType::CheckPermission,
    StepType::CheckDockerEngine,
    StepType::GetHostDate,
    StepType::CheckPortInUse,
];

pub const FORMAT: &[StepType] = &[StepType::FormatChunkfilePool];

pub const PLAYGROUND_RUN: &[StepType] = &[StepType::RunPlayground];

pub const PLAYGROUND_REMOVE: &[StepType] = &[StepType::RemovePlayground];

/// Steps whose progress is internal bookkeeping and stays off screen.
pub fn is_silent(step: StepType) -> bool {
    matches!(step, StepType::InitServiceStatus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_creates_before_start() {
        let create = DEPLOY.iter().position(|s| *s == StepType::CreateContainer);
        let start = DEPLOY.iter().position(|s| *s == StepType::StartService);
        assert!(create < start);
        assert_eq!(DEPLOY[0], StepType::PullImage);
    }

    #[test]
    fn test_status_seeds_rows_silently() {
        assert!(is_silent(STATUS[0]));
        assert!(!is_silent(STATUS[1]));
    }
}

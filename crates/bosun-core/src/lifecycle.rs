use crate::CoreError;
use bosun_store::AppStatus;

/// Check a managed-app status change.
///
/// Re-entering the current state is accepted because the service manager may
/// re-run a hook. Any state may fall to `error`.
pub fn validate_transition(from: AppStatus, to: AppStatus) -> Result<(), CoreError> {
    let valid = from == to
        || to == AppStatus::Error
        || matches!(
            (from, to),
            (
                AppStatus::Installing
                    | AppStatus::Running
                    | AppStatus::Stopped
                    | AppStatus::Error
                    | AppStatus::Failed,
                AppStatus::Starting
            ) | (AppStatus::Starting, AppStatus::Running)
                | (
                    AppStatus::Installing | AppStatus::Starting | AppStatus::Running,
                    AppStatus::Failed
                )
                | (
                    AppStatus::Starting
                        | AppStatus::Running
                        | AppStatus::Error
                        | AppStatus::Failed,
                    AppStatus::Stopped
                )
                | (AppStatus::Error | AppStatus::Failed, AppStatus::Installing)
                | (
                    AppStatus::Installing
                        | AppStatus::Starting
                        | AppStatus::Running
                        | AppStatus::Stopped
                        | AppStatus::Error
                        | AppStatus::Failed,
                    AppStatus::Uninstalling
                )
        );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

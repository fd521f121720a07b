use crate::crd::{
    ConditionReason, ConditionStatus, ConditionType, GitTrackObjectCondition,
    GitTrackObjectStatus,
};

/// Upsert the condition of `type_` into `current`.
///
/// Returns `None` when the existing condition already carries the same
/// status, reason and message, so callers can skip the status write. The
/// transition time only moves when `status` flips.
pub fn set_condition(
    current: Option<&GitTrackObjectStatus>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: ConditionReason,
    message: &str,
    now: &str,
) -> Option<GitTrackObjectStatus> {
    let mut next = current.cloned().unwrap_or_default();
    let reason = Some(reason.to_string());
    let message = (!message.is_empty()).then(|| message.to_string());

    match next.conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status
                && existing.reason == reason
                && existing.message == message
            {
                return None;
            }
            if existing.status != status {
                existing.last_transition_time = Some(now.to_string());
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
            existing.last_update_time = Some(now.to_string());
        }
        None => next.conditions.push(GitTrackObjectCondition {
            type_,
            status,
            last_update_time: Some(now.to_string()),
            last_transition_time: Some(now.to_string()),
            reason,
            message,
        }),
    }
    Some(next)
}

/// The `InSync` condition, if present.
pub fn in_sync(status: Option<&GitTrackObjectStatus>) -> Option<&GitTrackObjectCondition> {
    status?
        .conditions
        .iter()
        .find(|c| c.type_ == ConditionType::InSync)
}

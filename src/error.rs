use serde_json::json;

/// Core error taxonomy. Blocked states always carry the human reason;
/// the IPC boundary maps these to stable string codes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("blocked by holiday: {name}")]
    BlockedByHoliday { name: String },

    #[error("blocked by emergency leave: {reason}")]
    BlockedByEmergency { reason: String },

    #[error("attendance already taken; locked for another {}", format_minutes(*.remaining_minutes))]
    BlockedByLock { remaining_minutes: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("{success} of {} records saved; {failure} queued for retry", .success + .failure)]
    PersistencePartial { success: usize, failure: usize },

    #[error("no records could be saved to the remote store")]
    PersistenceTotal,

    #[error("signal source unavailable: {0}")]
    SignalUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::BlockedByHoliday { .. } => "blocked_by_holiday",
            EngineError::BlockedByEmergency { .. } => "blocked_by_emergency",
            EngineError::BlockedByLock { .. } => "blocked_by_lock",
            EngineError::Validation(_) => "bad_params",
            EngineError::PersistencePartial { .. } => "persistence_partial",
            EngineError::PersistenceTotal => "persistence_failed",
            EngineError::SignalUnavailable(_) => "signal_unavailable",
            EngineError::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::BlockedByHoliday { name } => Some(json!({ "holiday": name })),
            EngineError::BlockedByEmergency { reason } => Some(json!({ "reason": reason })),
            EngineError::BlockedByLock { remaining_minutes } => {
                Some(json!({ "remainingMinutes": remaining_minutes }))
            }
            EngineError::PersistencePartial { success, failure } => {
                Some(json!({ "successCount": success, "failureCount": failure }))
            }
            _ => None,
        }
    }
}

fn format_minutes(total: i64) -> String {
    let total = total.max(0);
    let hours = total / 60;
    let minutes = total % 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

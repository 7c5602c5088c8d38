use chrono::NaiveDate;
use serde_json::json;

use crate::error::EngineError;
use crate::ipc::error::err;
use crate::model::{parse_date, ClassKey};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        HandlerErr {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

pub fn get_required_u32(params: &serde_json::Value, key: &str) -> Result<u32, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn date_param(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_date(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("{} must be an ISO date (YYYY-MM-DD)", key))
    })
}

/// Reads `params.classKey = {courseType, year, stream?, section?}` and
/// validates it against the course catalog.
pub fn class_key_param(params: &serde_json::Value) -> Result<ClassKey, HandlerErr> {
    let Some(raw) = params.get("classKey") else {
        return Err(HandlerErr::bad_params("missing classKey"));
    };
    let course_type = raw
        .get("courseType")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing classKey.courseType"))?;
    let year = raw
        .get("year")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| HandlerErr::bad_params("missing classKey.year"))?;
    let stream = raw.get("stream").and_then(|v| v.as_str()).unwrap_or("");
    let section = raw.get("section").and_then(|v| v.as_str()).unwrap_or("");
    ClassKey::new(course_type, year, stream, section).map_err(HandlerErr::from)
}

pub fn class_key_json(key: &ClassKey) -> serde_json::Value {
    json!({
        "courseType": key.course_type,
        "year": key.year,
        "stream": key.stream,
        "section": key.section,
    })
}

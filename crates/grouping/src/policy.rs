//! Cache lifetime classification for executor results

use serde_json::Value;
use trafficlight_core::Response;

/// How long a stored response should live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    /// 2xx with a parseable body and no embedded errors
    Success,
    /// Completed, but failed at the application level; cached briefly
    SoftFailure,
}

/// Classify a successful operation result
///
/// Soft failure when the body is not a JSON object, the status is outside
/// `[200, 300)`, or the body carries a non-empty `errors` list. An `errors`
/// field that is neither a list nor null counts as an unparseable body.
pub fn classify(response: &Response) -> CacheClass {
    let Ok(Value::Object(envelope)) = serde_json::from_slice::<Value>(&response.body) else {
        return CacheClass::SoftFailure;
    };

    if !response.is_success() {
        return CacheClass::SoftFailure;
    }

    match envelope.get("errors") {
        None | Some(Value::Null) => CacheClass::Success,
        Some(Value::Array(errors)) if errors.is_empty() => CacheClass::Success,
        Some(_) => CacheClass::SoftFailure,
    }
}

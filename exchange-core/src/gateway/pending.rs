use serde_json::Value;

/// An inbound command that could not be applied at receipt time.
///
/// Queued per device and replayed once per tick; still-queued requests are
/// rejected when a market cycle completes, because the market slot they refer
/// to no longer exists.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_type: String,
    pub arguments: Value,
    pub response_channel: String,
}

impl PendingRequest {
    pub fn new(
        request_type: impl Into<String>,
        arguments: Value,
        response_channel: impl Into<String>,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            arguments,
            response_channel: response_channel.into(),
        }
    }
}

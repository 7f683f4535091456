use serde::Serialize;

// Error codes carried in server -> client error frames and HTTP rejections.
pub const ERR_INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
pub const ERR_SEND_FAILED: &str = "SEND_FAILED";
pub const ERR_RATE_LIMITED: &str = "RATE_LIMITED";
pub const ERR_INVALID_TOKEN: &str = "INVALID_TOKEN";
pub const ERR_INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
pub const ERR_SESSION_EXPIRED: &str = "SESSION_EXPIRED";
pub const ERR_FORCE_LOGOUT: &str = "FORCE_LOGOUT";
pub const ERR_NOT_A_MEMBER: &str = "NOT_A_MEMBER";

// WebSocket close codes.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Error frame written to a socket without closing it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame<'a> {
    pub error: &'a str,
    pub code: &'a str,
}

impl<'a> ErrorFrame<'a> {
    pub fn new(code: &'a str, error: &'a str) -> Self {
        Self { error, code }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!(r#"{{"code":"{}"}}"#, self.code))
    }
}

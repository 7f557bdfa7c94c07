//! HTTP API request and response types.
//!
//! Field names are camelCase on the wire. Request fields are all optional so
//! that a missing value reaches validation instead of failing to decode.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use pairbot_core::SessionInfo;

// =============================================================================
// Requests
// =============================================================================

/// Body of `POST /api/pair`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairParams {
    /// Phone number in any format; only its digits are used
    #[serde(default, deserialize_with = "loose_string")]
    pub phone: Option<String>,

    /// Session to store credentials under (defaults to the phone digits)
    #[serde(default, deserialize_with = "loose_string")]
    pub session_id: Option<String>,
}

/// Body of `POST /api/start` and `POST /api/logout`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// Target session
    #[serde(default, deserialize_with = "loose_string")]
    pub session_id: Option<String>,
}

/// Accept strings, numbers and booleans; `null` counts as absent.
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// =============================================================================
// Responses
// =============================================================================

/// Response of `POST /api/pair`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    /// Always true
    pub ok: bool,
    /// Pairing code to enter on the phone
    pub code: String,
    /// Session the credentials will be stored under
    pub session_id: String,
}

/// Response of `POST /api/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// Always true
    pub ok: bool,
    /// Started session
    pub session_id: String,
}

/// Response of `POST /api/logout`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    /// Always true
    pub ok: bool,
}

/// Response of `GET /api/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    /// Always true
    pub ok: bool,
    /// Known sessions and their states
    pub sessions: Vec<SessionInfo>,
}

/// Body of every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub ok: bool,
    /// Human-readable reason
    pub error: String,
}

impl ErrorResponse {
    /// Build an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

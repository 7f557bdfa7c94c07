//! Chat identities (`user@server`) and phone number helpers.

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Server part of an individual user identity.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server part of a group chat identity.
pub const GROUP_SERVER: &str = "g.us";

lazy_static! {
    static ref PHONE_PATTERN: Regex = Regex::new(r"^\d{8,15}$").unwrap();
}

/// Strip everything but ASCII digits from a phone number.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a phone number and check it is 8–15 digits long.
///
/// Returns the digits-only form on success.
pub fn validate_phone(raw: &str) -> Result<String> {
    let digits = normalize_phone(raw);
    if digits.is_empty() {
        return Err(Error::InvalidPhone("Phone required".to_string()));
    }
    if !PHONE_PATTERN.is_match(&digits) {
        return Err(Error::InvalidPhone(
            "Phone must be digits only (8–15).".to_string(),
        ));
    }
    Ok(digits)
}

/// A chat identity such as `15551234567@s.whatsapp.net` or `1203630@g.us`.
///
/// An optional device suffix (`user:device@server`) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    user: String,
    device: Option<String>,
    server: String,
}

impl Jid {
    /// Parse an identity string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (local, server) = raw
            .split_once('@')
            .ok_or_else(|| Error::InvalidJid(raw.to_string()))?;
        if server.is_empty() || server.contains('@') {
            return Err(Error::InvalidJid(raw.to_string()));
        }
        let (user, device) = match local.split_once(':') {
            Some((user, device)) => (user, Some(device.to_string())),
            None => (local, None),
        };
        if user.is_empty() {
            return Err(Error::InvalidJid(raw.to_string()));
        }
        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }

    /// Map a phone number to the user identity format.
    ///
    /// Returns `None` when the input has no digits.
    pub fn from_phone(raw: &str) -> Option<Self> {
        let digits = normalize_phone(raw);
        if digits.is_empty() {
            return None;
        }
        Some(Self {
            user: digits,
            device: None,
            server: USER_SERVER.to_string(),
        })
    }

    /// User part (without device suffix).
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Server part.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Whether this identity names a group chat.
    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// File name stem derived from the identity. Every character outside
    /// `[A-Za-z0-9._-]` becomes `_`, so the stem is always a single path
    /// component.
    pub fn file_stem(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}:{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "15551234567");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn test_validate_phone_accepts_bounds() {
        assert_eq!(validate_phone("12345678").unwrap(), "12345678");
        assert_eq!(validate_phone("123456789012345").unwrap(), "123456789012345");
        assert_eq!(validate_phone("+44 7700 900123").unwrap(), "447700900123");
    }

    #[test]
    fn test_validate_phone_rejects() {
        let err = validate_phone("").unwrap_err();
        assert_eq!(err.to_string(), "Phone required");
        assert!(validate_phone("1234567").is_err());
        assert!(validate_phone("1234567890123456").is_err());
        assert!(validate_phone("---").is_err());
    }

    #[test]
    fn test_parse_user_jid() {
        let jid = Jid::parse("15551234567@s.whatsapp.net").unwrap();
        assert_eq!(jid.user(), "15551234567");
        assert_eq!(jid.server(), USER_SERVER);
        assert!(!jid.is_group());
    }

    #[test]
    fn test_parse_group_jid() {
        let jid: Jid = "120363025246125486@g.us".parse().unwrap();
        assert!(jid.is_group());
    }

    #[test]
    fn test_device_suffix_roundtrips() {
        let jid = Jid::parse("15551234567:12@s.whatsapp.net").unwrap();
        assert_eq!(jid.user(), "15551234567");
        assert_eq!(jid.to_string(), "15551234567:12@s.whatsapp.net");
        assert_eq!(jid.file_stem(), "15551234567_12_s.whatsapp.net");
    }

    #[test]
    fn test_file_stem_has_no_path_separators() {
        let jid = Jid::parse("../../../tmp/evil@s.whatsapp.net").unwrap();
        let stem = jid.file_stem();
        assert_eq!(stem, ".._.._.._tmp_evil_s.whatsapp.net");
        assert!(!stem.contains('/'));

        let jid = Jid::parse("..\\win\\x@s.whatsapp.net").unwrap();
        assert!(!jid.file_stem().contains('\\'));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Jid::parse("no-at-sign").is_err());
        assert!(Jid::parse("@s.whatsapp.net").is_err());
        assert!(Jid::parse("user@").is_err());
    }

    #[test]
    fn test_from_phone() {
        let jid = Jid::from_phone("+1 234 567 890").unwrap();
        assert_eq!(jid.to_string(), "1234567890@s.whatsapp.net");
        assert!(Jid::from_phone("none").is_none());
    }

    #[test]
    fn test_file_stem() {
        let jid = Jid::parse("1234567890@s.whatsapp.net").unwrap();
        assert_eq!(jid.file_stem(), "1234567890_s.whatsapp.net");
    }
}

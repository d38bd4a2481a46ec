//! Session Code Parsing
//!
//! Session codes are minted by the relay; the client only strips what the
//! user typed around them so that "AB-12", " AB12 " and "AB12" all reach the
//! relay the same. Case is kept as typed since the relay owns the alphabet.

use std::fmt;

/// A session code that can be shared to join a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Get the session code as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a session code from user input
    ///
    /// Drops whitespace and separators; what is left must be non-empty ASCII
    /// alphanumerics.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect();

        if !normalized.is_empty() && normalized.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Some(SessionCode(normalized))
        } else {
            None
        }
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

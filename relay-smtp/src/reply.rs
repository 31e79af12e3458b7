//! Classification of a single SMTP reply line.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("invalid smtp response from remote server: {0}")]
    Invalid(String),
}

/// One line of a server reply, e.g. `550 mailbox unavailable`
///
/// Continuation lines (`250-...`) parse on their own; reassembling a
/// multi-line reply is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// `false` for a `-` continuation line
    pub is_last: bool,
    pub message: String,
}

impl ReplyLine {
    /// # Errors
    ///
    /// If `line` is shorter than four characters, does not start with three
    /// digits, or the fourth character is neither a space nor a hyphen
    pub fn parse(line: &str) -> Result<Self, ReplyError> {
        let invalid = || ReplyError::Invalid(line.to_string());
        let bytes = line.as_bytes();

        if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }

        let is_last = match bytes[3] {
            b' ' => true,
            b'-' => false,
            _ => return Err(invalid()),
        };

        let code = line[..3].parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            code,
            is_last,
            message: line[4..].trim_end_matches(['\r', '\n']).to_string(),
        })
    }

    /// 5xx and above
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code > 499
    }

    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 400
    }
}

impl fmt::Display for ReplyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.is_last { ' ' } else { '-' };
        write!(f, "{}{separator}{}", self.code, self.message)
    }
}

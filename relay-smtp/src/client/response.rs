//! SMTP response assembly from a read buffer.

use std::fmt;

use super::error::{ClientError, Result};
use crate::reply::ReplyLine;

/// A complete, possibly multi-line, SMTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All text lines joined by newlines
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// The code with only the first text line, as it appeared on the wire
    #[must_use]
    pub fn first_line(&self) -> String {
        format!(
            "{} {}",
            self.code,
            self.lines.first().map_or("", String::as_str)
        )
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, e.g. the go-ahead for DATA
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Parse one line of a response
    ///
    /// A bare three digit code is accepted as a reply with no text.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line is not an SMTP reply line
    pub fn parse_line(line: &str) -> Result<ReplyLine> {
        let padded;
        let line = if line.len() == 3 {
            padded = format!("{line} ");
            padded.as_str()
        } else {
            line
        };

        ReplyLine::parse(line).map_err(|err| ClientError::ParseError(err.to_string()))
    }

    /// Parse a complete response from the front of `buffer`
    ///
    /// Returns the response and the number of bytes it occupied, or `None`
    /// if the buffer does not yet hold a complete response.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the response is malformed
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = std::str::from_utf8(&buffer[consumed..consumed + end])?;
            consumed += end + 1;

            let raw = raw.trim_end_matches('\r');
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(raw)?;

            match first_code {
                Some(code) if code != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(first_code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message())
    }
}

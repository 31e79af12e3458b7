//! Non-delivery reports sent back to the sender of a failed message
//!
//! The report is a [`minijinja`] template. Referencing a variable that is not
//! listed below is an error, so a typo never silently produces a blank field.
//!
//! | variable           | value                                       |
//! |--------------------|---------------------------------------------|
//! | `{{ date }}`         | time of the bounce, RFC 2822                |
//! | `{{ me }}`           | our own host name                           |
//! | `{{ rcpt_to }}`      | who the report goes to (original sender)    |
//! | `{{ ori_rcpt_to }}`  | the recipient that could not be reached     |
//! | `{{ err_msg }}`      | why delivery failed                         |
//! | `{{ bounced_mail }}` | the original message, byte for byte         |
//!
//! Output always uses CRLF line endings.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use minijinja::{Environment, UndefinedBehavior, context};
use serde::Deserialize;
use thiserror::Error;

/// Stand-in for the original message when it is gone from the blob store
pub const MISSING_BODY: &str = "Raw mail was not found in the store";

pub const DEFAULT_TEMPLATE: &str = "\
From: MAILER-DAEMON@{{ me }}
To: {{ rcpt_to }}
Subject: Delivery Status Notification (Failure)
Date: {{ date }}
MIME-Version: 1.0
Content-Type: text/plain; charset=utf-8
Auto-Submitted: auto-replied

This is the mail delivery system at {{ me }}.

Your message could not be delivered to one or more recipients.

<{{ ori_rcpt_to }}>: {{ err_msg }}

----- Original message -----

{{ bounced_mail }}
";

const TEMPLATE_NAME: &str = "bounce";

/// Rendered in place of the original message, then replaced by its raw bytes
const BODY_MARKER: &str = "\u{1}bounced_mail\u{1}";

#[derive(Debug, Error)]
pub enum BounceError {
    #[error("bounce template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("unable to read bounce template {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BounceConfig {
    /// Template file; the built-in template is used when unset
    #[serde(default)]
    pub template_path: Option<PathBuf>,
}

/// Everything a report is rendered from
#[derive(Debug, Clone, Copy)]
pub struct BounceFields<'a> {
    pub date: DateTime<Utc>,
    pub me: &'a str,
    /// The original sender, who receives the report
    pub rcpt_to: &'a str,
    /// The original recipient
    pub ori_rcpt_to: &'a str,
    pub err_msg: &'a str,
    /// `None` when the original could not be fetched
    pub bounced_mail: Option<&'a [u8]>,
}

#[derive(Debug, Clone)]
pub struct BounceTemplate {
    env: Environment<'static>,
}

impl BounceTemplate {
    /// Compile `source`
    ///
    /// # Errors
    ///
    /// If `source` is not a valid template
    pub fn new(source: impl Into<String>) -> Result<Self, BounceError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_template_owned(TEMPLATE_NAME, source.into())?;

        Ok(Self { env })
    }

    /// # Errors
    ///
    /// If the file cannot be read or does not compile
    pub fn load(path: &Path) -> Result<Self, BounceError> {
        let source = std::fs::read_to_string(path).map_err(|source| BounceError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        Self::new(source)
    }

    /// The configured template, or the built-in one
    ///
    /// # Errors
    ///
    /// If a template file is configured but cannot be read or compiled
    pub fn from_config(config: &BounceConfig) -> Result<Self, BounceError> {
        config
            .template_path
            .as_deref()
            .map_or_else(|| Self::new(DEFAULT_TEMPLATE), Self::load)
    }

    /// Render the report, CRLF line endings throughout.
    ///
    /// The original message goes in unchanged apart from line endings, so
    /// 8-bit content survives even when it is not UTF-8.
    ///
    /// # Errors
    ///
    /// If the template references an unknown variable or fails to evaluate
    pub fn render(&self, fields: &BounceFields<'_>) -> Result<Vec<u8>, BounceError> {
        let bounced_mail = if fields.bounced_mail.is_some() {
            BODY_MARKER
        } else {
            MISSING_BODY
        };

        let rendered = self.env.get_template(TEMPLATE_NAME)?.render(context! {
            date => fields.date.to_rfc2822(),
            me => fields.me,
            rcpt_to => fields.rcpt_to,
            ori_rcpt_to => fields.ori_rcpt_to,
            err_msg => fields.err_msg,
            bounced_mail => bounced_mail,
        })?;

        let Some(original) = fields.bounced_mail else {
            return Ok(to_crlf(rendered.as_bytes()));
        };

        let mut out = Vec::with_capacity(rendered.len() + original.len());
        for (i, part) in rendered.split(BODY_MARKER).enumerate() {
            if i > 0 {
                out.extend_from_slice(original);
            }
            out.extend_from_slice(part.as_bytes());
        }

        Ok(to_crlf(&out))
    }
}

/// Turn every bare `\n` into `\r\n`, leaving existing `\r\n` alone
pub fn to_crlf(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 32);
    let mut previous = 0u8;

    for &byte in input {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }

    out
}

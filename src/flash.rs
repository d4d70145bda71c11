//! One-shot messages carried across a redirect in the `flash` cookie.
//!
//! The cookie value is `<kind>:<base64url(message)>`. It expires after ten minutes if nobody
//! reads it and is cleared by the first response that does.

use std::fmt;

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;

use crate::error::{Error, Result};

const COOKIE_NAME: &str = "flash";
const MAX_AGE_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Info,
    Error,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: Kind,
    pub message: String,
}

impl Flash {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: Kind::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: Kind::Error,
            message: message.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.kind, URL_SAFE.encode(&self.message))
    }

    /// Anything malformed is treated as no message at all.
    fn decode(value: &str) -> Option<Self> {
        let (kind, message) = value.split_once(':')?;
        if message.contains(':') {
            return None;
        }
        let kind = Kind::parse(kind)?;
        let message = URL_SAFE.decode(message).ok()?;
        let message = String::from_utf8(message).ok()?;
        Some(Self { kind, message })
    }

    /// `Set-Cookie` value storing this message, replacing any previous one.
    pub fn set_cookie(&self) -> HeaderValue {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}",
            COOKIE_NAME,
            self.encode(),
            MAX_AGE_SECS
        );
        HeaderValue::from_str(&cookie).expect("base64 is a valid header value")
    }
}

/// `Set-Cookie` value that deletes the cookie.
pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static("flash=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}

/// Reads the pending message from the request. If the cookie is present the returned header
/// clears it, even when its content could not be decoded.
pub fn take(headers: &HeaderMap) -> Result<(Option<Flash>, Option<HeaderValue>)> {
    let mut found = None;
    for header in headers.get_all(COOKIE) {
        let header = header
            .to_str()
            .map_err(|err| Error::Internal(format!("invalid cookie header: {}", err)))?;
        for pair in header.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == COOKIE_NAME {
                    found = Some(value.to_string());
                }
            }
        }
    }
    Ok(match found {
        Some(value) => (Flash::decode(&value), Some(clear_cookie())),
        None => (None, None),
    })
}

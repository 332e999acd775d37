//! Chromium network error codes
//!
//! Page load failures are reported by the engine as a negative net error code
//! (or its `net::ERR_*` name). This module maps both forms onto a typed
//! [`NetErrorKind`] so callers can tell a DNS failure from a refused
//! connection without string matching.

use serde::Serialize;
use thiserror::Error;

/// Sub-kind of a page load failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetErrorKind {
    Failed,
    Aborted,
    FileNotFound,
    TimedOut,
    AccessDenied,
    BlockedByClient,
    ConnectionClosed,
    ConnectionReset,
    ConnectionRefused,
    ConnectionAborted,
    ConnectionFailed,
    NameNotResolved,
    InternetDisconnected,
    SslProtocolError,
    AddressUnreachable,
    TunnelConnectionFailed,
    ConnectionTimedOut,
    ProxyConnectionFailed,
    NameResolutionFailed,
    CertCommonNameInvalid,
    CertDateInvalid,
    CertAuthorityInvalid,
    InvalidUrl,
    DisallowedUrlScheme,
    TooManyRedirects,
    InvalidResponse,
    EmptyResponse,
    Unknown,
}

const NET_ERRORS: &[(i64, &str, NetErrorKind)] = &[
    (-2, "FAILED", NetErrorKind::Failed),
    (-3, "ABORTED", NetErrorKind::Aborted),
    (-6, "FILE_NOT_FOUND", NetErrorKind::FileNotFound),
    (-7, "TIMED_OUT", NetErrorKind::TimedOut),
    (-10, "ACCESS_DENIED", NetErrorKind::AccessDenied),
    (-20, "BLOCKED_BY_CLIENT", NetErrorKind::BlockedByClient),
    (-100, "CONNECTION_CLOSED", NetErrorKind::ConnectionClosed),
    (-101, "CONNECTION_RESET", NetErrorKind::ConnectionReset),
    (-102, "CONNECTION_REFUSED", NetErrorKind::ConnectionRefused),
    (-103, "CONNECTION_ABORTED", NetErrorKind::ConnectionAborted),
    (-104, "CONNECTION_FAILED", NetErrorKind::ConnectionFailed),
    (-105, "NAME_NOT_RESOLVED", NetErrorKind::NameNotResolved),
    (-106, "INTERNET_DISCONNECTED", NetErrorKind::InternetDisconnected),
    (-107, "SSL_PROTOCOL_ERROR", NetErrorKind::SslProtocolError),
    (-109, "ADDRESS_UNREACHABLE", NetErrorKind::AddressUnreachable),
    (-111, "TUNNEL_CONNECTION_FAILED", NetErrorKind::TunnelConnectionFailed),
    (-118, "CONNECTION_TIMED_OUT", NetErrorKind::ConnectionTimedOut),
    (-130, "PROXY_CONNECTION_FAILED", NetErrorKind::ProxyConnectionFailed),
    (-137, "NAME_RESOLUTION_FAILED", NetErrorKind::NameResolutionFailed),
    (-200, "CERT_COMMON_NAME_INVALID", NetErrorKind::CertCommonNameInvalid),
    (-201, "CERT_DATE_INVALID", NetErrorKind::CertDateInvalid),
    (-202, "CERT_AUTHORITY_INVALID", NetErrorKind::CertAuthorityInvalid),
    (-300, "INVALID_URL", NetErrorKind::InvalidUrl),
    (-301, "DISALLOWED_URL_SCHEME", NetErrorKind::DisallowedUrlScheme),
    (-310, "TOO_MANY_REDIRECTS", NetErrorKind::TooManyRedirects),
    (-320, "INVALID_RESPONSE", NetErrorKind::InvalidResponse),
    (-324, "EMPTY_RESPONSE", NetErrorKind::EmptyResponse),
];

/// A page load failure reported by the rendering engine
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("ERR_{name} ({code}): {description}")]
pub struct NetError {
    pub code: i64,
    pub kind: NetErrorKind,
    pub name: String,
    pub description: String,
}

impl NetError {
    /// Build from a numeric net error code. Unknown codes keep the code but
    /// classify as [`NetErrorKind::Unknown`].
    pub fn from_code(code: i64, description: impl Into<String>) -> Self {
        let (name, kind) = NET_ERRORS
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, name, kind)| (name.to_string(), *kind))
            .unwrap_or_else(|| ("UNKNOWN".to_string(), NetErrorKind::Unknown));

        let mut description = description.into();
        if description.is_empty() {
            description = format!("net::ERR_{name}");
        }

        Self {
            code,
            kind,
            name,
            description,
        }
    }

    /// Build from the textual form, e.g. `net::ERR_NAME_NOT_RESOLVED`
    pub fn from_error_text(text: &str) -> Self {
        Self::from_code(code_for_name(text), text)
    }

    pub fn is_dns_failure(&self) -> bool {
        matches!(
            self.kind,
            NetErrorKind::NameNotResolved | NetErrorKind::NameResolutionFailed
        )
    }
}

/// Resolve `net::ERR_NAME_NOT_RESOLVED` / `ERR_NAME_NOT_RESOLVED` /
/// `NAME_NOT_RESOLVED` to its numeric code. Unrecognized names map to 0.
pub fn code_for_name(text: &str) -> i64 {
    let name = text.trim();
    let name = name.strip_prefix("net::").unwrap_or(name);
    let name = name.strip_prefix("ERR_").unwrap_or(name);

    NET_ERRORS
        .iter()
        .find(|(_, n, _)| *n == name)
        .map(|(code, _, _)| *code)
        .unwrap_or(0)
}

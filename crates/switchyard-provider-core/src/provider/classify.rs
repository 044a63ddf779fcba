//! Failure classification helpers for adapter authors.
//!
//! Adapters talk to very different upstreams; these map the common HTTP and
//! transport failure shapes onto `ProviderError` so the engine never sees a
//! provider-specific error.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ProviderError, TransientKind};
use crate::headers::parse_retry_after;

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

/// Classifies a non-2xx upstream response.
pub fn classify_http_failure(
    status: u16,
    headers: &[(String, String)],
    body: &Bytes,
) -> ProviderError {
    let message = format!("upstream status {status}: {}", body_preview(body));
    match status {
        429 => ProviderError::RateLimited {
            retry_after: parse_retry_after(headers),
            message,
        },
        401 | 403 => ProviderError::TerminalCredential { message },
        404 | 405 | 501 => ProviderError::UnsupportedOperation { operation: message },
        408 => ProviderError::Transient {
            kind: TransientKind::Timeout,
            message,
        },
        400..=499 => ProviderError::InvalidRequest { message },
        _ => ProviderError::Transient {
            kind: TransientKind::Upstream,
            message,
        },
    }
}

/// Classifies a failure that produced no HTTP response at all.
pub fn classify_transport_failure(
    kind: TransportErrorKind,
    message: impl Into<String>,
) -> ProviderError {
    let kind = match kind {
        TransportErrorKind::Timeout | TransportErrorKind::ReadTimeout => TransientKind::Timeout,
        TransportErrorKind::Connect
        | TransportErrorKind::Dns
        | TransportErrorKind::Tls
        | TransportErrorKind::Other => TransientKind::Network,
    };
    ProviderError::Transient {
        kind,
        message: message.into(),
    }
}

fn body_preview(body: &Bytes) -> String {
    let end = body.len().min(BODY_PREVIEW_LIMIT);
    String::from_utf8_lossy(&body[..end]).trim().to_string()
}

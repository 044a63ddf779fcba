use std::time::{Duration, SystemTime};

/// Response headers as adapters see them; order preserved, names case-insensitive.
pub type Headers = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
        Some((_, v)) => *v = value,
        None => headers.push((name, value)),
    }
}

/// `Retry-After` as delta-seconds or an HTTP-date, preferring the
/// `retry-after-ms` variant some upstreams send. Values too large for a
/// `Duration` saturate; the credential pool clamps them to its max cooldown.
pub fn parse_retry_after(headers: &[(String, String)]) -> Option<Duration> {
    if let Some(ms) = header_get(headers, "retry-after-ms")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| *v >= 0.0)
    {
        return Some(Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX));
    }
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    // A date already in the past means "retry now".
    Some(when.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

//! Opaque cursors for location history pages.
//!
//! A cursor names the last sample of the previous page by `(captured_at, id)`.
//! Two samples may share a capture time, so the id breaks ties.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error type for cursor decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("Invalid cursor encoding")]
    InvalidEncoding,
    #[error("Invalid cursor format")]
    InvalidFormat,
}

/// Position after which the next history page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub captured_at: DateTime<Utc>,
    pub id: i64,
}

impl HistoryCursor {
    pub fn new(captured_at: DateTime<Utc>, id: i64) -> Self {
        Self { captured_at, id }
    }

    /// Encodes as base64(`<unix micros>.<id>`).
    pub fn encode(&self) -> String {
        let raw = format!("{}.{}", self.captured_at.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(cursor: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|_| CursorError::InvalidEncoding)?;
        let raw = String::from_utf8(bytes).map_err(|_| CursorError::InvalidFormat)?;
        let (micros, id) = raw.split_once('.').ok_or(CursorError::InvalidFormat)?;

        let micros: i64 = micros.parse().map_err(|_| CursorError::InvalidFormat)?;
        let id: i64 = id.parse().map_err(|_| CursorError::InvalidFormat)?;
        let captured_at =
            DateTime::from_timestamp_micros(micros).ok_or(CursorError::InvalidFormat)?;

        Ok(Self { captured_at, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_preserves_microseconds() {
        let ts = Utc.timestamp_micros(1_718_000_000_123_456).unwrap();
        let cursor = HistoryCursor::new(ts, 42);
        let decoded = HistoryCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_is_url_safe() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let encoded = HistoryCursor::new(ts, i64::MAX).encode();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            HistoryCursor::decode("!!!not-base64!!!"),
            Err(CursorError::InvalidEncoding)
        );
        let no_separator = URL_SAFE_NO_PAD.encode(b"12345");
        assert_eq!(
            HistoryCursor::decode(&no_separator),
            Err(CursorError::InvalidFormat)
        );
        let bad_id = URL_SAFE_NO_PAD.encode(b"12345.abc");
        assert_eq!(
            HistoryCursor::decode(&bad_id),
            Err(CursorError::InvalidFormat)
        );
    }
}

//! Core wire-level types: offsets and live-tailing mode.

use std::cmp::Ordering;
use std::fmt;

/// Stream position specification.
///
/// Offsets are:
/// - Opaque: do not parse or interpret offset structure beyond the
///   sentinel forms below.
/// - Lexicographically sortable: compare offsets to determine ordering
///   *within one stream* only — never across streams.
/// - Persistent: valid for the stream's lifetime.
/// - Unique: each position has exactly one offset.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Start from the beginning of the stream (sentinel `-1`).
    Beginning,
    /// Start from the current tail (only future data, sentinel `now`).
    Now,
    /// The sentinel a server resolves via 307 redirect to a snapshot URL
    /// (or `-1` if no snapshot exists yet).
    Snapshot,
    /// A snapshot offset of the form `<N>_snapshot`: reading it returns
    /// the document state as-of position `<N>`, with a
    /// `Stream-Next-Offset` header of `<N>+1`.
    SnapshotAt(String),
    /// Server-issued opaque offset token.
    At(String),
}

impl Offset {
    /// Create an offset at a specific position.
    pub fn at(s: impl Into<String>) -> Self {
        Offset::At(s.into())
    }

    /// Parse from protocol string.
    pub fn parse(s: &str) -> Self {
        match s {
            "-1" => Offset::Beginning,
            "now" => Offset::Now,
            "snapshot" => Offset::Snapshot,
            "" => Offset::Beginning,
            other if other.ends_with("_snapshot") => Offset::SnapshotAt(other.to_string()),
            other => Offset::At(other.to_string()),
        }
    }

    /// Convert to query parameter value.
    pub fn to_query_value(&self) -> &str {
        match self {
            Offset::Beginning => "-1",
            Offset::Now => "now",
            Offset::Snapshot => "snapshot",
            Offset::SnapshotAt(s) => s.as_str(),
            Offset::At(s) => s.as_str(),
        }
    }

    /// Check if this is the beginning sentinel.
    pub fn is_beginning(&self) -> bool {
        matches!(self, Offset::Beginning)
    }

    /// Check if this is the now sentinel.
    pub fn is_now(&self) -> bool {
        matches!(self, Offset::Now)
    }

    /// Check if this identifies a snapshot-body offset (`<N>_snapshot`).
    pub fn is_snapshot_at(&self) -> bool {
        matches!(self, Offset::SnapshotAt(_))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        self.to_query_value()
    }
}

impl Default for Offset {
    fn default() -> Self {
        Offset::Beginning
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_query_value())
    }
}

impl From<String> for Offset {
    fn from(s: String) -> Self {
        Offset::parse(&s)
    }
}

impl From<&str> for Offset {
    fn from(s: &str) -> Self {
        Offset::parse(s)
    }
}

impl PartialOrd for Offset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Offset::At(a), Offset::At(b)) => Some(a.cmp(b)),
            (Offset::Beginning, Offset::Beginning) => Some(Ordering::Equal),
            (Offset::Now, Offset::Now) => Some(Ordering::Equal),
            (Offset::Beginning, Offset::At(_)) => Some(Ordering::Less),
            (Offset::At(_), Offset::Beginning) => Some(Ordering::Greater),
            _ => None, // Now/Snapshot/SnapshotAt are not comparable across kinds
        }
    }
}

/// Live tailing mode for stream consumption.
///
/// ## `LiveMode::Auto` Fallback Behavior
///
/// When `Auto` is selected:
///
/// 1. **Catch-up first**: regular HTTP reads until `up_to_date`.
/// 2. **SSE after catch-up**: attempts an SSE connection for live tailing.
/// 3. **Fallback to long-poll**: if SSE fails (400 or wrong content type).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LiveMode {
    /// No live tailing - stop after catching up (first `up_to_date`).
    #[default]
    Off,
    /// Automatic selection: SSE preferred, falls back to long-poll.
    Auto,
    /// Explicit long-polling for live updates.
    LongPoll,
    /// Explicit Server-Sent Events for live updates.
    Sse,
}

impl LiveMode {
    /// Convert to query parameter value (if any).
    pub fn to_query_value(&self) -> Option<&str> {
        match self {
            LiveMode::Off => None,
            LiveMode::Auto => Some("sse"),
            LiveMode::LongPoll => Some("long-poll"),
            LiveMode::Sse => Some("sse"),
        }
    }

    /// Check if this mode involves live tailing.
    pub fn is_live(&self) -> bool {
        !matches!(self, LiveMode::Off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sentinels() {
        assert_eq!(Offset::parse("-1"), Offset::Beginning);
        assert_eq!(Offset::parse("now"), Offset::Now);
        assert_eq!(Offset::parse("snapshot"), Offset::Snapshot);
        assert_eq!(Offset::parse(""), Offset::Beginning);
    }

    #[test]
    fn parses_snapshot_at() {
        let o = Offset::parse("42_snapshot");
        assert!(o.is_snapshot_at());
        assert_eq!(o.to_query_value(), "42_snapshot");
    }

    #[test]
    fn parses_opaque_token() {
        let o = Offset::parse("abc123");
        assert_eq!(o, Offset::At("abc123".to_string()));
    }

    #[test]
    fn orders_within_at_variant_only() {
        let a = Offset::at("a");
        let b = Offset::at("b");
        assert!(a < b);
        assert_eq!(Offset::Now.partial_cmp(&Offset::Beginning), None);
    }
}

#![forbid(unsafe_code)]

use std::fmt;

use uuid::Uuid;

/// Opaque handle naming one download's storage directory.
///
/// Backed by a random (v4) UUID and always rendered in its hyphenated
/// lowercase form, which only contains `[0-9a-f-]` and is therefore safe both
/// as a path segment and inside a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a caller-supplied identifier. Only canonical hyphenated UUIDs are
    /// accepted.
    pub fn parse(value: &str) -> Option<Self> {
        let parsed = Uuid::try_parse(value).ok()?;
        let id = Self(parsed);
        (id.to_string() == value).then_some(id)
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ten_thousand_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000)
            .map(|_| DownloadId::generate().to_string())
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn rendered_id_is_path_safe() {
        let id = DownloadId::generate().to_string();
        assert_eq!(id.len(), 36);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_hexdigit() || c == '-')
        );
    }

    #[test]
    fn parse_round_trips_canonical_form() {
        let id = DownloadId::generate();
        assert_eq!(DownloadId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn parse_rejects_non_canonical_input() {
        assert!(DownloadId::parse("../etc").is_none());
        assert!(DownloadId::parse("").is_none());
        let id = DownloadId::generate().to_string();
        assert!(DownloadId::parse(&id.to_uppercase()).is_none());
        assert!(DownloadId::parse(&id.replace('-', "")).is_none());
    }
}

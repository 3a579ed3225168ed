//! Key range selection.

/// A set of key names to read or watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    /// A single key.
    Exact(String),
    /// Keys in `[start, end)`; no end means "to the end of the keyspace".
    Span { start: String, end: Option<String> },
}

impl KeyRange {
    pub fn exact(key: impl Into<String>) -> Self {
        KeyRange::Exact(key.into())
    }

    pub fn span(start: impl Into<String>, end: impl Into<String>) -> Self {
        KeyRange::Span {
            start: start.into(),
            end: Some(end.into()),
        }
    }

    /// Every key at or after `start`.
    pub fn from(start: impl Into<String>) -> Self {
        KeyRange::Span {
            start: start.into(),
            end: None,
        }
    }

    /// Every key beginning with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        match prefix_end(prefix) {
            Some(end) => KeyRange::span(prefix, end),
            None => KeyRange::from(prefix),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, KeyRange::Exact(_))
    }

    /// True if `name` falls inside the range.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            KeyRange::Exact(key) => key == name,
            KeyRange::Span { start, end } => {
                name >= start.as_str() && end.as_deref().map_or(true, |end| name < end)
            }
        }
    }
}

/// Smallest key greater than every key with the given prefix.
///
/// Increments the last character that is not `char::MAX`, stepping over the
/// surrogate block; `None` when the prefix is empty or cannot be incremented.
fn prefix_end(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last {
            '\u{D7FF}' => Some('\u{E000}'),
            _ => char::from_u32(last as u32 + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

//! # Hierarchical service value names.
//!
//! A [`ServiceName`] identifies a named value in the container: something a
//! service provides, or something it requires. Names are ordered sequences
//! of path segments with a canonical dotted string form (`"net.listener"`).
//!
//! ## Rules
//! - Equality and hashing go by the segment sequence, never by the rendered
//!   string, so `ServiceName::parse("a.b")` equals `ServiceName::of("a").child("b")`.
//! - Names are cheap to clone (segments are shared behind an `Arc`).

use std::fmt;
use std::sync::Arc;

/// An ordered, dot-joined sequence of path segments naming a value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName {
    segments: Arc<[String]>,
}

impl ServiceName {
    /// Creates a single-segment name.
    pub fn of(segment: impl Into<String>) -> Self {
        Self {
            segments: Arc::from(vec![segment.into()]),
        }
    }

    /// Parses a canonical dotted form into its segments.
    ///
    /// `"a.b.c"` becomes the three-segment name `[a, b, c]`. A string with
    /// no dots becomes a single-segment name.
    pub fn parse(name: &str) -> Self {
        Self {
            segments: Arc::from(
                name.split('.')
                    .map(str::to_owned)
                    .collect::<Vec<_>>(),
            ),
        }
    }

    /// Returns a new name with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments: Vec<String> = self.segments.to_vec();
        segments.push(segment.into());
        Self {
            segments: Arc::from(segments),
        }
    }

    /// The path segments of this name.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The canonical dotted rendering of this name.
    pub fn canonical(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in self.segments.iter() {
            if !first {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        ServiceName::parse(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        ServiceName::parse(&name)
    }
}

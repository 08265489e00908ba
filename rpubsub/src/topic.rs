//! Message patterns and wildcard matching.
//!
//! A topic is a dot-delimited string, optionally prefixed by a namespace:
//!
//! ```text
//! Namespace:originator.subject.verb.DESCRIPTOR
//! ```
//!
//! Segments equal to `*` (or left empty) are wildcards. Dotted topics shorter
//! than the configured segment count are padded with trailing wildcards, so
//! `ui.tab` and `ui.tab.*.*` are the same pattern.
//!
//! Two patterns are *compatible* when they have the same number of segments
//! and every position is either equal or a wildcard on one side. On top of
//! compatibility, matching compares the *specificity* of both patterns, a
//! bitmask with `1` for every literal segment and `0` for every wildcard:
//!
//! - dispatch mode ([`MessagePattern::matches`]): a handler fires when the
//!   published message is at least as specific as the handler's pattern;
//! - strict mode ([`compare`]): true only when the first pattern is strictly
//!   more specific than the second.

use std::cmp::Ordering;
use std::fmt::{self, Write};
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use rpubsub_conf::{DEFAULT_NAMESPACE, DEFAULT_TOPIC_SEGMENTS};

use crate::{Error, Result};

pub const WILDCARD: &str = "*";
pub const SEPARATOR: char = '.';
pub const NAMESPACE_SEPARATOR: char = ':';

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Serialize, Deserialize)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

impl Segment {
    #[inline]
    pub fn parse<T: AsRef<str>>(s: T) -> Segment {
        match s.as_ref() {
            "" | WILDCARD => Segment::Wildcard,
            s => Segment::Literal(String::from(s)),
        }
    }

    #[inline]
    pub fn value(&self) -> Option<&str> {
        match self {
            Segment::Literal(s) => Some(s),
            Segment::Wildcard => None,
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::Wildcard)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(s) => f.write_str(s),
            Segment::Wildcard => f.write_str(WILDCARD),
        }
    }
}

/// Anything that can stand at one position of a topic.
pub(crate) trait MatchSegment {
    fn literal(&self) -> Option<&str>;

    #[inline]
    fn is_wild(&self) -> bool {
        self.literal().is_none()
    }
}

impl MatchSegment for Segment {
    #[inline]
    fn literal(&self) -> Option<&str> {
        self.value()
    }
}

impl MatchSegment for &str {
    #[inline]
    fn literal(&self) -> Option<&str> {
        if *self == WILDCARD {
            None
        } else {
            Some(*self)
        }
    }
}

/// Literal/wildcard bitmask of a pattern, `true` for literal positions.
///
/// Ordered lexicographically, so `foo.bar.baz` (`111`) > `foo.bar.*` (`110`)
/// > `foo.*.baz` (`101`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Specificity(Vec<bool>);

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            f.write_char(if *b { '1' } else { '0' })?;
        }
        Ok(())
    }
}

/// Returns both bitmasks when the two segment lists are compatible.
fn compatible<L: MatchSegment, R: MatchSegment>(lhs: &[L], rhs: &[R]) -> Option<(Specificity, Specificity)> {
    if lhs.len() != rhs.len() {
        return None;
    }
    let mut lmask = Vec::with_capacity(lhs.len());
    let mut rmask = Vec::with_capacity(rhs.len());
    for (l, r) in lhs.iter().zip(rhs) {
        if let (Some(l), Some(r)) = (l.literal(), r.literal()) {
            if l != r {
                return None;
            }
        }
        lmask.push(!l.is_wild());
        rmask.push(!r.is_wild());
    }
    Some((Specificity(lmask), Specificity(rmask)))
}

/// Compares two raw topic strings.
///
/// Without `check_specificity` this is plain compatibility. With it, the
/// result is true only when `a` is strictly more specific than `b`, so equal
/// strings compare false.
pub fn compare(a: &str, b: &str, check_specificity: bool) -> bool {
    let lhs = a.split(SEPARATOR).collect::<Vec<_>>();
    let rhs = b.split(SEPARATOR).collect::<Vec<_>>();
    match compatible(&lhs, &rhs) {
        None => false,
        Some(_) if !check_specificity => true,
        Some((lmask, rmask)) => lmask.cmp(&rmask) == Ordering::Greater,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagePattern {
    namespace: String,
    segments: Vec<Segment>,
    serialized: String,
}

impl MessagePattern {
    /// Parses with the default namespace and segment count.
    #[inline]
    pub fn parse<T: AsRef<str>>(s: T) -> Result<Self> {
        Self::parse_with(s, DEFAULT_NAMESPACE, DEFAULT_TOPIC_SEGMENTS)
    }

    pub fn parse_with<T: AsRef<str>>(s: T, default_namespace: &str, min_segments: usize) -> Result<Self> {
        let s = s.as_ref();
        let (namespace, body) = split_namespace(s);
        if body.is_empty() {
            return Err(Error::invalid(format!("topic `{}` has an empty body", s)));
        }

        let mut segments = if body.contains(SEPARATOR) {
            body.split(SEPARATOR).map(Segment::parse).collect::<Vec<_>>()
        } else {
            vec![Segment::parse(body)]
        };
        if segments.len() > 1 && segments.len() < min_segments {
            segments.resize(min_segments, Segment::Wildcard);
        }

        let namespace = match namespace {
            Some(ns) if !ns.is_empty() => ns.to_owned(),
            _ => default_namespace.to_owned(),
        };
        let serialized = segments.iter().join(".");
        Ok(Self { namespace, segments, serialized })
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Canonical form, segments joined by `.`, without the namespace.
    #[inline]
    pub fn serialize(&self) -> &str {
        &self.serialized
    }

    #[inline]
    pub fn specificity(&self) -> Specificity {
        Specificity(self.segments.iter().map(|s| !s.is_wildcard()).collect())
    }

    /// Same segment count and no conflicting literal.
    #[inline]
    pub fn is_compatible(&self, other: &MessagePattern) -> bool {
        self.matches_with(other, false)
    }

    /// Dispatch-mode match of this published message against a listener's pattern.
    #[inline]
    pub fn matches(&self, listener: &MessagePattern) -> bool {
        self.matches_with(listener, true)
    }

    pub fn matches_with(&self, listener: &MessagePattern, check_specificity: bool) -> bool {
        if self.serialized == listener.serialized {
            return true;
        }
        match compatible(&self.segments, &listener.segments) {
            None => false,
            Some(_) if !check_specificity => true,
            Some((candidate, listener)) => candidate >= listener,
        }
    }

    /// Strict-mode comparison, see [`compare`].
    pub fn compare(&self, other: &MessagePattern, check_specificity: bool) -> bool {
        match compatible(&self.segments, &other.segments) {
            None => false,
            Some(_) if !check_specificity => true,
            Some((lmask, rmask)) => lmask > rmask,
        }
    }
}

fn split_namespace(s: &str) -> (Option<&str>, &str) {
    match (s.find(NAMESPACE_SEPARATOR), s.find(SEPARATOR)) {
        (Some(colon), Some(dot)) if colon < dot => (Some(&s[..colon]), &s[colon + 1..]),
        (Some(colon), None) => (Some(&s[..colon]), &s[colon + 1..]),
        _ => (None, s),
    }
}

impl FromStr for MessagePattern {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        MessagePattern::parse(s)
    }
}

impl fmt::Display for MessagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl AsRef<str> for MessagePattern {
    fn as_ref(&self) -> &str {
        &self.serialized
    }
}

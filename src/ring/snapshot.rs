use crate::core::Segment;

/// Point-in-time copy of the retained segments, oldest first.
///
/// Holds its own `Vec` of segment handles; payload bytes are shared with the
/// live window, so later appends or evictions cannot change what a snapshot
/// sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    segments: Vec<Segment>,
}

impl Snapshot {
    pub(crate) fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    pub fn span_ns(&self) -> u64 {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.captured_ns() - first.captured_ns(),
            _ => 0,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

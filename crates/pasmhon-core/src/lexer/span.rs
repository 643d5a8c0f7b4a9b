//! Byte spans and line/column lookup

use std::ops::Range;

/// A half-open byte range in a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn from_range(range: Range<usize>) -> Self {
        Self::new(range.start as u32, range.end as u32)
    }

    /// Smallest span covering both `self` and `other`
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Zero-width span at the start of `self`
    #[must_use]
    pub const fn start_point(self) -> Self {
        Self::new(self.start, self.start)
    }

    /// Zero-width span at the end of `self`
    #[must_use]
    pub const fn end_point(self) -> Self {
        Self::new(self.end, self.end)
    }

    #[must_use]
    pub const fn as_range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A 1-based line and column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets to line/column pairs.
///
/// Columns count characters, not bytes, so carets line up under
/// multi-byte source text.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i as u32 + 1),
        );
        Self { line_starts }
    }

    /// 0-based line containing `offset`
    fn line_of(&self, offset: u32) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        }
    }

    /// 1-based line containing `offset`
    #[must_use]
    pub fn line(&self, offset: u32) -> u32 {
        self.line_of(offset) as u32 + 1
    }

    #[must_use]
    pub fn location(&self, source: &str, offset: u32) -> Location {
        let line = self.line_of(offset);
        let start = self.line_starts[line] as usize;
        let end = (offset as usize).min(source.len());
        let column = source.get(start..end).map_or(end - start, |s| s.chars().count());
        Location::new(line as u32 + 1, column as u32 + 1)
    }

    /// Text of the 1-based `line`, without its terminator
    #[must_use]
    pub fn line_text<'a>(&self, source: &'a str, line: u32) -> &'a str {
        let Some(&start) = self.line_starts.get(line.saturating_sub(1) as usize) else {
            return "";
        };
        let rest = &source[start as usize..];
        let text = rest.split('\n').next().unwrap_or("");
        text.strip_suffix('\r').unwrap_or(text)
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both() {
        let merged = Span::new(4, 6).merge(Span::new(1, 3));
        assert_eq!(merged, Span::new(1, 6));
        assert_eq!(merged.to_string(), "1..6");
    }

    #[test]
    fn locations_are_one_based() {
        let src = "x = 1\nprint(x)\n";
        let index = LineIndex::new(src);
        assert_eq!(index.location(src, 0), Location::new(1, 1));
        assert_eq!(index.location(src, 6), Location::new(2, 1));
        assert_eq!(index.location(src, 12), Location::new(2, 7));
        assert_eq!(index.line_count(), 3);
    }

    #[test]
    fn columns_count_characters() {
        let src = "s = 'é' + x";
        let index = LineIndex::new(src);
        let x = src.find('x').unwrap() as u32;
        assert_eq!(index.location(src, x).column, 11);
    }

    #[test]
    fn line_text_strips_terminators() {
        let src = "a\r\nbb\nccc";
        let index = LineIndex::new(src);
        assert_eq!(index.line_text(src, 1), "a");
        assert_eq!(index.line_text(src, 2), "bb");
        assert_eq!(index.line_text(src, 3), "ccc");
        assert_eq!(index.line_text(src, 9), "");
    }
}

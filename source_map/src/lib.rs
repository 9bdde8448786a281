//! Source file tracking for the lifetime analysis pipeline
//!
//! The analysis core consumes an already-parsed syntax tree, but every
//! diagnostic it emits carries a location in the original C-family source.
//! This library owns the mapping between byte offsets and human-readable
//! line/column positions across the set of files that make up a
//! translation unit.

use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a registered source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// A resolved position in source code (1-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
    pub byte_offset: u32,
}

impl SourcePosition {
    pub const fn new(line: u32, column: u32, byte_offset: u32) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A contiguous region of a single source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub file: FileId,
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceSpan {
    pub const fn new(file: FileId, start: SourcePosition, end: SourcePosition) -> Self {
        Self { file, start, end }
    }

    /// A zero-width span at a single position
    pub const fn point(file: FileId, pos: SourcePosition) -> Self {
        Self {
            file,
            start: pos,
            end: pos,
        }
    }

    /// Smallest span covering both `self` and `other`
    ///
    /// Panics in debug builds if the spans belong to different files.
    pub fn cover(self, other: SourceSpan) -> SourceSpan {
        debug_assert_eq!(self.file, other.file);
        let start = if self.start.byte_offset <= other.start.byte_offset {
            self.start
        } else {
            other.start
        };
        let end = if self.end.byte_offset >= other.end.byte_offset {
            self.end
        } else {
            other.end
        };
        SourceSpan::new(self.file, start, end)
    }

    pub fn len(&self) -> u32 {
        self.end.byte_offset.saturating_sub(self.start.byte_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.start)
    }
}

/// One registered source file with a precomputed line-start table
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
    line_starts: Vec<u32>,
}

impl SourceFile {
    fn new(name: String, text: String) -> Self {
        let mut line_starts = vec![0u32];
        for (offset, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset as u32 + 1);
            }
        }
        Self {
            name,
            text,
            line_starts,
        }
    }

    /// Number of lines in the file (a trailing newline does not open a new line)
    pub fn line_count(&self) -> usize {
        if self
            .line_starts
            .last()
            .is_some_and(|&s| s as usize == self.text.len() && !self.text.is_empty())
        {
            self.line_starts.len() - 1
        } else {
            self.line_starts.len()
        }
    }

    /// The text of a line, 1-based, without its terminator
    pub fn line_text(&self, line: u32) -> Option<&str> {
        let idx = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(idx)? as usize;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&s| s as usize)
            .unwrap_or(self.text.len());
        Some(self.text[start..end].trim_end_matches(['\r', '\n']))
    }

    /// Resolve a byte offset to a 1-based position
    pub fn position_of(&self, byte_offset: u32) -> SourcePosition {
        let line_idx = match self.line_starts.binary_search(&byte_offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_idx];
        SourcePosition::new(
            line_idx as u32 + 1,
            byte_offset - line_start + 1,
            byte_offset,
        )
    }
}

/// Registry of all source files in a translation unit
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: HashMap<FileId, SourceFile>,
    next_id: u32,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file and return its id
    pub fn add_file(&mut self, name: impl Into<String>, text: impl Into<String>) -> FileId {
        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.insert(id, SourceFile::new(name.into(), text.into()));
        id
    }

    pub fn file(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(&id)
    }

    pub fn file_name(&self, id: FileId) -> Option<&str> {
        self.files.get(&id).map(|f| f.name.as_str())
    }

    /// Build a span from raw byte offsets into a file
    pub fn span(&self, id: FileId, start: u32, end: u32) -> Option<SourceSpan> {
        let file = self.files.get(&id)?;
        Some(SourceSpan::new(
            id,
            file.position_of(start),
            file.position_of(end),
        ))
    }

    /// The source text a span covers, for snippet rendering
    pub fn snippet(&self, span: SourceSpan) -> Option<&str> {
        let file = self.files.get(&span.file)?;
        file.text
            .get(span.start.byte_offset as usize..span.end.byte_offset as usize)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_resolution() {
        let mut map = SourceMap::new();
        let id = map.add_file("target.cc", "int* f();\nint x;\n");

        let file = map.file(id).unwrap();
        assert_eq!(file.position_of(0), SourcePosition::new(1, 1, 0));
        assert_eq!(file.position_of(5), SourcePosition::new(1, 6, 5));
        assert_eq!(file.position_of(10), SourcePosition::new(2, 1, 10));
        assert_eq!(file.line_count(), 2);
    }

    #[test]
    fn line_text_strips_terminators() {
        let mut map = SourceMap::new();
        let id = map.add_file("a.cc", "first\r\nsecond\n");
        let file = map.file(id).unwrap();
        assert_eq!(file.line_text(1), Some("first"));
        assert_eq!(file.line_text(2), Some("second"));
        assert_eq!(file.line_text(3), None);
    }

    #[test]
    fn span_cover_and_snippet() {
        let mut map = SourceMap::new();
        let id = map.add_file("a.cc", "return &local;");
        let a = map.span(id, 0, 6).unwrap();
        let b = map.span(id, 7, 13).unwrap();
        let covered = a.cover(b);
        assert_eq!(map.snippet(covered), Some("return &local"));
        assert_eq!(covered.len(), 13);
    }

    #[test]
    fn files_get_distinct_ids() {
        let mut map = SourceMap::new();
        let a = map.add_file("a.cc", "");
        let b = map.add_file("b.cc", "");
        assert_ne!(a, b);
        assert_eq!(map.file_name(b), Some("b.cc"));
        assert_eq!(map.len(), 2);
    }
}

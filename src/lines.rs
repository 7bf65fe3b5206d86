use std::fmt;

/// A 1-based line and byte column.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Position { pub line: u32, pub column: u32 }

/// Maps byte offsets to physical source positions.
pub struct LineMap { starts: Vec<usize> }

impl LineMap {
    pub fn new(src: &[u8]) -> LineMap {
        let mut starts = vec![0];
        starts.extend(src.iter().enumerate().filter(|&(_, &b)| b == b'\n').map(|(at, _)| at + 1));
        LineMap { starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let line = self.starts.partition_point(|&start| start <= offset) - 1;
        let column = offset - self.starts[line];
        Position { line: line as u32 + 1, column: column as u32 + 1 }
    }}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

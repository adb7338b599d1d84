//! Coordinate mappings between generated and original lines.

use std::fmt::Write as _;

/// One generated line mapped back to its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapping {
    pub generated_line: u32,
    pub original_line: u32,
    pub original_column: u32,
    pub source_path: String,
}

/// Receiver of coordinate mappings.
pub trait SourceMapSink {
    fn add_mapping(&mut self, mapping: SourceMapping);
}

/// Mappings collected in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    mappings: Vec<SourceMapping>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mappings(&self) -> &[SourceMapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Original position of `generated_line`, if it was mapped.
    pub fn original(&self, generated_line: u32) -> Option<&SourceMapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.generated_line == generated_line)
    }

    /// One `generated:original:column:path` line per mapping.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for m in &self.mappings {
            let _ = writeln!(
                out,
                "{}:{}:{}:{}",
                m.generated_line, m.original_line, m.original_column, m.source_path
            );
        }
        out
    }
}

impl SourceMapSink for SourceMap {
    fn add_mapping(&mut self, mapping: SourceMapping) {
        self.mappings.push(mapping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(generated_line: u32, original_line: u32) -> SourceMapping {
        SourceMapping {
            generated_line,
            original_line,
            original_column: 5,
            source_path: "src/a.kn".into(),
        }
    }

    #[test]
    fn collects_in_order() {
        let mut map = SourceMap::new();
        map.add_mapping(mapping(1, 10));
        map.add_mapping(mapping(2, 12));
        assert_eq!(map.len(), 2);
        assert_eq!(map.original(2).unwrap().original_line, 12);
        assert!(map.original(3).is_none());
    }

    #[test]
    fn render_lines() {
        let mut map = SourceMap::new();
        map.add_mapping(mapping(1, 10));
        map.add_mapping(mapping(2, 12));
        assert_eq!(map.render(), "1:10:5:src/a.kn\n2:12:5:src/a.kn\n");
    }
}

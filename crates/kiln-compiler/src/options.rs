//! Code generation options.

use crate::bytecode::DumpOptions;

/// Settings for compiling one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Name recorded as the source of the outermost prototype.
    pub chunk_name: String,
    /// Path written into source mappings.
    pub source_path: String,
    /// Leave debug information out of dumped chunks.
    pub strip_debug: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            chunk_name: "=?".to_string(),
            source_path: String::new(),
            strip_debug: false,
        }
    }
}

impl CodegenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a file on disk: `@path` as chunk name, `path` in mappings.
    pub fn for_file(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            chunk_name: format!("@{path}"),
            source_path: path,
            strip_debug: false,
        }
    }

    pub fn with_chunk_name(mut self, chunk_name: impl Into<String>) -> Self {
        self.chunk_name = chunk_name.into();
        self
    }

    pub fn with_source_path(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = source_path.into();
        self
    }

    pub fn with_strip_debug(mut self, strip_debug: bool) -> Self {
        self.strip_debug = strip_debug;
        self
    }

    pub fn dump_options(&self) -> DumpOptions {
        DumpOptions {
            strip: self.strip_debug,
        }
    }
}

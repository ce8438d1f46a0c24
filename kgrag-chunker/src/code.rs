//! Structural, boundary-aware code chunker (§4.3).
//!
//! Implements the same `ChunkingStrategy` trait as the prose chunker but
//! splits on structural boundaries instead of sentences, reusing
//! `encoding_rs` for multi-encoding input the way the rest of the
//! workspace's text-handling code does.

use crate::{estimate_tokens, ChunkingConfig, ChunkingStrategy, RawChunk};
use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::types::{CodeMetadata, ScopeType};

/// Extensions rejected outright: compiled artifacts, native libraries,
/// executables, archives.
const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "o", "obj", "a", "lib", "bin", "class", "jar", "war", "zip",
    "tar", "gz", "bz2", "7z", "rar", "png", "jpg", "jpeg", "gif", "ico", "pdf", "wasm",
];

/// Magic byte headers for common binary formats, checked regardless of
/// extension.
const MAGIC_HEADERS: &[&[u8]] = &[
    b"\x7fELF",     // ELF
    b"MZ",          // PE/COFF
    b"\xCA\xFE\xBA\xBE", // Mach-O / Java class (shared prefix, both binary)
    b"PK\x03\x04",  // ZIP-based archives
    b"\x89PNG",
];

/// Extension -> language name, at least 15 languages recognized.
fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "html" | "htm" => "html",
        _ => return None,
    })
}

/// Languages whose block boundaries are brace-delimited rather than
/// indentation-delimited; affects whether a blank line after dedent counts
/// as a statement boundary.
fn is_brace_delimited(language: &str) -> bool {
    !matches!(language, "python" | "yaml")
}

#[derive(Debug)]
pub struct DetectedEncoding {
    pub text: String,
}

/// Detects encoding by BOM first, then UTF-8 validation, then falls back
/// to a single-byte Latin-1 decode that never fails (every byte maps to a
/// code point).
#[must_use]
pub fn decode_text(bytes: &[u8]) -> DetectedEncoding {
    if let Some(stripped) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return DetectedEncoding {
            text: String::from_utf8_lossy(stripped).into_owned(),
        };
    }
    if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        let (cow, _, _) = encoding_rs::UTF_16LE.decode(bytes);
        return DetectedEncoding {
            text: cow.into_owned(),
        };
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return DetectedEncoding {
            text: s.to_string(),
        };
    }
    let (cow, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    DetectedEncoding {
        text: cow.into_owned(),
    }
}

/// Rejects binary input by extension blacklist, magic-bytes header, or
/// NUL-byte frequency > 10% in the first 8 KiB. Rejection is a failure
/// (`ErrorKind::InvalidInput`), never a silent skip.
pub fn reject_if_binary(file_name: &str, bytes: &[u8]) -> Result<()> {
    if let Some(ext) = file_name.rsplit('.').next() {
        if BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return Err(KgError::Chunking {
                message: format!("rejected binary extension: .{ext}"),
            });
        }
    }

    for magic in MAGIC_HEADERS {
        if bytes.starts_with(magic) {
            return Err(KgError::Chunking {
                message: "rejected file with binary magic-bytes header".to_string(),
            });
        }
    }

    let window = &bytes[..bytes.len().min(8192)];
    if !window.is_empty() {
        let nul_count = window.iter().filter(|&&b| b == 0).count();
        if nul_count * 100 / window.len() > 10 {
            return Err(KgError::Chunking {
                message: "rejected file: NUL-byte frequency exceeds 10% in first 8KB".to_string(),
            });
        }
    }

    Ok(())
}

/// Scans a single line's bracket/quote balance so the chunker never closes
/// a chunk inside a string literal or with an unbalanced bracket. Returns
/// `(net bracket delta, still inside a string at end of line)`.
fn scan_line_balance(line: &str, mut in_string: bool) -> (i32, bool) {
    let mut brackets = 0i32;
    let mut chars = line.chars().peekable();
    let mut quote_char = '"';
    while let Some(c) = chars.next() {
        if in_string {
            if c == '\\' {
                chars.next();
                continue;
            }
            if c == quote_char {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = true;
                quote_char = c;
            }
            '{' | '[' | '(' => brackets += 1,
            '}' | ']' | ')' => brackets -= 1,
            _ => {}
        }
    }
    (brackets, in_string)
}

fn is_statement_boundary(line: &str, bracket_depth: i32, in_string: bool, brace_delimited: bool) -> bool {
    if in_string || bracket_depth > 0 {
        return false;
    }
    let trimmed = line.trim_end();
    if brace_delimited {
        trimmed.ends_with(';') || trimmed.ends_with('}') || trimmed.is_empty()
    } else {
        trimmed.is_empty() || !line.starts_with(' ') && !line.starts_with('\t')
    }
}

fn detect_scope(lines: &[&str], up_to: usize) -> (Option<String>, ScopeType) {
    for idx in (0..up_to).rev() {
        let trimmed = lines[idx].trim_start();
        if let Some(name) = trimmed
            .strip_prefix("fn ")
            .or_else(|| trimmed.strip_prefix("def "))
            .or_else(|| trimmed.strip_prefix("function "))
        {
            let name = name.split(['(', ' ', ':']).next().unwrap_or("").to_string();
            if !name.is_empty() {
                return (Some(name), ScopeType::Function);
            }
        }
        if let Some(name) = trimmed
            .strip_prefix("class ")
            .or_else(|| trimmed.strip_prefix("struct "))
        {
            let name = name.split(['{', ' ', ':', '(']).next().unwrap_or("").to_string();
            if !name.is_empty() {
                return (Some(name), ScopeType::Class);
            }
        }
    }
    (None, ScopeType::File)
}

/// Structural chunker: walks the file at line granularity, accumulating
/// lines into a chunk and closing it at the nearest statement boundary
/// that keeps the chunk within `chunk_size` tokens. Falls back to the
/// last statement terminator seen, then a hard line cut, if no boundary
/// is reachable.
pub struct CodeChunker {
    pub file_name: String,
}

impl CodeChunker {
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    fn detect_language(&self) -> String {
        self.file_name
            .rsplit('.')
            .next()
            .and_then(language_for_extension)
            .unwrap_or("text")
            .to_string()
    }
}

#[async_trait]
impl ChunkingStrategy for CodeChunker {
    async fn chunk(&self, text: &str, config: &ChunkingConfig) -> Result<Vec<RawChunk>> {
        reject_if_binary(&self.file_name, text.as_bytes())?;

        let language = self.detect_language();
        let brace_delimited = is_brace_delimited(&language);
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut chunk_start_line = 0usize;
        let mut in_string = false;
        let mut bracket_depth = 0i32;
        let mut last_boundary_line: Option<usize> = None;

        let mut line_idx = 0usize;
        while line_idx < lines.len() {
            let line = lines[line_idx];
            let (delta, still_in_string) = scan_line_balance(line, in_string);
            bracket_depth += delta;
            in_string = still_in_string;

            let accumulated = lines[chunk_start_line..=line_idx].join("\n");
            let at_boundary =
                is_statement_boundary(line, bracket_depth, in_string, brace_delimited);
            if at_boundary {
                last_boundary_line = Some(line_idx);
            }

            let within_budget = estimate_tokens(&accumulated) <= config.chunk_size;
            let is_last_line = line_idx == lines.len() - 1;

            if !within_budget || is_last_line {
                let close_at = if within_budget {
                    line_idx
                } else if at_boundary {
                    line_idx
                } else if let Some(boundary) = last_boundary_line {
                    boundary
                } else {
                    line_idx.max(chunk_start_line) // hard cut
                };

                let (scope, scope_type) = detect_scope(&lines, chunk_start_line);
                let content = lines[chunk_start_line..=close_at].join("\n");
                chunks.push(RawChunk {
                    token_count: estimate_tokens(&content),
                    code_metadata: Some(CodeMetadata {
                        language: language.clone(),
                        start_line: chunk_start_line + 1,
                        end_line: close_at + 1,
                        containing_scope: scope,
                        scope_type,
                    }),
                    content,
                });

                chunk_start_line = close_at + 1;
                last_boundary_line = None;
                bracket_depth = 0;
                in_string = false;
                line_idx = chunk_start_line;
                continue;
            }

            line_idx += 1;
        }

        Ok(chunks)
    }

    fn name(&self) -> &str {
        "code_structural"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_binary_extension() {
        let chunker = CodeChunker::new("lib.so");
        let err = chunker
            .chunk("not really code", &ChunkingConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn rejects_nul_heavy_input() {
        let chunker = CodeChunker::new("data.rs");
        let mut bytes = vec![0u8; 9000];
        for (i, b) in bytes.iter_mut().enumerate() {
            if i % 3 == 0 {
                *b = b'a';
            }
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let err = chunker
            .chunk(&text, &ChunkingConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn chunks_small_rust_function() {
        let chunker = CodeChunker::new("lib.rs");
        let src = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = chunker.chunk(src, &ChunkingConfig::default()).await.unwrap();
        assert_eq!(chunks.len(), 1);
        let meta = chunks[0].code_metadata.as_ref().unwrap();
        assert_eq!(meta.language, "rust");
    }

    #[test]
    fn decode_strips_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"hello");
        let decoded = decode_text(&bytes);
        assert_eq!(decoded.text, "hello");
    }
}

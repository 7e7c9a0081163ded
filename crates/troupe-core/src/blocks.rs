// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fenced-block extraction from agent output.
//!
//! Two block kinds are recognised, both written as triple-backtick fences:
//! a file block opens with `file:<path>` plus an optional `append` or
//! `overwrite` token and closes with an `endfile` fence; a shell block opens
//! with `shell` plus optional `cwd=`, `timeout=` and `env:KEY=VAL` tokens
//! and closes with an `endshell` fence.
//!
//! Both scanners tolerate missing closing fences (falling back to the next
//! opener or end of text) and never fail: malformed blocks are skipped.

use std::collections::BTreeMap;

const FILE_FENCE_START: &str = "```file:";
const FILE_FENCE_END: &str = "```endfile";
const FILE_FENCE_ALT_END: &str = "```";

const SHELL_FENCE_START: &str = "```shell";
const SHELL_FENCE_END: &str = "```endshell";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub mode: WriteMode,
    pub content: String,
}

impl FileBlock {
    /// Render back to fenced form.  `parse(render(b)) == [b]` for any block
    /// whose body carries no fence markers of its own.
    pub fn render(&self) -> String {
        let mode = match self.mode {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        };
        format!(
            "{FILE_FENCE_START}{} {mode}\n{}\n{FILE_FENCE_END}\n",
            self.path, self.content
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellBlock {
    pub command: String,
    pub cwd: Option<String>,
    pub timeout: Option<u64>,
    pub env: BTreeMap<String, String>,
}

/// Extract file blocks.  Blocks with an empty header or empty path are
/// skipped; the body is trimmed.
pub fn extract_file_blocks(text: &str) -> Vec<FileBlock> {
    let mut blocks = Vec::new();
    let mut index = 0;
    while index < text.len() {
        let Some(start_rel) = text[index..].find(FILE_FENCE_START) else {
            break;
        };
        let start = index + start_rel;
        let header_start = start + FILE_FENCE_START.len();
        let Some(header_end_rel) = text[header_start..].find('\n') else {
            break;
        };
        let header = text[header_start..header_start + header_end_rel].trim();
        let body_start = header_start + header_end_rel + 1;

        let body;
        match text[body_start..].find(FILE_FENCE_END) {
            Some(end_rel) => {
                let end = body_start + end_rel;
                body = &text[body_start..end];
                index = match text[end..].find('\n') {
                    Some(nl) => end + nl + 1,
                    None => end + FILE_FENCE_END.len(),
                };
            }
            None => {
                // No ```endfile: cut at the nearest bare fence or the next
                // file block, whichever comes first; otherwise take the rest.
                let alt_end = text[body_start..].find(FILE_FENCE_ALT_END);
                let next_start = text[body_start..].find(FILE_FENCE_START);
                match (alt_end, next_start) {
                    (None, None) => {
                        body = &text[body_start..];
                        index = text.len();
                    }
                    (alt, next) => {
                        let cutoff_rel = [alt, next].into_iter().flatten().min().unwrap_or(0);
                        let cutoff = body_start + cutoff_rel;
                        body = &text[body_start..cutoff];
                        index = if next == Some(cutoff_rel) {
                            cutoff
                        } else {
                            cutoff + FILE_FENCE_ALT_END.len()
                        };
                    }
                }
            }
        }

        if header.is_empty() {
            continue;
        }
        let mut segments = header.split_whitespace();
        let Some(path) = segments.next() else {
            continue;
        };
        let mut mode = WriteMode::Overwrite;
        for token in segments {
            match token.to_lowercase().as_str() {
                "append" => mode = WriteMode::Append,
                "overwrite" => mode = WriteMode::Overwrite,
                _ => {}
            }
        }
        blocks.push(FileBlock {
            path: path.to_string(),
            mode,
            content: body.trim().to_string(),
        });
    }
    blocks
}

/// Extract shell blocks.  Header tokens (any order, all optional):
/// `cwd=<dir>`, `timeout=<positive int>`, `env:KEY=VAL`.  Blocks with an
/// empty command are skipped.
pub fn extract_shell_blocks(text: &str) -> Vec<ShellBlock> {
    let mut blocks = Vec::new();
    let mut index = 0;
    while index < text.len() {
        let Some(start_rel) = text[index..].find(SHELL_FENCE_START) else {
            break;
        };
        let start = index + start_rel;
        let header_start = start + SHELL_FENCE_START.len();
        let Some(header_end_rel) = text[header_start..].find('\n') else {
            break;
        };
        let header = text[header_start..header_start + header_end_rel].trim();
        let body_start = header_start + header_end_rel + 1;

        let body;
        match text[body_start..].find(SHELL_FENCE_END) {
            Some(end_rel) => {
                let end = body_start + end_rel;
                body = &text[body_start..end];
                index = match text[end..].find('\n') {
                    Some(nl) => end + nl + 1,
                    None => end + SHELL_FENCE_END.len(),
                };
            }
            None => match text[body_start..].find(SHELL_FENCE_START) {
                Some(next_rel) => {
                    body = &text[body_start..body_start + next_rel];
                    index = body_start + next_rel;
                }
                None => {
                    body = &text[body_start..];
                    index = text.len();
                }
            },
        }

        let command = body.trim();
        if command.is_empty() {
            continue;
        }
        let mut block = parse_shell_header(header);
        block.command = command.to_string();
        blocks.push(block);
    }
    blocks
}

fn parse_shell_header(header: &str) -> ShellBlock {
    let mut block = ShellBlock::default();
    for token in header.split_whitespace() {
        if let Some(value) = token.strip_prefix("cwd=") {
            let value = value.trim();
            block.cwd = (!value.is_empty()).then(|| value.to_string());
        } else if let Some(value) = token.strip_prefix("timeout=") {
            if let Ok(parsed) = value.trim().parse::<u64>() {
                if parsed > 0 {
                    block.timeout = Some(parsed);
                }
            }
        } else if let Some(pair) = token.strip_prefix("env:") {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if !key.is_empty() {
                block.env.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    block
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

//! Context assembly: prompt loading, stable-prefix caching, rollups
//!
//! The prompt source is either inline text or the prompt file, re-read on
//! every `get_prompt()` so edits between iterations are picked up. Oversize
//! prompts are optimized: the stable Markdown heading block at the top is
//! written once to a cache file and replaced by a sentinel comment, and the
//! remaining tail is summarized down to the size limit if needed.
//!
//! Single-writer by design: only the driver touches this between
//! iterations, so there is no internal locking.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// How many recent-output entries are spliced into the prompt.
const DYNAMIC_CONTEXT_SPLICE: usize = 3;
/// How many error entries are spliced into the prompt.
const ERROR_SPLICE: usize = 2;
/// Retention caps for the rollups.
const DYNAMIC_CONTEXT_KEEP: usize = 5;
const ERROR_HISTORY_KEEP: usize = 5;
const SUCCESS_PATTERNS_KEEP: usize = 3;

/// Prompt context assembler.
pub struct ContextManager {
    prompt_file: PathBuf,
    prompt_text: Option<String>,
    max_context_size: usize,
    cache_dir: PathBuf,
    stable_prefix: Option<String>,
    dynamic_context: Vec<String>,
    error_history: Vec<String>,
    success_patterns: Vec<String>,
}

impl ContextManager {
    pub fn new(
        prompt_file: impl Into<PathBuf>,
        prompt_text: Option<String>,
        max_context_size: usize,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(err) = std::fs::create_dir_all(&cache_dir) {
            warn!(path = %cache_dir.display(), %err, "failed to create context cache dir");
        }

        let mut manager = Self {
            prompt_file: prompt_file.into(),
            prompt_text,
            max_context_size,
            cache_dir,
            stable_prefix: None,
            dynamic_context: Vec::new(),
            error_history: Vec::new(),
            success_patterns: Vec::new(),
        };
        manager.load_stable_prefix();
        manager
    }

    /// Extract the contiguous Markdown heading block at the top of the
    /// prompt: leading `#` lines plus the blank lines between them.
    fn load_stable_prefix(&mut self) {
        let Some(content) = self.read_source() else {
            return;
        };

        let mut stable_lines: Vec<&str> = Vec::new();
        for line in content.lines() {
            if line.starts_with('#') {
                stable_lines.push(line);
            } else if !stable_lines.is_empty() && line.trim().is_empty() {
                stable_lines.push(line);
            } else if !stable_lines.is_empty() {
                break;
            }
        }

        if !stable_lines.is_empty() {
            let prefix = stable_lines.join("\n");
            debug!(chars = prefix.chars().count(), "extracted stable prefix");
            self.stable_prefix = Some(prefix);
        }
    }

    fn read_source(&self) -> Option<String> {
        if let Some(text) = &self.prompt_text {
            return Some(text.clone());
        }
        match std::fs::read_to_string(&self.prompt_file) {
            Ok(content) => Some(content),
            Err(err) => {
                debug!(path = %self.prompt_file.display(), %err, "prompt source unavailable");
                None
            }
        }
    }

    /// Assemble the prompt for the next iteration.
    ///
    /// Returns an empty string when neither source exists; callers treat
    /// that as "nothing to do", never as an error.
    pub fn get_prompt(&mut self) -> String {
        let Some(base) = self.read_source() else {
            return String::new();
        };

        if base.chars().count() > self.max_context_size {
            return self.optimize_prompt(&base);
        }

        let mut prompt = base;

        if !self.dynamic_context.is_empty() {
            let recent: Vec<_> = tail(&self.dynamic_context, DYNAMIC_CONTEXT_SPLICE);
            let addition = format!("\n\n## Previous Context\n{}", recent.join("\n"));
            if prompt.chars().count() + addition.chars().count() < self.max_context_size {
                prompt.push_str(&addition);
            }
        }

        if !self.error_history.is_empty() {
            let recent: Vec<_> = tail(&self.error_history, ERROR_SPLICE);
            let addition = format!("\n\n## Recent Errors to Avoid\n{}", recent.join("\n"));
            if prompt.chars().count() + addition.chars().count() < self.max_context_size {
                prompt.push_str(&addition);
            }
        }

        prompt
    }

    /// Shrink an oversize prompt: cache the stable prefix behind a sentinel
    /// and summarize the tail if it still exceeds the limit.
    fn optimize_prompt(&mut self, content: &str) -> String {
        debug!("optimizing oversize prompt");

        if let Some(prefix) = self.stable_prefix.clone().filter(|p| !p.is_empty()) {
            let hash = prefix_hash(&prefix);
            let cache_file = self.cache_dir.join(format!("prefix_{hash}.txt"));
            if !cache_file.exists() {
                if let Err(err) = std::fs::write(&cache_file, &prefix) {
                    warn!(path = %cache_file.display(), %err, "failed to cache stable prefix");
                }
            }

            let tail_part: String = match content.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.to_string(),
                None => content.chars().skip(prefix.chars().count()).collect(),
            };

            let tail_part = if tail_part.chars().count() > self.max_context_size.saturating_sub(100)
            {
                self.summarize_content(&tail_part)
            } else {
                tail_part
            };

            return format!("<!-- Using cached prefix {hash} -->\n{tail_part}");
        }

        self.summarize_content(content)
    }

    /// Keep headings, IMPORTANT/ERROR lines, and unchecked tasks; truncate
    /// with an ellipsis comment if the summary still exceeds the limit.
    fn summarize_content(&self, content: &str) -> String {
        let important: Vec<&str> = content
            .lines()
            .filter(|line| {
                line.starts_with('#')
                    || line.contains("IMPORTANT")
                    || line.contains("ERROR")
                    || line.starts_with("- [ ]")
            })
            .collect();

        let summary = important.join("\n");
        if summary.chars().count() > self.max_context_size {
            let truncated: String = summary
                .chars()
                .take(self.max_context_size.saturating_sub(100))
                .collect();
            return format!("{truncated}\n<!-- Content truncated -->");
        }
        summary
    }

    /// Fold one agent output into the rollups.
    pub fn update_context(&mut self, output: &str) {
        let lower = output.to_lowercase();

        if lower.contains("error") {
            let error_lines: Vec<String> = output
                .lines()
                .filter(|line| line.to_lowercase().contains("error"))
                .take(2)
                .map(str::to_string)
                .collect();
            self.error_history.extend(error_lines);
            trim_front(&mut self.error_history, ERROR_HISTORY_KEEP);
        }

        if lower.contains("success") || lower.contains("complete") {
            let success_lines: Vec<String> = output
                .lines()
                .filter(|line| {
                    let l = line.to_lowercase();
                    l.contains("success") || l.contains("complete") || l.contains("done")
                })
                .take(1)
                .map(str::to_string)
                .collect();
            self.success_patterns.extend(success_lines);
            trim_front(&mut self.success_patterns, SUCCESS_PATTERNS_KEEP);
        }

        let entry = if output.chars().count() > 500 {
            let head: String = output.chars().take(200).collect();
            let tail_chars: Vec<char> = output.chars().collect();
            let tail: String = tail_chars[tail_chars.len() - 200..].iter().collect();
            format!("{head}...{tail}")
        } else {
            output.to_string()
        };
        self.dynamic_context.push(entry);
        trim_front(&mut self.dynamic_context, DYNAMIC_CONTEXT_KEEP);
    }

    pub fn add_error_feedback(&mut self, error: &str) {
        self.error_history.push(format!("Error: {error}"));
        trim_front(&mut self.error_history, ERROR_HISTORY_KEEP);
    }

    /// Clear dynamic state. The stable prefix is derived from the source,
    /// not the run, so it survives.
    pub fn reset(&mut self) {
        self.dynamic_context.clear();
        self.error_history.clear();
        self.success_patterns.clear();
        debug!("context reset");
    }

    pub fn stats(&self) -> serde_json::Value {
        let cache_files = std::fs::read_dir(&self.cache_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0);
        serde_json::json!({
            "stable_prefix_size": self
                .stable_prefix
                .as_ref()
                .map(|p| p.chars().count())
                .unwrap_or(0),
            "dynamic_context_items": self.dynamic_context.len(),
            "error_history_items": self.error_history.len(),
            "success_patterns": self.success_patterns.len(),
            "cache_files": cache_files,
        })
    }

    pub fn stable_prefix(&self) -> Option<&str> {
        self.stable_prefix.as_deref()
    }
}

fn tail(items: &[String], count: usize) -> Vec<String> {
    let skip = items.len().saturating_sub(count);
    items[skip..].to_vec()
}

fn trim_front(items: &mut Vec<String>, keep: usize) {
    if items.len() > keep {
        let excess = items.len() - keep;
        items.drain(..excess);
    }
}

fn prefix_hash(prefix: &str) -> String {
    let digest = Sha256::digest(prefix.as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

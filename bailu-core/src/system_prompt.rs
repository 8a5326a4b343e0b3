//! System Prompt Assembly
//!
//! Builds the system message: the base prompt, an appendix documenting
//! the registered tools and the action-block grammar, and an advisory
//! memory section (recently touched files, last directory listing,
//! workspace hints). Both injected sections sit between stable marker
//! lines so refreshing them replaces rather than double-appends.

use std::collections::VecDeque;

use crate::types::{ToolCall, ToolDefinition, ToolResult};

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Bailu, a coding assistant working inside the user's project \
directory. You inspect files, propose edits, and run commands through \
the tools documented below. Keep answers short and concrete. When a \
task needs several steps, take them one tool call at a time and read \
the results before continuing.";

const TOOLS_BEGIN: &str = "<!-- tools:begin -->";
const TOOLS_END: &str = "<!-- tools:end -->";
const MEMORY_BEGIN: &str = "<!-- memory:begin -->";
const MEMORY_END: &str = "<!-- memory:end -->";

/// Recently touched files the memory section keeps.
const MEMORY_MAX_FILES: usize = 20;

/// Characters of the last directory listing carried in the memory section.
const MEMORY_LISTING_CAP: usize = 2000;

// ---------------------------------------------------------------------------
// Tool documentation appendix
// ---------------------------------------------------------------------------

/// Replace (or append) the tool-documentation appendix in a system
/// prompt. Calling this twice with the same tools is a no-op.
pub fn inject_tool_docs(system: &str, tools: &[&ToolDefinition]) -> String {
    let appendix = format!(
        "{}\n{}\n{}",
        TOOLS_BEGIN,
        render_tool_docs(tools),
        TOOLS_END
    );
    replace_section(system, TOOLS_BEGIN, TOOLS_END, &appendix)
}

fn render_tool_docs(tools: &[&ToolDefinition]) -> String {
    let mut out = String::from(
        "## Tools\n\n\
         To use a tool, emit an action block in your reply:\n\n\
         <action>\n\
         <invoke tool=\"TOOL_NAME\">\n\
         <param name=\"PARAM\">VALUE</param>\n\
         </invoke>\n\
         </action>\n\n\
         Several <invoke> elements may share one block; they run in order. \
         Wrap multi-line values in <![CDATA[ ... ]]> to preserve them \
         exactly. Tool results come back in the next user message.\n\n\
         Available tools:\n",
    );
    for tool in tools {
        out.push_str(&format!("\n### {}\n{}\n", tool.name, tool.description));
        for p in &tool.parameters {
            let required = if p.required { "required" } else { "optional" };
            let default = p
                .default
                .as_ref()
                .map(|d| format!(", default {}", d))
                .unwrap_or_default();
            out.push_str(&format!(
                "- {} ({}, {}{}): {}\n",
                p.name,
                p.param_type.as_str(),
                required,
                default,
                p.description
            ));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Memory section
// ---------------------------------------------------------------------------

/// Advisory running summary of what the conversation has touched.
/// Plain text for the model, not structured state.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    touched_files: VecDeque<String>,
    last_listing: Option<String>,
    /// Advisory hints from the workspace configuration file.
    pub hints: Vec<String>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the effect of a completed tool call.
    pub fn note_call(&mut self, call: &ToolCall, result: &ToolResult) {
        if !result.success {
            return;
        }
        match call.tool.as_str() {
            "read_file" | "write_file" | "apply_diff" => {
                if let Some(path) = call.str_param("path") {
                    self.note_file(path);
                }
            }
            "list_directory" => {
                if let Some(listing) = &result.output {
                    let mut text = listing.clone();
                    text.truncate(MEMORY_LISTING_CAP);
                    self.last_listing = Some(text);
                }
            }
            _ => {}
        }
    }

    fn note_file(&mut self, path: &str) {
        self.touched_files.retain(|p| p != path);
        self.touched_files.push_back(path.to_string());
        while self.touched_files.len() > MEMORY_MAX_FILES {
            self.touched_files.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.touched_files.is_empty() && self.last_listing.is_none() && self.hints.is_empty()
    }

    /// Files touched so far, oldest first.
    pub fn touched_files(&self) -> Vec<String> {
        self.touched_files.iter().cloned().collect()
    }

    /// Seed the touched-file list, e.g. from a restored session.
    pub fn seed_files(&mut self, files: &[String]) {
        for file in files {
            self.note_file(file);
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("## Session notes\n");
        if !self.hints.is_empty() {
            out.push_str("\nWorkspace hints:\n");
            for hint in &self.hints {
                out.push_str(&format!("- {}\n", hint));
            }
        }
        if !self.touched_files.is_empty() {
            out.push_str("\nFiles touched this session (oldest first):\n");
            for path in &self.touched_files {
                out.push_str(&format!("- {}\n", path));
            }
        }
        if let Some(listing) = &self.last_listing {
            out.push_str("\nLast directory listing:\n");
            out.push_str(listing);
            out.push('\n');
        }
        out
    }
}

/// Replace (or append, or remove) the memory section of a system prompt.
pub fn inject_memory(system: &str, memory: &ConversationMemory) -> String {
    if memory.is_empty() {
        return remove_section(system, MEMORY_BEGIN, MEMORY_END);
    }
    let section = format!("{}\n{}\n{}", MEMORY_BEGIN, memory.render(), MEMORY_END);
    replace_section(system, MEMORY_BEGIN, MEMORY_END, &section)
}

// ---------------------------------------------------------------------------
// Marker plumbing
// ---------------------------------------------------------------------------

fn replace_section(text: &str, begin: &str, end: &str, replacement: &str) -> String {
    match section_span(text, begin, end) {
        Some((start, stop)) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..start]);
            out.push_str(replacement);
            out.push_str(&text[stop..]);
            out
        }
        None => format!("{}\n\n{}", text.trim_end(), replacement),
    }
}

fn remove_section(text: &str, begin: &str, end: &str) -> String {
    match section_span(text, begin, end) {
        Some((start, stop)) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(text[..start].trim_end());
            out.push_str(&text[stop..]);
            out
        }
        None => text.to_string(),
    }
}

fn section_span(text: &str, begin: &str, end: &str) -> Option<(usize, usize)> {
    let start = text.find(begin)?;
    let stop = text[start..].find(end).map(|i| start + i + end.len())?;
    Some((start, stop))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

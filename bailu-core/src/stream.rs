//! Streaming Action Filter
//!
//! Suppresses `<action>…</action>` regions in the visible token stream
//! while letting everything else through as it arrives. A small state
//! machine fed chunk-by-chunk; tags split across chunk boundaries are
//! buffered, and false-positive prefixes are flushed back as visible
//! text. No regex runs on incomplete buffers.

use std::collections::VecDeque;

const OPEN_TAG: &str = "<action>";
const CLOSE_TAG: &str = "</action>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    /// Matched a proper prefix of `<action>`.
    PossiblyEntering,
    Inside,
    /// Matched a proper prefix of `</action>`.
    PossiblyLeaving,
}

/// Chunk-fed filter that withholds action-block content from display.
#[derive(Debug)]
pub struct ActionFilter {
    state: State,
    /// Partial tag characters held while matching.
    pending: String,
}

impl ActionFilter {
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            pending: String::new(),
        }
    }

    /// Feed one chunk; returns the portion that should be displayed.
    pub fn feed(&mut self, chunk: &str) -> String {
        let mut visible = String::new();
        let mut queue: VecDeque<char> = chunk.chars().collect();

        while let Some(c) = queue.pop_front() {
            match self.state {
                State::Outside => {
                    if c == '<' {
                        self.state = State::PossiblyEntering;
                        self.pending.clear();
                        self.pending.push(c);
                    } else {
                        visible.push(c);
                    }
                }
                State::PossiblyEntering => {
                    self.pending.push(c);
                    if self.pending == OPEN_TAG {
                        self.state = State::Inside;
                        self.pending.clear();
                    } else if !OPEN_TAG.starts_with(self.pending.as_str()) {
                        // Not a tag after all: the first buffered char is
                        // plain text; rescan the rest.
                        let mut chars = self.pending.chars();
                        if let Some(first) = chars.next() {
                            visible.push(first);
                        }
                        let rest: String = chars.collect();
                        for rc in rest.chars().rev() {
                            queue.push_front(rc);
                        }
                        self.pending.clear();
                        self.state = State::Outside;
                    }
                }
                State::Inside => {
                    if c == '<' {
                        self.state = State::PossiblyLeaving;
                        self.pending.clear();
                        self.pending.push(c);
                    }
                    // Action content is withheld.
                }
                State::PossiblyLeaving => {
                    self.pending.push(c);
                    if self.pending == CLOSE_TAG {
                        self.state = State::Outside;
                        self.pending.clear();
                    } else if !CLOSE_TAG.starts_with(self.pending.as_str()) {
                        // Still inside the block: drop the first buffered
                        // char as action content, rescan the rest.
                        let rest: String = self.pending.chars().skip(1).collect();
                        for rc in rest.chars().rev() {
                            queue.push_front(rc);
                        }
                        self.pending.clear();
                        self.state = State::Inside;
                    }
                }
            }
        }

        visible
    }

    /// Signal end of stream. A dangling open-tag prefix was plain text
    /// after all; content inside an unterminated block stays withheld.
    pub fn finish(&mut self) -> String {
        let out = match self.state {
            State::PossiblyEntering => std::mem::take(&mut self.pending),
            _ => String::new(),
        };
        self.state = State::Outside;
        self.pending.clear();
        out
    }
}

impl Default for ActionFilter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Prompt-detection state machine over the cleaned output stream.
//!
//! The proxy feeds every output chunk through `note_output` after ANSI and
//! control stripping; the classifier keeps a bounded rolling window of
//! recent text and latches AwaitingInput when a tool's blocking-prompt
//! pattern appears. User input while latched opens a bounded resume probe
//! that unlatches on resume-pattern evidence or on sustained output volume.
//! Underneath the latch a coarse recency timer splits Running from Idle.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use vibebar_protocol::Tool;

/// Rolling window capacity, in characters.
pub const WINDOW_CAPACITY: usize = 512;

/// Coarse state the proxy persists. The latch always overrides the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermState {
    Running,
    Idle,
    AwaitingInput,
}

/// Empirically chosen thresholds. Tunable: the probe values were calibrated
/// against the original tool set and may need adjustment for new tools.
#[derive(Debug, Clone, Copy)]
pub struct PromptTuning {
    /// How long a resume probe stays open after user input.
    pub probe_window: Duration,
    /// Output volume that, by itself, counts as resumed work once the probe
    /// window has elapsed.
    pub probe_min_output: usize,
    /// Output younger than this reads as Running on the coarse timer.
    pub running_threshold: Duration,
}

impl Default for PromptTuning {
    fn default() -> Self {
        Self {
            probe_window: Duration::from_millis(2_500),
            probe_min_output: 80,
            running_threshold: Duration::from_millis(800),
        }
    }
}

/// Await/resume regex families for one tool.
pub struct ToolPatterns {
    await_re: Regex,
    resume_re: Regex,
}

impl ToolPatterns {
    fn new(await_src: &str, resume_src: &str) -> Self {
        Self {
            await_re: Regex::new(await_src).unwrap(),
            resume_re: Regex::new(resume_src).unwrap(),
        }
    }
}

const BASE_AWAIT: &str = r"(?i)\(y/n\)|\[y/n\]|\(yes/no\)|do you want to (proceed|continue|run|allow|make)|press (enter|y) to (continue|confirm)|requires approval|waiting for (your )?(approval|confirmation|input)|allow this (command|action|edit)|choose an option|don'?t ask again";

const BASE_RESUME: &str = r"(?i)\b(running|building|compiling|testing|thinking|searching|reading|writing|editing|fetching|executing|working)\b\s*\S*(\.\.\.|…)|esc to interrupt";

static DEFAULT_PATTERNS: Lazy<ToolPatterns> =
    Lazy::new(|| ToolPatterns::new(BASE_AWAIT, BASE_RESUME));

static CLAUDE_PATTERNS: Lazy<ToolPatterns> = Lazy::new(|| {
    ToolPatterns::new(
        &format!(r"{BASE_AWAIT}|❯\s*1\.\s*yes|esc to cancel"),
        &format!(r"{BASE_RESUME}|✻|✶|tokens"),
    )
});

static CODEX_PATTERNS: Lazy<ToolPatterns> = Lazy::new(|| {
    ToolPatterns::new(
        &format!(r"{BASE_AWAIT}|approve this|always approve"),
        BASE_RESUME,
    )
});

pub fn patterns_for(tool: Tool) -> &'static ToolPatterns {
    match tool {
        Tool::Claude => &CLAUDE_PATTERNS,
        Tool::Codex => &CODEX_PATTERNS,
        _ => &DEFAULT_PATTERNS,
    }
}

#[derive(Debug, Clone, Copy)]
struct ResumeProbe {
    opened_at: Instant,
    output_len: usize,
}

/// State machine: Running/Idle under a coarse timer, AwaitingInput latched
/// until resume evidence clears it.
pub struct PromptClassifier {
    patterns: &'static ToolPatterns,
    tuning: PromptTuning,
    window: String,
    latched: bool,
    probe: Option<ResumeProbe>,
}

impl PromptClassifier {
    pub fn new(tool: Tool, tuning: PromptTuning) -> Self {
        Self {
            patterns: patterns_for(tool),
            tuning,
            window: String::with_capacity(WINDOW_CAPACITY),
            latched: false,
            probe: None,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Feeds one raw output chunk.
    pub fn note_output(&mut self, chunk: &[u8]) {
        let cleaned = clean_chunk(chunk);
        if cleaned.is_empty() {
            return;
        }
        push_window(&mut self.window, &cleaned, WINDOW_CAPACITY);

        if self.probe.is_some() {
            // While probing, only fresh prompt text re-arms the latch; the
            // window still holds the prompt we are probing past.
            if self.patterns.await_re.is_match(&cleaned) {
                self.probe = None;
                self.latched = true;
                return;
            }
            if let Some(probe) = &mut self.probe {
                probe.output_len += cleaned.chars().count();
            }
            if self.patterns.resume_re.is_match(&cleaned)
                || self.patterns.resume_re.is_match(&self.window)
            {
                self.unlatch();
            }
        } else if !self.latched && self.patterns.await_re.is_match(&self.window) {
            self.latched = true;
        }
    }

    /// Records user input. A latched prompt opens (or reopens) the resume
    /// probe with a fresh timer and output counter.
    pub fn note_input(&mut self, now: Instant) {
        if self.latched {
            self.probe = Some(ResumeProbe {
                opened_at: now,
                output_len: 0,
            });
        }
    }

    /// Advances probe timeouts. Called every loop iteration regardless of
    /// I/O activity.
    pub fn tick(&mut self, now: Instant) {
        if let Some(probe) = self.probe {
            if now.duration_since(probe.opened_at) >= self.tuning.probe_window {
                if probe.output_len >= self.tuning.probe_min_output {
                    // Enough output flowed without a resume hint; the prompt
                    // is gone even though nothing matched.
                    self.unlatch();
                } else {
                    self.probe = None;
                }
            }
        }
    }

    /// Resolves the current state from the latch and the coarse timer.
    pub fn classify(&self, now: Instant, last_output: Option<Instant>) -> TermState {
        if self.latched {
            return TermState::AwaitingInput;
        }
        match last_output {
            Some(at) if now.duration_since(at) < self.tuning.running_threshold => {
                TermState::Running
            }
            _ => TermState::Idle,
        }
    }

    fn unlatch(&mut self) {
        self.latched = false;
        self.probe = None;
        // Stale prompt text must not re-latch on the next chunk.
        self.window.clear();
    }
}

/// Strips ANSI escape sequences and control characters, mapping newlines and
/// tabs to spaces so patterns can span line breaks.
pub fn clean_chunk(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut cleaned = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    // CSI: ESC [ parameters... final byte in @..~
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    // OSC: ESC ] ... terminated by BEL or ST (ESC \)
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' {
                            if chars.peek() == Some(&'\\') {
                                chars.next();
                            }
                            break;
                        }
                    }
                }
                Some(_) => {
                    // Two-byte escape (charset selection and friends).
                    chars.next();
                }
                None => {}
            }
            continue;
        }
        match c {
            '\n' | '\t' | '\r' => cleaned.push(' '),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }
    cleaned
}

fn push_window(window: &mut String, chunk: &str, capacity: usize) {
    window.push_str(chunk);
    if window.len() > capacity {
        let mut cut = window.len() - capacity;
        while !window.is_char_boundary(cut) {
            cut += 1;
        }
        window.drain(..cut);
    }
}

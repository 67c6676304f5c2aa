//! Action logging with pattern-based filtering and in-memory storage
//!
//! Action ids are matched against glob patterns to include or exclude them
//! from logs. Matching invocations go to `tracing` and, optionally, to an
//! in-memory ring buffer that records how each invocation settled.
//!
//! # Example
//!
//! ```ignore
//! use action_dispatch_core::action_log::{ActionLogConfig, ActionLoggerMiddleware};
//!
//! let logger = middleware::shared(ActionLoggerMiddleware::with_log(ActionLogConfig::default()));
//! let engine = ActionEngine::new(actions).with_middleware(logger.clone());
//!
//! // ... handle requests ...
//!
//! let logger = logger.lock();
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::action::ActionId;
use crate::middleware::{InvocationKey, InvocationMiddleware};
use crate::tracker::Outcome;

const SUMMARY_LIMIT: usize = 120;

/// Configuration for action logging with glob pattern filtering.
///
/// Patterns support:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
/// - Literal text matches exactly
///
/// # Examples
///
/// - `cart*` matches cartAdd, cartRemove, etc.
/// - `*Poll` matches statusPoll, feedPoll, etc.
#[derive(Debug, Clone, Default)]
pub struct ActionLoggerConfig {
    /// If non-empty, only log actions matching these patterns
    pub include_patterns: Vec<String>,
    /// Exclude actions matching these patterns (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl ActionLoggerConfig {
    /// Create a new config from comma-separated pattern strings
    ///
    /// # Example
    /// ```
    /// use action_dispatch_core::action_log::ActionLoggerConfig;
    ///
    /// let config = ActionLoggerConfig::new(Some("cart*,checkout"), Some("cartPeek"));
    /// assert!(config.should_log("cartAdd"));
    /// assert!(config.should_log("checkout"));
    /// assert!(!config.should_log("cartPeek"));
    /// assert!(!config.should_log("login"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include_patterns: include.map(split_patterns).unwrap_or_default(),
            exclude_patterns: exclude.map(split_patterns).unwrap_or_default(),
        }
    }

    /// Whether `action` passes the include list and misses the exclude list
    pub fn should_log(&self, action: &str) -> bool {
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| glob_match(p, action))
        {
            return false;
        }

        !self.exclude_patterns.iter().any(|p| glob_match(p, action))
    }
}

fn split_patterns(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// One logged invocation.
#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    pub action: ActionId,
    /// Call arguments as JSON, truncated
    pub summary: String,
    pub started: Instant,
    /// Position in the log, across evictions
    pub sequence: u64,
    /// Whether the invocation succeeded (set once it settles)
    pub succeeded: Option<bool>,
    /// Failure message, if the invocation failed
    pub error: Option<String>,
    /// Time from start to settle
    pub duration: Option<Duration>,
}

impl ActionLogEntry {
    pub fn new(action: ActionId, summary: String, sequence: u64) -> Self {
        Self {
            action,
            summary,
            started: Instant::now(),
            sequence,
            succeeded: None,
            error: None,
            duration: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.succeeded.is_some()
    }
}

/// Configuration for the action log ring buffer
#[derive(Debug, Clone)]
pub struct ActionLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    pub filter: ActionLoggerConfig,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: ActionLoggerConfig::default(),
        }
    }
}

impl ActionLogConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn new(capacity: usize, filter: ActionLoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// In-memory ring buffer of recent invocations.
///
/// Older entries are discarded when capacity is reached.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    config: ActionLogConfig,
    next_sequence: u64,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(ActionLogConfig::default())
    }
}

impl ActionLog {
    pub fn new(config: ActionLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Append an entry for a started invocation, evicting the oldest at capacity.
    ///
    /// Filtered-out actions are not recorded, and a zero-capacity log
    /// records nothing.
    pub fn log(&mut self, action: &ActionId, args: &[Value]) -> Option<&ActionLogEntry> {
        if self.config.capacity == 0 || !self.config.filter.should_log(action.as_str()) {
            return None;
        }

        let entry = ActionLogEntry::new(action.clone(), summarize(args), self.next_sequence);
        self.next_sequence += 1;

        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }

        self.entries.push_back(entry);
        self.entries.back()
    }

    /// Record how the entry with `sequence` settled.
    ///
    /// Returns false if the entry has already been evicted.
    pub fn settle(&mut self, sequence: u64, outcome: &Outcome) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.sequence == sequence) else {
            return false;
        };
        entry.succeeded = Some(outcome.is_ok());
        entry.error = outcome.as_ref().err().map(ToString::to_string);
        entry.duration = Some(entry.started.elapsed());
        true
    }

    /// Entries in start order
    pub fn entries(&self) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter()
    }

    /// Up to `count` entries, newest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn config(&self) -> &ActionLogConfig {
        &self.config
    }
}

fn summarize(args: &[Value]) -> String {
    let text = serde_json::to_string(args).unwrap_or_default();
    if text.chars().count() <= SUMMARY_LIMIT {
        return text;
    }
    let mut truncated: String = text.chars().take(SUMMARY_LIMIT).collect();
    truncated.push('…');
    truncated
}

/// Middleware that logs invocations with configurable pattern filtering.
///
/// Supports two modes:
/// - **Tracing only** (default): logs via `tracing::info!()`
/// - **With storage**: also records each invocation in an [`ActionLog`]
///
/// Settle events are matched to their start by [`InvocationKey`], so calls
/// of one action that settle out of order are recorded correctly.
#[derive(Debug, Clone)]
pub struct ActionLoggerMiddleware {
    config: ActionLoggerConfig,
    log: Option<ActionLog>,
    /// Logged sequences awaiting their settle event
    pending: HashMap<InvocationKey, u64>,
    active: bool,
}

impl ActionLoggerMiddleware {
    /// Tracing only, no in-memory storage
    pub fn new(config: ActionLoggerConfig) -> Self {
        Self {
            config,
            log: None,
            pending: HashMap::new(),
            active: true,
        }
    }

    /// Create middleware with in-memory storage
    pub fn with_log(config: ActionLogConfig) -> Self {
        Self {
            config: config.filter.clone(),
            log: Some(ActionLog::new(config)),
            pending: HashMap::new(),
            active: true,
        }
    }

    pub fn with_default_log() -> Self {
        Self::with_log(ActionLogConfig::default())
    }

    /// Set whether the middleware is active.
    ///
    /// When inactive, all methods become no-ops.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The in-memory log, when storage is enabled
    pub fn log(&self) -> Option<&ActionLog> {
        self.log.as_ref()
    }

    pub fn log_mut(&mut self) -> Option<&mut ActionLog> {
        self.log.as_mut()
    }

    pub fn config(&self) -> &ActionLoggerConfig {
        &self.config
    }
}

impl InvocationMiddleware for ActionLoggerMiddleware {
    fn before(&mut self, key: InvocationKey, action: &ActionId, args: &[Value]) {
        if !self.active || !self.config.should_log(action.as_str()) {
            return;
        }

        tracing::info!(action = %action, args = args.len(), "action");

        if let Some(log) = self.log.as_mut() {
            if let Some(entry) = log.log(action, args) {
                self.pending.insert(key, entry.sequence);
            }
        }
    }

    fn after(&mut self, key: InvocationKey, action: &ActionId, outcome: &Outcome) {
        if !self.active || !self.config.should_log(action.as_str()) {
            return;
        }

        if let Err(err) = outcome {
            tracing::info!(action = %action, error = %err, "action failed");
        }

        if let (Some(sequence), Some(log)) = (self.pending.remove(&key), self.log.as_mut()) {
            log.settle(sequence, outcome);
        }
    }
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some(&c) if c == '?' || c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                // Backtrack: let the last star absorb one more character
                Some((spi, sti)) => {
                    pi = spi + 1;
                    ti = sti + 1;
                    star = Some((spi, sti + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}

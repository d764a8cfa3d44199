use regex::Regex;
use std::fmt;

/// A compiled `when`/`except` pattern.
#[derive(Debug, Clone)]
pub struct RefPattern {
    regex: Regex,
}

impl RefPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Anchored at the start of `git_ref` only: `^refs/heads/main` accepts
    /// `refs/heads/main-2`.
    pub fn matches(&self, git_ref: &str) -> bool {
        // leftmost-first: if any match starts at 0, this one does
        self.regex
            .find(git_ref)
            .map_or(false, |found| found.start() == 0)
    }
}

impl fmt::Display for RefPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for RefPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RefPattern {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Active,
    /// `when` is set and does not match.
    WhenMismatch(String),
    /// `except` is set and matches.
    ExceptMatch(String),
}

impl GateDecision {
    pub fn is_active(&self) -> bool {
        matches!(self, GateDecision::Active)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Active => f.write_str("active"),
            GateDecision::WhenMismatch(pattern) => {
                write!(f, "git-ref does not match when pattern ('{}')", pattern)
            }
            GateDecision::ExceptMatch(pattern) => {
                write!(f, "git-ref matches except pattern ('{}')", pattern)
            }
        }
    }
}

/// Decides whether a target runs for `git_ref`. Without a ref (CI mode off)
/// every target is active.
pub fn evaluate(
    when: Option<&RefPattern>,
    except: Option<&RefPattern>,
    git_ref: Option<&str>,
) -> GateDecision {
    let Some(git_ref) = git_ref else {
        return GateDecision::Active;
    };

    if let Some(when) = when {
        if !when.matches(git_ref) {
            return GateDecision::WhenMismatch(when.to_string());
        }
    }

    if let Some(except) = except {
        if except.matches(git_ref) {
            return GateDecision::ExceptMatch(except.to_string());
        }
    }

    GateDecision::Active
}

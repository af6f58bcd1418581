//! Topic pattern matching
//!
//! Patterns are dot-segmented like topics. `*` stands for one or more
//! characters that are not `.`, so `a.*` matches `a.b` but not `a.b.c`.
//! Matching is anchored on both ends. An empty pattern set, an empty
//! pattern, or a bare `*` matches every topic.

use regex::Regex;

/// Compiled set of subscriber patterns
#[derive(Debug, Clone)]
pub struct TopicFilter {
    match_all: bool,
    patterns: Vec<Regex>,
}

impl TopicFilter {
    /// Compile a pattern set
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut match_all = false;
        let mut compiled = Vec::new();
        let mut seen = 0usize;

        for pattern in patterns {
            let pattern = pattern.as_ref();
            seen += 1;

            if pattern.is_empty() || pattern == "*" {
                match_all = true;
                break;
            }

            match compile_pattern(pattern) {
                Ok(re) => compiled.push(re),
                Err(e) => tracing::warn!(pattern, error = %e, "ignoring uncompilable topic pattern"),
            }
        }

        Self {
            match_all: match_all || seen == 0,
            patterns: compiled,
        }
    }

    /// Filter that accepts every topic
    pub fn match_all() -> Self {
        Self {
            match_all: true,
            patterns: Vec::new(),
        }
    }

    pub fn is_match_all(&self) -> bool {
        self.match_all
    }

    /// True if the topic matches any pattern in the set
    pub fn matches(&self, topic: &str) -> bool {
        self.match_all || self.patterns.iter().any(|re| re.is_match(topic))
    }
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self::match_all()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let body = regex::escape(pattern).replace(r"\*", "[^.]+");
    Regex::new(&format!("^{}$", body))
}

/// One-shot form of [`TopicFilter::matches`]
pub fn matches<S: AsRef<str>>(topic: &str, patterns: &[S]) -> bool {
    TopicFilter::new(patterns).matches(topic)
}

/// Split a raw `topics` parameter on commas and whitespace
pub fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

//! Secret redaction for outbound execution output.
//!
//! Every textual field of an execution record (stdout, stderr, error message,
//! serialized result) passes through here before it is returned to any
//! caller. The scanner knows the plaintext credential values scoped to the
//! executing profile and replaces every exact occurrence.
//!
//! Values longer than four characters become `[REDACTED...XXXX]` where XXXX
//! is the value's last four characters; shorter values become `[REDACTED]`.
//! Matching is leftmost-longest so a short secret that is a substring of a
//! longer one never shadows it.

use aho_corasick::{AhoCorasick, MatchKind};

/// Result of scrubbing one text field.
#[derive(Debug, Clone)]
pub struct Redaction {
    pub text: String,
    pub redacted: bool,
}

/// Multi-pattern secret scrubber built per execution.
pub struct Sanitizer {
    matcher: Option<AhoCorasick>,
    replacements: Vec<String>,
}

impl Sanitizer {
    /// Build a sanitizer from the plaintext values of the executing profile.
    /// Empty values are dropped; duplicates collapse to one pattern.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut patterns: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .filter(|v| !v.is_empty())
            .collect();
        patterns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        patterns.dedup();

        if patterns.is_empty() {
            return Self {
                matcher: None,
                replacements: Vec::new(),
            };
        }

        let replacements = patterns.iter().map(|p| replacement_for(p)).collect();
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .ok();

        if matcher.is_none() {
            tracing::warn!("Failed to build redaction matcher; output will not be scrubbed");
        }

        Self {
            matcher,
            replacements,
        }
    }

    /// A sanitizer that scrubs nothing (profiles with no resolved values).
    pub fn passthrough() -> Self {
        Self {
            matcher: None,
            replacements: Vec::new(),
        }
    }

    /// Replace every exact occurrence of a known secret in `input`.
    pub fn scrub(&self, input: &str) -> Redaction {
        let Some(ref matcher) = self.matcher else {
            return Redaction {
                text: input.to_string(),
                redacted: false,
            };
        };

        let mut output = String::with_capacity(input.len());
        let mut last = 0;
        let mut redacted = false;
        for mat in matcher.find_iter(input) {
            output.push_str(&input[last..mat.start()]);
            output.push_str(&self.replacements[mat.pattern().as_usize()]);
            last = mat.end();
            redacted = true;
        }
        output.push_str(&input[last..]);

        Redaction {
            text: output,
            redacted,
        }
    }

    /// Scrub a serialized result value.
    ///
    /// The value is scanned in its serialized form; if redaction breaks the
    /// JSON structure the scrubbed text is returned as a plain string. The
    /// invariant is that no exact-match secret survives, not that the shape
    /// is preserved.
    pub fn scrub_value(&self, value: &serde_json::Value) -> (serde_json::Value, bool) {
        let serialized = value.to_string();
        let scrubbed = self.scrub(&serialized);
        if !scrubbed.redacted {
            return (value.clone(), false);
        }
        match serde_json::from_str(&scrubbed.text) {
            Ok(reparsed) => (reparsed, true),
            Err(_) => (serde_json::Value::String(scrubbed.text), true),
        }
    }
}

fn replacement_for(secret: &str) -> String {
    if secret.chars().count() > 4 {
        let tail: String = secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("[REDACTED...{tail}]")
    } else {
        "[REDACTED]".to_string()
    }
}

//! Minimal glob matcher for event bus topics (`job.*`, `document.saved`).
//!
//! Topics are dot-separated tokens; `*` matches exactly one token. This is
//! intentionally narrower than a full glob so `job.*` cannot accidentally
//! match `job.spawn.child`, which keeps topic scoping predictable.

#[derive(Debug, Clone)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl TopicPattern {
    pub fn compile(pattern: &str) -> Option<Self> {
        if pattern.is_empty() {
            return None;
        }
        let segments = pattern
            .split('.')
            .map(|s| {
                if s == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Some(Self { segments })
    }

    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('.').collect();
        if parts.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(parts.iter())
            .all(|(seg, part)| match seg {
                Segment::Wildcard => true,
                Segment::Literal(lit) => lit == part,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_single_segment() {
        let p = TopicPattern::compile("job.*").unwrap();
        assert!(p.matches("job.status_change"));
        assert!(p.matches("job.progress"));
        assert!(!p.matches("document.saved"));
        assert!(!p.matches("job.spawn.child"));
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let p = TopicPattern::compile("document.saved").unwrap();
        assert!(p.matches("document.saved"));
        assert!(!p.matches("document.deleted"));
    }
}

//! Transcript de-duplication
//!
//! Some endpoints resend the whole transcript so far instead of deltas.
//! [`TranscriptDedup`] accepts either and yields only text not yet emitted.

/// Shortest fragment treated as a stale resend before the stream has shown
/// itself to be cumulative
const MIN_STALE_CHARS: usize = 6;

/// Tracks what has been emitted for one transcript stream
#[derive(Debug, Clone, Default)]
pub struct TranscriptDedup {
    emitted: String,
    cumulative: bool,
}

impl TranscriptDedup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an incoming fragment and return the new suffix, if any
    ///
    /// A fragment that extends what was emitted is cumulative and only its
    /// suffix is new. A fragment that is a prefix of what was emitted is a
    /// stale resend, but only once the stream has sent a cumulative update
    /// or the fragment is long enough to rule out a short delta such as
    /// "I" after "I think so. ". Anything else is a plain delta.
    pub fn push(&mut self, incoming: &str) -> Option<String> {
        if incoming.is_empty() {
            return None;
        }

        if !self.emitted.is_empty() && incoming.starts_with(&self.emitted) {
            let suffix = incoming[self.emitted.len()..].to_string();
            self.emitted = incoming.to_string();
            self.cumulative = true;
            return (!suffix.is_empty()).then_some(suffix);
        }

        if self.emitted.starts_with(incoming)
            && (self.cumulative || incoming.chars().count() >= MIN_STALE_CHARS)
        {
            return None;
        }

        self.emitted.push_str(incoming);
        Some(incoming.to_string())
    }

    /// Everything emitted since the last clear
    #[must_use]
    pub fn emitted(&self) -> &str {
        &self.emitted
    }

    /// Forget the current transcript
    pub fn clear(&mut self) {
        self.emitted.clear();
        self.cumulative = false;
    }
}

//! Token budget tracking.
//!
//! Per-artifact token counts are authoritative (the backend counted
//! them at upload time); transcript and pending-turn tokens are
//! estimated conservatively at ~4 characters per token, rounded up.
//! The tracker never admits a turn that would exceed the configured
//! context ceiling.

use docshelf_core::artifact::FileSet;
use docshelf_core::message::Transcript;

/// Fixed allowance for the system prompt and priming scaffold sent
/// with every request. Sized for the largest preset template.
pub const SYSTEM_OVERHEAD_TOKENS: u64 = 1024;

/// Characters per estimated token.
const CHARS_PER_TOKEN: u64 = 4;

/// Conservative token estimate for a text block: ceil(chars / 4).
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// A point-in-time view of the budget, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetSnapshot {
    /// Sum of Ready artifacts' authoritative counts
    pub file_tokens: u64,
    /// Estimated transcript tokens
    pub transcript_tokens: u64,
    /// Fixed system overhead
    pub overhead_tokens: u64,
    /// Configured ceiling
    pub max_tokens: u64,
}

impl BudgetSnapshot {
    pub fn total(&self) -> u64 {
        self.file_tokens + self.transcript_tokens + self.overhead_tokens
    }

    /// Used fraction of the ceiling, clamped to 100.
    pub fn percent_used(&self) -> f64 {
        if self.max_tokens == 0 {
            return 100.0;
        }
        (self.total() as f64 / self.max_tokens as f64 * 100.0).min(100.0)
    }

    pub fn remaining(&self) -> u64 {
        self.max_tokens.saturating_sub(self.total())
    }
}

/// Outcome of an admission check for a pending turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Ok(BudgetSnapshot),
    /// Projected total exceeds the ceiling by `excess` tokens.
    OverBudget { excess: u64, snapshot: BudgetSnapshot },
}

/// Maintains running token accounting across files, transcript, and
/// system overhead.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    max_tokens: u64,
}

impl BudgetTracker {
    pub fn new(max_tokens: u64) -> Self {
        Self { max_tokens }
    }

    /// Recompute the live snapshot.
    pub fn snapshot(&self, files: &FileSet, transcript: &Transcript) -> BudgetSnapshot {
        let transcript_tokens = transcript
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        BudgetSnapshot {
            file_tokens: files.ready_tokens(),
            transcript_tokens,
            overhead_tokens: SYSTEM_OVERHEAD_TOKENS,
            max_tokens: self.max_tokens,
        }
    }

    /// Check whether a pending turn fits. `pending_estimate` is the
    /// estimated cost of the user message about to be sent.
    pub fn admit(
        &self,
        files: &FileSet,
        transcript: &Transcript,
        pending_estimate: u64,
    ) -> Admission {
        let snapshot = self.snapshot(files, transcript);
        let projected = snapshot.total() + pending_estimate;
        if projected <= self.max_tokens {
            Admission::Ok(snapshot)
        } else {
            Admission::OverBudget {
                excess: projected - self.max_tokens,
                snapshot,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshelf_core::artifact::{Artifact, ArtifactSource, MediaCategory, RemoteFile};
    use docshelf_core::message::Message;
    use std::path::PathBuf;

    fn ready_file(tokens: u64) -> (FileSet, ()) {
        let mut files = FileSet::new(50);
        let a = Artifact::new(
            ArtifactSource::Path { path: PathBuf::from("a.pdf") },
            MediaCategory::Document,
            "application/pdf",
        );
        let id = a.id.clone();
        files.insert(a).unwrap();
        files.mark_ready(
            &id,
            RemoteFile { uri: "files/a".into(), mime_type: "application/pdf".into() },
            tokens,
        );
        (files, ())
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn snapshot_sums_files_transcript_and_overhead() {
        let (files, _) = ready_file(1000);
        let mut transcript = Transcript::new();
        transcript.push(Message::user("a".repeat(400)));

        let tracker = BudgetTracker::new(10_000);
        let snap = tracker.snapshot(&files, &transcript);
        assert_eq!(snap.file_tokens, 1000);
        assert_eq!(snap.transcript_tokens, 100);
        assert_eq!(snap.total(), 1000 + 100 + SYSTEM_OVERHEAD_TOKENS);
    }

    #[test]
    fn admits_exactly_at_ceiling() {
        let (files, _) = ready_file(1000);
        let transcript = Transcript::new();
        let max = 1000 + SYSTEM_OVERHEAD_TOKENS + 10;
        let tracker = BudgetTracker::new(max);

        assert!(matches!(
            tracker.admit(&files, &transcript, 10),
            Admission::Ok(_)
        ));
        match tracker.admit(&files, &transcript, 11) {
            Admission::OverBudget { excess, .. } => assert_eq!(excess, 1),
            other => panic!("expected OverBudget, got {other:?}"),
        }
    }

    #[test]
    fn failed_artifacts_cost_nothing() {
        let mut files = FileSet::new(50);
        let a = Artifact::new(
            ArtifactSource::Path { path: PathBuf::from("broken.xlsx") },
            MediaCategory::Spreadsheet,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        );
        let id = a.id.clone();
        files.insert(a).unwrap();
        files.mark_failed(&id, "conversion failed");

        let tracker = BudgetTracker::new(1_000_000);
        let snap = tracker.snapshot(&files, &Transcript::new());
        assert_eq!(snap.file_tokens, 0);
    }

    #[test]
    fn percent_used_is_clamped() {
        let (files, _) = ready_file(5_000_000);
        let tracker = BudgetTracker::new(1_000_000);
        let snap = tracker.snapshot(&files, &Transcript::new());
        assert_eq!(snap.percent_used(), 100.0);
        assert_eq!(snap.remaining(), 0);
    }
}

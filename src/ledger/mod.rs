//! Provenance log
//!
//! Ordered, append-only record of every operation that touched the store.
//! An `add` is never deleted: removing a source flips it to reversed and
//! appends a `remove`, so the log always explains the current counters.

mod entry;

pub use entry::{format_runtime, EntryStatus, Operation, ProvenanceEntry, SourceIdentity};
pub(crate) use entry::check_field;

use std::collections::HashMap;

use crate::{PileupError, Result};

/// Provenance log of one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceLog {
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse persisted records in order.
    pub fn from_records<S: AsRef<str>>(records: &[S]) -> std::result::Result<Self, String> {
        let entries = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                ProvenanceEntry::parse(record.as_ref()).map_err(|e| format!("entry {}: {}", i, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Render every entry as a persisted record.
    pub fn records(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Entries in order.
    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning its index.
    pub fn append(&mut self, entry: ProvenanceEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Latest unreversed add with the given signature.
    pub fn find_active_add(&self, signature: &str) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.is_active_add() && e.signature.as_deref() == Some(signature))
    }

    fn find_active_add_by_path(&self, path: &str) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.is_active_add() && e.file == path)
    }

    /// Flip an active add to reversed.
    pub fn mark_reversed(&mut self, index: usize) -> Result<()> {
        match self.entries.get_mut(index) {
            Some(entry) if entry.is_active_add() => {
                entry.status = EntryStatus::Reversed;
                Ok(())
            }
            Some(entry) => Err(PileupError::NoMatchingContribution {
                source_path: entry.file.clone(),
                reason: format!("entry {} is not an unreversed add", index),
            }),
            None => Err(PileupError::NoMatchingContribution {
                source_path: String::new(),
                reason: format!("entry {} does not exist", index),
            }),
        }
    }

    /// Signatures of unreversed adds, mapped to the path they were added from.
    pub fn active_signatures(&self) -> HashMap<&str, &str> {
        self.entries
            .iter()
            .filter(|e| e.is_active_add())
            .filter_map(|e| e.signature.as_deref().map(|s| (s, e.file.as_str())))
            .collect()
    }

    /// Number of unreversed adds.
    pub fn active_adds(&self) -> usize {
        self.entries.iter().filter(|e| e.is_active_add()).count()
    }

    fn count(&self, operation: Operation) -> usize {
        self.entries.iter().filter(|e| e.operation == operation).count()
    }

    /// Fail with `DuplicateContribution` if `source` is already counted.
    pub fn check_add(&self, source: &SourceIdentity, allow_override: bool) -> Result<()> {
        if allow_override {
            return Ok(());
        }
        match self.find_active_add(source.signature()) {
            Some(_) => Err(PileupError::DuplicateContribution {
                source_path: source.path_text(),
                signature: source.signature().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Index of the add that removing `source` reverses.
    ///
    /// Declared identities match by signature. File identities match the add
    /// recorded for the same path, whose signature must still equal the
    /// file's current content; a moved file is found by signature.
    pub fn check_remove(&self, source: &SourceIdentity) -> Result<usize> {
        let path = source.path_text();
        if !source.is_declared() {
            if let Some(index) = self.find_active_add_by_path(&path) {
                let recorded = self.entries[index].signature.as_deref().unwrap_or_default();
                if recorded != source.signature() {
                    return Err(PileupError::NoMatchingContribution {
                        source_path: path,
                        reason: format!(
                            "content changed since it was added (recorded {}, found {})",
                            recorded,
                            source.signature()
                        ),
                    });
                }
                return Ok(index);
            }
        }
        self.find_active_add(source.signature())
            .ok_or_else(|| PileupError::NoMatchingContribution {
                source_path: path,
                reason: "never added or already removed".to_string(),
            })
    }

    /// Fail with `OverlappingContribution` if any unreversed source is shared
    /// between the target and a source log, or between two source logs.
    pub fn check_merge(
        &self,
        target_label: &str,
        sources: &[(&str, &ProvenanceLog)],
        allow_override: bool,
    ) -> Result<()> {
        if allow_override {
            return Ok(());
        }
        let mut seen: HashMap<&str, &str> = self
            .active_signatures()
            .into_keys()
            .map(|signature| (signature, target_label))
            .collect();
        for (label, log) in sources {
            for (signature, path) in log.active_signatures() {
                if let Some(owner) = seen.get(signature) {
                    return Err(PileupError::OverlappingContribution {
                        source_path: path.to_string(),
                        signature: signature.to_string(),
                        left: owner.to_string(),
                        right: label.to_string(),
                    });
                }
            }
            for signature in log.active_signatures().into_keys() {
                seen.insert(signature, *label);
            }
        }
        Ok(())
    }

    /// Append clones of every entry of `other`, keeping their status.
    pub fn absorb(&mut self, other: &ProvenanceLog) -> usize {
        self.entries.extend(other.entries.iter().cloned());
        other.entries.len()
    }

    /// `## INFO=` summary lines for view and info output.
    pub fn header_lines(&self) -> Vec<String> {
        let removed = self.count(Operation::Remove);
        vec![
            format!("## INFO=BAMS_ADDED:{}", self.active_adds()),
            format!("## INFO=BAMS_REMOVED:{}", removed),
            format!("## INFO=MERGES:{}", self.count(Operation::Merge)),
            format!("## INFO=ENTRIES:{}", self.entries.len()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreParameters;
    use std::time::Duration;

    fn source(path: &str, signature: &str) -> SourceIdentity {
        SourceIdentity::new(path, signature).unwrap()
    }

    fn log_with(sources: &[SourceIdentity]) -> ProvenanceLog {
        let mut log = ProvenanceLog::new();
        log.append(ProvenanceEntry::bootstrap("ref.fa", StoreParameters::default(), Duration::ZERO));
        for s in sources {
            log.append(ProvenanceEntry::add(s, 10, Duration::ZERO, StoreParameters::default()));
        }
        log
    }

    #[test]
    fn duplicate_add_is_rejected_unless_overridden() {
        let s1 = source("/d/s1.bam", "sig1");
        let log = log_with(&[s1.clone()]);
        let moved = source("/elsewhere/s1.bam", "sig1");
        assert!(matches!(
            log.check_add(&moved, false),
            Err(PileupError::DuplicateContribution { .. })
        ));
        assert!(log.check_add(&moved, true).is_ok());
        assert!(log.check_add(&source("/d/s2.bam", "sig2"), false).is_ok());
    }

    #[test]
    fn remove_marks_reversed_and_cannot_repeat() {
        let s1 = source("/d/s1.bam", "sig1");
        let mut log = log_with(&[s1.clone()]);
        let index = log.check_remove(&s1).unwrap();
        assert_eq!(index, 1);
        log.mark_reversed(index).unwrap();
        log.append(ProvenanceEntry::remove(&s1, 10, Duration::ZERO, StoreParameters::default()));
        assert_eq!(log.entries()[1].status, EntryStatus::Reversed);
        assert_eq!(log.len(), 3);
        assert!(matches!(
            log.check_remove(&s1),
            Err(PileupError::NoMatchingContribution { .. })
        ));
        assert!(log.check_add(&s1, false).is_ok());
    }

    #[test]
    fn remove_detects_changed_content() {
        let log = log_with(&[source("/d/s1.bam", "sig1")]);
        let err = log.check_remove(&source("/d/s1.bam", "sig9")).unwrap_err();
        assert!(err.to_string().contains("content changed"));
    }

    #[test]
    fn merge_overlap_between_sources_is_detected() {
        let target = log_with(&[source("/d/t.bam", "t")]);
        let a = log_with(&[source("/d/a.bam", "a")]);
        let b = log_with(&[source("/d/a-copy.bam", "a")]);
        assert!(target.check_merge("target", &[("a", &a)], false).is_ok());
        let err = target
            .check_merge("target", &[("a", &a), ("b", &b)], false)
            .unwrap_err();
        match err {
            PileupError::OverlappingContribution { left, right, .. } => {
                assert_eq!(left, "a");
                assert_eq!(right, "b");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(target.check_merge("target", &[("a", &a), ("b", &b)], true).is_ok());
    }

    #[test]
    fn reversed_sources_do_not_overlap() {
        let shared = source("/d/s.bam", "s");
        let mut target = log_with(&[shared.clone()]);
        let index = target.check_remove(&shared).unwrap();
        target.mark_reversed(index).unwrap();
        let other = log_with(&[shared]);
        assert!(target.check_merge("target", &[("other", &other)], false).is_ok());
    }

    #[test]
    fn records_round_trip_through_strings() {
        let mut log = log_with(&[source("/d/s1.bam", "sig1")]);
        log.mark_reversed(1).unwrap();
        let parsed = ProvenanceLog::from_records(&log.records()).unwrap();
        assert_eq!(parsed, log);
        assert!(ProvenanceLog::from_records(&["garbage"]).is_err());
    }

    #[test]
    fn header_counts_active_adds() {
        let mut log = log_with(&[source("/d/a.bam", "a"), source("/d/b.bam", "b")]);
        log.mark_reversed(1).unwrap();
        let lines = log.header_lines();
        assert_eq!(lines[0], "## INFO=BAMS_ADDED:1");
    }
}

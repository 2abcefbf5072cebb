use crate::config::FsyncLevel;
use crate::error::ElectionError;
use crate::NULL_POSITION;
use std::collections::BTreeMap;

/// One leadership term in the recording log: where in the log the term
/// begins and, once committed, where it ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermEntry {
    /// Archive recording the term's log is stored in.
    pub recording_id: i64,
    pub leadership_term_id: i64,
    /// Log position at which the term begins.
    pub term_base_log_position: i64,
    /// Committed end of the term, or `NULL_POSITION` while the term is
    /// open.
    pub log_position: i64,
    pub timestamp_ns: i64,
}

/// Durable index mapping leadership terms to their base log positions and
/// timestamps. The trait carries only the operations the election needs;
/// the on-disk format belongs to the host.
pub trait RecordingLog {
    /// The entry for a term that is required to exist.
    fn get_term_entry(&self, leadership_term_id: i64) -> Result<TermEntry, ElectionError> {
        self.find_term_entry(leadership_term_id)
            .ok_or(ElectionError::UnknownTerm(leadership_term_id))
    }

    fn find_term_entry(&self, leadership_term_id: i64) -> Option<TermEntry>;

    fn is_unknown(&self, leadership_term_id: i64) -> bool {
        self.find_term_entry(leadership_term_id).is_none()
    }

    fn append_term(
        &mut self,
        recording_id: i64,
        leadership_term_id: i64,
        term_base_log_position: i64,
        timestamp_ns: i64,
    );

    /// Record the committed end of a known term.
    fn commit_log_position(&mut self, leadership_term_id: i64, log_position: i64);

    fn get_term_timestamp(&self, leadership_term_id: i64) -> Result<i64, ElectionError> {
        self.get_term_entry(leadership_term_id)
            .map(|entry| entry.timestamp_ns)
    }

    fn force(&mut self, level: FsyncLevel) -> Result<(), ElectionError>;
}

/// In-memory recording log for embedding hosts and tests.
#[derive(Default)]
pub struct MemoryRecordingLog {
    entries: BTreeMap<i64, TermEntry>,
}

impl MemoryRecordingLog {
    pub fn new() -> MemoryRecordingLog {
        MemoryRecordingLog::default()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TermEntry> {
        self.entries.values()
    }
}

impl RecordingLog for MemoryRecordingLog {
    fn find_term_entry(&self, leadership_term_id: i64) -> Option<TermEntry> {
        self.entries.get(&leadership_term_id).copied()
    }

    fn append_term(
        &mut self,
        recording_id: i64,
        leadership_term_id: i64,
        term_base_log_position: i64,
        timestamp_ns: i64,
    ) {
        self.entries.insert(
            leadership_term_id,
            TermEntry {
                recording_id,
                leadership_term_id,
                term_base_log_position,
                log_position: NULL_POSITION,
                timestamp_ns,
            },
        );
    }

    fn commit_log_position(&mut self, leadership_term_id: i64, log_position: i64) {
        if let Some(entry) = self.entries.get_mut(&leadership_term_id) {
            entry.log_position = log_position;
        }
    }

    fn force(&mut self, _level: FsyncLevel) -> Result<(), ElectionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_terms_are_found() {
        let mut log = MemoryRecordingLog::new();
        assert!(log.is_unknown(3));

        log.append_term(7, 3, 1024, 42);
        let entry = log.get_term_entry(3).unwrap();
        assert_eq!(entry.recording_id, 7);
        assert_eq!(entry.term_base_log_position, 1024);
        assert_eq!(entry.log_position, NULL_POSITION);
        assert_eq!(log.get_term_timestamp(3).unwrap(), 42);
    }

    #[test]
    fn committing_closes_a_term() {
        let mut log = MemoryRecordingLog::new();
        log.append_term(7, 3, 1024, 42);
        log.commit_log_position(3, 2048);
        assert_eq!(log.get_term_entry(3).unwrap().log_position, 2048);
    }

    #[test]
    fn missing_terms_are_reported() {
        let log = MemoryRecordingLog::new();
        assert!(matches!(
            log.get_term_entry(9),
            Err(ElectionError::UnknownTerm(9))
        ));
    }
}

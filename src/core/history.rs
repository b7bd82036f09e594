//! Bounded scan history

use crate::core::connection::ScanData;
use std::collections::VecDeque;

/// Number of scans kept by default
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Most recent scans, oldest evicted first
#[derive(Debug, Clone)]
pub struct ScanHistory {
    entries: VecDeque<ScanData>,
    capacity: usize,
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ScanHistory {
    /// History holding at most `capacity` scans
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a scan
    pub fn push(&mut self, scan: ScanData) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(scan);
    }

    /// Scans, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ScanData> {
        self.entries.iter()
    }

    /// Copy of the scans, newest first
    pub fn newest_first(&self) -> Vec<ScanData> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Most recent scan
    pub fn latest(&self) -> Option<&ScanData> {
        self.entries.back()
    }

    /// Number of stored scans
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all scans
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::framing::Frame;
    use crate::core::parser::{FrameParser, NoopParser};

    fn scan(text: &str) -> ScanData {
        NoopParser.parse_frame(&Frame::from(text.as_bytes())).into()
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = ScanHistory::with_capacity(3);
        for i in 0..5 {
            history.push(scan(&i.to_string()));
        }
        assert_eq!(history.len(), 3);
        let texts: Vec<_> = history.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["2", "3", "4"]);
        assert_eq!(history.latest().unwrap().text, "4");
        assert_eq!(history.newest_first()[0].text, "4");
    }

    #[test]
    fn test_default_capacity() {
        let mut history = ScanHistory::default();
        for _ in 0..150 {
            history.push(scan("4601234567890"));
        }
        assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
        history.clear();
        assert!(history.is_empty());
    }
}

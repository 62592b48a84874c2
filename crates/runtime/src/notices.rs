/// User-visible messages raised by the core (the "msg"/"warn" popups of a
/// front-end).
///
/// Notices are ordered by a sequence number and drained by the host, which
/// decides how to show or log them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub seq: u64,
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct NoticeBus {
    next_seq: u64,
    notices: Vec<Notice>,
}

impl NoticeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.notices.push(Notice {
            seq,
            level,
            title: title.into(),
            message: message.into(),
        });
    }

    pub fn info(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.emit(NoticeLevel::Info, title, message);
    }

    pub fn warn(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.emit(NoticeLevel::Warning, title, message);
    }

    pub fn error(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.emit(NoticeLevel::Error, title, message);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn drain(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

#[cfg(test)]
mod tests {
    use super::{NoticeBus, NoticeLevel};

    #[test]
    fn sequence_numbers_survive_drain() {
        let mut bus = NoticeBus::new();
        bus.info("Done", "Segment fully reviewed");
        bus.warn("Skipped sections", "3 sections");
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].level, NoticeLevel::Warning);
        assert!(bus.notices().is_empty());

        bus.error("Error", "x");
        assert_eq!(bus.notices()[0].seq, 2);
    }
}

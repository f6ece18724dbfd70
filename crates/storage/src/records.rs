use std::fmt;

use serde::{Deserialize, Serialize};

use debrief_core::FeatureId;

use crate::error::StorageError;

/// One audit-trail line, persisted as `[timestampMs, text]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry(pub u64, pub String);

impl LogEntry {
    pub fn timestamp(&self) -> u64 {
        self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

/// Last generated PDF, persisted as `[pdfId, generatedAtMs]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfRecord(pub String, pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintStatus {
    /// Never printed.
    Generate,
    /// Printed after the latest change to the outing.
    Done,
    /// Printed, but the outing changed since.
    Stale,
}

impl PrintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "gen",
            Self::Done => "done",
            Self::Stale => "old",
        }
    }
}

/// Which collection of an outing held a target id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holding {
    Track,
    UncroppedTrack,
    Clue,
}

/// One team's pairing with one assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outing {
    /// Source assignment id. Lookup only, never ownership.
    pub sid: Option<FeatureId>,
    /// Target boundary.
    pub bid: Option<FeatureId>,
    /// Target folder.
    pub fid: Option<FeatureId>,
    /// Segment groups, one per cropped source track.
    #[serde(default)]
    pub tids: Vec<Vec<FeatureId>>,
    #[serde(default)]
    pub utids: Vec<FeatureId>,
    #[serde(default)]
    pub cids: Vec<FeatureId>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, rename = "PDF", skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PdfRecord>,
}

impl Outing {
    pub fn new(sid: Option<FeatureId>) -> Self {
        Self {
            sid,
            ..Self::default()
        }
    }

    /// No tracks, uncropped tracks or clues.
    pub fn is_empty(&self) -> bool {
        self.tids.is_empty() && self.utids.is_empty() && self.cids.is_empty()
    }

    pub fn track_count(&self) -> usize {
        self.tids.len() + self.utids.len()
    }

    pub fn holding(&self, tid: FeatureId) -> Option<Holding> {
        if self.tids.iter().any(|group| group.contains(&tid)) {
            Some(Holding::Track)
        } else if self.utids.contains(&tid) {
            Some(Holding::UncroppedTrack)
        } else if self.cids.contains(&tid) {
            Some(Holding::Clue)
        } else {
            None
        }
    }

    /// Remove `tid` from every collection, dropping segment groups that end
    /// up empty.
    pub fn strip(&mut self, tid: FeatureId) -> Option<Holding> {
        let held = self.holding(tid)?;
        self.tids = self
            .tids
            .iter()
            .map(|group| group.iter().copied().filter(|id| *id != tid).collect::<Vec<_>>())
            .filter(|group| !group.is_empty())
            .collect();
        self.utids.retain(|id| *id != tid);
        self.cids.retain(|id| *id != tid);
        Some(held)
    }

    /// Every target id this outing references, boundary and folder included.
    pub fn target_ids(&self) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = self.bid.into_iter().collect();
        ids.extend(self.tids.iter().flatten().copied());
        ids.extend(self.utids.iter().copied());
        ids.extend(self.cids.iter().copied());
        ids.extend(self.fid);
        ids
    }

    pub fn push_log(&mut self, timestamp: u64, text: impl Into<String>) {
        self.log.push(LogEntry(timestamp, text.into()));
    }

    pub fn print_status(&self) -> PrintStatus {
        match (&self.pdf, self.log.last()) {
            (None, _) => PrintStatus::Generate,
            (Some(pdf), Some(last)) if pdf.1 <= last.timestamp() => PrintStatus::Stale,
            (Some(_), _) => PrintStatus::Done,
        }
    }
}

/// Owner recorded for a clue whose outing is not known yet. Persisted as the
/// assignment id string, or `"NONE"` when the clue names no assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClueOwner {
    Assignment(FeatureId),
    Unassigned,
}

impl ClueOwner {
    pub fn from_assignment(id: Option<FeatureId>) -> Self {
        id.map_or(ClueOwner::Unassigned, ClueOwner::Assignment)
    }
}

impl TryFrom<String> for ClueOwner {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "NONE" || s.is_empty() {
            Ok(ClueOwner::Unassigned)
        } else {
            Ok(ClueOwner::Assignment(FeatureId::parse(&s)?))
        }
    }
}

impl From<ClueOwner> for String {
    fn from(owner: ClueOwner) -> Self {
        owner.to_string()
    }
}

impl fmt::Display for ClueOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClueOwner::Assignment(id) => write!(f, "{id}"),
            ClueOwner::Unassigned => f.write_str("NONE"),
        }
    }
}

/// Live mobile track, persisted as `[title, outingName|null, lastSeenMs]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTrackEntry(pub String, pub Option<String>, pub u64);

impl AppTrackEntry {
    pub fn title(&self) -> &str {
        &self.0
    }

    pub fn outing(&self) -> Option<&str> {
        self.1.as_deref()
    }

    pub fn last_seen(&self) -> u64 {
        self.2
    }
}

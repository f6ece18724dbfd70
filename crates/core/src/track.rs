//! Track and outing naming conventions.
//!
//! Teams title their tracks `<AssignmentLetters><TeamNumber><Suffix>`, e.g.
//! `AA101a`, ignoring case, spaces and dashes. The letters and number name the
//! outing (`AA 101`); the suffix picks the line color.

/// Track colors by suffix letter: red, green, blue, orange, cyan, purple,
/// then darker versions of each.
pub const TRACK_PALETTE: [&str; 12] = [
    "#FF0000", "#00CD00", "#0000FF", "#FFAA00", "#009AFF", "#A200FF",
    "#C00000", "#006900", "#0000C0", "#BC7D00", "#0084DC", "#8600D4",
];

pub const FALLBACK_TRACK_COLOR: &str = "#444444";

/// Outing title used when an assignment has no title yet.
pub const PLACEHOLDER_TITLE: &str = "NOTITLE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackName {
    /// Uppercased assignment letters.
    pub letters: String,
    pub team: String,
    /// Lowercased suffix.
    pub suffix: String,
}

impl TrackName {
    /// Split the normalized title on its first run of digits. Anything that
    /// does not come out as exactly letters, digits, trailing letters is not
    /// a track.
    pub fn parse(title: &str) -> Option<Self> {
        let normalized: String = title
            .to_uppercase()
            .chars()
            .filter(|c| *c != ' ' && *c != '-')
            .collect();

        let start = normalized.find(|c: char| c.is_ascii_digit())?;
        let (letters, tail) = normalized.split_at(start);
        let digits = tail
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (team, suffix) = tail.split_at(digits);

        if letters.is_empty() || suffix.is_empty() || suffix.contains(|c: char| c.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            letters: letters.to_string(),
            team: team.to_string(),
            suffix: suffix.to_lowercase(),
        })
    }

    /// Name of the outing this track belongs to, e.g. `AA 101`.
    pub fn outing_name(&self) -> String {
        format!("{} {}", self.letters, self.team)
    }

    /// Canonical title for the mirrored line, e.g. `AA101a`.
    pub fn display_title(&self) -> String {
        format!("{}{}{}", self.letters, self.team, self.suffix)
    }

    pub fn color(&self) -> &'static str {
        track_color(&self.suffix)
    }
}

/// Palette color for a suffix. Single ASCII letters rotate through the
/// palette; anything else gets the fallback gray.
pub fn track_color(suffix: &str) -> &'static str {
    let mut chars = suffix.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            let index = (c.to_ascii_lowercase() as u8 - b'a') as usize;
            TRACK_PALETTE[index % TRACK_PALETTE.len()]
        }
        _ => FALLBACK_TRACK_COLOR,
    }
}

/// Outing title for an assignment title: uppercased, trailing space removed,
/// placeholder when blank.
pub fn outing_title(raw: &str) -> String {
    let title = raw.trim_end().to_uppercase();
    if title.trim().is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        title
    }
}

/// Strip a `:N` disambiguation suffix.
pub fn base_outing_name(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((base, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => base,
        _ => name,
    }
}

/// Disambiguation index of an outing name; 1 for the undecorated name.
pub fn outing_index(name: &str) -> u32 {
    name.rsplit_once(':')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(1)
}

pub fn is_placeholder(name: &str) -> bool {
    name.contains(PLACEHOLDER_TITLE)
}

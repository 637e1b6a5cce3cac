use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Camelot notation: "8A", "12b", "01A".
static CAMELOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<number>1[0-2]|0?[1-9])\s*(?P<letter>[ab])$").unwrap()
});

/// Standard notation: "Am", "F# minor", "Dbmaj", "E♭m", "C".
static STANDARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<root>[a-g])(?P<acc>[#b♯♭]?)\s*(?P<mode>minor|min|m|major|maj)?$")
        .unwrap()
});

/// A position on the Camelot wheel: number 1-12, A = minor, B = major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CamelotKey {
    number: u8,
    minor: bool,
}

impl CamelotKey {
    pub fn new(number: u8, minor: bool) -> Option<Self> {
        (1..=12).contains(&number).then_some(Self { number, minor })
    }

    pub fn is_minor(self) -> bool {
        self.minor
    }

    /// Parse either Camelot or standard key notation.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        parse_camelot(trimmed).or_else(|| parse_standard(trimmed))
    }

    /// Steps around the wheel between the two numbers (0-6), ignoring letter.
    pub fn wheel_distance(self, other: Self) -> u8 {
        let diff = (self.number as i16 - other.number as i16).unsigned_abs() as u8;
        diff.min(12 - diff)
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, if self.minor { 'A' } else { 'B' })
    }
}

impl TryFrom<String> for CamelotKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unrecognized key notation \"{value}\""))
    }
}

impl From<CamelotKey> for String {
    fn from(key: CamelotKey) -> Self {
        key.to_string()
    }
}

fn parse_camelot(raw: &str) -> Option<CamelotKey> {
    let caps = CAMELOT_RE.captures(raw)?;
    let number: u8 = caps["number"].parse().ok()?;
    let minor = caps["letter"].eq_ignore_ascii_case("a");
    CamelotKey::new(number, minor)
}

fn parse_standard(raw: &str) -> Option<CamelotKey> {
    let caps = STANDARD_RE.captures(raw)?;
    let natural = match caps["root"].to_ascii_uppercase().as_str() {
        "C" => 0,
        "D" => 2,
        "E" => 4,
        "F" => 5,
        "G" => 7,
        "A" => 9,
        "B" => 11,
        _ => return None,
    };
    let accidental: i32 = match caps.name("acc").map(|m| m.as_str()) {
        Some("#") | Some("♯") => 1,
        Some("b") | Some("B") | Some("♭") => -1,
        _ => 0,
    };
    let pitch_class = (natural + accidental).rem_euclid(12);
    let minor = caps
        .name("mode")
        .map(|m| m.as_str().to_ascii_lowercase())
        .is_some_and(|mode| mode.starts_with("min") || mode == "m");

    // Each fifth up is one step clockwise; A minor and C major sit at 8.
    let anchor = if minor { 9 } else { 0 };
    let steps = ((pitch_class - anchor).rem_euclid(12) * 7).rem_euclid(12);
    let number = ((steps + 7) % 12 + 1) as u8;
    CamelotKey::new(number, minor)
}

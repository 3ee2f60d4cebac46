//! OP-Code value objects.
//!
//! An OP-Code is a 6-character hierarchical address: school(2) · area(2) ·
//! point(2), alphabet `[A-Z0-9]`. Input is case-insensitive and normalized
//! to uppercase; prefix matching is the sole spatial routing primitive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const OP_CODE_LEN: usize = 6;

/// Prefix lengths a courier level may manage. Level 4 may manage the empty
/// prefix (whole system) or a single city character; level 3 a city
/// character; level 2 a school (2 chars); level 1 a school+area (4 chars).
pub const LEVEL_PREFIX_LEN: [usize; 4] = [4, 2, 1, 0];

fn valid_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit()
}

// ── OpCode ────────────────────────────────────────────────────

/// A full 6-character address, always stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OpCode(String);

impl OpCode {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let normalized = s.trim().to_ascii_uppercase();
        if normalized.len() != OP_CODE_LEN {
            return Err(CoreError::Validation(format!(
                "op-code must be {OP_CODE_LEN} characters, got {}",
                normalized.len()
            )));
        }
        if !normalized.chars().all(valid_char) {
            return Err(CoreError::Validation(format!(
                "op-code contains characters outside [A-Z0-9]: {normalized}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// School segment (characters 0..2).
    pub fn school(&self) -> &str {
        &self.0[0..2]
    }

    /// Area segment (characters 2..4).
    pub fn area(&self) -> &str {
        &self.0[2..4]
    }

    /// Point segment (characters 4..6).
    pub fn point(&self) -> &str {
        &self.0[4..6]
    }

    /// True iff this code starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &Prefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OpCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OpCode {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<OpCode> for String {
    fn from(code: OpCode) -> Self {
        code.0
    }
}

// ── Prefix ────────────────────────────────────────────────────

/// A leading OP-Code substring a courier is authorized to operate within.
/// The empty prefix is legal and matches every code (whole-system scope).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix(String);

impl Prefix {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let normalized = s.trim().to_ascii_uppercase();
        if normalized.len() > OP_CODE_LEN {
            return Err(CoreError::Validation(format!(
                "prefix longer than an op-code: {normalized}"
            )));
        }
        if !normalized.chars().all(valid_char) {
            return Err(CoreError::Validation(format!(
                "prefix contains characters outside [A-Z0-9]: {normalized}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prefix inclusion: true iff `inner` extends (or equals) `self`.
    pub fn contains(&self, inner: &Prefix) -> bool {
        inner.0.starts_with(&self.0)
    }

    /// Strict extension: `inner` extends `self` and is longer.
    pub fn strictly_contains(&self, inner: &Prefix) -> bool {
        self.contains(inner) && inner.0.len() > self.0.len()
    }

    /// The courier level whose managed scope has this width, if any.
    pub fn level(&self) -> Option<u8> {
        match self.0.len() {
            4 => Some(1),
            2 => Some(2),
            1 => Some(3),
            0 => Some(4),
            _ => None,
        }
    }

    /// Expected prefix width for a courier level. Level 4 may also hold a
    /// single city character, which `valid_for_level` accepts.
    pub fn len_for_level(level: u8) -> Option<usize> {
        match level {
            1..=4 => Some(LEVEL_PREFIX_LEN[level as usize - 1]),
            _ => None,
        }
    }

    pub fn valid_for_level(&self, level: u8) -> bool {
        match level {
            4 => self.0.len() <= 1,
            1..=3 => Some(self.0.len()) == Self::len_for_level(level),
            _ => false,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Prefix {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Prefix {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Prefix> for String {
    fn from(p: Prefix) -> Self {
        p.0
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case() {
        let code = OpCode::parse("pk5f3d").unwrap();
        assert_eq!(code.as_str(), "PK5F3D");
        assert_eq!(code.school(), "PK");
        assert_eq!(code.area(), "5F");
        assert_eq!(code.point(), "3D");
    }

    #[test]
    fn parse_rejects_bad_length_and_alphabet() {
        assert!(OpCode::parse("PK5F3").is_err());
        assert!(OpCode::parse("PK5F3DD").is_err());
        assert!(OpCode::parse("PK5F-D").is_err());
        assert!(OpCode::parse("").is_err());
    }

    #[test]
    fn prefix_matching() {
        let code = OpCode::parse("PK5F3D").unwrap();
        assert!(code.matches_prefix(&Prefix::parse("PK5F").unwrap()));
        assert!(code.matches_prefix(&Prefix::parse("PK").unwrap()));
        assert!(code.matches_prefix(&Prefix::parse("").unwrap()));
        assert!(!code.matches_prefix(&Prefix::parse("QH").unwrap()));
    }

    #[test]
    fn prefix_containment() {
        let school = Prefix::parse("PK").unwrap();
        let area = Prefix::parse("PK5F").unwrap();
        assert!(school.contains(&area));
        assert!(school.strictly_contains(&area));
        assert!(!area.strictly_contains(&school));
        assert!(!school.strictly_contains(&school));
    }

    #[test]
    fn level_of_prefix() {
        assert_eq!(Prefix::parse("PK5F").unwrap().level(), Some(1));
        assert_eq!(Prefix::parse("PK").unwrap().level(), Some(2));
        assert_eq!(Prefix::parse("P").unwrap().level(), Some(3));
        assert_eq!(Prefix::parse("").unwrap().level(), Some(4));
        assert_eq!(Prefix::parse("PK5").unwrap().level(), None);
    }

    #[test]
    fn level_four_accepts_city_char_or_empty() {
        assert!(Prefix::parse("P").unwrap().valid_for_level(4));
        assert!(Prefix::parse("").unwrap().valid_for_level(4));
        assert!(!Prefix::parse("PK").unwrap().valid_for_level(4));
        assert!(Prefix::parse("PK5F").unwrap().valid_for_level(1));
        assert!(!Prefix::parse("PK").unwrap().valid_for_level(1));
    }
}

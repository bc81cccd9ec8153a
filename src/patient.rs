//! Patient demographics used by the compatibility filter and the report header.

use serde::{Deserialize, Serialize};

/// Sex category. Parsed loosely by first letter (`m...` / `f...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Other,
}

impl Sex {
    /// Anything not starting with `m` or `f` (case-insensitive) is `Other`,
    /// which disables the sex-based compatibility rules.
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('m') => Sex::Male,
            Some('f') => Sex::Female,
            _ => Sex::Other,
        }
    }

    pub fn short_code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    #[serde(default)]
    pub name: Option<String>,
    /// Age as entered. Kept verbatim for the report; see [`PatientProfile::age_years`].
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub sex: Sex,
}

impl PatientProfile {
    pub fn new(name: Option<String>, age: Option<String>, sex: Sex) -> Self {
        Self { name, age, sex }
    }

    /// Numeric age, or `None` when missing or not an integer.
    pub fn age_years(&self) -> Option<i64> {
        self.age.as_deref().and_then(|raw| raw.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sex_matches_on_first_letter() {
        assert_eq!(Sex::parse_loose("Male"), Sex::Male);
        assert_eq!(Sex::parse_loose(" f"), Sex::Female);
        assert_eq!(Sex::parse_loose("FEMALE"), Sex::Female);
        assert_eq!(Sex::parse_loose("nonbinary"), Sex::Other);
        assert_eq!(Sex::parse_loose(""), Sex::Other);
    }

    #[test]
    fn malformed_age_is_none() {
        let p = PatientProfile::new(None, Some("forty".into()), Sex::Other);
        assert_eq!(p.age_years(), None);
        let p = PatientProfile::new(None, Some(" 42 ".into()), Sex::Other);
        assert_eq!(p.age_years(), Some(42));
    }
}

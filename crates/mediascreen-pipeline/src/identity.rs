//! Applicant identity and article content: the two immutable inputs of a run.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use mediascreen_types::{Result, ScreeningError};

/// Date formats accepted for a date of birth, tried in order.
///
/// Day-first wins over month-first for ambiguous slash dates.
const DOB_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parse a date of birth written in any of the supported formats.
pub fn parse_date_of_birth(input: &str) -> Result<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ScreeningError::InvalidInput("date of birth is empty".into()));
    }
    DOB_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            ScreeningError::InvalidInput(format!("unrecognised date of birth '{trimmed}'"))
        })
}

// ---------------------------------------------------------------------------
// ApplicantIdentity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicantIdentity {
    full_name: String,
    date_of_birth: NaiveDate,
}

impl ApplicantIdentity {
    pub fn new(full_name: &str, date_of_birth: NaiveDate) -> Result<Self> {
        let full_name = full_name.split_whitespace().collect::<Vec<_>>().join(" ");
        if full_name.is_empty() {
            return Err(ScreeningError::InvalidInput("applicant name is empty".into()));
        }
        if !full_name.chars().any(char::is_alphabetic) {
            return Err(ScreeningError::InvalidInput(format!(
                "applicant name '{full_name}' contains no letters"
            )));
        }
        Ok(Self {
            full_name,
            date_of_birth,
        })
    }

    /// Build from raw strings, parsing the date of birth.
    pub fn parse(full_name: &str, date_of_birth: &str) -> Result<Self> {
        Self::new(full_name, parse_date_of_birth(date_of_birth)?)
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn date_of_birth(&self) -> NaiveDate {
        self.date_of_birth
    }

    /// Completed years of age on `date`; zero for dates before birth.
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        let dob = self.date_of_birth;
        if date < dob {
            return 0;
        }
        let mut years = date.year() - dob.year();
        if (date.month(), date.day()) < (dob.month(), dob.day()) {
            years -= 1;
        }
        years.max(0) as u32
    }
}

// ---------------------------------------------------------------------------
// ArticleContent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleContent {
    text: String,
    source: Option<String>,
}

impl ArticleContent {
    /// Normalizes line endings and surrounding whitespace; empty text is rejected.
    pub fn new(text: &str, source: Option<String>) -> Result<Self> {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let text = text.trim();
        if text.is_empty() {
            return Err(ScreeningError::InvalidInput("article text is empty".into()));
        }
        Ok(Self {
            text: text.to_string(),
            source,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_supported_dob_formats() {
        let expected = ymd(1990, 5, 12);
        for input in [
            "1990-05-12",
            "1990/05/12",
            "12/05/1990",
            "12-05-1990",
            "12.05.1990",
            "May 12, 1990",
            "12 May 1990",
            "  1990-05-12 ",
        ] {
            assert_eq!(parse_date_of_birth(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn month_first_used_when_day_first_impossible() {
        assert_eq!(parse_date_of_birth("04/29/1938").unwrap(), ymd(1938, 4, 29));
    }

    #[test]
    fn rejects_bad_dob() {
        assert!(matches!(
            parse_date_of_birth("sometime in the 90s"),
            Err(ScreeningError::InvalidInput(_))
        ));
        assert!(parse_date_of_birth("   ").is_err());
        assert!(parse_date_of_birth("1990-13-40").is_err());
    }

    #[test]
    fn identity_collapses_whitespace() {
        let id = ApplicantIdentity::parse("  Jane \n Smith ", "1990-05-12").unwrap();
        assert_eq!(id.full_name(), "Jane Smith");
        assert_eq!(id.date_of_birth(), ymd(1990, 5, 12));
    }

    #[test]
    fn identity_rejects_empty_or_letterless_name() {
        assert!(ApplicantIdentity::new("", ymd(1990, 1, 1)).is_err());
        assert!(ApplicantIdentity::new("  ", ymd(1990, 1, 1)).is_err());
        assert!(ApplicantIdentity::new("123 -", ymd(1990, 1, 1)).is_err());
    }

    #[test]
    fn age_on_counts_completed_years() {
        let id = ApplicantIdentity::parse("Jane Smith", "1990-05-12").unwrap();
        assert_eq!(id.age_on(ymd(2023, 5, 11)), 32);
        assert_eq!(id.age_on(ymd(2023, 5, 12)), 33);
        assert_eq!(id.age_on(ymd(1980, 1, 1)), 0);
    }

    #[test]
    fn article_trims_and_normalizes_line_endings() {
        let article = ArticleContent::new("  line one\r\nline two \r", None).unwrap();
        assert_eq!(article.text(), "line one\nline two");
        assert!(article.source().is_none());
    }

    #[test]
    fn article_rejects_blank_text() {
        assert!(matches!(
            ArticleContent::new(" \n\t ", Some("https://example.com".into())),
            Err(ScreeningError::InvalidInput(_))
        ));
    }
}

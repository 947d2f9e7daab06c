//! Holder data read from the personal data file
//!
//! Both supported documents store eight UTF-8 records in the same order;
//! see [`PersonalData::from_records`].

use chrono::NaiveDate;
use derive_more::Display;
use tracing::warn;

/// Date format of the date records, e.g. `24 12 2030`
const DATE_FORMAT: &str = "%d %m %Y";
/// Characters of a formatted date
const DATE_LENGTH: usize = 10;

/// Number of records in the personal data file
pub const RECORD_COUNT: usize = 8;

/// Gender as printed on the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Gender {
    /// `M`
    #[display("M")]
    Male,
    /// `F`
    #[display("F")]
    Female,
}

impl Gender {
    fn from_record(record: &str) -> Option<Self> {
        match record {
            "M" => Some(Self::Male),
            "F" => Some(Self::Female),
            _ => None,
        }
    }

    /// Odd leading digits of a personal code are male, even are female
    fn from_personal_code(code: &str) -> Option<Self> {
        match code.chars().next()?.to_digit(10)? {
            1 | 3 | 5 | 7 => Some(Self::Male),
            2 | 4 | 6 | 8 => Some(Self::Female),
            _ => None,
        }
    }
}

/// Snapshot of the holder's data, taken once per read
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersonalData {
    /// Surname
    pub surname: String,
    /// Given names, space separated
    pub given_names: String,
    /// Gender, from the document or derived from the personal code
    pub gender: Option<Gender>,
    /// Citizenship as a three letter country code
    pub citizenship: String,
    /// Date of birth, from the document or derived from the personal code
    pub date_of_birth: Option<NaiveDate>,
    /// Place of birth when the document records one
    pub place_of_birth: Option<String>,
    /// Personal identification code
    pub personal_code: String,
    /// Document number
    pub document_number: String,
    /// Last day the document is valid
    pub expiry_date: Option<NaiveDate>,
}

impl PersonalData {
    /// Build from the trimmed records in file order:
    ///
    /// 1. surname
    /// 2. given names
    /// 3. gender
    /// 4. citizenship
    /// 5. date of birth (`dd MM yyyy`) followed by an optional place of birth
    /// 6. personal code
    /// 7. document number
    /// 8. expiry date (`dd MM yyyy`)
    ///
    /// Missing records are treated as empty. Dates that do not parse become `None`.
    pub fn from_records<S: AsRef<str>>(records: &[S]) -> Self {
        let record = |position: usize| {
            records
                .get(position - 1)
                .map(|r| r.as_ref().trim())
                .unwrap_or_default()
        };

        let personal_code = record(6);
        let gender = Gender::from_record(record(3))
            .or_else(|| Gender::from_personal_code(personal_code));

        let (date_of_birth, place_of_birth) = match record(5) {
            "" => (date_of_birth_from_personal_code(personal_code), None),
            birth => split_birth_record(birth),
        };

        let expiry = record(8);
        let expiry_date = parse_date(expiry);
        if expiry_date.is_none() && !expiry.is_empty() {
            warn!(expiry, "Could not parse expiry date");
        }

        Self {
            surname: record(1).to_owned(),
            given_names: record(2).to_owned(),
            gender,
            citizenship: record(4).to_owned(),
            date_of_birth,
            place_of_birth,
            personal_code: personal_code.to_owned(),
            document_number: record(7).to_owned(),
            expiry_date,
        }
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

fn split_birth_record(record: &str) -> (Option<NaiveDate>, Option<String>) {
    let Some(date) = record.get(..DATE_LENGTH) else {
        warn!(record, "Date of birth record too short");
        return (None, None);
    };

    let place = record[DATE_LENGTH..].trim();
    let place = (!place.is_empty()).then(|| place.to_owned());

    let date = parse_date(date);
    if date.is_none() {
        warn!(record, "Could not parse date of birth");
    }
    (date, place)
}

/// First digit gives the century, the next six are `YYMMDD`
fn date_of_birth_from_personal_code(code: &str) -> Option<NaiveDate> {
    let century = match code.chars().next()?.to_digit(10)? {
        1 | 2 => 1800,
        3 | 4 => 1900,
        5 | 6 => 2000,
        7 | 8 => 2100,
        _ => return None,
    };

    let field = |range: std::ops::Range<usize>| code.get(range)?.parse::<u32>().ok();
    let year = century + field(1..3)? as i32;
    NaiveDate::from_ymd_opt(year, field(3..5)?, field(5..7)?)
}

//! Egyptian national ID number decoder.
//!
//! A national ID is 14 digits: century (1), year (2-3), month (4-5),
//! day (6-7), governorate (8-9), sequence (10-12), gender parity (13)
//! and a check digit (14). Sequence and check digit are not read.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const NATIONAL_ID_LEN: usize = 14;
const UNKNOWN_GOVERNORATE: &str = "Unknown";

/// A governorate code and its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Governorate {
    pub code: &'static str,
    pub name: &'static str,
}

const fn gov(code: &'static str, name: &'static str) -> Governorate {
    Governorate { code, name }
}

static GOVERNORATES: [Governorate; 28] = [
    gov("01", "Cairo"),
    gov("02", "Alexandria"),
    gov("03", "Port Said"),
    gov("04", "Suez"),
    gov("11", "Damietta"),
    gov("12", "Dakahlia"),
    gov("13", "Ash Sharqia"),
    gov("14", "Kaliobeya"),
    gov("15", "Kafr El - Sheikh"),
    gov("16", "Gharbia"),
    gov("17", "Monoufia"),
    gov("18", "El Beheira"),
    gov("19", "Ismailia"),
    gov("21", "Giza"),
    gov("22", "Beni Suef"),
    gov("23", "Fayoum"),
    gov("24", "El Menia"),
    gov("25", "Assiut"),
    gov("26", "Sohag"),
    gov("27", "Qena"),
    gov("28", "Aswan"),
    gov("29", "Luxor"),
    gov("31", "Red Sea"),
    gov("32", "New Valley"),
    gov("33", "Matrouh"),
    gov("34", "North Sinai"),
    gov("35", "South Sinai"),
    gov("88", "Foreign"),
];

/// All known governorates, in code order.
pub fn governorates() -> &'static [Governorate] {
    &GOVERNORATES
}

/// Look up a governorate name by its two-character code.
///
/// Never fails: codes missing from the table resolve to `"Unknown"`.
pub fn governorate_name(code: &str) -> &'static str {
    GOVERNORATES
        .iter()
        .find(|g| g.code == code)
        .map(|g| g.name)
        .unwrap_or(UNKNOWN_GOVERNORATE)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid century digit: {0} (expected 2 or 3)")]
    InvalidCentury(u32),
    #[error("non-digit character {found:?} at position {position}")]
    NonDigit { position: usize, found: char },
    #[error("birth date {year:04}-{month:02}-{day:02} is not a calendar date")]
    InvalidDate { year: i32, month: u32, day: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    fn from_parity_digit(digit: u32) -> Self {
        if digit % 2 != 0 {
            Gender::Male
        } else {
            Gender::Female
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields parsed out of a 14-character national ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NationalId {
    pub century_digit: u32,
    /// Full four-digit year (century applied).
    pub year: i32,
    /// Month as written on the card, not range-checked.
    pub month: u32,
    /// Day as written on the card, not range-checked.
    pub day: u32,
    pub governorate_code: String,
    pub gender: Gender,
}

impl NationalId {
    /// Parse a national ID. Returns `Ok(None)` when the input is not 14 characters.
    pub fn parse(id_number: &str) -> Result<Option<Self>, DecodeError> {
        let chars: Vec<char> = id_number.chars().collect();
        if chars.len() != NATIONAL_ID_LEN {
            return Ok(None);
        }

        let digit = |index: usize| -> Result<u32, DecodeError> {
            let c = chars[index];
            c.to_digit(10).ok_or(DecodeError::NonDigit {
                position: index + 1,
                found: c,
            })
        };
        let pair = |index: usize| -> Result<u32, DecodeError> {
            Ok(digit(index)? * 10 + digit(index + 1)?)
        };

        let century_digit = digit(0)?;
        let yy = pair(1)? as i32;
        let month = pair(3)?;
        let day = pair(5)?;
        let gender_digit = digit(12)?;

        let year = match century_digit {
            2 => 1900 + yy,
            3 => 2000 + yy,
            other => return Err(DecodeError::InvalidCentury(other)),
        };

        Ok(Some(Self {
            century_digit,
            year,
            month,
            day,
            governorate_code: chars[7..9].iter().collect(),
            gender: Gender::from_parity_digit(gender_digit),
        }))
    }

    /// Birth date formatted as `YYYY-MM-DD`, zero-padded, without calendar validation.
    pub fn birth_date_string(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    /// Calendar-checked birth date. `None` for dates like month 13 or February 30.
    pub fn birth_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    pub fn governorate(&self) -> &'static str {
        governorate_name(&self.governorate_code)
    }
}

/// Fields derived from a national ID. All empty when the ID could not be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedId {
    pub birth_date: String,
    pub governorate: String,
    pub gender: String,
}

impl DecodedId {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.birth_date.is_empty() && self.governorate.is_empty() && self.gender.is_empty()
    }
}

impl From<&NationalId> for DecodedId {
    fn from(id: &NationalId) -> Self {
        Self {
            birth_date: id.birth_date_string(),
            governorate: id.governorate().to_string(),
            gender: id.gender.to_string(),
        }
    }
}

/// Decode a national ID into birth date, governorate and gender.
///
/// Input that is not exactly 14 characters yields the empty result, not an error.
/// An invalid century digit or a non-digit in a parsed position is an error.
pub fn decode(id_number: &str) -> Result<DecodedId, DecodeError> {
    Ok(NationalId::parse(id_number)?
        .as_ref()
        .map(DecodedId::from)
        .unwrap_or_default())
}

/// Like [`decode`], but also rejects birth dates that do not exist on the calendar.
pub fn decode_strict(id_number: &str) -> Result<DecodedId, DecodeError> {
    let Some(id) = NationalId::parse(id_number)? else {
        return Ok(DecodedId::empty());
    };
    if id.birth_date().is_none() {
        return Err(DecodeError::InvalidDate {
            year: id.year,
            month: id.month,
            day: id.day,
        });
    }
    Ok(DecodedId::from(&id))
}

/// Decode, converting any failure into the empty result.
///
/// Together with [`decode_strict_or_empty`] this is the only place decode
/// errors are absorbed; extraction never aborts because of a malformed digit
/// string.
pub fn decode_or_empty(id_number: Option<&str>) -> DecodedId {
    absorb(id_number, decode)
}

/// [`decode_strict`] with the same failure handling as [`decode_or_empty`].
pub fn decode_strict_or_empty(id_number: Option<&str>) -> DecodedId {
    absorb(id_number, decode_strict)
}

fn absorb(
    id_number: Option<&str>,
    decoder: fn(&str) -> Result<DecodedId, DecodeError>,
) -> DecodedId {
    let Some(id_number) = id_number else {
        return DecodedId::empty();
    };
    match decoder(id_number) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(id = id_number, error = %e, "failed to decode national ID");
            DecodedId::empty()
        }
    }
}

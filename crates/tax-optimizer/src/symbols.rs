//! Option Symbol Classification
//!
//! Recognizes listed-option tickers and splits them into underlying,
//! expiration, type and strike. Everything else is an equity symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Length of the zero-padded strike field in a strict OCC symbol
const OCC_STRIKE_DIGITS: usize = 8;

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Call or put
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "CALL"),
            OptionType::Put => write!(f, "PUT"),
        }
    }
}

/// Expiration exactly as encoded in the symbol.
///
/// Month and day are not validated against the calendar, so `240431` is kept
/// as April 31st.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Expiry {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl Expiry {
    /// Calendar date, when the encoded month/day actually exists
    pub fn to_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl std::fmt::Display for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let month = self
            .month
            .checked_sub(1)
            .and_then(|m| MONTH_ABBREVIATIONS.get(m as usize));
        match month {
            Some(name) => write!(f, "{} {}, {:02}", name, self.day, self.year % 100),
            None => write!(f, "{:02}/{}/{:02}", self.month, self.day, self.year % 100),
        }
    }
}

/// Parsed components of an option symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub underlying: String,
    pub expiration: Expiry,
    pub option_type: OptionType,
    pub strike: f64,
}

impl OptionDescriptor {
    /// Parse `symbol` as an option.
    ///
    /// Accepts a leading `-`, interior whitespace and any case. Two layouts are
    /// recognized, both `UNDERLYING YYMMDD C|P STRIKE`:
    /// - strict OCC, strike as 8 digits in thousandths (`AAPL250117C00200000`)
    /// - short form, strike as a plain decimal (`AAPL250117C200`)
    pub fn parse(symbol: &str) -> Option<Self> {
        let clean: String = symbol
            .strip_prefix('-')
            .unwrap_or(symbol)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        let letters = clean.bytes().take_while(u8::is_ascii_uppercase).count();
        if letters == 0 {
            return None;
        }
        let (underlying, rest) = clean.split_at(letters);

        let date = rest.get(..6)?;
        if !date.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let option_type = match rest.as_bytes().get(6)? {
            b'C' => OptionType::Call,
            b'P' => OptionType::Put,
            _ => return None,
        };
        let strike = parse_strike(&rest[7..])?;

        Some(Self {
            underlying: underlying.to_string(),
            expiration: Expiry {
                year: 2000 + date[0..2].parse::<i32>().ok()?,
                month: date[2..4].parse().ok()?,
                day: date[4..6].parse().ok()?,
            },
            option_type,
            strike,
        })
    }

    /// `"{underlying} {expiry} ${strike} {CALL|PUT}"`
    pub fn display_name(&self) -> String {
        format!(
            "{} {} ${} {}",
            self.underlying, self.expiration, self.strike, self.option_type
        )
    }
}

fn parse_strike(text: &str) -> Option<f64> {
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if text.len() == OCC_STRIKE_DIGITS && is_digits(text) {
        return text.parse::<u64>().ok().map(|raw| raw as f64 / 1000.0);
    }

    // Short form: digits, optionally followed by a '.' and more digits
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if !is_digits(whole) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<f64>().ok()
}

pub fn is_option(symbol: &str) -> bool {
    OptionDescriptor::parse(symbol).is_some()
}

/// Underlying of an option symbol, or the symbol itself for equities
pub fn underlying_of(symbol: &str) -> String {
    OptionDescriptor::parse(symbol)
        .map(|d| d.underlying)
        .unwrap_or_else(|| symbol.to_string())
}

/// Human-readable name for option symbols; equities are returned unchanged
pub fn display_symbol(symbol: &str) -> String {
    OptionDescriptor::parse(symbol)
        .map(|d| d.display_name())
        .unwrap_or_else(|| symbol.to_string())
}

//! Reference-date layouts for date and datetime format hints.
//!
//! Format hints are written against the reference moment
//! `Mon Jan 2 15:04:05 MST 2006`: `2006-01-02` means ISO dates,
//! `02.01.2006` means day-first dotted dates, `Jan _2 15:04:05` a syslog
//! stamp, and so on. A layout is translated once into tokens and then applied
//! strictly: zero-padded fields take exactly their width, `2006` takes four
//! digits, literals must match exactly, whitespace is only accepted where the
//! layout has some and no trailing input is accepted.

use std::iter;

use chrono::format::{self, Fixed, Item, ParseResult, Parsed};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Layout chunks, longest first within each leading character.
const CHUNKS: &[(&str, Chunk)] = &[
    ("January", Chunk::Text(Fixed::LongMonthName)),
    ("Jan", Chunk::Text(Fixed::ShortMonthName)),
    ("Monday", Chunk::Text(Fixed::LongWeekdayName)),
    ("Mon", Chunk::Text(Fixed::ShortWeekdayName)),
    ("MST", Chunk::Text(Fixed::TimezoneName)),
    ("2006", Chunk::Number(Field::Year, Width::Exact(4))),
    ("002", Chunk::Number(Field::Ordinal, Width::Exact(3))),
    ("01", Chunk::Number(Field::Month, Width::Exact(2))),
    ("02", Chunk::Number(Field::Day, Width::Exact(2))),
    ("03", Chunk::Number(Field::Hour12, Width::Exact(2))),
    ("04", Chunk::Number(Field::Minute, Width::Exact(2))),
    ("05", Chunk::Number(Field::Second, Width::Exact(2))),
    ("06", Chunk::Number(Field::YearMod100, Width::Exact(2))),
    ("15", Chunk::Number(Field::Hour, Width::UpTo(2))),
    ("1", Chunk::Number(Field::Month, Width::UpTo(2))),
    ("_2", Chunk::Number(Field::Day, Width::SpacePadded)),
    ("2", Chunk::Number(Field::Day, Width::UpTo(2))),
    ("3", Chunk::Number(Field::Hour12, Width::UpTo(2))),
    ("4", Chunk::Number(Field::Minute, Width::UpTo(2))),
    ("5", Chunk::Number(Field::Second, Width::UpTo(2))),
    ("PM", Chunk::AmPm { upper: true }),
    ("pm", Chunk::AmPm { upper: false }),
    ("Z07:00", Chunk::Text(Fixed::TimezoneOffsetColonZ)),
    ("Z0700", Chunk::Text(Fixed::TimezoneOffsetZ)),
    ("-07:00", Chunk::Text(Fixed::TimezoneOffsetColon)),
    ("-0700", Chunk::Text(Fixed::TimezoneOffset)),
    ("-07", Chunk::Text(Fixed::TimezoneOffset)),
    (".000000000", Chunk::Fraction { digits: 9, exact: true }),
    (".000000", Chunk::Fraction { digits: 6, exact: true }),
    (".000", Chunk::Fraction { digits: 3, exact: true }),
    (".999999999", Chunk::Fraction { digits: 9, exact: false }),
    (".999999", Chunk::Fraction { digits: 9, exact: false }),
    (".999", Chunk::Fraction { digits: 9, exact: false }),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Year,
    YearMod100,
    Month,
    Day,
    Ordinal,
    Hour,
    Hour12,
    Minute,
    Second,
}

impl Field {
    fn is_time(self) -> bool {
        matches!(
            self,
            Field::Hour | Field::Hour12 | Field::Minute | Field::Second
        )
    }

    fn set(self, parsed: &mut Parsed, value: i64) -> ParseResult<()> {
        match self {
            Field::Year => parsed.set_year(value),
            Field::YearMod100 => parsed.set_year_mod_100(value),
            Field::Month => parsed.set_month(value),
            Field::Day => parsed.set_day(value),
            Field::Ordinal => parsed.set_ordinal(value),
            Field::Hour => parsed.set_hour(value),
            Field::Hour12 => parsed.set_hour12(value),
            Field::Minute => parsed.set_minute(value),
            Field::Second => parsed.set_second(value),
        }
    }
}

/// How many digits a numeric field consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Exact(usize),
    UpTo(usize),
    /// One or two digits, optionally after a single space (`_2`).
    SpacePadded,
}

#[derive(Debug, Clone)]
enum Chunk {
    Number(Field, Width),
    Fraction { digits: usize, exact: bool },
    AmPm { upper: bool },
    Text(Fixed),
}

#[derive(Debug, Clone)]
enum Token {
    Literal(String),
    /// A run of spaces in the layout matches a run of at least one space.
    Space,
    Chunk(Chunk),
}

/// A translated layout, ready to parse values.
#[derive(Debug, Clone)]
pub struct DateLayout {
    tokens: Vec<Token>,
    has_time: bool,
    has_hour12: bool,
    has_ampm: bool,
}

impl DateLayout {
    pub fn parse(layout: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut has_time = false;
        let mut has_hour12 = false;
        let mut has_ampm = false;
        let mut rest = layout;

        while let Some(ch) = rest.chars().next() {
            if ch == ' ' {
                flush_literal(&mut tokens, &mut literal);
                tokens.push(Token::Space);
                rest = rest.trim_start_matches(' ');
                continue;
            }
            let matched = CHUNKS
                .iter()
                .find(|(token, _)| rest.starts_with(token) && !is_year_suffix(token, rest));
            match matched {
                Some((token, chunk)) => {
                    flush_literal(&mut tokens, &mut literal);
                    match chunk {
                        Chunk::Number(field, _) => {
                            has_time |= field.is_time();
                            has_hour12 |= *field == Field::Hour12;
                        }
                        Chunk::Fraction { .. } => has_time = true,
                        Chunk::AmPm { .. } => {
                            has_time = true;
                            has_ampm = true;
                        }
                        Chunk::Text(_) => {}
                    }
                    tokens.push(Token::Chunk(chunk.clone()));
                    rest = &rest[token.len()..];
                }
                None => {
                    literal.push(ch);
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }
        flush_literal(&mut tokens, &mut literal);

        DateLayout {
            tokens,
            has_time,
            has_hour12,
            has_ampm,
        }
    }

    pub fn has_time(&self) -> bool {
        self.has_time
    }

    fn parse_fields(&self, value: &str) -> Option<Parsed> {
        let mut parsed = Parsed::new();
        let mut rest = value;
        for token in &self.tokens {
            rest = match token {
                Token::Literal(text) => rest.strip_prefix(text.as_str())?,
                Token::Space => {
                    let trimmed = rest.trim_start_matches(' ');
                    if trimmed.len() == rest.len() {
                        return None;
                    }
                    trimmed
                }
                Token::Chunk(Chunk::Number(field, width)) => {
                    let (number, remainder) = scan_number(rest, *width)?;
                    field.set(&mut parsed, number).ok()?;
                    remainder
                }
                Token::Chunk(Chunk::Fraction { digits, exact }) => {
                    scan_fraction(&mut parsed, rest, *digits, *exact)?
                }
                Token::Chunk(Chunk::AmPm { upper }) => {
                    let (am, pm) = if *upper { ("AM", "PM") } else { ("am", "pm") };
                    if let Some(remainder) = rest.strip_prefix(am) {
                        parsed.set_ampm(false).ok()?;
                        remainder
                    } else {
                        let remainder = rest.strip_prefix(pm)?;
                        parsed.set_ampm(true).ok()?;
                        remainder
                    }
                }
                Token::Chunk(Chunk::Text(fixed)) => format::parse_and_remainder(
                    &mut parsed,
                    rest,
                    iter::once(Item::Fixed(fixed.clone())),
                )
                .ok()?,
            };
        }
        if !rest.is_empty() {
            return None;
        }
        // A twelve hour clock without a marker reads as AM.
        if self.has_hour12 && !self.has_ampm {
            parsed.set_ampm(false).ok()?;
        }
        Some(parsed)
    }

    pub fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        self.parse_fields(value)?.to_naive_date().ok()
    }

    /// Parses a timestamp; layouts without time fields yield midnight.
    pub fn parse_datetime(&self, value: &str) -> Option<NaiveDateTime> {
        let parsed = self.parse_fields(value)?;
        let date = parsed.to_naive_date().ok()?;
        let time = if self.has_time {
            parsed.to_naive_time().ok()?
        } else {
            NaiveTime::default()
        };
        Some(date.and_time(time))
    }
}

fn flush_literal(tokens: &mut Vec<Token>, literal: &mut String) {
    if !literal.is_empty() {
        tokens.push(Token::Literal(std::mem::take(literal)));
    }
}

/// `_2006` is an underscore followed by a four digit year, not a padded day.
fn is_year_suffix(token: &str, rest: &str) -> bool {
    token == "_2" && rest.starts_with("_2006")
}

fn scan_number(value: &str, width: Width) -> Option<(i64, &str)> {
    let (min, max, value) = match width {
        Width::Exact(n) => (n, n, value),
        Width::UpTo(n) => (1, n, value),
        Width::SpacePadded => (1, 2, value.strip_prefix(' ').unwrap_or(value)),
    };
    let digits = value
        .bytes()
        .take(max)
        .take_while(u8::is_ascii_digit)
        .count();
    if digits < min {
        return None;
    }
    let number = value[..digits].parse().ok()?;
    Some((number, &value[digits..]))
}

/// `.000` requires exactly that many digits; `.999` makes the fraction optional.
fn scan_fraction<'a>(
    parsed: &mut Parsed,
    value: &'a str,
    digits: usize,
    exact: bool,
) -> Option<&'a str> {
    let after_dot = match value.strip_prefix('.') {
        Some(after_dot) => after_dot,
        None if exact => return None,
        None => return Some(value),
    };
    let found = after_dot
        .bytes()
        .take(digits)
        .take_while(u8::is_ascii_digit)
        .count();
    if found == 0 && !exact {
        return Some(value);
    }
    if found == 0 || (exact && found != digits) {
        return None;
    }
    let fraction = &after_dot[..found];
    let nanos: i64 = format!("{fraction:0<9}").parse().ok()?;
    parsed.set_nanosecond(nanos).ok()?;
    Some(&after_dot[found..])
}

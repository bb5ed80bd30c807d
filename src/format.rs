//! printf-style rendering of tag values.
//!
//! Tag payloads are configured with C format strings such as `%.1f` or `%d V`. A format holds
//! literal text and at most one conversion, which receives the scaled tag value. The supported
//! subset is:
//!
//! * flags `-`, `+`, space, `0` and `#`
//! * a field width and a `.precision`
//! * conversions `f F e E g G d i u o x X`, plus `%%` for a literal percent sign
//!
//! Length modifiers (`l`, `h`, ...) are accepted and ignored since the value is always a
//! double. Integer conversions truncate toward zero.

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Default payload format.
pub const DEFAULT_FORMAT: &str = "%f";

const LENGTH_MODIFIERS: &[char] = &['h', 'l', 'L', 'q', 'j', 'z', 't'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Format ends inside a conversion")]
    Incomplete,
    #[error("Unsupported conversion '%{0}'")]
    Unsupported(char),
    #[error("Format may contain only one conversion")]
    TooManyConversions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Fixed,
    Exponent,
    General,
    Signed,
    Unsigned,
    Octal,
    Hex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alternate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversion {
    flags: Flags,
    width: usize,
    precision: Option<usize>,
    kind: Kind,
    upper: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Value(Conversion),
}

/// A parsed payload format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ValueFormat {
    source: String,
    pieces: Vec<Piece>,
}

impl ValueFormat {
    pub fn parse(format: &str) -> Result<Self, FormatError> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut conversions = 0;
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            let mut flags = Flags::default();
            while let Some(&c) = chars.peek() {
                match c {
                    '-' => flags.left = true,
                    '+' => flags.plus = true,
                    ' ' => flags.space = true,
                    '0' => flags.zero = true,
                    '#' => flags.alternate = true,
                    _ => break,
                }
                chars.next();
            }

            let width = take_number(&mut chars).unwrap_or(0);
            let precision = if chars.peek() == Some(&'.') {
                chars.next();
                Some(take_number(&mut chars).unwrap_or(0))
            } else {
                None
            };
            while chars.peek().is_some_and(|c| LENGTH_MODIFIERS.contains(c)) {
                chars.next();
            }

            let conversion = chars.next().ok_or(FormatError::Incomplete)?;
            let kind = match conversion.to_ascii_lowercase() {
                'f' => Kind::Fixed,
                'e' => Kind::Exponent,
                'g' => Kind::General,
                'd' | 'i' if conversion.is_ascii_lowercase() => Kind::Signed,
                'u' if conversion.is_ascii_lowercase() => Kind::Unsigned,
                'o' if conversion.is_ascii_lowercase() => Kind::Octal,
                'x' => Kind::Hex,
                _ => return Err(FormatError::Unsupported(conversion)),
            };

            conversions += 1;
            if conversions > 1 {
                return Err(FormatError::TooManyConversions);
            }
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Value(Conversion {
                flags,
                width,
                precision,
                kind,
                upper: conversion.is_ascii_uppercase(),
            }));
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: format.to_string(),
            pieces,
        })
    }

    /// The format string as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render `value` into a payload.
    pub fn render(&self, value: f64) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Value(conversion) => out.push_str(&conversion.render(value)),
            }
        }
        out
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        Self {
            source: DEFAULT_FORMAT.to_string(),
            pieces: vec![Piece::Value(Conversion {
                flags: Flags::default(),
                width: 0,
                precision: None,
                kind: Kind::Fixed,
                upper: false,
            })],
        }
    }
}

impl FromStr for ValueFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ValueFormat {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl core::fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.source)
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut number: Option<usize> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        number = Some(number.unwrap_or(0).saturating_mul(10).saturating_add(digit as usize));
    }
    number
}

impl Conversion {
    fn render(&self, value: f64) -> String {
        let (negative, prefix, body, numeric) = match self.kind {
            Kind::Fixed | Kind::Exponent | Kind::General => {
                let negative = value.is_sign_negative() && !value.is_nan();
                let body = self.render_float(value.abs());
                (negative, "", body, value.is_finite())
            }
            Kind::Signed => {
                let n = value.trunc() as i64;
                let digits = self.pad_digits(n.unsigned_abs().to_string());
                (n < 0, "", digits, true)
            }
            Kind::Unsigned | Kind::Octal | Kind::Hex => {
                let bits = value.trunc() as i64 as u64;
                let digits = match self.kind {
                    Kind::Octal => format!("{bits:o}"),
                    Kind::Hex if self.upper => format!("{bits:X}"),
                    Kind::Hex => format!("{bits:x}"),
                    _ => bits.to_string(),
                };
                let mut digits = self.pad_digits(digits);
                let mut prefix = "";
                if self.flags.alternate && bits != 0 {
                    match self.kind {
                        Kind::Hex if self.upper => prefix = "0X",
                        Kind::Hex => prefix = "0x",
                        Kind::Octal if !digits.starts_with('0') => digits.insert(0, '0'),
                        _ => {}
                    }
                }
                // Signs only apply to signed conversions.
                return self.justify("", prefix, digits, true);
            }
        };

        let sign = if negative {
            "-"
        } else if self.flags.plus {
            "+"
        } else if self.flags.space {
            " "
        } else {
            ""
        };
        self.justify(sign, prefix, body, numeric)
    }

    fn render_float(&self, value: f64) -> String {
        if value.is_infinite() {
            return if self.upper { "INF" } else { "inf" }.to_string();
        }
        if value.is_nan() {
            return if self.upper { "NAN" } else { "nan" }.to_string();
        }
        let precision = self.precision.unwrap_or(6);
        let alternate = self.flags.alternate;
        match self.kind {
            Kind::Exponent => exponent(value, precision, self.upper, alternate),
            Kind::General => general(value, precision, self.upper, alternate),
            _ => {
                let mut s = format!("{value:.precision$}");
                if alternate && precision == 0 {
                    s.push('.');
                }
                s
            }
        }
    }

    /// Integer precision is a minimum digit count.
    fn pad_digits(&self, digits: String) -> String {
        match self.precision {
            Some(0) if digits == "0" => String::new(),
            Some(precision) if digits.len() < precision => {
                format!("{}{digits}", "0".repeat(precision - digits.len()))
            }
            _ => digits,
        }
    }

    fn justify(&self, sign: &str, prefix: &str, body: String, numeric: bool) -> String {
        let len = sign.len() + prefix.len() + body.len();
        if len >= self.width {
            return format!("{sign}{prefix}{body}");
        }
        let fill = self.width - len;
        let integer = !matches!(self.kind, Kind::Fixed | Kind::Exponent | Kind::General);
        let zero_pad = self.flags.zero
            && !self.flags.left
            && numeric
            && !(integer && self.precision.is_some());

        if self.flags.left {
            format!("{sign}{prefix}{body}{}", " ".repeat(fill))
        } else if zero_pad {
            format!("{sign}{prefix}{}{body}", "0".repeat(fill))
        } else {
            format!("{}{sign}{prefix}{body}", " ".repeat(fill))
        }
    }
}

/// `%e` style: one leading digit and an exponent of at least two digits.
fn exponent(value: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let rendered = format!("{value:.precision$e}");
    let (mantissa, exp) = split_exponent(&rendered);
    let mut out = mantissa.to_string();
    if alternate && precision == 0 {
        out.push('.');
    }
    out.push(if upper { 'E' } else { 'e' });
    out.push(if exp < 0 { '-' } else { '+' });
    out.push_str(&format!("{:02}", exp.unsigned_abs()));
    out
}

/// `%g` style: the shorter of `%e` and `%f` for the requested significant digits.
fn general(value: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let precision = precision.max(1);
    let exp = if value == 0.0 {
        0
    } else {
        let digits = precision - 1;
        split_exponent(&format!("{value:.digits$e}")).1
    };

    let rendered = if exp >= -4 && exp < precision as i32 {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{value:.decimals$}")
    } else {
        exponent(value, precision - 1, upper, alternate)
    };
    if alternate {
        return rendered;
    }

    match rendered.find(['e', 'E']) {
        Some(pos) => {
            let (mantissa, exp) = rendered.split_at(pos);
            format!("{}{exp}", trim_fraction(mantissa))
        }
        None => trim_fraction(&rendered).to_string(),
    }
}

fn split_exponent(rendered: &str) -> (&str, i32) {
    match rendered.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (rendered, 0),
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

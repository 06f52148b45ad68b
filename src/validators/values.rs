//! Typed values of the built-in simple types
//!
//! [`parse_builtin`] maps a whitespace-normalized lexical form to its value
//! in the value space of a built-in. Values of different primitives never
//! compare or test equal.

use crate::error::{Error, Result};
use crate::names::{is_valid_language, is_valid_name, is_valid_ncname, is_valid_nmtoken};
use crate::namespaces::{NamespaceResolver, QName};
use crate::validators::builtins::Builtin;
use crate::validators::datetime::{DateTimeKind, DateTimeValue, DurationValue};
use base64::Engine;
use once_cell::sync::Lazy;
use bigdecimal::BigDecimal;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)$").unwrap());
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").unwrap());
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?|INF|-INF|NaN)$").unwrap()
});
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[0-9a-fA-F]{2})*$").unwrap());

/// A value in the value space of some simple type
#[derive(Debug, Clone)]
pub enum XsdValue {
    /// `string` and everything derived from it
    String(String),
    /// `boolean`
    Boolean(bool),
    /// `decimal` and the integer family, at arbitrary precision
    Decimal(BigDecimal),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `duration`
    Duration(DurationValue),
    /// The date/time primitives
    DateTime(DateTimeValue),
    /// `hexBinary`
    HexBinary(Vec<u8>),
    /// `base64Binary`
    Base64Binary(Vec<u8>),
    /// `anyURI`
    AnyUri(String),
    /// `QName`
    QName(QName),
    /// `NOTATION`
    Notation(QName),
    /// A list type's items
    List(Vec<XsdValue>),
}

/// Hashable identity of a value, used for key and unique tuples
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    /// String-family value
    String(String),
    /// Boolean
    Boolean(bool),
    /// Normalized decimal text
    Decimal(String),
    /// Float bits (zeros and NaNs folded)
    Float(u32),
    /// Double bits (zeros and NaNs folded)
    Double(u64),
    /// Months and normalized seconds
    Duration(i64, String),
    /// Kind, timeline seconds and timezone presence
    DateTime(DateTimeKind, String, bool),
    /// hexBinary bytes
    HexBinary(Vec<u8>),
    /// base64Binary bytes
    Base64Binary(Vec<u8>),
    /// anyURI
    AnyUri(String),
    /// QName
    QName(QName),
    /// NOTATION
    Notation(QName),
    /// List items
    List(Vec<ValueKey>),
}

impl XsdValue {
    /// Measure used by the length facets
    pub fn length(&self) -> Option<usize> {
        match self {
            XsdValue::String(s) | XsdValue::AnyUri(s) => Some(s.chars().count()),
            XsdValue::HexBinary(b) | XsdValue::Base64Binary(b) => Some(b.len()),
            XsdValue::List(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Equality in the value space
    pub fn value_eq(&self, other: &XsdValue) -> bool {
        use XsdValue::*;
        match (self, other) {
            (String(a), String(b)) | (AnyUri(a), AnyUri(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (Float(a), Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Double(a), Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Duration(a), Duration(b)) => a.value_eq(b),
            (DateTime(a), DateTime(b)) => a.value_eq(b),
            (HexBinary(a), HexBinary(b)) | (Base64Binary(a), Base64Binary(b)) => a == b,
            (QName(a), QName(b)) | (Notation(a), Notation(b)) => a == b,
            (List(a), List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.value_eq(y))
            }
            _ => false,
        }
    }

    /// Order in the value space; `None` when the values are incomparable
    pub fn partial_cmp_value(&self, other: &XsdValue) -> Option<Ordering> {
        use XsdValue::*;
        match (self, other) {
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Duration(a), Duration(b)) => a.partial_cmp_value(b),
            (DateTime(a), DateTime(b)) => a.partial_cmp_value(b),
            _ => None,
        }
    }

    /// Hashable identity consistent with [`XsdValue::value_eq`]
    pub fn key(&self) -> ValueKey {
        match self {
            XsdValue::String(s) => ValueKey::String(s.clone()),
            XsdValue::Boolean(b) => ValueKey::Boolean(*b),
            XsdValue::Decimal(d) => ValueKey::Decimal(canonical_decimal(d)),
            XsdValue::Float(f) => ValueKey::Float(if *f == 0.0 {
                0
            } else if f.is_nan() {
                f32::NAN.to_bits()
            } else {
                f.to_bits()
            }),
            XsdValue::Double(f) => ValueKey::Double(if *f == 0.0 {
                0
            } else if f.is_nan() {
                f64::NAN.to_bits()
            } else {
                f.to_bits()
            }),
            XsdValue::Duration(d) => ValueKey::Duration(d.months, d.seconds.normalize().to_string()),
            XsdValue::DateTime(dt) => {
                let (kind, seconds, zoned) = dt.key();
                ValueKey::DateTime(kind, seconds, zoned)
            }
            XsdValue::HexBinary(b) => ValueKey::HexBinary(b.clone()),
            XsdValue::Base64Binary(b) => ValueKey::Base64Binary(b.clone()),
            XsdValue::AnyUri(s) => ValueKey::AnyUri(s.clone()),
            XsdValue::QName(q) => ValueKey::QName(q.clone()),
            XsdValue::Notation(q) => ValueKey::Notation(q.clone()),
            XsdValue::List(items) => ValueKey::List(items.iter().map(XsdValue::key).collect()),
        }
    }

    /// Canonical lexical form
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

fn canonical_decimal(d: &BigDecimal) -> String {
    let (unscaled, scale) = d.normalized().as_bigint_and_exponent();
    let unscaled = unscaled.to_string();
    let (sign, digits) = match unscaled.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", unscaled.as_str()),
    };
    if digits == "0" {
        return "0".to_string();
    }
    if scale <= 0 {
        return format!("{}{}{}", sign, digits, "0".repeat(scale.unsigned_abs() as usize));
    }
    let scale = scale as usize;
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, whole, fraction)
}

fn canonical_float(v: f64, text: String) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    // Rust prints "1E2"; the canonical mantissa always carries a fraction
    match text.split_once('E') {
        Some((mantissa, exp)) if !mantissa.contains('.') => format!("{}.0E{}", mantissa, exp),
        _ => text,
    }
}

impl fmt::Display for XsdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XsdValue::String(s) | XsdValue::AnyUri(s) => f.write_str(s),
            XsdValue::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            XsdValue::Decimal(d) => f.write_str(&canonical_decimal(d)),
            XsdValue::Float(v) => f.write_str(&canonical_float(*v as f64, format!("{:E}", v))),
            XsdValue::Double(v) => f.write_str(&canonical_float(*v, format!("{:E}", v))),
            XsdValue::Duration(d) => write!(f, "{}", d),
            XsdValue::DateTime(dt) => write!(f, "{}", dt),
            XsdValue::HexBinary(bytes) => {
                for byte in bytes {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            XsdValue::Base64Binary(bytes) => {
                f.write_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            XsdValue::QName(q) | XsdValue::Notation(q) => write!(f, "{}", q),
            XsdValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

fn invalid(s: &str, b: Builtin) -> Error {
    Error::value(format!("'{}' is not a valid {}", s, b))
}

/// Parse a decimal lexical form (already checked against the grammar)
fn parse_decimal(s: &str, b: Builtin) -> Result<BigDecimal> {
    let unsigned = s.strip_prefix('+').unwrap_or(s);
    let mut text = String::with_capacity(unsigned.len() + 1);
    let (sign, digits) = match unsigned.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", unsigned),
    };
    text.push_str(sign);
    if digits.starts_with('.') {
        text.push('0');
    }
    text.push_str(digits.strip_suffix('.').unwrap_or(digits));
    BigDecimal::from_str(&text).map_err(|_| invalid(s, b))
}

fn parse_double(s: &str, b: Builtin) -> Result<f64> {
    match s {
        "INF" => return Ok(f64::INFINITY),
        "-INF" => return Ok(f64::NEG_INFINITY),
        "NaN" => return Ok(f64::NAN),
        _ => {}
    }
    let mut text = s.to_string();
    if let Some(pos) = text.find(['e', 'E']) {
        if text[..pos].ends_with('.') {
            text.insert(pos, '0');
        }
    } else if text.ends_with('.') {
        text.push('0');
    }
    text.parse::<f64>().map_err(|_| invalid(s, b))
}

fn check_uri(s: &str, b: Builtin) -> Result<()> {
    let bytes = s.as_bytes();
    for (i, &c) in bytes.iter().enumerate() {
        if c == b'%' {
            let ok = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !ok {
                return Err(invalid(s, b));
            }
        }
    }
    if s.matches('#').count() > 1 {
        return Err(invalid(s, b));
    }
    Ok(())
}

/// Parse a whitespace-normalized lexical form of a built-in type
pub fn parse_builtin(b: Builtin, s: &str, ns: &dyn NamespaceResolver) -> Result<XsdValue> {
    use Builtin::*;
    if let Some(item) = b.list_item() {
        let items = s
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(|t| parse_builtin(item, t, ns))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(Error::value(format!("{} requires at least one item", b)));
        }
        return Ok(XsdValue::List(items));
    }
    match b {
        AnyType | AnySimpleType | String | NormalizedString | Token => Ok(XsdValue::String(s.to_string())),
        Language if is_valid_language(s) => Ok(XsdValue::String(s.to_string())),
        Name if is_valid_name(s) => Ok(XsdValue::String(s.to_string())),
        NcName | Id | IdRef | Entity if is_valid_ncname(s) => Ok(XsdValue::String(s.to_string())),
        NmToken if is_valid_nmtoken(s) => Ok(XsdValue::String(s.to_string())),
        Language | Name | NcName | Id | IdRef | Entity | NmToken => Err(invalid(s, b)),
        Boolean => match s {
            "true" | "1" => Ok(XsdValue::Boolean(true)),
            "false" | "0" => Ok(XsdValue::Boolean(false)),
            _ => Err(invalid(s, b)),
        },
        Decimal => {
            if !DECIMAL_RE.is_match(s) {
                return Err(invalid(s, b));
            }
            Ok(XsdValue::Decimal(parse_decimal(s, b)?))
        }
        Float | Double => {
            if !FLOAT_RE.is_match(s) {
                return Err(invalid(s, b));
            }
            let v = parse_double(s, b)?;
            Ok(if b == Float {
                XsdValue::Float(v as f32)
            } else {
                XsdValue::Double(v)
            })
        }
        Duration => Ok(XsdValue::Duration(DurationValue::parse(s)?)),
        DateTime => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::DateTime, s)?)),
        Time => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::Time, s)?)),
        Date => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::Date, s)?)),
        GYearMonth => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::GYearMonth, s)?)),
        GYear => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::GYear, s)?)),
        GMonthDay => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::GMonthDay, s)?)),
        GDay => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::GDay, s)?)),
        GMonth => Ok(XsdValue::DateTime(DateTimeValue::parse(DateTimeKind::GMonth, s)?)),
        HexBinary => {
            if !HEX_RE.is_match(s) {
                return Err(invalid(s, b));
            }
            let bytes = (0..s.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| invalid(s, b)))
                .collect::<Result<Vec<u8>>>()?;
            Ok(XsdValue::HexBinary(bytes))
        }
        Base64Binary => {
            let cleaned: std::string::String = s.chars().filter(|c| *c != ' ').collect();
            base64::engine::general_purpose::STANDARD
                .decode(cleaned.as_bytes())
                .map(XsdValue::Base64Binary)
                .map_err(|_| invalid(s, b))
        }
        AnyUri => {
            check_uri(s, b)?;
            Ok(XsdValue::AnyUri(s.to_string()))
        }
        QName => ns
            .resolve_qname(s)
            .map(XsdValue::QName)
            .map_err(|e| Error::value(format!("'{}' is not a valid {}: {}", s, b, e))),
        Notation => ns
            .resolve_qname(s)
            .map(XsdValue::Notation)
            .map_err(|e| Error::value(format!("'{}' is not a valid {}: {}", s, b, e))),
        Integer | NonPositiveInteger | NegativeInteger | Long | Int | Short | Byte
        | NonNegativeInteger | UnsignedLong | UnsignedInt | UnsignedShort | UnsignedByte
        | PositiveInteger => {
            if !INTEGER_RE.is_match(s) {
                return Err(invalid(s, b));
            }
            let value = parse_decimal(s, b)?;
            if let Some((min, max)) = b.integer_bounds() {
                let below = min.is_some_and(|m| value < m);
                let above = max.is_some_and(|m| value > m);
                if below || above {
                    return Err(Error::value(format!("'{}' is out of range for {}", s, b)));
                }
            }
            Ok(XsdValue::Decimal(value))
        }
        IdRefs | Entities | NmTokens => Err(invalid(s, b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceContext;

    fn parse(b: Builtin, s: &str) -> Result<XsdValue> {
        parse_builtin(b, s, &NamespaceContext::new())
    }

    #[test]
    fn test_integer_bounds() {
        assert!(parse(Builtin::Byte, "127").is_ok());
        assert!(parse(Builtin::Byte, "128").is_err());
        assert!(parse(Builtin::UnsignedLong, "18446744073709551615").is_ok());
        assert!(parse(Builtin::PositiveInteger, "0").is_err());
        assert!(parse(Builtin::Int, "1.0").is_err());
        assert!(parse(Builtin::Int, "+42").is_ok());
    }

    #[test]
    fn test_decimal_forms() {
        assert_eq!(parse(Builtin::Decimal, "+.50").unwrap().to_string(), "0.5");
        assert_eq!(parse(Builtin::Decimal, "-0").unwrap().to_string(), "0");
        assert_eq!(parse(Builtin::Decimal, "12.").unwrap().to_string(), "12");
        assert!(parse(Builtin::Decimal, "1e3").is_err());
        assert!(parse(Builtin::Decimal, ".").is_err());
    }

    #[test]
    fn test_floats() {
        assert_eq!(parse(Builtin::Double, "INF").unwrap().to_string(), "INF");
        assert_eq!(parse(Builtin::Double, "1e2").unwrap().to_string(), "1.0E2");
        assert!(parse(Builtin::Double, "+INF").is_err());
        assert!(parse(Builtin::Float, "inf").is_err());
        let nan = parse(Builtin::Double, "NaN").unwrap();
        assert_eq!(nan.partial_cmp_value(&nan), None);
        assert!(parse(Builtin::Double, "0").unwrap().value_eq(&parse(Builtin::Double, "-0").unwrap()));
    }

    #[test]
    fn test_names_and_lists() {
        assert!(parse(Builtin::NcName, "a:b").is_err());
        assert!(parse(Builtin::Name, "a:b").is_ok());
        assert!(parse(Builtin::Language, "en-US").is_ok());
        let tokens = parse(Builtin::NmTokens, "a b c").unwrap();
        assert_eq!(tokens.length(), Some(3));
        assert!(parse(Builtin::NmTokens, "").is_err());
        assert!(parse(Builtin::IdRefs, "a 1b").is_err());
    }

    #[test]
    fn test_binary() {
        let hex = parse(Builtin::HexBinary, "0fB7").unwrap();
        assert_eq!(hex.to_string(), "0FB7");
        assert_eq!(hex.length(), Some(2));
        assert!(parse(Builtin::HexBinary, "abc").is_err());
        assert_eq!(parse(Builtin::Base64Binary, "SGVs bG8=").unwrap().length(), Some(5));
        assert!(parse(Builtin::Base64Binary, "!!!").is_err());
    }

    #[test]
    fn test_qname_values_use_context() {
        let mut ctx = NamespaceContext::new();
        ctx.add_prefix("p", "urn:p");
        let v = parse_builtin(Builtin::QName, "p:x", &ctx).unwrap();
        assert!(v.value_eq(&XsdValue::QName(QName::namespaced("urn:p", "x"))));
        assert!(parse_builtin(Builtin::QName, "q:x", &ctx).is_err());
    }

    #[test]
    fn test_primitives_do_not_mix() {
        let s = parse(Builtin::String, "1").unwrap();
        let d = parse(Builtin::Decimal, "1").unwrap();
        assert!(!s.value_eq(&d));
        assert_ne!(s.key(), d.key());
        assert_eq!(d.key(), parse(Builtin::Int, "01").unwrap().key());
    }

    #[test]
    fn test_decimals_keep_every_digit() {
        let a = parse(Builtin::Decimal, "0.1234567890123456789012345678901").unwrap();
        let b = parse(Builtin::Decimal, "0.1234567890123456789012345678902").unwrap();
        assert!(!a.value_eq(&b));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.partial_cmp_value(&b), Some(Ordering::Less));
        assert_eq!(a.canonical(), "0.1234567890123456789012345678901");

        let big = parse(Builtin::NonNegativeInteger, "123456789012345678901234567890").unwrap();
        assert_eq!(big.canonical(), "123456789012345678901234567890");
        assert!(parse(Builtin::NegativeInteger, "-98765432109876543210987654321098765").is_ok());
        assert!(parse(Builtin::UnsignedLong, "18446744073709551616").is_err());
    }

    #[test]
    fn test_decimal_canonical_forms() {
        for (lexical, canonical) in [
            ("+001.500", "1.5"),
            ("-.25", "-0.25"),
            ("12.", "12"),
            ("1200", "1200"),
            ("-0.000", "0"),
            ("0.0010", "0.001"),
        ] {
            assert_eq!(parse(Builtin::Decimal, lexical).unwrap().canonical(), canonical, "{}", lexical);
        }
        assert!(parse(Builtin::Decimal, "1e5").is_err());
    }

    #[test]
    fn test_boolean() {
        assert!(parse(Builtin::Boolean, "1").unwrap().value_eq(&XsdValue::Boolean(true)));
        assert!(parse(Builtin::Boolean, "TRUE").is_err());
    }

    proptest::proptest! {
        #[test]
        fn test_integer_canonical_round_trip(n in proptest::prelude::any::<i64>()) {
            let text = n.to_string();
            let value = parse(Builtin::Long, &text).unwrap();
            proptest::prop_assert_eq!(value.canonical(), text);
        }

        #[test]
        fn test_decimal_canonical_is_stable(units in -1_000_000_000i64..1_000_000_000, scale in 0u32..6) {
            let text = rust_decimal::Decimal::new(units, scale).to_string();
            let first = parse(Builtin::Decimal, &text).unwrap();
            let canonical = first.canonical();
            let again = parse(Builtin::Decimal, &canonical).unwrap();
            proptest::prop_assert_eq!(again.canonical(), canonical);
            proptest::prop_assert!(again.value_eq(&first));
        }

        #[test]
        fn test_hex_canonical_is_upper_case(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32)) {
            let lower: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let value = parse(Builtin::HexBinary, &lower).unwrap();
            proptest::prop_assert_eq!(value.canonical(), lower.to_uppercase());
            proptest::prop_assert_eq!(value.length(), Some(bytes.len()));
        }
    }
}

//! XSD constraining facets
//!
//! A [`FacetSet`] holds the facets declared by one restriction step, already
//! parsed into the value space of the base type. Facets inherited from base
//! types are not copied: validating against a derived type validates against
//! its base first, so every step's facets apply in turn.

use crate::error::{Error, Result};
use crate::validators::patterns::XsdRegex;
use crate::validators::values::XsdValue;
use std::cmp::Ordering;
use std::fmt;

/// White space handling modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhiteSpace {
    /// Preserve all white space
    Preserve,
    /// Replace tabs and newlines with spaces
    Replace,
    /// Replace and collapse multiple spaces
    Collapse,
}

impl WhiteSpace {
    /// Parse from string value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preserve" => Some(WhiteSpace::Preserve),
            "replace" => Some(WhiteSpace::Replace),
            "collapse" => Some(WhiteSpace::Collapse),
            _ => None,
        }
    }

    /// Normalize a string according to this white space mode
    pub fn normalize(&self, s: &str) -> String {
        match self {
            WhiteSpace::Preserve => s.to_string(),
            WhiteSpace::Replace => s.replace(['\t', '\n', '\r'], " "),
            WhiteSpace::Collapse => {
                let mut result = String::with_capacity(s.len());
                for word in s.split([' ', '\t', '\n', '\r']).filter(|w| !w.is_empty()) {
                    if !result.is_empty() {
                        result.push(' ');
                    }
                    result.push_str(word);
                }
                result
            }
        }
    }
}

impl fmt::Display for WhiteSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WhiteSpace::Preserve => "preserve",
            WhiteSpace::Replace => "replace",
            WhiteSpace::Collapse => "collapse",
        })
    }
}

/// The twelve XSD 1.0 constraining facets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum FacetKind {
    Length,
    MinLength,
    MaxLength,
    Pattern,
    Enumeration,
    WhiteSpace,
    MaxInclusive,
    MaxExclusive,
    MinInclusive,
    MinExclusive,
    TotalDigits,
    FractionDigits,
}

impl FacetKind {
    /// Look a facet up by its schema element name
    pub fn from_local_name(name: &str) -> Option<FacetKind> {
        use FacetKind::*;
        Some(match name {
            "length" => Length,
            "minLength" => MinLength,
            "maxLength" => MaxLength,
            "pattern" => Pattern,
            "enumeration" => Enumeration,
            "whiteSpace" => WhiteSpace,
            "maxInclusive" => MaxInclusive,
            "maxExclusive" => MaxExclusive,
            "minInclusive" => MinInclusive,
            "minExclusive" => MinExclusive,
            "totalDigits" => TotalDigits,
            "fractionDigits" => FractionDigits,
            _ => return None,
        })
    }

    /// Schema element name of the facet
    pub fn name(&self) -> &'static str {
        use FacetKind::*;
        match self {
            Length => "length",
            MinLength => "minLength",
            MaxLength => "maxLength",
            Pattern => "pattern",
            Enumeration => "enumeration",
            WhiteSpace => "whiteSpace",
            MaxInclusive => "maxInclusive",
            MaxExclusive => "maxExclusive",
            MinInclusive => "minInclusive",
            MinExclusive => "minExclusive",
            TotalDigits => "totalDigits",
            FractionDigits => "fractionDigits",
        }
    }
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compiled pattern facet
#[derive(Debug, Clone)]
pub struct PatternFacet {
    /// Pattern as written in the schema
    pub source: String,
    regex: XsdRegex,
}

impl PatternFacet {
    /// Compile an XSD regular expression
    pub fn new(source: &str) -> Result<Self> {
        Ok(Self {
            source: source.to_string(),
            regex: XsdRegex::new(source)?,
        })
    }

    /// Whether the whole lexical form matches
    pub fn is_match(&self, lexical: &str) -> bool {
        self.regex.is_match(lexical)
    }
}

/// Facets of one restriction step
#[derive(Debug, Clone, Default)]
pub struct FacetSet {
    /// `length`
    pub length: Option<usize>,
    /// `minLength`
    pub min_length: Option<usize>,
    /// `maxLength`
    pub max_length: Option<usize>,
    /// `pattern` facets of this step (any one must match)
    pub patterns: Vec<PatternFacet>,
    /// `enumeration` values
    pub enumeration: Option<Vec<XsdValue>>,
    /// `whiteSpace`
    pub white_space: Option<WhiteSpace>,
    /// `minInclusive`
    pub min_inclusive: Option<XsdValue>,
    /// `minExclusive`
    pub min_exclusive: Option<XsdValue>,
    /// `maxInclusive`
    pub max_inclusive: Option<XsdValue>,
    /// `maxExclusive`
    pub max_exclusive: Option<XsdValue>,
    /// `totalDigits`
    pub total_digits: Option<u32>,
    /// `fractionDigits`
    pub fraction_digits: Option<u32>,
    /// Facets declared with `fixed="true"`
    pub fixed: Vec<FacetKind>,
}

impl FacetSet {
    /// Whether the set constrains nothing
    pub fn is_empty(&self) -> bool {
        self.length.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.patterns.is_empty()
            && self.enumeration.is_none()
            && self.min_inclusive.is_none()
            && self.min_exclusive.is_none()
            && self.max_inclusive.is_none()
            && self.max_exclusive.is_none()
            && self.total_digits.is_none()
            && self.fraction_digits.is_none()
    }

    /// Whether the facet was declared fixed
    pub fn is_fixed(&self, kind: FacetKind) -> bool {
        self.fixed.contains(&kind)
    }

    /// Check a value against every facet of this step.
    ///
    /// `lexical` is the whitespace-normalized lexical form; patterns and
    /// digit counts are evaluated on it, everything else on `value`.
    pub fn check(&self, lexical: &str, value: &XsdValue) -> Result<()> {
        if let Some(len) = value.length() {
            if let Some(expected) = self.length {
                if len != expected {
                    return Err(Error::value(format!(
                        "length of '{}' is {}, expected {}",
                        lexical, len, expected
                    )));
                }
            }
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(Error::value(format!(
                        "length of '{}' is {}, minimum is {}",
                        lexical, len, min
                    )));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(Error::value(format!(
                        "length of '{}' is {}, maximum is {}",
                        lexical, len, max
                    )));
                }
            }
        }

        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.is_match(lexical)) {
            let sources: Vec<&str> = self.patterns.iter().map(|p| p.source.as_str()).collect();
            return Err(Error::value(format!(
                "'{}' does not match pattern '{}'",
                lexical,
                sources.join("' | '")
            )));
        }

        if let Some(ref values) = self.enumeration {
            if !values.iter().any(|e| e.value_eq(value)) {
                return Err(Error::value(format!(
                    "'{}' is not one of the enumerated values",
                    lexical
                )));
            }
        }

        self.check_bound(lexical, value, &self.min_inclusive, "minInclusive", |o| {
            o != Ordering::Less
        })?;
        self.check_bound(lexical, value, &self.min_exclusive, "minExclusive", |o| {
            o == Ordering::Greater
        })?;
        self.check_bound(lexical, value, &self.max_inclusive, "maxInclusive", |o| {
            o != Ordering::Greater
        })?;
        self.check_bound(lexical, value, &self.max_exclusive, "maxExclusive", |o| {
            o == Ordering::Less
        })?;

        if self.total_digits.is_some() || self.fraction_digits.is_some() {
            let (total, fraction) = decimal_digits(lexical);
            if let Some(max) = self.total_digits {
                if total > max {
                    return Err(Error::value(format!(
                        "'{}' has {} digits, totalDigits is {}",
                        lexical, total, max
                    )));
                }
            }
            if let Some(max) = self.fraction_digits {
                if fraction > max {
                    return Err(Error::value(format!(
                        "'{}' has {} fraction digits, fractionDigits is {}",
                        lexical, fraction, max
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_bound(
        &self,
        lexical: &str,
        value: &XsdValue,
        bound: &Option<XsdValue>,
        facet: &str,
        accept: impl Fn(Ordering) -> bool,
    ) -> Result<()> {
        let Some(bound) = bound else {
            return Ok(());
        };
        match value.partial_cmp_value(bound) {
            Some(ord) if accept(ord) => Ok(()),
            Some(_) => Err(Error::value(format!(
                "'{}' violates {} {}",
                lexical, facet, bound
            ))),
            None => Err(Error::value(format!(
                "'{}' is not comparable with {} {}",
                lexical, facet, bound
            ))),
        }
    }
}

/// Significant total and fraction digit counts of a decimal lexical form
pub fn decimal_digits(lexical: &str) -> (u32, u32) {
    let unsigned = lexical.trim_start_matches(['+', '-']);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let fraction = frac_part.len() as u32;
    let total = if int_part.is_empty() {
        // 0.00123 has three significant digits
        let significant = frac_part.trim_start_matches('0').len() as u32;
        significant.max(1)
    } else {
        int_part.len() as u32 + fraction
    };
    (total, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn dec(s: &str) -> XsdValue {
        XsdValue::Decimal(BigDecimal::from_str(s).unwrap())
    }

    #[test]
    fn test_white_space_normalize() {
        assert_eq!(WhiteSpace::Preserve.normalize(" a\tb "), " a\tb ");
        assert_eq!(WhiteSpace::Replace.normalize(" a\tb\n"), " a b ");
        assert_eq!(WhiteSpace::Collapse.normalize("  a \t\n b  "), "a b");
        assert!(WhiteSpace::Collapse > WhiteSpace::Replace);
    }

    #[test]
    fn test_length_facets() {
        let facets = FacetSet {
            min_length: Some(2),
            max_length: Some(3),
            ..Default::default()
        };
        let ok = XsdValue::String("abc".into());
        let short = XsdValue::String("a".into());
        assert!(facets.check("abc", &ok).is_ok());
        assert!(facets.check("a", &short).is_err());
    }

    #[test]
    fn test_bounds() {
        let facets = FacetSet {
            min_inclusive: Some(dec("0")),
            max_exclusive: Some(dec("10")),
            ..Default::default()
        };
        assert!(facets.check("0", &dec("0")).is_ok());
        assert!(facets.check("9.99", &dec("9.99")).is_ok());
        assert!(facets.check("10", &dec("10")).is_err());
        assert!(facets.check("-1", &dec("-1")).is_err());
    }

    #[test]
    fn test_enumeration_is_value_based() {
        let facets = FacetSet {
            enumeration: Some(vec![dec("1.0"), dec("2")]),
            ..Default::default()
        };
        assert!(facets.check("1", &dec("1")).is_ok());
        assert!(facets.check("3", &dec("3")).is_err());
    }

    #[test]
    fn test_pattern_alternatives() {
        let facets = FacetSet {
            patterns: vec![
                PatternFacet::new("[a-z]+").unwrap(),
                PatternFacet::new("[0-9]+").unwrap(),
            ],
            ..Default::default()
        };
        let v = XsdValue::String(String::new());
        assert!(facets.check("abc", &v).is_ok());
        assert!(facets.check("123", &v).is_ok());
        assert!(facets.check("abc123", &v).is_err());
    }

    #[test]
    fn test_decimal_digits() {
        assert_eq!(decimal_digits("123.450"), (5, 2));
        assert_eq!(decimal_digits("-0.00123"), (3, 5));
        assert_eq!(decimal_digits("000"), (1, 0));
        assert_eq!(decimal_digits("+10"), (2, 0));
    }
}

//! XSD built-in types
//!
//! The fixed table of XSD 1.0 built-in datatypes: their names, derivation
//! hierarchy, whitespace discipline and admitted facets. Lexical parsing of
//! each type lives in [`values`](crate::validators::values).

use crate::namespaces::{QName, XSD_NAMESPACE};
use crate::validators::facets::{FacetKind, WhiteSpace};
use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};
use std::fmt;

// =============================================================================
// Admitted Facets Sets
// =============================================================================

lazy_static::lazy_static! {
    /// Facets admitted for string-like and URI/binary types
    pub static ref STRING_FACETS: HashSet<FacetKind> = [
        FacetKind::Length,
        FacetKind::MinLength,
        FacetKind::MaxLength,
        FacetKind::Pattern,
        FacetKind::Enumeration,
        FacetKind::WhiteSpace,
    ].into_iter().collect();

    /// Facets admitted for boolean type
    pub static ref BOOLEAN_FACETS: HashSet<FacetKind> = [
        FacetKind::Pattern,
        FacetKind::WhiteSpace,
    ].into_iter().collect();

    /// Facets admitted for ordered types without digit facets
    pub static ref ORDERED_FACETS: HashSet<FacetKind> = [
        FacetKind::Pattern,
        FacetKind::Enumeration,
        FacetKind::WhiteSpace,
        FacetKind::MaxInclusive,
        FacetKind::MaxExclusive,
        FacetKind::MinInclusive,
        FacetKind::MinExclusive,
    ].into_iter().collect();

    /// Facets admitted for decimal types
    pub static ref DECIMAL_FACETS: HashSet<FacetKind> = [
        FacetKind::TotalDigits,
        FacetKind::FractionDigits,
        FacetKind::Pattern,
        FacetKind::Enumeration,
        FacetKind::WhiteSpace,
        FacetKind::MaxInclusive,
        FacetKind::MaxExclusive,
        FacetKind::MinInclusive,
        FacetKind::MinExclusive,
    ].into_iter().collect();

    /// Facets admitted for list types
    pub static ref LIST_FACETS: HashSet<FacetKind> = [
        FacetKind::Length,
        FacetKind::MinLength,
        FacetKind::MaxLength,
        FacetKind::Pattern,
        FacetKind::Enumeration,
        FacetKind::WhiteSpace,
    ].into_iter().collect();

    /// Facets admitted for union types
    pub static ref UNION_FACETS: HashSet<FacetKind> = [
        FacetKind::Pattern,
        FacetKind::Enumeration,
    ].into_iter().collect();

    /// No facets (anyType, anySimpleType)
    pub static ref NO_FACETS: HashSet<FacetKind> = HashSet::new();

    static ref BY_NAME: HashMap<&'static str, Builtin> =
        Builtin::ALL.iter().map(|b| (b.name(), *b)).collect();
}

// =============================================================================
// Built-in Type Table
// =============================================================================

/// An XSD 1.0 built-in type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Builtin {
    AnyType,
    AnySimpleType,
    // Primitives
    String,
    Boolean,
    Decimal,
    Float,
    Double,
    Duration,
    DateTime,
    Time,
    Date,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
    HexBinary,
    Base64Binary,
    AnyUri,
    QName,
    Notation,
    // Derived from string
    NormalizedString,
    Token,
    Language,
    Name,
    NcName,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    // Derived from decimal
    Integer,
    NonPositiveInteger,
    NegativeInteger,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    UnsignedLong,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
    PositiveInteger,
}

impl Builtin {
    /// Every built-in, in table order
    pub const ALL: [Builtin; 46] = [
        Builtin::AnyType,
        Builtin::AnySimpleType,
        Builtin::String,
        Builtin::Boolean,
        Builtin::Decimal,
        Builtin::Float,
        Builtin::Double,
        Builtin::Duration,
        Builtin::DateTime,
        Builtin::Time,
        Builtin::Date,
        Builtin::GYearMonth,
        Builtin::GYear,
        Builtin::GMonthDay,
        Builtin::GDay,
        Builtin::GMonth,
        Builtin::HexBinary,
        Builtin::Base64Binary,
        Builtin::AnyUri,
        Builtin::QName,
        Builtin::Notation,
        Builtin::NormalizedString,
        Builtin::Token,
        Builtin::Language,
        Builtin::Name,
        Builtin::NcName,
        Builtin::Id,
        Builtin::IdRef,
        Builtin::IdRefs,
        Builtin::Entity,
        Builtin::Entities,
        Builtin::NmToken,
        Builtin::NmTokens,
        Builtin::Integer,
        Builtin::NonPositiveInteger,
        Builtin::NegativeInteger,
        Builtin::Long,
        Builtin::Int,
        Builtin::Short,
        Builtin::Byte,
        Builtin::NonNegativeInteger,
        Builtin::UnsignedLong,
        Builtin::UnsignedInt,
        Builtin::UnsignedShort,
        Builtin::UnsignedByte,
        Builtin::PositiveInteger,
    ];

    /// Local name in the XSD namespace
    pub fn name(&self) -> &'static str {
        use Builtin::*;
        match self {
            AnyType => "anyType",
            AnySimpleType => "anySimpleType",
            String => "string",
            Boolean => "boolean",
            Decimal => "decimal",
            Float => "float",
            Double => "double",
            Duration => "duration",
            DateTime => "dateTime",
            Time => "time",
            Date => "date",
            GYearMonth => "gYearMonth",
            GYear => "gYear",
            GMonthDay => "gMonthDay",
            GDay => "gDay",
            GMonth => "gMonth",
            HexBinary => "hexBinary",
            Base64Binary => "base64Binary",
            AnyUri => "anyURI",
            QName => "QName",
            Notation => "NOTATION",
            NormalizedString => "normalizedString",
            Token => "token",
            Language => "language",
            Name => "Name",
            NcName => "NCName",
            Id => "ID",
            IdRef => "IDREF",
            IdRefs => "IDREFS",
            Entity => "ENTITY",
            Entities => "ENTITIES",
            NmToken => "NMTOKEN",
            NmTokens => "NMTOKENS",
            Integer => "integer",
            NonPositiveInteger => "nonPositiveInteger",
            NegativeInteger => "negativeInteger",
            Long => "long",
            Int => "int",
            Short => "short",
            Byte => "byte",
            NonNegativeInteger => "nonNegativeInteger",
            UnsignedLong => "unsignedLong",
            UnsignedInt => "unsignedInt",
            UnsignedShort => "unsignedShort",
            UnsignedByte => "unsignedByte",
            PositiveInteger => "positiveInteger",
        }
    }

    /// Look a built-in up by local name
    pub fn from_local_name(name: &str) -> Option<Builtin> {
        BY_NAME.get(name).copied()
    }

    /// Look a built-in up by expanded name
    pub fn from_qname(name: &QName) -> Option<Builtin> {
        if name.namespace.as_deref() == Some(XSD_NAMESPACE) {
            Self::from_local_name(&name.local_name)
        } else {
            None
        }
    }

    /// Expanded name of the built-in
    pub fn qname(&self) -> QName {
        QName::namespaced(XSD_NAMESPACE, self.name())
    }

    /// Position in [`Builtin::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Base type in the built-in hierarchy
    pub fn base(&self) -> Option<Builtin> {
        use Builtin::*;
        Some(match self {
            AnyType => return None,
            AnySimpleType => AnyType,
            String | Boolean | Decimal | Float | Double | Duration | DateTime | Time | Date
            | GYearMonth | GYear | GMonthDay | GDay | GMonth | HexBinary | Base64Binary
            | AnyUri | QName | Notation => AnySimpleType,
            NormalizedString => String,
            Token => NormalizedString,
            Language | Name | NmToken => Token,
            NcName => Name,
            Id | IdRef | Entity => NcName,
            IdRefs | Entities | NmTokens => AnySimpleType,
            Integer => Decimal,
            NonPositiveInteger | Long | NonNegativeInteger => Integer,
            NegativeInteger => NonPositiveInteger,
            Int => Long,
            Short => Int,
            Byte => Short,
            UnsignedLong | PositiveInteger => NonNegativeInteger,
            UnsignedInt => UnsignedLong,
            UnsignedShort => UnsignedInt,
            UnsignedByte => UnsignedShort,
        })
    }

    /// Primitive ancestor (itself for primitives, None for the ur-types and lists)
    pub fn primitive(&self) -> Option<Builtin> {
        if self.is_list() || matches!(self, Builtin::AnyType | Builtin::AnySimpleType) {
            return None;
        }
        let mut current = *self;
        while let Some(base) = current.base() {
            if base == Builtin::AnySimpleType {
                return Some(current);
            }
            current = base;
        }
        None
    }

    /// Whether this is one of the built-in list types
    pub fn is_list(&self) -> bool {
        matches!(self, Builtin::IdRefs | Builtin::Entities | Builtin::NmTokens)
    }

    /// Item type of a built-in list type
    pub fn list_item(&self) -> Option<Builtin> {
        match self {
            Builtin::IdRefs => Some(Builtin::IdRef),
            Builtin::Entities => Some(Builtin::Entity),
            Builtin::NmTokens => Some(Builtin::NmToken),
            _ => None,
        }
    }

    /// Whether the type is simple (everything except anyType)
    pub fn is_simple(&self) -> bool {
        *self != Builtin::AnyType
    }

    /// Whether `self` is `other` or derived from it in the built-in hierarchy
    pub fn is_derived_from(&self, other: Builtin) -> bool {
        let mut current = Some(*self);
        while let Some(b) = current {
            if b == other {
                return true;
            }
            current = b.base();
        }
        false
    }

    /// Whitespace discipline applied before lexical parsing
    pub fn white_space(&self) -> WhiteSpace {
        use Builtin::*;
        match self {
            AnyType | AnySimpleType | String => WhiteSpace::Preserve,
            NormalizedString => WhiteSpace::Replace,
            _ => WhiteSpace::Collapse,
        }
    }

    /// Facets that may restrict this type
    pub fn admitted_facets(&self) -> &'static HashSet<FacetKind> {
        use Builtin::*;
        if self.is_list() {
            return &LIST_FACETS;
        }
        match self.primitive() {
            None => &NO_FACETS,
            Some(Boolean) => &BOOLEAN_FACETS,
            Some(Decimal) => &DECIMAL_FACETS,
            Some(Float) | Some(Double) | Some(Duration) | Some(DateTime) | Some(Time)
            | Some(Date) | Some(GYearMonth) | Some(GYear) | Some(GMonthDay) | Some(GDay)
            | Some(GMonth) => &ORDERED_FACETS,
            Some(_) => &STRING_FACETS,
        }
    }

    /// Value bounds of the integer family
    pub fn integer_bounds(&self) -> Option<(Option<BigDecimal>, Option<BigDecimal>)> {
        use Builtin::*;
        let d = |v: i64| Some(BigDecimal::from(v));
        Some(match self {
            Integer => (None, None),
            NonPositiveInteger => (None, d(0)),
            NegativeInteger => (None, d(-1)),
            Long => (d(i64::MIN), d(i64::MAX)),
            Int => (d(i32::MIN as i64), d(i32::MAX as i64)),
            Short => (d(i16::MIN as i64), d(i16::MAX as i64)),
            Byte => (d(i8::MIN as i64), d(i8::MAX as i64)),
            NonNegativeInteger => (d(0), None),
            UnsignedLong => (d(0), Some(BigDecimal::from(u64::MAX))),
            UnsignedInt => (d(0), d(u32::MAX as i64)),
            UnsignedShort => (d(0), d(u16::MAX as i64)),
            UnsignedByte => (d(0), d(u8::MAX as i64)),
            PositiveInteger => (d(1), None),
            _ => return None,
        })
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xs:{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_consistent() {
        for (i, b) in Builtin::ALL.iter().enumerate() {
            assert_eq!(b.index(), i, "{} out of order", b.name());
            assert_eq!(Builtin::from_local_name(b.name()), Some(*b));
        }
    }

    #[test]
    fn test_hierarchy() {
        assert_eq!(Builtin::Byte.primitive(), Some(Builtin::Decimal));
        assert_eq!(Builtin::Id.primitive(), Some(Builtin::String));
        assert_eq!(Builtin::String.primitive(), Some(Builtin::String));
        assert_eq!(Builtin::NmTokens.primitive(), None);
        assert!(Builtin::UnsignedByte.is_derived_from(Builtin::Integer));
        assert!(!Builtin::Int.is_derived_from(Builtin::UnsignedInt));
        assert_eq!(Builtin::NmTokens.list_item(), Some(Builtin::NmToken));
    }

    #[test]
    fn test_whitespace_and_facets() {
        assert_eq!(Builtin::String.white_space(), WhiteSpace::Preserve);
        assert_eq!(Builtin::NormalizedString.white_space(), WhiteSpace::Replace);
        assert_eq!(Builtin::Int.white_space(), WhiteSpace::Collapse);
        assert!(Builtin::Int.admitted_facets().contains(&FacetKind::TotalDigits));
        assert!(!Builtin::String.admitted_facets().contains(&FacetKind::MaxInclusive));
        assert!(Builtin::NmTokens.admitted_facets().contains(&FacetKind::Length));
    }

    #[test]
    fn test_qname_lookup() {
        assert_eq!(Builtin::from_qname(&QName::xsd("int")), Some(Builtin::Int));
        assert_eq!(Builtin::from_qname(&QName::local("int")), None);
    }
}

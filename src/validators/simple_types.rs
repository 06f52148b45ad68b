//! XSD Simple Type validators
//!
//! Runtime validation of character data against a simple type of a
//! compiled [`ComponentSet`]. Atomic restrictions validate against their
//! base first and then apply their own facets, lists validate each item
//! against the item type, and unions take the first member that accepts
//! the value.
//!
//! See: https://www.w3.org/TR/xmlschema-2/

use crate::error::{Error, Result};
use crate::namespaces::NamespaceResolver;
use crate::validators::builtins::Builtin;
use crate::validators::components::{ComponentSet, SimpleDerivation, TypeDef, TypeId};
use crate::validators::values::{parse_builtin, XsdValue};

/// Validate `text` against the simple type `ty`.
///
/// Whitespace is normalized with the type's effective `whiteSpace` first;
/// `ns` binds the prefixes of QName and NOTATION values.
pub fn validate_simple(
    set: &ComponentSet,
    ty: TypeId,
    text: &str,
    ns: &dyn NamespaceResolver,
) -> Result<XsdValue> {
    let lexical = set.white_space(ty).normalize(text);
    validate_normalized(set, ty, &lexical, ns, 0)
}

/// Validate an already normalized lexical form
pub fn validate_normalized(
    set: &ComponentSet,
    ty: TypeId,
    lexical: &str,
    ns: &dyn NamespaceResolver,
    depth: usize,
) -> Result<XsdValue> {
    if depth > set.types.len() {
        return Err(Error::value(format!(
            "derivation of {} does not terminate",
            set.type_name(ty)
        )));
    }
    match set.type_def(ty) {
        TypeDef::Builtin(Builtin::AnyType) | TypeDef::Builtin(Builtin::AnySimpleType) => {
            Ok(XsdValue::String(lexical.to_string()))
        }
        TypeDef::Builtin(b) => parse_builtin(*b, lexical, ns),
        TypeDef::Simple(def) => {
            let value = match &def.derivation {
                SimpleDerivation::Restriction { base } => {
                    let base = base.id().ok_or_else(|| {
                        Error::value(format!("{} has no resolved base", set.type_name(ty)))
                    })?;
                    validate_normalized(set, base, lexical, ns, depth + 1)?
                }
                SimpleDerivation::List { item } => {
                    let item = item.id().ok_or_else(|| {
                        Error::value(format!("{} has no resolved item type", set.type_name(ty)))
                    })?;
                    let items = lexical
                        .split(' ')
                        .filter(|t| !t.is_empty())
                        .map(|t| {
                            let normalized = set.white_space(item).normalize(t);
                            validate_normalized(set, item, &normalized, ns, depth + 1)
                        })
                        .collect::<Result<Vec<_>>>()?;
                    XsdValue::List(items)
                }
                SimpleDerivation::Union { members } => {
                    let mut accepted = None;
                    for member in members.iter().filter_map(|m| m.id()) {
                        let normalized = set.white_space(member).normalize(lexical);
                        if let Ok(value) = validate_normalized(set, member, &normalized, ns, depth + 1)
                        {
                            accepted = Some(value);
                            break;
                        }
                    }
                    accepted.ok_or_else(|| {
                        Error::value(format!(
                            "'{}' is not valid for any member of {}",
                            lexical,
                            set.type_name(ty)
                        ))
                    })?
                }
            };
            def.facets.check(lexical, &value).map_err(|e| match e {
                Error::Value(message) => {
                    Error::value(format!("{} (type {})", message, set.type_name(ty)))
                }
                other => other,
            })?;
            Ok(value)
        }
        TypeDef::Complex(_) => match set.simple_content_type(ty) {
            Some(content) if content != ty => {
                validate_normalized(set, content, lexical, ns, depth + 1)
            }
            _ => Err(Error::value(format!(
                "{} does not have simple content",
                set.type_name(ty)
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::{NamespaceContext, QName};
    use crate::validators::components::{DerivationSet, SimpleTypeDef, TypeRef, Variety};
    use crate::validators::exceptions::SourcePos;
    use crate::validators::facets::{FacetSet, PatternFacet, WhiteSpace};
    use bigdecimal::BigDecimal;
    use std::sync::Arc;

    fn def(name: &str, derivation: SimpleDerivation, facets: FacetSet, variety: Variety) -> TypeDef {
        TypeDef::Simple(SimpleTypeDef {
            name: Some(QName::local(name)),
            derivation,
            raw_facets: Vec::new(),
            facets,
            white_space: WhiteSpace::Collapse,
            variety,
            final_: DerivationSet::empty(),
            pos: SourcePos::unknown(Arc::from("test.xsd")),
        })
    }

    #[test]
    fn test_restriction_applies_base_then_facets() {
        let mut set = ComponentSet::new();
        let facets = FacetSet {
            max_inclusive: Some(XsdValue::Decimal(BigDecimal::from(150i64))),
            ..FacetSet::default()
        };
        let age = set.add_type(def(
            "age",
            SimpleDerivation::Restriction {
                base: TypeRef::Id(ComponentSet::builtin(Builtin::NonNegativeInteger)),
            },
            facets,
            Variety::Atomic,
        ));
        let ns = NamespaceContext::new();
        assert!(validate_simple(&set, age, " 42 ", &ns).is_ok());
        assert!(validate_simple(&set, age, "151", &ns).is_err());
        assert!(validate_simple(&set, age, "-1", &ns).is_err());
        assert!(validate_simple(&set, age, "abc", &ns).is_err());
    }

    #[test]
    fn test_list_and_union() {
        let mut set = ComponentSet::new();
        let list = set.add_type(def(
            "ints",
            SimpleDerivation::List {
                item: TypeRef::Id(ComponentSet::builtin(Builtin::Int)),
            },
            FacetSet {
                length: Some(2),
                ..FacetSet::default()
            },
            Variety::List,
        ));
        let ns = NamespaceContext::new();
        assert!(validate_simple(&set, list, "1   2", &ns).is_ok());
        assert!(validate_simple(&set, list, "1 2 3", &ns).is_err());
        assert!(validate_simple(&set, list, "1 x", &ns).is_err());

        let union = set.add_type(def(
            "intOrDate",
            SimpleDerivation::Union {
                members: vec![
                    TypeRef::Id(ComponentSet::builtin(Builtin::Int)),
                    TypeRef::Id(ComponentSet::builtin(Builtin::Date)),
                ],
            },
            FacetSet::default(),
            Variety::Union,
        ));
        assert!(matches!(validate_simple(&set, union, "7", &ns), Ok(XsdValue::Decimal(_))));
        assert!(matches!(
            validate_simple(&set, union, "2024-02-29", &ns),
            Ok(XsdValue::DateTime(_))
        ));
        assert!(validate_simple(&set, union, "soon", &ns).is_err());
    }

    #[test]
    fn test_pattern_on_normalized_form() {
        let mut set = ComponentSet::new();
        let code = set.add_type(def(
            "code",
            SimpleDerivation::Restriction {
                base: TypeRef::Id(ComponentSet::builtin(Builtin::Token)),
            },
            FacetSet {
                patterns: vec![PatternFacet::new("[A-Z]{3}").unwrap()],
                ..FacetSet::default()
            },
            Variety::Atomic,
        ));
        let ns = NamespaceContext::new();
        assert!(validate_simple(&set, code, "  ABC\n", &ns).is_ok());
        assert!(validate_simple(&set, code, "ABCD", &ns).is_err());
    }
}

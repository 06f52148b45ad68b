//! XSD Particle Schema Components
//!
//! A particle is a term (element, wildcard or model group) together with its
//! occurrence bounds. Particle trees are what the content-model compiler in
//! [`automata`](crate::validators::automata) lowers to automata.

use crate::error::{Error, Result};
use crate::namespaces::QName;
use crate::validators::components::ElemId;
use crate::validators::exceptions::SourcePos;
use crate::validators::wildcards::Wildcard;
use std::fmt;

/// Occurrence bounds for a particle (minOccurs, maxOccurs)
/// None for max means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurs {
    /// Minimum number of occurrences (default 1)
    pub min: u32,
    /// Maximum number of occurrences (None = unbounded, default 1)
    pub max: Option<u32>,
}

impl Occurs {
    /// Create new occurrence bounds
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Default occurrence (1, 1)
    pub fn once() -> Self {
        Self { min: 1, max: Some(1) }
    }

    /// Optional occurrence (0, 1)
    pub fn optional() -> Self {
        Self { min: 0, max: Some(1) }
    }

    /// Zero or more (0, unbounded)
    pub fn zero_or_more() -> Self {
        Self { min: 0, max: None }
    }

    /// Check if this particle can be empty (minOccurs == 0)
    pub fn is_emptiable(&self) -> bool {
        self.min == 0
    }

    /// Check if this particle is empty (maxOccurs == 0)
    pub fn is_empty(&self) -> bool {
        self.max == Some(0)
    }

    /// Check if particle has maxOccurs == 1
    pub fn is_single(&self) -> bool {
        self.max == Some(1)
    }

    /// Largest finite bound, used when checking expansion limits
    pub fn largest_bound(&self) -> u32 {
        self.max.unwrap_or(self.min).max(self.min)
    }

    /// Check if this range is a valid restriction of another
    pub fn has_occurs_restriction(&self, other: &Occurs) -> bool {
        if self.min < other.min {
            return false;
        }
        match (self.max, other.max) {
            (Some(0), _) | (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => a <= b,
        }
    }
}

impl Default for Occurs {
    fn default() -> Self {
        Self::once()
    }
}

impl fmt::Display for Occurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{{{},{}}}", self.min, max),
            None => write!(f, "{{{},unbounded}}", self.min),
        }
    }
}

/// Parse minOccurs/maxOccurs from XML attribute values
pub fn parse_occurs(min_occurs: Option<&str>, max_occurs: Option<&str>) -> Result<Occurs> {
    let mut occurs = Occurs::once();

    if let Some(min_str) = min_occurs {
        occurs.min = min_str.trim().parse::<u32>().map_err(|_| {
            Error::value(format!(
                "minOccurs value '{}' is not a valid non-negative integer",
                min_str
            ))
        })?;
    }

    match max_occurs.map(str::trim) {
        Some("unbounded") => occurs.max = None,
        Some(max_str) => {
            let max = max_str.parse::<u32>().map_err(|_| {
                Error::value(format!(
                    "maxOccurs value '{}' must be a non-negative integer or 'unbounded'",
                    max_str
                ))
            })?;
            if occurs.min > max {
                return Err(Error::value(format!(
                    "maxOccurs {} is less than minOccurs {}",
                    max, occurs.min
                )));
            }
            occurs.max = Some(max);
        }
        None => {
            if occurs.min > 1 {
                return Err(Error::value(format!(
                    "minOccurs {} exceeds the default maxOccurs 1",
                    occurs.min
                )));
            }
        }
    }

    Ok(occurs)
}

/// Model group compositors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compositor {
    /// `<sequence>`
    Sequence,
    /// `<choice>`
    Choice,
    /// `<all>`
    All,
}

impl Compositor {
    /// Schema element name
    pub fn name(&self) -> &'static str {
        match self {
            Compositor::Sequence => "sequence",
            Compositor::Choice => "choice",
            Compositor::All => "all",
        }
    }
}

/// A model group: a compositor over child particles
#[derive(Debug, Clone)]
pub struct ModelGroup {
    /// How the children combine
    pub compositor: Compositor,
    /// Child particles in document order
    pub particles: Vec<Particle>,
}

impl ModelGroup {
    /// Create an empty group
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            particles: Vec::new(),
        }
    }
}

/// The term of a particle
#[derive(Debug, Clone)]
pub enum Term {
    /// A local or (after resolution) referenced element declaration
    Element(ElemId),
    /// `<element ref="..."/>` before resolution
    ElementRef(QName),
    /// An inline (or expanded) model group
    Group(ModelGroup),
    /// `<group ref="..."/>` before resolution
    GroupRef(QName),
    /// `<any>`
    Any(Wildcard),
}

/// A term with occurrence bounds
#[derive(Debug, Clone)]
pub struct Particle {
    /// minOccurs / maxOccurs
    pub occurs: Occurs,
    /// What occurs
    pub term: Term,
    /// Where the particle was written
    pub pos: SourcePos,
}

impl Particle {
    /// Create a particle
    pub fn new(occurs: Occurs, term: Term, pos: SourcePos) -> Self {
        Self { occurs, term, pos }
    }

    /// Whether the particle can match the empty sequence
    pub fn is_emptiable(&self) -> bool {
        if self.occurs.is_emptiable() || self.occurs.is_empty() {
            return true;
        }
        match &self.term {
            Term::Group(group) => match group.compositor {
                Compositor::Choice => {
                    group.particles.is_empty() || group.particles.iter().any(Particle::is_emptiable)
                }
                Compositor::Sequence | Compositor::All => {
                    group.particles.iter().all(Particle::is_emptiable)
                }
            },
            _ => false,
        }
    }

    /// Whether the particle matches nothing at all (an empty group)
    pub fn is_void(&self) -> bool {
        match &self.term {
            Term::Group(group) => {
                self.occurs.is_empty() || group.particles.iter().all(Particle::is_void)
            }
            _ => self.occurs.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pos() -> SourcePos {
        SourcePos::unknown(Arc::from("test"))
    }

    #[test]
    fn test_occurs_presets() {
        assert_eq!(Occurs::once(), Occurs::new(1, Some(1)));
        assert_eq!(Occurs::optional(), Occurs::new(0, Some(1)));
        assert_eq!(Occurs::zero_or_more(), Occurs::new(0, None));
        assert_eq!(Occurs::default(), Occurs::once());
        assert_eq!(Occurs::new(2, None).to_string(), "{2,unbounded}");
    }

    #[test]
    fn test_occurs_restriction() {
        let base = Occurs::new(1, Some(3));
        assert!(Occurs::new(1, Some(3)).has_occurs_restriction(&base));
        assert!(Occurs::new(2, Some(2)).has_occurs_restriction(&base));
        assert!(!Occurs::new(0, Some(3)).has_occurs_restriction(&base));
        assert!(!Occurs::new(1, Some(5)).has_occurs_restriction(&base));
        assert!(!Occurs::new(1, None).has_occurs_restriction(&base));

        let unbounded = Occurs::new(1, None);
        assert!(Occurs::new(1, Some(100)).has_occurs_restriction(&unbounded));
        assert!(Occurs::new(0, Some(0)).has_occurs_restriction(&Occurs::optional()));
    }

    #[test]
    fn test_parse_occurs() {
        assert_eq!(parse_occurs(None, None).unwrap(), Occurs::once());
        assert_eq!(parse_occurs(Some("0"), Some("5")).unwrap(), Occurs::new(0, Some(5)));
        assert_eq!(parse_occurs(Some("1"), Some("unbounded")).unwrap(), Occurs::new(1, None));
        assert!(parse_occurs(Some("abc"), None).is_err());
        assert!(parse_occurs(Some("-1"), None).is_err());
        assert!(parse_occurs(None, Some("abc")).is_err());
        assert!(parse_occurs(Some("5"), Some("3")).is_err());
        assert!(parse_occurs(Some("5"), None).is_err());
    }

    #[test]
    fn test_emptiable() {
        let elem = |min| Particle::new(Occurs::new(min, Some(1)), Term::Element(ElemId(0)), pos());
        let mut seq = ModelGroup::new(Compositor::Sequence);
        seq.particles.push(elem(0));
        seq.particles.push(elem(1));
        let seq = Particle::new(Occurs::once(), Term::Group(seq), pos());
        assert!(!seq.is_emptiable());

        let mut choice = ModelGroup::new(Compositor::Choice);
        choice.particles.push(elem(1));
        choice.particles.push(elem(0));
        let choice = Particle::new(Occurs::once(), Term::Group(choice), pos());
        assert!(choice.is_emptiable());

        let empty = Particle::new(Occurs::once(), Term::Group(ModelGroup::new(Compositor::Sequence)), pos());
        assert!(empty.is_void());
    }
}

//! XSD Content Model Automata
//!
//! Content particles are lowered to deterministic automata over element
//! names:
//! - occurrence bounds are unrolled into a regular expression over
//!   positions (one position per element or wildcard copy), unbounded
//!   repetition becoming a loop;
//! - the Glushkov position automaton of that expression is determinised by
//!   subset construction, checking unique particle attribution on the way;
//! - `<all>` groups get a bitmask automaton instead.
//!
//! Reference: https://www.w3.org/TR/xmlschema-1/#cos-nonambig

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::components::{ComponentSet, ElemId};
use super::exceptions::{SourcePos, Violation, ViolationCode, ViolationList};
use super::particles::{Compositor, Particle, Term};
use super::wildcards::Wildcard;
use crate::namespaces::QName;
use crate::options::RuntimeOptions;

/// Members an `<all>` bitmask can track
const MAX_ALL_MEMBERS: usize = 64;

/// What an instance element matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match<'a> {
    /// An element declaration (possibly a substitution-group member)
    Element(ElemId),
    /// A wildcard
    Wildcard(&'a Wildcard),
}

/// One state of a content DFA
#[derive(Debug, Clone, Default)]
pub struct DfaState {
    /// Named transitions, sorted by name
    transitions: Vec<(QName, u32, ElemId)>,
    /// Wildcard transitions, tried in order for names without a named transition
    wildcards: Vec<(Wildcard, u32)>,
    accepting: bool,
}

impl DfaState {
    /// Whether the content may end here
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}

/// A deterministic content automaton; state 0 is initial
#[derive(Debug, Clone, Default)]
pub struct Dfa {
    states: Vec<DfaState>,
}

impl Dfa {
    /// Number of states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the automaton has no states
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn step(&self, state: u32, name: &QName) -> Option<(u32, Match<'_>)> {
        let s = self.states.get(state as usize)?;
        if let Ok(i) = s.transitions.binary_search_by(|(n, _, _)| n.cmp(name)) {
            let (_, target, elem) = &s.transitions[i];
            return Some((*target, Match::Element(*elem)));
        }
        s.wildcards
            .iter()
            .find(|(w, _)| w.allows(name.namespace_str()))
            .map(|(w, target)| (*target, Match::Wildcard(w)))
    }
}

#[derive(Debug, Clone)]
struct AllMember {
    names: Vec<(QName, ElemId)>,
    required: bool,
}

/// Automaton of an `<all>` group: the state is the set of members seen
#[derive(Debug, Clone)]
pub struct AllModel {
    members: Vec<AllMember>,
    /// `minOccurs="0"` on the group
    optional: bool,
}

impl AllModel {
    fn member(&self, name: &QName) -> Option<(usize, ElemId)> {
        self.members.iter().enumerate().find_map(|(i, m)| {
            m.names
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| (i, *e))
        })
    }
}

/// A compiled content model
#[derive(Debug, Clone)]
pub enum ContentAutomaton {
    /// Sequences and choices
    Dfa(Dfa),
    /// An `<all>` group
    All(AllModel),
}

impl ContentAutomaton {
    /// Initial state
    pub fn initial(&self) -> u64 {
        0
    }

    /// Consume one child element
    pub fn step(&self, state: u64, name: &QName) -> Option<(u64, Match<'_>)> {
        match self {
            ContentAutomaton::Dfa(dfa) => {
                let state = u32::try_from(state).ok()?;
                dfa.step(state, name).map(|(t, m)| (u64::from(t), m))
            }
            ContentAutomaton::All(all) => {
                let (index, elem) = all.member(name)?;
                let bit = 1u64 << index;
                if state & bit != 0 {
                    return None;
                }
                Some((state | bit, Match::Element(elem)))
            }
        }
    }

    /// Whether the content may end in `state`
    pub fn is_accepting(&self, state: u64) -> bool {
        match self {
            ContentAutomaton::Dfa(dfa) => usize::try_from(state)
                .ok()
                .and_then(|s| dfa.states.get(s))
                .is_some_and(DfaState::is_accepting),
            ContentAutomaton::All(all) => {
                (state == 0 && all.optional)
                    || all
                        .members
                        .iter()
                        .enumerate()
                        .all(|(i, m)| !m.required || state & (1u64 << i) != 0)
            }
        }
    }

    /// Names (and wildcards) acceptable in `state`, for diagnostics
    pub fn expected(&self, state: u64) -> Vec<String> {
        match self {
            ContentAutomaton::Dfa(dfa) => match usize::try_from(state).ok().and_then(|s| dfa.states.get(s)) {
                Some(s) => s
                    .transitions
                    .iter()
                    .map(|(n, _, _)| n.to_string())
                    .chain(s.wildcards.iter().map(|(w, _)| format!("any {}", w)))
                    .collect(),
                None => Vec::new(),
            },
            ContentAutomaton::All(all) => all
                .members
                .iter()
                .enumerate()
                .filter(|(i, _)| state & (1u64 << i) == 0)
                .flat_map(|(_, m)| m.names.iter().map(|(n, _)| n.to_string()))
                .collect(),
        }
    }

    /// Number of states, for logging
    pub fn state_count(&self) -> usize {
        match self {
            ContentAutomaton::Dfa(dfa) => dfa.len(),
            ContentAutomaton::All(all) => all.members.len() + 1,
        }
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// What a position matches
#[derive(Debug, Clone)]
enum Symbol {
    Elements(Vec<(QName, ElemId)>),
    Any(Wildcard),
}

#[derive(Debug, Clone)]
struct Position {
    symbol: Symbol,
    /// Particle the position was unrolled from
    origin: usize,
}

#[derive(Debug)]
enum Expr {
    Empty,
    Leaf(usize),
    Seq(Vec<Expr>),
    Alt(Vec<Expr>),
    Opt(Box<Expr>),
    Star(Box<Expr>),
}

struct Info {
    nullable: bool,
    first: BTreeSet<usize>,
    last: BTreeSet<usize>,
}

struct Builder<'a> {
    set: &'a ComponentSet,
    positions: Vec<Position>,
    /// Origin ids of leaf particles, by address
    origins: BTreeMap<usize, usize>,
    occurs_limit: u32,
    position_limit: usize,
    owner: &'a str,
    all_errors: Vec<Violation>,
}

fn fatal(code: ViolationCode, message: String, pos: &SourcePos) -> Violation {
    Violation::new(code, message).at(pos)
}

impl<'a> Builder<'a> {
    fn origin(&mut self, particle: &Particle) -> usize {
        let key = particle as *const Particle as usize;
        let next = self.origins.len();
        *self.origins.entry(key).or_insert(next)
    }

    fn leaf(&mut self, particle: &Particle, symbol: Symbol) -> Result<Expr, Violation> {
        if self.positions.len() >= self.position_limit {
            return Err(fatal(
                ViolationCode::DfaStateExplosion,
                format!("content model of {} expands beyond {} positions", self.owner, self.position_limit),
                &particle.pos,
            ));
        }
        let origin = self.origin(particle);
        self.positions.push(Position { symbol, origin });
        Ok(Expr::Leaf(self.positions.len() - 1))
    }

    fn term(&mut self, particle: &Particle) -> Result<Expr, Violation> {
        match &particle.term {
            Term::Element(id) => {
                let decl = self.set.element(*id);
                let members = if decl.global {
                    self.set.substitutable(*id)
                } else {
                    vec![*id]
                };
                let names = members
                    .into_iter()
                    .map(|e| (self.set.element(e).name.clone(), e))
                    .collect();
                self.leaf(particle, Symbol::Elements(names))
            }
            Term::Any(w) => self.leaf(particle, Symbol::Any(w.clone())),
            Term::Group(group) => {
                if group.compositor == Compositor::All {
                    self.all_errors.push(fatal(
                        ViolationCode::AllGroupTooComplex,
                        format!("<all> in {} must be the whole content model", self.owner),
                        &particle.pos,
                    ));
                }
                let children = group
                    .particles
                    .iter()
                    .map(|p| self.particle(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match group.compositor {
                    Compositor::Choice => Expr::Alt(children),
                    Compositor::Sequence | Compositor::All => Expr::Seq(children),
                })
            }
            Term::ElementRef(_) | Term::GroupRef(_) => Ok(Expr::Empty),
        }
    }

    /// Unroll occurrence bounds: `min` copies, then nested optional copies
    /// up to `max`, or a loop when unbounded
    fn particle(&mut self, particle: &Particle) -> Result<Expr, Violation> {
        let occurs = particle.occurs;
        if occurs.is_empty() {
            return Ok(Expr::Empty);
        }
        let bound = occurs.max.unwrap_or(occurs.min).max(occurs.min);
        if bound > self.occurs_limit {
            return Err(fatal(
                ViolationCode::LimitExceeded,
                format!(
                    "occurrence bound {} in {} exceeds the limit of {}",
                    bound, self.owner, self.occurs_limit
                ),
                &particle.pos,
            ));
        }
        if occurs.min == 1 && occurs.max == Some(1) {
            return self.term(particle);
        }
        let mut items = Vec::new();
        for _ in 0..occurs.min {
            items.push(self.term(particle)?);
        }
        match occurs.max {
            None => items.push(Expr::Star(Box::new(self.term(particle)?))),
            Some(max) => {
                let mut tail = Expr::Empty;
                for _ in occurs.min..max {
                    let copy = self.term(particle)?;
                    tail = Expr::Opt(Box::new(Expr::Seq(vec![copy, tail])));
                }
                items.push(tail);
            }
        }
        Ok(Expr::Seq(items))
    }
}

fn analyze(expr: &Expr, follow: &mut [BTreeSet<usize>]) -> Info {
    match expr {
        Expr::Empty => Info {
            nullable: true,
            first: BTreeSet::new(),
            last: BTreeSet::new(),
        },
        Expr::Leaf(p) => Info {
            nullable: false,
            first: [*p].into_iter().collect(),
            last: [*p].into_iter().collect(),
        },
        Expr::Seq(items) => {
            let mut acc = Info {
                nullable: true,
                first: BTreeSet::new(),
                last: BTreeSet::new(),
            };
            for item in items {
                let info = analyze(item, follow);
                for p in &acc.last {
                    follow[*p].extend(info.first.iter().copied());
                }
                if acc.nullable {
                    acc.first.extend(info.first.iter().copied());
                }
                acc.last = if info.nullable {
                    acc.last.union(&info.last).copied().collect()
                } else {
                    info.last
                };
                acc.nullable &= info.nullable;
            }
            acc
        }
        Expr::Alt(items) => {
            let mut acc = Info {
                nullable: items.is_empty(),
                first: BTreeSet::new(),
                last: BTreeSet::new(),
            };
            for item in items {
                let info = analyze(item, follow);
                acc.nullable |= info.nullable;
                acc.first.extend(info.first);
                acc.last.extend(info.last);
            }
            acc
        }
        Expr::Opt(inner) => {
            let mut info = analyze(inner, follow);
            info.nullable = true;
            info
        }
        Expr::Star(inner) => {
            let mut info = analyze(inner, follow);
            for p in &info.last {
                follow[*p].extend(info.first.iter().copied());
            }
            info.nullable = true;
            info
        }
    }
}

fn overlaps(a: &Symbol, b: &Symbol) -> bool {
    match (a, b) {
        (Symbol::Elements(x), Symbol::Elements(y)) => x.iter().any(|(n, _)| y.iter().any(|(m, _)| n == m)),
        (Symbol::Elements(x), Symbol::Any(w)) | (Symbol::Any(w), Symbol::Elements(x)) => {
            x.iter().any(|(n, _)| w.allows(n.namespace_str()))
        }
        (Symbol::Any(v), Symbol::Any(w)) => v.namespace.intersects(&w.namespace),
    }
}

/// Compile a content particle.
///
/// Unique particle attribution failures and misplaced `<all>` groups are
/// pushed to `violations`; exceeding a resource limit is returned as the
/// error.
pub fn compile_content(
    set: &ComponentSet,
    particle: &Particle,
    options: &RuntimeOptions,
    owner: &str,
    violations: &mut ViolationList,
) -> Result<ContentAutomaton, Violation> {
    if let Term::Group(group) = &particle.term {
        if group.compositor == Compositor::All {
            return compile_all(set, particle, owner, violations);
        }
    }

    let max_states = options.max_dfa_states();
    let mut builder = Builder {
        set,
        positions: Vec::new(),
        origins: BTreeMap::new(),
        occurs_limit: options.max_occurs_limit(),
        position_limit: max_states,
        owner,
        all_errors: Vec::new(),
    };
    let expr = builder.particle(particle)?;
    violations.extend(builder.all_errors.drain(..));
    let positions = builder.positions;

    // The last slot is the initial pseudo-position
    let start = positions.len();
    let mut follow = vec![BTreeSet::new(); positions.len() + 1];
    let root = analyze(&expr, &mut follow);
    follow[start] = root.first.clone();
    let mut last = root.last;
    if root.nullable {
        last.insert(start);
    }

    let mut ambiguous = false;
    let mut subsets: IndexMap<BTreeSet<usize>, ()> = IndexMap::new();
    subsets.insert([start].into_iter().collect(), ());
    let mut states = Vec::new();
    let mut index = 0;
    while index < subsets.len() {
        let Some((subset, _)) = subsets.get_index(index) else {
            break;
        };
        let subset = subset.clone();
        let candidates: BTreeSet<usize> = subset.iter().flat_map(|p| follow[*p].iter().copied()).collect();

        if !ambiguous {
            let list: Vec<usize> = candidates.iter().copied().collect();
            'pairs: for (i, a) in list.iter().enumerate() {
                for b in &list[i + 1..] {
                    let (pa, pb) = (&positions[*a], &positions[*b]);
                    if pa.origin != pb.origin && overlaps(&pa.symbol, &pb.symbol) {
                        ambiguous = true;
                        violations.push(
                            Violation::new(
                                ViolationCode::AmbiguousContentModel,
                                format!("content model of {} violates unique particle attribution", owner),
                            )
                            .at(&particle.pos),
                        );
                        break 'pairs;
                    }
                }
            }
        }

        let mut named: BTreeMap<QName, (BTreeSet<usize>, ElemId)> = BTreeMap::new();
        for p in &candidates {
            if let Symbol::Elements(names) = &positions[*p].symbol {
                for (name, elem) in names {
                    named.entry(name.clone()).or_insert_with(|| (BTreeSet::new(), *elem)).0.insert(*p);
                }
            }
        }
        let names: Vec<QName> = named.keys().cloned().collect();
        for name in &names {
            for p in &candidates {
                if let Symbol::Any(w) = &positions[*p].symbol {
                    if w.allows(name.namespace_str()) {
                        if let Some(entry) = named.get_mut(name) {
                            entry.0.insert(*p);
                        }
                    }
                }
            }
        }

        let mut state = DfaState {
            accepting: subset.iter().any(|p| last.contains(p)),
            ..DfaState::default()
        };
        let intern = |target: BTreeSet<usize>, subsets: &mut IndexMap<BTreeSet<usize>, ()>| -> Result<u32, Violation> {
            let (id, _) = subsets.insert_full(target, ());
            if subsets.len() > max_states {
                return Err(fatal(
                    ViolationCode::DfaStateExplosion,
                    format!("content model of {} needs more than {} states", owner, max_states),
                    &particle.pos,
                ));
            }
            Ok(id as u32)
        };
        for (name, (target, elem)) in named {
            let id = intern(target, &mut subsets)?;
            state.transitions.push((name, id, elem));
        }
        let mut groups: BTreeMap<usize, (Wildcard, BTreeSet<usize>)> = BTreeMap::new();
        for p in &candidates {
            if let Symbol::Any(w) = &positions[*p].symbol {
                groups
                    .entry(positions[*p].origin)
                    .or_insert_with(|| (w.clone(), BTreeSet::new()))
                    .1
                    .insert(*p);
            }
        }
        for (_, (wildcard, target)) in groups {
            let id = intern(target, &mut subsets)?;
            state.wildcards.push((wildcard, id));
        }
        states.push(state);
        index += 1;
    }
    let dfa = minimize(Dfa { states });
    log::trace!("content model of {} compiled to {} states", owner, dfa.len());
    Ok(ContentAutomaton::Dfa(dfa))
}

/// Merge states that accept the same continuations.
///
/// Moore refinement: states start split by their accepting bit and are
/// split further while two states of one block move to different blocks on
/// some name or wildcard. Block numbers follow first appearance, so state 0
/// stays initial.
fn minimize(dfa: Dfa) -> Dfa {
    let count = dfa.states.len();
    if count < 2 {
        return dfa;
    }
    // Wildcards compare by value; key them by first occurrence
    let mut distinct: Vec<&Wildcard> = Vec::new();
    let mut wildcards: Vec<Vec<usize>> = Vec::with_capacity(count);
    for state in &dfa.states {
        let mut keys = Vec::with_capacity(state.wildcards.len());
        for (w, _) in &state.wildcards {
            let key = match distinct.iter().position(|k| *k == w) {
                Some(i) => i,
                None => {
                    distinct.push(w);
                    distinct.len() - 1
                }
            };
            keys.push(key);
        }
        wildcards.push(keys);
    }

    let mut block: Vec<usize> = dfa.states.iter().map(|s| usize::from(!s.accepting)).collect();
    let mut blocks = 0;
    loop {
        type Signature<'a> = (usize, Vec<(&'a QName, ElemId, usize)>, Vec<(usize, usize)>);
        let mut numbering: HashMap<Signature<'_>, usize> = HashMap::new();
        let mut next = Vec::with_capacity(count);
        for (index, state) in dfa.states.iter().enumerate() {
            let signature: Signature<'_> = (
                block[index],
                state
                    .transitions
                    .iter()
                    .map(|(name, target, elem)| (name, *elem, block[*target as usize]))
                    .collect(),
                state
                    .wildcards
                    .iter()
                    .zip(&wildcards[index])
                    .map(|((_, target), key)| (*key, block[*target as usize]))
                    .collect(),
            );
            let fresh = numbering.len();
            next.push(*numbering.entry(signature).or_insert(fresh));
        }
        let refined = numbering.len();
        block = next;
        if refined == blocks {
            break;
        }
        blocks = refined;
    }
    if blocks == count {
        return dfa;
    }

    let mut states: Vec<Option<DfaState>> = vec![None; blocks];
    for (index, state) in dfa.states.into_iter().enumerate() {
        let slot = &mut states[block[index]];
        if slot.is_some() {
            continue;
        }
        let remap = |target: u32| block[target as usize] as u32;
        *slot = Some(DfaState {
            transitions: state
                .transitions
                .into_iter()
                .map(|(name, target, elem)| (name, remap(target), elem))
                .collect(),
            wildcards: state
                .wildcards
                .into_iter()
                .map(|(w, target)| (w, remap(target)))
                .collect(),
            accepting: state.accepting,
        });
    }
    Dfa {
        states: states.into_iter().flatten().collect(),
    }
}

fn compile_all(
    set: &ComponentSet,
    particle: &Particle,
    owner: &str,
    violations: &mut ViolationList,
) -> Result<ContentAutomaton, Violation> {
    let mut too_complex = |message: String, pos: &SourcePos| {
        violations.push(Violation::new(ViolationCode::AllGroupTooComplex, message).at(pos));
    };
    if particle.occurs.max != Some(1) || particle.occurs.min > 1 {
        too_complex(format!("<all> in {} must occur at most once", owner), &particle.pos);
    }
    let mut members = Vec::new();
    if let Term::Group(group) = &particle.term {
        for child in &group.particles {
            match &child.term {
                Term::Element(id) if child.occurs.max.is_some_and(|m| m <= 1) => {
                    if child.occurs.is_empty() {
                        continue;
                    }
                    let ids = if set.element(*id).global {
                        set.substitutable(*id)
                    } else {
                        vec![*id]
                    };
                    members.push(AllMember {
                        names: ids.into_iter().map(|e| (set.element(e).name.clone(), e)).collect(),
                        required: child.occurs.min > 0,
                    });
                }
                Term::Element(_) => too_complex(
                    format!("elements of <all> in {} may occur at most once", owner),
                    &child.pos,
                ),
                _ => too_complex(format!("<all> in {} may only contain elements", owner), &child.pos),
            }
        }
    }
    if members.len() > MAX_ALL_MEMBERS {
        too_complex(
            format!("<all> in {} has more than {} members", owner, MAX_ALL_MEMBERS),
            &particle.pos,
        );
        members.truncate(MAX_ALL_MEMBERS);
    }
    let mut seen = HashSet::new();
    let duplicate = members
        .iter()
        .flat_map(|m| m.names.iter())
        .any(|(n, _)| !seen.insert(n.clone()));
    if duplicate {
        violations.push(
            Violation::new(
                ViolationCode::AmbiguousContentModel,
                format!("<all> in {} contains the same element twice", owner),
            )
            .at(&particle.pos),
        );
    }
    Ok(ContentAutomaton::All(AllModel {
        members,
        optional: particle.occurs.min == 0,
    }))
}

/// Whether every content accepted by `derived` is accepted by `base`
pub fn is_restriction(derived: &ContentAutomaton, base: &ContentAutomaton) -> bool {
    match (derived, base) {
        (ContentAutomaton::Dfa(d), ContentAutomaton::Dfa(b)) => dfa_included(d, b),
        (ContentAutomaton::All(d), ContentAutomaton::All(b)) => {
            let members_allowed = d.members.iter().all(|m| {
                m.names.iter().all(|(n, _)| b.member(n).is_some())
            });
            let required_kept = b.members.iter().filter(|m| m.required).all(|bm| {
                d.members
                    .iter()
                    .any(|dm| dm.required && dm.names.iter().any(|(n, _)| bm.names.iter().any(|(m, _)| m == n)))
            });
            members_allowed && required_kept && (b.optional || !d.optional)
        }
        // Mixed compositors are not compared
        _ => true,
    }
}

fn dfa_included(derived: &Dfa, base: &Dfa) -> bool {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((0u32, 0u32));
    seen.insert((0u32, 0u32));
    while let Some((d, b)) = queue.pop_front() {
        let (Some(ds), Some(bs)) = (derived.states.get(d as usize), base.states.get(b as usize)) else {
            return false;
        };
        if ds.accepting && !bs.accepting {
            return false;
        }
        let mut next = Vec::new();
        for (name, target, _) in &ds.transitions {
            match base.step(b, name) {
                Some((bt, _)) => next.push((*target, bt)),
                None => return false,
            }
        }
        for (wildcard, target) in &ds.wildcards {
            match bs.wildcards.iter().find(|(w, _)| wildcard.namespace.is_subset(&w.namespace)) {
                Some((_, bt)) => next.push((*target, *bt)),
                None => return false,
            }
        }
        for pair in next {
            if seen.insert(pair) {
                queue.push_back(pair);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::components::{ElementDecl, TypeRef};
    use crate::validators::components::DerivationSet;
    use crate::validators::particles::{ModelGroup, Occurs};
    use std::sync::Arc;

    fn pos() -> SourcePos {
        SourcePos::unknown(Arc::from("test.xsd"))
    }

    fn element(set: &mut ComponentSet, name: &str) -> ElemId {
        set.add_element(ElementDecl {
            name: QName::local(name),
            type_ref: TypeRef::Unspecified,
            type_explicit: false,
            nillable: false,
            default: None,
            fixed: None,
            abstract_: false,
            block: DerivationSet::empty(),
            final_: DerivationSet::empty(),
            substitution_head: None,
            head: None,
            identity_constraints: Vec::new(),
            global: false,
            pos: pos(),
        })
    }

    fn leaf(id: ElemId, occurs: Occurs) -> Particle {
        Particle::new(occurs, Term::Element(id), pos())
    }

    fn group(compositor: Compositor, particles: Vec<Particle>, occurs: Occurs) -> Particle {
        let mut g = ModelGroup::new(compositor);
        g.particles = particles;
        Particle::new(occurs, Term::Group(g), pos())
    }

    fn run(automaton: &ContentAutomaton, names: &[&str]) -> bool {
        let mut state = automaton.initial();
        for name in names {
            match automaton.step(state, &QName::local(*name)) {
                Some((next, _)) => state = next,
                None => return false,
            }
        }
        automaton.is_accepting(state)
    }

    fn compile(set: &ComponentSet, particle: &Particle) -> (ContentAutomaton, ViolationList) {
        let mut violations = ViolationList::new(0);
        let automaton = compile_content(set, particle, &RuntimeOptions::new(), "test", &mut violations).unwrap();
        (automaton, violations)
    }

    #[test]
    fn test_sequence_with_bounds() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let b = element(&mut set, "b");
        let p = group(
            Compositor::Sequence,
            vec![leaf(a, Occurs::new(1, Some(3))), leaf(b, Occurs::optional())],
            Occurs::once(),
        );
        let (automaton, violations) = compile(&set, &p);
        assert!(violations.is_empty());
        assert!(run(&automaton, &["a"]));
        assert!(run(&automaton, &["a", "a", "a", "b"]));
        assert!(!run(&automaton, &["a", "a", "a", "a"]));
        assert!(!run(&automaton, &["b"]));
        assert!(!run(&automaton, &[]));
    }

    #[test]
    fn test_unbounded_is_constant_size() {
        let mut set = ComponentSet::new();
        let item = element(&mut set, "item");
        let p = group(Compositor::Sequence, vec![leaf(item, Occurs::zero_or_more())], Occurs::once());
        let (automaton, _) = compile(&set, &p);
        assert_eq!(automaton.state_count(), 2);
        let many: Vec<&str> = std::iter::repeat("item").take(1000).collect();
        assert!(run(&automaton, &many));
    }

    #[test]
    fn test_unbounded_tail_after_required_copies() {
        let mut set = ComponentSet::new();
        let item = element(&mut set, "item");
        for (min, states) in [(1, 2), (3, 4), (10, 11)] {
            let p = group(Compositor::Sequence, vec![leaf(item, Occurs::new(min, None))], Occurs::once());
            let (automaton, violations) = compile(&set, &p);
            assert!(violations.is_empty());
            assert_eq!(automaton.state_count(), states, "minOccurs={}", min);
            let short: Vec<&str> = std::iter::repeat("item").take(min as usize - 1).collect();
            let long: Vec<&str> = std::iter::repeat("item").take(min as usize + 50).collect();
            assert!(!run(&automaton, &short));
            assert!(run(&automaton, &long));
        }
    }

    #[test]
    fn test_minimized_states_keep_distinct_matches() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let other_a = element(&mut set, "a");
        let b = element(&mut set, "b");
        let p = group(
            Compositor::Choice,
            vec![
                group(Compositor::Sequence, vec![leaf(b, Occurs::once()), leaf(a, Occurs::once())], Occurs::once()),
                group(Compositor::Sequence, vec![leaf(other_a, Occurs::once())], Occurs::once()),
            ],
            Occurs::once(),
        );
        let (automaton, violations) = compile(&set, &p);
        assert!(violations.is_empty());
        let (after_b, _) = automaton.step(0, &QName::local("b")).unwrap();
        let (_, first) = automaton.step(after_b, &QName::local("a")).unwrap();
        let (_, second) = automaton.step(0, &QName::local("a")).unwrap();
        assert_eq!(first, Match::Element(a));
        assert_eq!(second, Match::Element(other_a));
    }

    #[test]
    fn test_choice_and_expected() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let b = element(&mut set, "b");
        let p = group(Compositor::Choice, vec![leaf(a, Occurs::once()), leaf(b, Occurs::once())], Occurs::once());
        let (automaton, _) = compile(&set, &p);
        assert_eq!(automaton.expected(0), vec!["a".to_string(), "b".to_string()]);
        assert!(run(&automaton, &["b"]));
        assert!(!run(&automaton, &["a", "b"]));
    }

    #[test]
    fn test_ambiguous_model() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let a2 = element(&mut set, "a");
        let p = group(
            Compositor::Sequence,
            vec![leaf(a, Occurs::optional()), leaf(a2, Occurs::once())],
            Occurs::once(),
        );
        let (_, violations) = compile(&set, &p);
        assert_eq!(violations.codes(), vec![ViolationCode::AmbiguousContentModel]);
    }

    #[test]
    fn test_wildcard_transitions() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let any = Particle::new(Occurs::zero_or_more(), Term::Any(Wildcard::any_lax()), pos());
        let p = group(Compositor::Sequence, vec![leaf(a, Occurs::once()), any], Occurs::once());
        let (automaton, violations) = compile(&set, &p);
        assert!(violations.is_empty());
        let (state, matched) = automaton.step(0, &QName::local("a")).unwrap();
        assert_eq!(matched, Match::Element(a));
        let (_, matched) = automaton.step(state, &QName::namespaced("urn:x", "z")).unwrap();
        assert!(matches!(matched, Match::Wildcard(_)));
    }

    #[test]
    fn test_limits() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let p = group(Compositor::Sequence, vec![leaf(a, Occurs::new(0, Some(100)))], Occurs::once());
        let mut violations = ViolationList::new(0);
        let options = RuntimeOptions::new().with_max_occurs_limit(50);
        let err = compile_content(&set, &p, &options, "test", &mut violations).unwrap_err();
        assert_eq!(err.code, ViolationCode::LimitExceeded);

        let options = RuntimeOptions::new().with_max_dfa_states(10);
        let err = compile_content(&set, &p, &options, "test", &mut violations).unwrap_err();
        assert_eq!(err.code, ViolationCode::DfaStateExplosion);
    }

    #[test]
    fn test_all_group() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let b = element(&mut set, "b");
        let p = group(Compositor::All, vec![leaf(a, Occurs::once()), leaf(b, Occurs::optional())], Occurs::once());
        let (automaton, violations) = compile(&set, &p);
        assert!(violations.is_empty());
        assert!(run(&automaton, &["b", "a"]));
        assert!(run(&automaton, &["a"]));
        assert!(!run(&automaton, &["b"]));
        assert!(!run(&automaton, &["a", "a"]));

        let bad = group(Compositor::All, vec![leaf(a, Occurs::new(0, Some(2)))], Occurs::once());
        let (_, violations) = compile(&set, &bad);
        assert_eq!(violations.codes(), vec![ViolationCode::AllGroupTooComplex]);

        let nested = group(Compositor::Sequence, vec![p.clone()], Occurs::once());
        let (_, violations) = compile(&set, &nested);
        assert_eq!(violations.codes(), vec![ViolationCode::AllGroupTooComplex]);
    }

    #[test]
    fn test_restriction_inclusion() {
        let mut set = ComponentSet::new();
        let a = element(&mut set, "a");
        let b = element(&mut set, "b");
        let base = group(
            Compositor::Sequence,
            vec![leaf(a, Occurs::zero_or_more()), leaf(b, Occurs::optional())],
            Occurs::once(),
        );
        let narrower = group(Compositor::Sequence, vec![leaf(a, Occurs::new(1, Some(2)))], Occurs::once());
        let wider = group(Compositor::Sequence, vec![leaf(b, Occurs::new(1, Some(2)))], Occurs::once());
        let (base, _) = compile(&set, &base);
        let (narrower, _) = compile(&set, &narrower);
        let (wider, _) = compile(&set, &wider);
        assert!(is_restriction(&narrower, &base));
        assert!(!is_restriction(&wider, &base));
    }
}

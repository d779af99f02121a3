//! Entity resolution over unified candidates.
//!
//! Every candidate pair is evaluated against a deterministic, symmetric
//! predicate. Matching pairs become edges of a [`MatchGraph`], which is
//! partitioned into identity groups with a conflict-aware union-find:
//! a union that would place two different values of a trusted identifier
//! in the same group is refused.
//!
//! Evaluating all pairs is quadratic in the number of candidates. That is
//! fine for CRM-sized snapshots (tens of thousands of records) and is the
//! main scaling limit of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::entity::{columns, FieldValue, UnifiedRecord};
use crate::normalize::{normalize_email, CompanyCanonicalizer};

/// Fallback match rule, tried when no trusted identifier decides a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Any shared email address (case-insensitive)
    Email,
    /// Any shared normalized phone number
    Phone,
    /// Same normalized full name and an overlapping canonical company
    NameAndCompany,
    /// Same canonical company name
    CompanyName,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchRule::Email => "email",
            MatchRule::Phone => "phone",
            MatchRule::NameAndCompany => "name_and_company",
            MatchRule::CompanyName => "company_name",
        };
        f.write_str(name)
    }
}

/// Match configuration for one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Columns whose equal values always match and whose different values
    /// never do (e.g. `rolodex_id`)
    #[serde(default)]
    pub trusted_identifiers: Vec<String>,
    /// Fallback rules, tried in order
    #[serde(default)]
    pub rules: Vec<MatchRule>,
}

/// Outcome of comparing two candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    /// Both carry the same value of this trusted identifier
    Identifier(String),
    Rule(MatchRule),
    /// Both carry different values of this trusted identifier
    Conflict(String),
    NoMatch,
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchDecision::Identifier(_) | MatchDecision::Rule(_))
    }
}

/// The values of one candidate that the predicate looks at, computed once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSignals {
    /// Aligned with the policy's trusted identifiers
    pub identifiers: Vec<Option<String>>,
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    /// Lower-cased, whitespace-collapsed full name
    pub name: Option<String>,
    /// Canonical company names
    pub companies: BTreeSet<String>,
}

fn texts(record: &UnifiedRecord, column: &str) -> Vec<String> {
    record
        .get(column)
        .cloned()
        .map(FieldValue::into_items)
        .unwrap_or_default()
        .iter()
        .filter_map(FieldValue::to_text)
        .collect()
}

fn normalize_name(name: &str) -> Option<String> {
    let collapsed = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!collapsed.is_empty()).then_some(collapsed)
}

fn overlaps(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.intersection(b).next().is_some()
}

/// A matching pair `a < b` and the reason it matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEdge {
    pub a: usize,
    pub b: usize,
    pub decision: MatchDecision,
}

/// Run-scoped match graph over candidate indices.
#[derive(Debug, Clone, Default)]
pub struct MatchGraph {
    pub nodes: usize,
    /// Matching pairs in `(a, b)` order
    pub edges: Vec<MatchEdge>,
    /// Pairs that were hard negatives
    pub conflicts: usize,
}

/// Identity groups found by [`Matcher::partition`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Candidate indices per group, ascending; groups ordered by their
    /// smallest member
    pub groups: Vec<Vec<usize>>,
    /// Unions refused because they would mix trusted identifier values
    pub refused_unions: usize,
}

impl Partition {
    /// Groups with more than one member
    pub fn duplicate_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.len() > 1).count()
    }
}

/// Union-find whose roots remember the trusted identifier values of their
/// group. Roots are always the smallest member.
struct ConflictAwareUnionFind {
    parent: Vec<usize>,
    identifiers: Vec<Vec<Option<String>>>,
}

impl ConflictAwareUnionFind {
    fn new(signals: &[MatchSignals]) -> Self {
        Self {
            parent: (0..signals.len()).collect(),
            identifiers: signals.iter().map(|s| s.identifiers.clone()).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Returns false when the union was refused.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return true;
        }

        let conflict = self.identifiers[ra]
            .iter()
            .zip(&self.identifiers[rb])
            .any(|pair| matches!(pair, (Some(x), Some(y)) if x != y));
        if conflict {
            return false;
        }

        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        let absorbed = std::mem::take(&mut self.identifiers[child]);
        for (slot, value) in self.identifiers[root].iter_mut().zip(absorbed) {
            if slot.is_none() {
                *slot = value;
            }
        }
        self.parent[child] = root;
        true
    }
}

/// Evaluates the match predicate and partitions candidates.
pub struct Matcher<'a> {
    policy: &'a MatchPolicy,
    companies: &'a CompanyCanonicalizer,
}

impl<'a> Matcher<'a> {
    pub fn new(policy: &'a MatchPolicy, companies: &'a CompanyCanonicalizer) -> Self {
        Self { policy, companies }
    }

    pub fn signals(&self, record: &UnifiedRecord) -> MatchSignals {
        let identifiers = self
            .policy
            .trusted_identifiers
            .iter()
            .map(|column| record.text(column))
            .collect();

        let emails = columns::EMAIL_COLUMNS
            .iter()
            .flat_map(|c| texts(record, c))
            .filter_map(|e| normalize_email(&e))
            .collect();

        let phones = columns::PHONE_COLUMNS
            .iter()
            .flat_map(|c| texts(record, c))
            .collect();

        let name = record
            .text(columns::FULL_NAME)
            .or_else(|| {
                let first = record.text(columns::FIRST_NAME).unwrap_or_default();
                let last = record.text(columns::LAST_NAME).unwrap_or_default();
                Some(format!("{} {}", first, last))
            })
            .and_then(|n| normalize_name(&n));

        let companies = texts(record, columns::COMPANY_NAME)
            .iter()
            .filter_map(|c| self.companies.canonicalize(c))
            .collect();

        MatchSignals {
            identifiers,
            emails,
            phones,
            name,
            companies,
        }
    }

    /// Symmetric, null-safe match predicate. A differing trusted identifier
    /// is a hard negative and overrides every other signal.
    pub fn decide(&self, a: &MatchSignals, b: &MatchSignals) -> MatchDecision {
        let trusted = || {
            self.policy
                .trusted_identifiers
                .iter()
                .zip(a.identifiers.iter().zip(&b.identifiers))
        };

        for (column, pair) in trusted() {
            if let (Some(x), Some(y)) = pair {
                if x != y {
                    return MatchDecision::Conflict(column.clone());
                }
            }
        }
        for (column, pair) in trusted() {
            if let (Some(x), Some(y)) = pair {
                if x == y {
                    return MatchDecision::Identifier(column.clone());
                }
            }
        }

        for rule in &self.policy.rules {
            let matched = match rule {
                MatchRule::Email => overlaps(&a.emails, &b.emails),
                MatchRule::Phone => overlaps(&a.phones, &b.phones),
                MatchRule::NameAndCompany => {
                    a.name.is_some() && a.name == b.name && overlaps(&a.companies, &b.companies)
                }
                MatchRule::CompanyName => overlaps(&a.companies, &b.companies),
            };
            if matched {
                return MatchDecision::Rule(*rule);
            }
        }

        MatchDecision::NoMatch
    }

    /// Evaluate every pair. Quadratic in the number of candidates.
    pub fn build_graph(&self, signals: &[MatchSignals]) -> MatchGraph {
        let mut graph = MatchGraph {
            nodes: signals.len(),
            ..Default::default()
        };

        for a in 0..signals.len() {
            for b in (a + 1)..signals.len() {
                match self.decide(&signals[a], &signals[b]) {
                    MatchDecision::NoMatch => {}
                    MatchDecision::Conflict(column) => {
                        tracing::debug!("Candidates {} and {} conflict on '{}'", a, b, column);
                        graph.conflicts += 1;
                    }
                    decision => graph.edges.push(MatchEdge { a, b, decision }),
                }
            }
        }

        graph
    }

    /// Partition records into identity groups.
    pub fn partition(&self, records: &[&UnifiedRecord]) -> Partition {
        let signals: Vec<MatchSignals> = records.iter().map(|r| self.signals(r)).collect();
        let graph = self.build_graph(&signals);

        let mut sets = ConflictAwareUnionFind::new(&signals);
        let mut refused_unions = 0;

        let identifier_edges = graph
            .edges
            .iter()
            .filter(|e| matches!(e.decision, MatchDecision::Identifier(_)));
        let rule_edges = graph
            .edges
            .iter()
            .filter(|e| matches!(e.decision, MatchDecision::Rule(_)));

        for edge in identifier_edges.chain(rule_edges) {
            if !sets.union(edge.a, edge.b) {
                tracing::debug!(
                    "Refused to join candidates {} and {} ({:?}): trusted identifiers differ",
                    edge.a,
                    edge.b,
                    edge.decision
                );
                refused_unions += 1;
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group_of_root = vec![usize::MAX; records.len()];
        for node in 0..records.len() {
            let root = sets.find(node);
            if group_of_root[root] == usize::MAX {
                group_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[group_of_root[root]].push(node);
        }

        tracing::debug!(
            "Match graph: {} nodes, {} edges, {} conflicting pairs, {} groups",
            graph.nodes,
            graph.edges.len(),
            graph.conflicts,
            groups.len()
        );

        Partition {
            groups,
            refused_unions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::normalize::tests::test_config;

    fn person(id: &str, fields: &[(&str, FieldValue)]) -> UnifiedRecord {
        let mut record = UnifiedRecord::new(EntityKind::Person, id, "S1");
        for (column, value) in fields {
            record.set(*column, value.clone());
        }
        record
    }

    fn companies() -> CompanyCanonicalizer {
        CompanyCanonicalizer::new(&test_config()).unwrap()
    }

    fn policy(trusted: &[&str], rules: &[MatchRule]) -> MatchPolicy {
        MatchPolicy {
            trusted_identifiers: trusted.iter().map(|s| s.to_string()).collect(),
            rules: rules.to_vec(),
        }
    }

    fn partition(policy: &MatchPolicy, records: &[UnifiedRecord]) -> Partition {
        let canonicalizer = companies();
        let refs: Vec<&UnifiedRecord> = records.iter().collect();
        Matcher::new(policy, &canonicalizer).partition(&refs)
    }

    #[test]
    fn test_decide_is_symmetric() {
        let policy = policy(&["rolodex_id"], &[MatchRule::Email, MatchRule::NameAndCompany]);
        let canonicalizer = companies();
        let matcher = Matcher::new(&policy, &canonicalizer);

        let a = matcher.signals(&person(
            "a",
            &[
                ("full_name", "Rohan  Shah".into()),
                ("company_name", "Studio Nine Pvt Ltd".into()),
            ],
        ));
        let b = matcher.signals(&person(
            "b",
            &[
                ("first_name", "rohan".into()),
                ("last_name", "SHAH".into()),
                ("company_name", "studio nine".into()),
            ],
        ));

        assert_eq!(matcher.decide(&a, &b), MatchDecision::Rule(MatchRule::NameAndCompany));
        assert_eq!(matcher.decide(&a, &b), matcher.decide(&b, &a));
    }

    #[test]
    fn test_name_without_company_does_not_match() {
        let policy = policy(&[], &[MatchRule::NameAndCompany]);
        let records = vec![
            person("a", &[("full_name", "Rohan Shah".into())]),
            person("b", &[("full_name", "Rohan Shah".into())]),
        ];

        assert_eq!(partition(&policy, &records).groups, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_email_and_phone_rules() {
        let policy = policy(&[], &[MatchRule::Email, MatchRule::Phone]);
        let records = vec![
            person("a", &[("full_name", "A".into()), ("email", "X@Y.com".into())]),
            person(
                "b",
                &[
                    ("full_name", "B".into()),
                    (
                        "all_emails",
                        FieldValue::List(vec!["z@y.com".into(), "x@y.com".into()]),
                    ),
                ],
            ),
            person("c", &[("full_name", "C".into()), ("mobile", "+919876543210".into())]),
            person(
                "d",
                &[
                    ("full_name", "D".into()),
                    ("all_phones", FieldValue::List(vec!["+919876543210".into()])),
                ],
            ),
        ];

        assert_eq!(partition(&policy, &records).groups, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_transitive_closure() {
        let policy = policy(&[], &[MatchRule::Email, MatchRule::Phone]);
        let records = vec![
            person("a", &[("full_name", "A".into()), ("email", "a@x.com".into())]),
            person("b", &[("full_name", "B".into()), ("mobile", "+911".into())]),
            person(
                "c",
                &[
                    ("full_name", "C".into()),
                    ("email", "a@x.com".into()),
                    ("mobile", "+911".into()),
                ],
            ),
        ];

        let result = partition(&policy, &records);
        assert_eq!(result.groups, vec![vec![0, 1, 2]]);
        assert_eq!(result.duplicate_groups(), 1);
    }

    #[test]
    fn test_identifier_match_beats_missing_signals() {
        let policy = policy(&["rolodex_id"], &[]);
        let records = vec![
            person("a", &[("full_name", "Rohan".into()), ("rolodex_id", "55".into())]),
            person("b", &[("full_name", "R. Shah".into()), ("rolodex_id", "55".into())]),
        ];

        assert_eq!(partition(&policy, &records).groups, vec![vec![0, 1]]);
    }

    #[test]
    fn test_hard_negative_overrides_rules() {
        let policy = policy(&["rolodex_id"], &[MatchRule::Email]);
        let canonicalizer = companies();
        let matcher = Matcher::new(&policy, &canonicalizer);

        let a = person("a", &[("email", "same@x.com".into()), ("rolodex_id", "1".into())]);
        let b = person("b", &[("email", "same@x.com".into()), ("rolodex_id", "2".into())]);
        assert_eq!(
            matcher.decide(&matcher.signals(&a), &matcher.signals(&b)),
            MatchDecision::Conflict("rolodex_id".to_string())
        );

        let result = partition(&policy, &[a, b]);
        assert_eq!(result.groups, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_hard_negative_holds_for_groups() {
        // a and c share an email with b, but a and c carry different ids
        let policy = policy(&["rolodex_id"], &[MatchRule::Email]);
        let records = vec![
            person("a", &[("email", "a@x.com".into()), ("rolodex_id", "1".into())]),
            person(
                "b",
                &[(
                    "all_emails",
                    FieldValue::List(vec!["a@x.com".into(), "c@x.com".into()]),
                )],
            ),
            person("c", &[("email", "c@x.com".into()), ("rolodex_id", "2".into())]),
        ];

        let result = partition(&policy, &records);
        assert_eq!(result.groups, vec![vec![0, 1], vec![2]]);
        assert_eq!(result.refused_unions, 1);
    }

    #[test]
    fn test_company_name_rule() {
        let policy = policy(&[], &[MatchRule::CompanyName]);
        let mut records = Vec::new();
        for (id, name) in [("a", "Acme Pvt. Ltd."), ("b", "Globex"), ("c", "ACME")] {
            let mut record = UnifiedRecord::new(EntityKind::Company, id, "S1");
            record.set("company_name", name.into());
            records.push(record);
        }

        assert_eq!(partition(&policy, &records).groups, vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_graph_edges_are_ordered() {
        let policy = policy(&[], &[MatchRule::Email]);
        let canonicalizer = companies();
        let matcher = Matcher::new(&policy, &canonicalizer);
        let records = vec![
            person("a", &[("email", "x@x.com".into())]),
            person("b", &[("email", "x@x.com".into())]),
            person("c", &[("email", "x@x.com".into())]),
        ];
        let signals: Vec<MatchSignals> = records.iter().map(|r| matcher.signals(r)).collect();

        let graph = matcher.build_graph(&signals);
        let pairs: Vec<(usize, usize)> = graph.edges.iter().map(|e| (e.a, e.b)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    }
}

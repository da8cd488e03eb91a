//! Statement-level data model.
//!
//! A [`Statement`] is an RDF quad: subject, predicate, object and a provenance
//! graph (`GraphName::DefaultGraph` when it has none). Statements are immutable
//! once built. A [`Model`] is an unordered set of statements spanning any number
//! of graphs.

pub mod vocab;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use oxigraph::model::{GraphName, NamedNode, NamedOrBlankNode, Quad, Term, Triple};
use serde::{Deserialize, Serialize};

/// A (subject, predicate, object, graph) fact.
pub type Statement = Quad;

/// Pattern for statement lookup. `None` positions match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementPattern {
    pub subject: Option<NamedOrBlankNode>,
    pub predicate: Option<NamedNode>,
    pub object: Option<Term>,
    pub graph: Option<GraphName>,
}

impl StatementPattern {
    /// Pattern matching every statement.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(subject: impl Into<NamedOrBlankNode>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    pub fn with_predicate(mut self, predicate: impl Into<NamedNode>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn with_object(mut self, object: impl Into<Term>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_graph(mut self, graph: impl Into<GraphName>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    pub fn matches(&self, statement: &Statement) -> bool {
        self.subject.as_ref().is_none_or(|s| *s == statement.subject)
            && self.predicate.as_ref().is_none_or(|p| *p == statement.predicate)
            && self.object.as_ref().is_none_or(|o| *o == statement.object)
            && self.graph.as_ref().is_none_or(|g| *g == statement.graph_name)
    }
}

impl fmt::Display for StatementPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn slot(f: &mut fmt::Formatter<'_>, v: Option<String>) -> fmt::Result {
            match v {
                Some(v) => f.write_str(&v),
                None => f.write_str("*"),
            }
        }
        f.write_str("[")?;
        slot(f, self.subject.as_ref().map(ToString::to_string))?;
        f.write_str(", ")?;
        slot(f, self.predicate.as_ref().map(ToString::to_string))?;
        f.write_str(", ")?;
        slot(f, self.object.as_ref().map(ToString::to_string))?;
        f.write_str(", ")?;
        slot(f, self.graph.as_ref().map(ToString::to_string))?;
        f.write_str("]")
    }
}

/// An unordered collection of statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    statements: HashSet<Statement>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a statement. Returns `false` if it was already present.
    pub fn insert(&mut self, statement: Statement) -> bool {
        self.statements.insert(statement)
    }

    /// Add a triple in the default graph.
    pub fn add(
        &mut self,
        subject: impl Into<NamedOrBlankNode>,
        predicate: impl Into<NamedNode>,
        object: impl Into<Term>,
    ) -> bool {
        self.insert(Quad::new(subject, predicate, object, GraphName::DefaultGraph))
    }

    pub fn remove(&mut self, statement: &Statement) -> bool {
        self.statements.remove(statement)
    }

    pub fn contains(&self, statement: &Statement) -> bool {
        self.statements.contains(statement)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// Statements matching the pattern, as a new model.
    pub fn filter(&self, pattern: &StatementPattern) -> Model {
        self.statements
            .iter()
            .filter(|s| pattern.matches(s))
            .cloned()
            .collect()
    }

    pub fn matches_any(&self, pattern: &StatementPattern) -> bool {
        self.statements.iter().any(|s| pattern.matches(s))
    }

    pub fn retain(&mut self, f: impl FnMut(&Statement) -> bool) {
        self.statements.retain(f);
    }

    pub fn subjects(&self) -> HashSet<NamedOrBlankNode> {
        self.statements.iter().map(|s| s.subject.clone()).collect()
    }

    pub fn objects(&self) -> HashSet<Term> {
        self.statements.iter().map(|s| s.object.clone()).collect()
    }

    pub fn contexts(&self) -> HashSet<GraphName> {
        self.statements.iter().map(|s| s.graph_name.clone()).collect()
    }

    /// Triples of the model, ignoring graphs; duplicates across graphs collapse.
    pub fn triples(&self) -> HashSet<Triple> {
        self.statements
            .iter()
            .map(|s| Triple::new(s.subject.clone(), s.predicate.clone(), s.object.clone()))
            .collect()
    }

    pub fn extend(&mut self, statements: impl IntoIterator<Item = Statement>) {
        self.statements.extend(statements);
    }
}

impl FromIterator<Statement> for Model {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Model {
    type Item = Statement;
    type IntoIter = std::collections::hash_set::IntoIter<Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Model {
    type Item = &'a Statement;
    type IntoIter = std::collections::hash_set::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

/// A prefix binding, e.g. `rdf` -> `http://www.w3.org/1999/02/22-rdf-syntax-ns#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    pub iri: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            iri: iri.into(),
        }
    }
}

/// A statement produced by a graph query, carrying the namespaces of the
/// query that produced it so serializers can emit the same prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedStatement {
    pub triple: Triple,
    pub namespaces: Arc<Vec<Namespace>>,
}

impl AnnotatedStatement {
    pub fn new(triple: Triple, namespaces: Arc<Vec<Namespace>>) -> Self {
        Self { triple, namespaces }
    }
}

/// One solution row of a tuple query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    values: BTreeMap<String, Term>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Term) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render as a JSON object of variable -> N-Triples term.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }
}

//! Entity-level reads over the `ENTITIES` repository, and archival of
//! transaction records into `TRANSACTIONS`.
//!
//! An entity is any subject carrying at least one `rdf:type` statement.

use std::collections::{HashSet, VecDeque};

use oxigraph::model::{NamedNode, NamedOrBlankNode, Term};
use tracing::debug;

use crate::auth::Authority;
use crate::context::{RepositoryKind, RequestContext};
use crate::error::{RepoError, RepoResult};
use crate::model::vocab::RDF_TYPE;
use crate::model::{Model, StatementPattern};
use crate::ops::RepositoryOperations;
use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub struct EntityRepository {
    ops: RepositoryOperations,
}

impl EntityRepository {
    pub fn new(ops: RepositoryOperations) -> Self {
        Self { ops }
    }

    pub fn operations(&self) -> &RepositoryOperations {
        &self.ops
    }

    /// Whether `subject` has an `rdf:type`.
    pub async fn exists(&self, subject: &NamedOrBlankNode, ctx: &RequestContext) -> RepoResult<bool> {
        let pattern = StatementPattern::subject(subject.clone()).with_predicate(RDF_TYPE);
        self.has_statement(pattern, ctx).await
    }

    /// IRI types of `subject`, sorted.
    pub async fn types(&self, subject: &NamedOrBlankNode, ctx: &RequestContext) -> RepoResult<Vec<NamedNode>> {
        let pattern = StatementPattern::subject(subject.clone()).with_predicate(RDF_TYPE);
        let found = self.list_statements(pattern, ctx).await?;
        let mut types: Vec<NamedNode> = found
            .objects()
            .into_iter()
            .filter_map(|o| match o {
                Term::NamedNode(n) => Some(n),
                _ => None,
            })
            .collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(types)
    }

    /// Statements of `subject`; at `neighbour_level >= 1` also the statements of
    /// every resource it links to, up to that many hops.
    ///
    /// Fails with `EntityNotFound` if the subject has no statements at all.
    pub async fn get_entity(
        &self,
        subject: &NamedOrBlankNode,
        neighbour_level: u8,
        ctx: &RequestContext,
    ) -> RepoResult<Model> {
        let root = subject.clone();
        let model = self
            .ops
            .execute(RepositoryKind::Entities, ctx, Authority::Reader, move |conn| {
                let mut model = Model::new();
                let mut seen: HashSet<NamedOrBlankNode> = HashSet::new();
                let mut queue = VecDeque::from([(root, 0u8)]);
                while let Some((node, depth)) = queue.pop_front() {
                    if !seen.insert(node.clone()) {
                        continue;
                    }
                    let statements = conn.statements(&StatementPattern::subject(node))?;
                    if depth < neighbour_level {
                        for object in statements.objects() {
                            let next = match object {
                                Term::NamedNode(n) => NamedOrBlankNode::from(n),
                                Term::BlankNode(b) => NamedOrBlankNode::from(b),
                                _ => continue,
                            };
                            queue.push_back((next, depth + 1));
                        }
                    }
                    model.extend(statements);
                }
                Ok(model)
            })
            .await?;

        if model.is_empty() {
            return Err(RepoError::EntityNotFound {
                subject: subject.to_string(),
            });
        }
        Ok(model)
    }

    pub async fn list_statements(&self, pattern: StatementPattern, ctx: &RequestContext) -> RepoResult<Model> {
        self.ops
            .statements(pattern, RepositoryKind::Entities, ctx, Authority::Reader)
            .await
    }

    pub async fn has_statement(&self, pattern: StatementPattern, ctx: &RequestContext) -> RepoResult<bool> {
        self.ops
            .has_statement(pattern, RepositoryKind::Entities, ctx, Authority::Reader)
            .await
    }

    /// Store the records of sealed transactions in `TRANSACTIONS`. Running
    /// transactions are skipped. Returns the number archived.
    pub async fn archive(&self, transactions: &[Transaction], ctx: &RequestContext) -> RepoResult<usize> {
        let mut records = Model::new();
        let mut archived = 0;
        for trx in transactions.iter().filter(|t| !t.is_running()) {
            records.extend(trx.to_record());
            archived += 1;
        }
        if archived == 0 {
            return Ok(0);
        }
        self.ops
            .insert(records, RepositoryKind::Transactions, ctx, Authority::Contributor)
            .await?;
        debug!(archived, "archived transaction records");
        Ok(archived)
    }
}

//! Value-level mutations of entities.
//!
//! Each call builds one transaction, commits it against `ENTITIES` and
//! publishes an event once the commit succeeded. Links to blank nodes are
//! never created: anonymous nodes cannot be shared between entities.

use oxigraph::model::{GraphName, NamedNode, NamedOrBlankNode, Quad, Term};
use tracing::{trace, warn};

use crate::auth::Authority;
use crate::context::{RepositoryKind, RequestContext};
use crate::entities::EntityRepository;
use crate::error::{RepoError, RepoResult};
use crate::events::RepositoryEvent;
use crate::model::{Model, StatementPattern};
use crate::transaction::Transaction;

fn invalid(subject: &NamedNode, message: &str) -> RepoError {
    RepoError::InvalidEntityUpdate {
        subject: subject.to_string(),
        message: message.to_string(),
    }
}

fn language(term: &Term) -> Option<&str> {
    match term {
        Term::Literal(l) => l.language(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ValueServices {
    entities: EntityRepository,
}

impl ValueServices {
    pub fn new(entities: EntityRepository) -> Self {
        Self { entities }
    }

    /// Statements of the entity, or `EntityNotFound`.
    async fn load(&self, subject: &NamedNode, ctx: &RequestContext) -> RepoResult<Model> {
        let node = NamedOrBlankNode::from(subject.clone());
        if !self.entities.exists(&node, ctx).await? {
            return Err(RepoError::EntityNotFound {
                subject: subject.to_string(),
            });
        }
        self.entities.get_entity(&node, 0, ctx).await
    }

    async fn commit(&self, trx: Transaction, ctx: &RequestContext) -> RepoResult<Transaction> {
        self.entities
            .operations()
            .commit(trx, RepositoryKind::Entities, ctx, Authority::Contributor)
            .await
    }

    fn publish(&self, event: RepositoryEvent) {
        self.entities.operations().events().publish(event);
    }

    /// Set a value of an entity.
    ///
    /// - linking to a blank node fails with `InvalidEntityUpdate`;
    /// - an identical IRI link already present is a no-op, the returned
    ///   transaction is still running and nothing was committed;
    /// - a literal replaces the current literal values of the predicate with the
    ///   same language tag (or without one, when the new value has none).
    pub async fn insert_value(
        &self,
        subject: &NamedNode,
        predicate: &NamedNode,
        value: Term,
        ctx: &RequestContext,
    ) -> RepoResult<Transaction> {
        let entity = self.load(subject, ctx).await?;
        let mut trx = Transaction::new();
        trx.affects(&entity)?;

        let statement = Quad::new(subject.clone(), predicate.clone(), value.clone(), GraphName::DefaultGraph);
        match &value {
            Term::BlankNode(_) => {
                trace!(subject = %subject, "refusing link to anonymous node");
                return Err(invalid(subject, "trying to link to an anonymous node"));
            }
            Term::NamedNode(_) if entity.contains(&statement) => {
                trace!(subject = %subject, predicate = %predicate, "link already present, ignoring update");
                return Ok(trx);
            }
            Term::Literal(_) => {
                let pattern = StatementPattern::subject(subject.clone()).with_predicate(predicate.clone());
                for current in entity.filter(&pattern) {
                    if !matches!(current.object, Term::Literal(_)) {
                        return Err(invalid(
                            subject,
                            "replacing an existing link to another entity with a value is not allowed",
                        ));
                    }
                    let replaced = match (language(&value), language(&current.object)) {
                        (Some(new), Some(old)) => new == old,
                        (None, Some(_)) => {
                            return Err(invalid(
                                subject,
                                "this value already exists with a language tag, add the tag",
                            ));
                        }
                        _ => true,
                    };
                    if replaced {
                        trx.remove_statement(current)?;
                    }
                }
            }
            _ => {}
        }
        trx.insert_statement(statement)?;

        let trx = self.commit(trx, ctx).await?;
        self.publish(RepositoryEvent::ValueInserted {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            value: value.to_string(),
            transaction: trx.summary(),
        });
        Ok(trx)
    }

    /// Remove the value of a predicate.
    ///
    /// With several values present a language tag is required and only
    /// literals carrying it are removed; links to other entities are never
    /// removed here (use [`remove_link`](Self::remove_link)).
    pub async fn remove_value(
        &self,
        subject: &NamedNode,
        predicate: &NamedNode,
        language_tag: Option<&str>,
        ctx: &RequestContext,
    ) -> RepoResult<Transaction> {
        let entity = self.load(subject, ctx).await?;
        let pattern = StatementPattern::subject(subject.clone()).with_predicate(predicate.clone());
        let current = entity.filter(&pattern);

        let mut removals = Model::new();
        if current.len() > 1 {
            let tag = language_tag
                .filter(|t| !t.is_empty())
                .ok_or_else(|| invalid(subject, "multiple values for the predicate, but no language tag given"))?;
            for statement in current {
                let remove = match &statement.object {
                    Term::BlankNode(_) => {
                        warn!(subject = %subject, "found a link to an anonymous node, purging it");
                        true
                    }
                    Term::NamedNode(_) => {
                        return Err(invalid(subject, "links cannot be removed through the values api"));
                    }
                    object => language(object) == Some(tag),
                };
                if remove {
                    removals.insert(statement);
                }
            }
        } else {
            if current.iter().any(|s| matches!(s.object, Term::NamedNode(_))) {
                return Err(invalid(subject, "links cannot be removed through the values api"));
            }
            removals = current;
        }
        if removals.is_empty() {
            return Err(invalid(subject, "no value to remove"));
        }

        let mut trx = Transaction::new();
        trx.remove(&removals)?;
        let trx = self.commit(trx, ctx).await?;
        let value = removals
            .iter()
            .map(|s| s.object.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.publish(RepositoryEvent::ValueRemoved {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            value,
            transaction: trx.summary(),
        });
        Ok(trx)
    }

    /// Swap `old_value` for `new_value` in one transaction.
    pub async fn replace_value(
        &self,
        subject: &NamedNode,
        predicate: &NamedNode,
        old_value: Term,
        new_value: Term,
        ctx: &RequestContext,
    ) -> RepoResult<Transaction> {
        if matches!(new_value, Term::BlankNode(_)) {
            return Err(invalid(subject, "trying to link to an anonymous node"));
        }
        let entity = self.load(subject, ctx).await?;
        let ops = self.entities.operations();

        let mut trx = Transaction::new();
        trx.affects(&entity)?;
        let trx = ops.remove_statement(subject.clone(), predicate.clone(), old_value.clone(), trx)?;
        let mut trx = ops.add_statement(subject.clone(), predicate.clone(), new_value.clone(), trx)?;
        trx.mark_updated()?;

        let trx = self.commit(trx, ctx).await?;
        self.publish(RepositoryEvent::ValueReplaced {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
            transaction: trx.summary(),
        });
        Ok(trx)
    }

    /// Remove the link `subject predicate target`.
    pub async fn remove_link(
        &self,
        subject: &NamedNode,
        predicate: &NamedNode,
        target: &NamedNode,
        ctx: &RequestContext,
    ) -> RepoResult<Transaction> {
        let pattern = StatementPattern::subject(subject.clone())
            .with_predicate(predicate.clone())
            .with_object(target.clone());
        let links = self.entities.list_statements(pattern, ctx).await?;

        let trx = self
            .entities
            .operations()
            .stage_removal(&links, Transaction::new())?;
        let trx = self.commit(trx, ctx).await?;
        self.publish(RepositoryEvent::LinkRemoved {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            target: target.to_string(),
            transaction: trx.summary(),
        });
        Ok(trx)
    }
}

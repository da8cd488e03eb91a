//! Staged, auditable transactions.
//!
//! A [`Transaction`] accumulates inserts and removals across any number of
//! logical operations before one atomic commit. The two staged sets are
//! disjoint: staging a statement for insertion withdraws a pending removal of
//! it and vice versa, so the last staged operation wins.
//!
//! ```text
//! RUNNING ──commit ok──> COMPLETED
//!    └─────commit err / fail──> FAILED(reason)
//! ```
//!
//! Terminal states are final; every mutator fails with
//! [`RepoError::TransactionState`] once the transaction is sealed.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{GraphName, Literal, NamedNode, NamedOrBlankNode, Quad, Term};
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};
use crate::model::vocab::{self, GRAPH_CREATED, GRAPH_DELETED};
use crate::model::{Model, Statement};
use crate::store::ChangeSet;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Running,
    Completed,
    Failed { reason: String },
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Running => "RUNNING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Running)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Failed { reason } => write!(f, "FAILED({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Kind of change a transaction was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Inserted,
    Removed,
    Updated,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Inserted => "INSERTED",
            Activity::Removed => "REMOVED",
            Activity::Updated => "UPDATED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: NamedNode,
    status: TransactionStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    inserts: Model,
    removals: Model,
    affected: HashSet<NamedOrBlankNode>,
    activities: Vec<Activity>,
}

impl Transaction {
    /// A fresh `RUNNING` transaction with a unique `urn:kg:trx:` identifier.
    pub fn new() -> Self {
        let id = NamedNode::new_unchecked(format!("urn:kg:trx:{:032x}", rand::random::<u128>()));
        Self {
            id,
            status: TransactionStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            inserts: Model::new(),
            removals: Model::new(),
            affected: HashSet::new(),
            activities: Vec::new(),
        }
    }

    pub fn id(&self) -> &NamedNode {
        &self.id
    }

    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub(crate) fn ensure_running(&self) -> RepoResult<()> {
        if self.status.is_terminal() {
            return Err(RepoError::TransactionState {
                id: self.id.as_str().to_string(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn record_activity(&mut self, activity: Activity) {
        if !self.activities.contains(&activity) {
            self.activities.push(activity);
        }
    }

    /// Stage every statement of `model` for insertion and mark its subjects affected.
    pub fn insert(&mut self, model: &Model) -> RepoResult<()> {
        self.ensure_running()?;
        for statement in model {
            self.stage_insert(statement.clone());
        }
        self.record_activity(Activity::Inserted);
        Ok(())
    }

    /// Stage every statement of `model` for removal.
    pub fn remove(&mut self, model: &Model) -> RepoResult<()> {
        self.ensure_running()?;
        for statement in model {
            self.stage_removal(statement.clone());
        }
        self.record_activity(Activity::Removed);
        Ok(())
    }

    pub fn insert_statement(&mut self, statement: Statement) -> RepoResult<()> {
        self.ensure_running()?;
        self.stage_insert(statement);
        self.record_activity(Activity::Inserted);
        Ok(())
    }

    pub fn remove_statement(&mut self, statement: Statement) -> RepoResult<()> {
        self.ensure_running()?;
        self.stage_removal(statement);
        self.record_activity(Activity::Removed);
        Ok(())
    }

    /// Record the subjects of `model` as affected without staging anything.
    pub fn affects(&mut self, model: &Model) -> RepoResult<()> {
        self.ensure_running()?;
        self.affected.extend(model.subjects());
        Ok(())
    }

    /// Tag the transaction as an update of existing values (e.g. a replace).
    pub fn mark_updated(&mut self) -> RepoResult<()> {
        self.ensure_running()?;
        self.record_activity(Activity::Updated);
        Ok(())
    }

    fn stage_insert(&mut self, statement: Statement) {
        self.removals.remove(&statement);
        self.affected.insert(statement.subject.clone());
        self.inserts.insert(statement);
    }

    fn stage_removal(&mut self, statement: Statement) {
        self.inserts.remove(&statement);
        self.affected.insert(statement.subject.clone());
        self.removals.insert(statement);
    }

    /// Statements staged for insertion, in their own provenance graphs.
    pub fn inserts(&self) -> &Model {
        &self.inserts
    }

    /// Statements staged for removal, in their own provenance graphs.
    pub fn removals(&self) -> &Model {
        &self.removals
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removals.is_empty()
    }

    /// The staged content as one atomic storage change.
    pub fn change_set(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for statement in &self.removals {
            changes.remove(statement.clone());
        }
        for statement in &self.inserts {
            changes.insert(statement.clone());
        }
        changes
    }

    pub fn affected(&self) -> &HashSet<NamedOrBlankNode> {
        &self.affected
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    /// The staged sets tagged with the reserved `GRAPH_CREATED` and
    /// `GRAPH_DELETED` provenance graphs.
    pub fn staged(&self) -> Model {
        let retag = |s: &Statement, graph: NamedNode| {
            Quad::new(s.subject.clone(), s.predicate.clone(), s.object.clone(), graph)
        };
        let created = GRAPH_CREATED.into_owned();
        let deleted = GRAPH_DELETED.into_owned();
        self.inserts
            .iter()
            .map(|s| retag(s, created.clone()))
            .chain(self.removals.iter().map(|s| retag(s, deleted.clone())))
            .collect()
    }

    pub(crate) fn complete(&mut self) -> RepoResult<()> {
        self.ensure_running()?;
        self.status = TransactionStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Seal the transaction as `FAILED`. Staged content is kept for inspection.
    pub fn fail(&mut self, reason: impl Into<String>) -> RepoResult<()> {
        self.ensure_running()?;
        self.status = TransactionStatus::Failed {
            reason: reason.into(),
        };
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Render the transaction as an RDF record for the transaction log.
    ///
    /// Staged statements land in per-transaction graphs `{id}#created` and
    /// `{id}#deleted`, so records of different transactions never merge.
    pub fn to_record(&self) -> Model {
        let mut record = Model::new();
        let id = self.id.clone();
        let meta = |p: oxigraph::model::NamedNodeRef<'_>, o: Term| {
            Quad::new(id.clone(), p.into_owned(), o, GraphName::DefaultGraph)
        };

        record.insert(meta(vocab::RDF_TYPE, vocab::TRANSACTION.into_owned().into()));
        record.insert(meta(
            vocab::STATUS,
            Literal::new_simple_literal(self.status.as_str()).into(),
        ));
        let time = self.completed_at.unwrap_or(self.created_at);
        record.insert(meta(
            vocab::TIME,
            Literal::new_typed_literal(time.to_rfc3339(), xsd::DATE_TIME).into(),
        ));
        if let TransactionStatus::Failed { reason } = &self.status {
            record.insert(meta(vocab::FAILURE, Literal::new_simple_literal(reason).into()));
        }
        for activity in &self.activities {
            record.insert(meta(
                vocab::ACTIVITY,
                Literal::new_simple_literal(activity.as_str()).into(),
            ));
        }
        for subject in &self.affected {
            record.insert(meta(vocab::AFFECTS, subject.clone().into()));
        }

        let created = NamedNode::new_unchecked(format!("{}#created", self.id.as_str()));
        let deleted = NamedNode::new_unchecked(format!("{}#deleted", self.id.as_str()));
        for s in &self.inserts {
            record.insert(Quad::new(
                s.subject.clone(),
                s.predicate.clone(),
                s.object.clone(),
                created.clone(),
            ));
        }
        for s in &self.removals {
            record.insert(Quad::new(
                s.subject.clone(),
                s.predicate.clone(),
                s.object.clone(),
                deleted.clone(),
            ));
        }
        record
    }

    pub fn summary(&self) -> TransactionSummary {
        let mut affected: Vec<String> = self.affected.iter().map(ToString::to_string).collect();
        affected.sort();
        TransactionSummary {
            id: self.id.as_str().to_string(),
            status: self.status.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            inserted: self.inserts.len(),
            removed: self.removals.len(),
            affected,
            activities: self.activities.clone(),
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable digest of a transaction, published with repository events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: String,
    #[serde(flatten)]
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub inserted: usize,
    pub removed: usize,
    pub affected: Vec<String>,
    pub activities: Vec<Activity>,
}

//! Reserved IRIs of the transaction log vocabulary, plus the SPARQL prefix scanner.

use std::sync::LazyLock;

use oxigraph::model::NamedNodeRef;
use regex::Regex;

use super::Namespace;

/// Namespace of the transaction log vocabulary.
pub const TRX_NS: &str = "http://w3id.org/kgrepo/trx#";

/// Provenance graph of statements staged for insertion.
pub const GRAPH_CREATED: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#Created");
/// Provenance graph of statements staged for removal.
pub const GRAPH_DELETED: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#Deleted");

pub const TRANSACTION: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#Transaction");
pub const STATUS: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#status");
pub const TIME: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#time");
pub const AFFECTS: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#affects");
pub const ACTIVITY: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#activity");
pub const FAILURE: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://w3id.org/kgrepo/trx#failure");

pub use oxigraph::model::vocab::rdf::TYPE as RDF_TYPE;

static PREFIX_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPREFIX\s+([A-Za-z][\w.-]*)?:\s*<([^>]*)>").unwrap()
});

/// Collect the `PREFIX` declarations of a SPARQL query, in declaration order.
pub fn extract_prefixes(sparql: &str) -> Vec<Namespace> {
    PREFIX_DECL
        .captures_iter(sparql)
        .map(|caps| {
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            let iri = caps.get(2).map_or("", |m| m.as_str());
            Namespace::new(prefix, iri)
        })
        .collect()
}

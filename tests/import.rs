//! Streaming import of RDF documents.

use std::collections::HashSet;
use std::io;

use oxigraph::model::{BlankNode, NamedOrBlankNode, Term, Triple};

use kg_repo::auth::Authority;
use kg_repo::codec::CodecRegistry;
use kg_repo::config::StorageConfig;
use kg_repo::context::{RepositoryKind, RequestContext};
use kg_repo::error::{CodecError, RepoError};
use kg_repo::ops::RepositoryOperations;

const TURTLE: &str = r#"
@prefix ex: <http://example.org/> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .

ex:clip rdf:type ex:Video ;
    ex:title "Clip"@en ;
    ex:author ex:alice .
ex:alice ex:name "Alice" .
ex:clip ex:chapter [ ex:label "Intro" ] .
"#;

/// Replace every blank node label by the same placeholder, so statement sets
/// compare by shape.
fn shape(triple: &Triple) -> Triple {
    let placeholder = BlankNode::new_unchecked("b");
    let subject = match &triple.subject {
        NamedOrBlankNode::BlankNode(_) => placeholder.clone().into(),
        other => other.clone(),
    };
    let object = match &triple.object {
        Term::BlankNode(_) => placeholder.into(),
        other => other.clone(),
    };
    Triple::new(subject, triple.predicate.clone(), object)
}

/// Split `text` into small chunks so statements straddle chunk boundaries.
fn chunked(text: &str) -> Vec<io::Result<Vec<u8>>> {
    text.as_bytes().chunks(7).map(|c| Ok(c.to_vec())).collect()
}

fn ops() -> RepositoryOperations {
    RepositoryOperations::from_config(StorageConfig::default())
}

#[tokio::test]
async fn turtle_import_round_trips() {
    let ops = ops();
    let ctx = RequestContext::test();
    let mut events = ops.events().subscribe();

    let count = ops
        .import_statements(
            futures_util::stream::iter(chunked(TURTLE)),
            "text/turtle; charset=utf-8",
            RepositoryKind::Schema,
            &ctx,
            Authority::Contributor,
        )
        .await
        .unwrap();
    assert_eq!(count, 6);
    assert_eq!(events.recv().await.unwrap().name(), "statements_imported");

    let statements = ops
        .construct(
            "PREFIX ex: <http://example.org/> CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }",
            RepositoryKind::Schema,
            &ctx,
            Authority::Reader,
        )
        .await
        .unwrap();
    assert_eq!(statements.len(), 6);

    let input = CodecRegistry::new()
        .decoder_for("text/turtle")
        .unwrap()
        .decode(TURTLE.as_bytes())
        .unwrap();
    let expected: HashSet<Triple> = input.triples().iter().map(shape).collect();
    let returned: HashSet<Triple> = statements.iter().map(|s| shape(&s.triple)).collect();
    assert_eq!(returned, expected);

    let namespaces = &statements[0].namespaces;
    assert_eq!(namespaces.len(), 1);
    assert_eq!(namespaces[0].prefix, "ex");
    assert_eq!(namespaces[0].iri, "http://example.org/");
}

#[tokio::test]
async fn unsupported_media_type_is_rejected_up_front() {
    let ops = ops();
    let err = ops
        .import_statements(
            futures_util::stream::iter(chunked(TURTLE)),
            "application/pdf",
            RepositoryKind::Entities,
            &RequestContext::test(),
            Authority::Contributor,
        )
        .await
        .unwrap_err();
    match &err {
        RepoError::UnsupportedFormat { mime, supported } => {
            assert_eq!(mime, "application/pdf");
            assert!(supported.contains("text/turtle"));
        }
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    assert!(err.is_client_error());
    assert!(ops.builder().is_empty());
}

#[tokio::test]
async fn malformed_input_imports_nothing() {
    let ops = ops();
    let ctx = RequestContext::test();
    let broken = format!("{TURTLE}\nex:bob ex:name \"unterminated .\n");

    let err = ops
        .import_statements(
            futures_util::stream::iter(chunked(&broken)),
            "text/turtle",
            RepositoryKind::Entities,
            &ctx,
            Authority::Contributor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Codec(CodecError::Parse { .. })));
    assert_eq!(ops.size(RepositoryKind::Entities, &ctx, Authority::Reader).await.unwrap(), 0);
}

#[tokio::test]
async fn stream_failure_imports_nothing() {
    let ops = ops();
    let ctx = RequestContext::test();
    let mut chunks = chunked(TURTLE);
    chunks.push(Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")));

    let err = ops
        .import_statements(
            futures_util::stream::iter(chunks),
            "text/turtle",
            RepositoryKind::Entities,
            &ctx,
            Authority::Contributor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Codec(CodecError::Read { .. })));
    assert!(!err.is_client_error());
    assert_eq!(ops.size(RepositoryKind::Entities, &ctx, Authority::Reader).await.unwrap(), 0);
}

#[tokio::test]
async fn n_triples_import() {
    let ops = ops();
    let ctx = RequestContext::test();
    let body = "<http://example.org/a> <http://example.org/p> \"x\" .\n";
    let count = ops
        .import_statements(
            futures_util::stream::iter(chunked(body)),
            "application/n-triples",
            RepositoryKind::Entities,
            &ctx,
            Authority::Contributor,
        )
        .await
        .unwrap();
    assert_eq!(count, 1);
}

//! Shared fixtures for the integration suite.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use typegraph_backend::SqliteAdapter;
use typegraph_core::{
    Cardinality, Collation, DeleteBehavior, EdgeKindDef, FieldSpec, GraphDefinition, NodeKindDef,
    OntologyRelation, PropertySchema, Props, Store, UniqueConstraint, ValueType, WhereCondition,
};

/// A graph definition exercising ontology relations, uniqueness scopes,
/// cardinality, and delete behaviors together.
pub fn definition() -> GraphDefinition {
    let person = NodeKindDef::new(
        "Person",
        PropertySchema::new()
            .field(FieldSpec::new("name", ValueType::String).required())
            .field(FieldSpec::new("email", ValueType::String)),
    )
    .unique(
        UniqueConstraint::new("by_email", ["email"])
            .collated(Collation::CaseInsensitive)
            .when(WhereCondition::IsNotNull {
                field: "email".into(),
            }),
    )
    .on_delete(DeleteBehavior::Cascade);

    let employee = NodeKindDef::new(
        "Employee",
        PropertySchema::new()
            .field(FieldSpec::new("name", ValueType::String).required())
            .field(FieldSpec::new("emp_id", ValueType::String)),
    );

    let robot = NodeKindDef::new(
        "Robot",
        PropertySchema::new().field(FieldSpec::new("serial", ValueType::String).required()),
    );

    let book = NodeKindDef::new(
        "Book",
        PropertySchema::new().field(FieldSpec::new("title", ValueType::String).required()),
    )
    .on_delete(DeleteBehavior::Cascade);

    let review = NodeKindDef::new(
        "Review",
        PropertySchema::new()
            .field(FieldSpec::new("stars", ValueType::Number).required())
            .field(FieldSpec::new("text", ValueType::String)),
    );

    let media = |name: &str| {
        NodeKindDef::new(
            name,
            PropertySchema::new().field(FieldSpec::new("title", ValueType::String).required()),
        )
    };

    let product = NodeKindDef::new(
        "Product",
        PropertySchema::new()
            .field(FieldSpec::new("title", ValueType::String).required())
            .field(FieldSpec::new("price", ValueType::Number).required()),
    );

    let company = NodeKindDef::new(
        "Company",
        PropertySchema::new().field(FieldSpec::new("name", ValueType::String).required()),
    );

    let shelf = NodeKindDef::new(
        "Shelf",
        PropertySchema::new().field(FieldSpec::new("label", ValueType::String).required()),
    )
    .on_delete(DeleteBehavior::Disconnect);

    GraphDefinition::builder()
        .node(person)
        .node(employee)
        .node(robot)
        .node(book)
        .node(review)
        .node(media("Movie"))
        .node(media("TVShow"))
        .node(media("Documentary"))
        .node(product)
        .node(company)
        .node(shelf)
        .edge(EdgeKindDef::new("knows", ["Person"], ["Person"]))
        .edge(EdgeKindDef::new("partnersWith", ["Person"], ["Person"]))
        .edge(EdgeKindDef::new("marriedTo", ["Person"], ["Person"]))
        .edge(EdgeKindDef::new("watched", ["Person"], ["Movie", "TVShow"]))
        .edge(
            EdgeKindDef::new("hasReview", ["Book"], ["Review"])
                .with_cardinality(Cardinality::Many),
        )
        .edge(
            EdgeKindDef::new("employedBy", ["Person"], ["Company"])
                .with_cardinality(Cardinality::OneActive),
        )
        .edge(EdgeKindDef::new("shelves", ["Shelf"], ["Book"]))
        .relation(OntologyRelation::SubClassOf {
            child: "Employee".into(),
            parent: "Person".into(),
        })
        .relation(OntologyRelation::SubClassOf {
            child: "Documentary".into(),
            parent: "Movie".into(),
        })
        .relation(OntologyRelation::DisjointWith {
            a: "Person".into(),
            b: "Robot".into(),
        })
        .relation(OntologyRelation::Implies {
            edge_a: "marriedTo".into(),
            edge_b: "partnersWith".into(),
        })
        .relation(OntologyRelation::Implies {
            edge_a: "partnersWith".into(),
            edge_b: "knows".into(),
        })
        .build()
        .expect("definition builds")
}

/// An in-memory store over the shared definition.
pub async fn store() -> Store {
    init_tracing();
    let adapter = Arc::new(SqliteAdapter::in_memory().expect("in-memory sqlite"));
    Store::open("test-graph", definition(), adapter)
        .await
        .expect("store opens")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn props(value: JsonValue) -> Props {
    value.as_object().expect("object literal").clone()
}

pub fn person_props(name: &str) -> Props {
    props(json!({ "name": name }))
}

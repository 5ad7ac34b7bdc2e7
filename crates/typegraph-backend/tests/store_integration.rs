//! Store-level integration: identity, uniqueness, cardinality, delete
//! behaviors, versioning, and resurrection against the SQLite adapter.

mod common;

use common::{person_props, props, store};
use pretty_assertions::assert_eq;
use serde_json::json;

use typegraph_core::{
    CreateOptions, GraphError, IfExists, NodeRef, UpdateOptions, UpsertAction,
};

#[tokio::test]
async fn disjoint_identity_lifecycle() {
    let store = store().await;

    // Person and Employee may share a logical id (not disjoint).
    store
        .nodes("Person")
        .unwrap()
        .create(
            person_props("Alice"),
            CreateOptions {
                id: Some("a".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store
        .nodes("Employee")
        .unwrap()
        .create(
            props(json!({"name": "Alice", "emp_id": "E1"})),
            CreateOptions {
                id: Some("a".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Robot is disjoint with Person (and Employee via inheritance).
    let err = store
        .nodes("Robot")
        .unwrap()
        .create(
            props(json!({"serial": "R2"})),
            CreateOptions {
                id: Some("a".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    match err {
        GraphError::Disjoint {
            attempted_kind,
            conflicting_kind,
            ..
        } => {
            assert_eq!(attempted_kind, "Robot");
            assert!(conflicting_kind == "Person" || conflicting_kind == "Employee");
        }
        other => panic!("unexpected error: {other}"),
    }

    // After both live rows are gone, the id is free for Robot.
    store.nodes("Person").unwrap().delete("a").await.unwrap();
    store.nodes("Employee").unwrap().delete("a").await.unwrap();
    store
        .nodes("Robot")
        .unwrap()
        .create(
            props(json!({"serial": "R2"})),
            CreateOptions {
                id: Some("a".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn cascade_delete_removes_edges_but_not_neighbors() {
    let store = store().await;
    let books = store.nodes("Book").unwrap();
    let reviews = store.nodes("Review").unwrap();
    let has_review = store.edges("hasReview").unwrap();

    let book = books
        .create(
            props(json!({"title": "Dune"})),
            CreateOptions {
                id: Some("b".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for (id, stars) in [("r1", 5), ("r2", 3)] {
        let review = reviews
            .create(
                props(json!({"stars": stars})),
                CreateOptions {
                    id: Some(id.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        has_review
            .create(&book.node_ref(), &review.node_ref(), props(json!({})), CreateOptions::default())
            .await
            .unwrap();
    }

    books.delete("b").await.unwrap();

    // Edges are gone from the live view; the review nodes survive.
    assert!(has_review
        .find_from(&NodeRef::new("Book", "b"))
        .await
        .unwrap()
        .is_empty());
    assert!(reviews.get_by_id("r1").await.unwrap().is_some());
    assert!(reviews.get_by_id("r2").await.unwrap().is_some());
}

#[tokio::test]
async fn restrict_delete_reports_connected_edges() {
    let store = store().await;
    // Review has the default restrict behavior; hang an edge off it by
    // using it as a target.
    let books = store.nodes("Book").unwrap();
    let reviews = store.nodes("Review").unwrap();
    let has_review = store.edges("hasReview").unwrap();

    let book = books
        .create(props(json!({"title": "Dune"})), CreateOptions::default())
        .await
        .unwrap();
    let review = reviews
        .create(
            props(json!({"stars": 4})),
            CreateOptions {
                id: Some("r".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    has_review
        .create(&book.node_ref(), &review.node_ref(), props(json!({})), CreateOptions::default())
        .await
        .unwrap();

    let err = reviews.delete("r").await.unwrap_err();
    match err {
        GraphError::RestrictedDelete {
            edge_count,
            edge_kinds,
            ..
        } => {
            assert_eq!(edge_count, 1);
            assert_eq!(edge_kinds, vec!["hasReview".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn uniqueness_is_case_insensitive_and_scoped_to_participants() {
    let store = store().await;
    let people = store.nodes("Person").unwrap();

    people
        .create(
            props(json!({"name": "Alice", "email": "Alice@example.com"})),
            CreateOptions::default(),
        )
        .await
        .unwrap();

    // Same email, different case: rejected.
    let err = people
        .create(
            props(json!({"name": "Alicia", "email": "alice@EXAMPLE.com"})),
            CreateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Uniqueness { ref constraint_name, .. } if constraint_name == "by_email"));

    // Null email rows do not participate in the partial constraint.
    people
        .create(person_props("Bob"), CreateOptions::default())
        .await
        .unwrap();
    people
        .create(person_props("Carla"), CreateOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn get_or_create_finds_updates_and_resurrects() {
    let store = store().await;
    let people = store.nodes("Person").unwrap();

    let first = people
        .get_or_create_by_constraint(
            "by_email",
            props(json!({"name": "Alice", "email": "a@x.io"})),
            IfExists::Return,
        )
        .await
        .unwrap();
    assert_eq!(first.action, UpsertAction::Created);

    let again = people
        .get_or_create_by_constraint(
            "by_email",
            props(json!({"name": "Someone", "email": "a@x.io"})),
            IfExists::Return,
        )
        .await
        .unwrap();
    assert_eq!(again.action, UpsertAction::Found);
    assert_eq!(again.node.id, first.node.id);
    assert_eq!(again.node.props["name"], json!("Alice"));

    let updated = people
        .get_or_create_by_constraint(
            "by_email",
            props(json!({"name": "Alice Cooper", "email": "a@x.io"})),
            IfExists::Update,
        )
        .await
        .unwrap();
    assert_eq!(updated.action, UpsertAction::Updated);
    assert_eq!(updated.node.props["name"], json!("Alice Cooper"));

    // Soft-delete, then the same key resurrects the original row.
    people.delete(&first.node.id).await.unwrap();
    let revived = people
        .get_or_create_by_constraint(
            "by_email",
            props(json!({"name": "Alice Again", "email": "a@x.io"})),
            IfExists::Update,
        )
        .await
        .unwrap();
    assert_eq!(revived.action, UpsertAction::Resurrected);
    assert_eq!(revived.node.id, first.node.id);
    assert!(revived.node.meta.is_live());
}

#[tokio::test]
async fn optimistic_versioning_detects_stale_updates() {
    let store = store().await;
    let people = store.nodes("Person").unwrap();
    let node = people
        .create(person_props("Alice"), CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(node.meta.version, 1);

    let updated = people
        .update(
            &node.id,
            props(json!({"name": "Alice 2"})),
            UpdateOptions {
                expected_version: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.meta.version, 2);

    let err = people
        .update(
            &node.id,
            props(json!({"name": "Alice 3"})),
            UpdateOptions {
                expected_version: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    match err {
        GraphError::VersionConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn one_active_cardinality_allows_ended_history() {
    let store = store().await;
    let people = store.nodes("Person").unwrap();
    let companies = store.nodes("Company").unwrap();
    let employed = store.edges("employedBy").unwrap();

    let alice = people
        .create(person_props("Alice"), CreateOptions::default())
        .await
        .unwrap();
    let acme = companies
        .create(props(json!({"name": "Acme"})), CreateOptions::default())
        .await
        .unwrap();
    let globex = companies
        .create(props(json!({"name": "Globex"})), CreateOptions::default())
        .await
        .unwrap();

    let job = employed
        .create(&alice.node_ref(), &acme.node_ref(), props(json!({})), CreateOptions::default())
        .await
        .unwrap();

    // A second open employment violates oneActive.
    let err = employed
        .create(&alice.node_ref(), &globex.node_ref(), props(json!({})), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Cardinality { .. }));

    // Ending the current window frees the slot.
    employed.end(&job.id, None).await.unwrap();
    employed
        .create(&alice.node_ref(), &globex.node_ref(), props(json!({})), CreateOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn endpoint_typing_accepts_subclasses_and_rejects_strangers() {
    let store = store().await;
    let employees = store.nodes("Employee").unwrap();
    let movies = store.nodes("Movie").unwrap();
    let robots = store.nodes("Robot").unwrap();
    let watched = store.edges("watched").unwrap();

    let emp = employees
        .create(props(json!({"name": "Eve"})), CreateOptions::default())
        .await
        .unwrap();
    let movie = movies
        .create(props(json!({"title": "Heat"})), CreateOptions::default())
        .await
        .unwrap();
    let robot = robots
        .create(props(json!({"serial": "R1"})), CreateOptions::default())
        .await
        .unwrap();

    // Employee ≤ Person, so it can watch.
    watched
        .create(&emp.node_ref(), &movie.node_ref(), props(json!({})), CreateOptions::default())
        .await
        .unwrap();

    let err = watched
        .create(&robot.node_ref(), &movie.node_ref(), props(json!({})), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Endpoint { .. }));
}

#[tokio::test]
async fn bulk_operations_preserve_input_order() {
    let store = store().await;
    let people = store.nodes("Person").unwrap();

    let names = ["Zoe", "Adam", "Mia"];
    let created = people
        .bulk_create(
            names
                .iter()
                .map(|n| (person_props(n), CreateOptions::default()))
                .collect(),
        )
        .await
        .unwrap();
    let got: Vec<String> = created
        .iter()
        .map(|n| n.props["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(got, vec!["Zoe", "Adam", "Mia"]);

    // Order-preserving batch get with a missing id in the middle.
    let ids = vec![
        created[2].id.clone(),
        "missing".to_string(),
        created[0].id.clone(),
    ];
    let fetched = people.get_by_ids(&ids).await.unwrap();
    assert_eq!(fetched[0].as_ref().unwrap().props["name"], json!("Mia"));
    assert!(fetched[1].is_none());
    assert_eq!(fetched[2].as_ref().unwrap().props["name"], json!("Zoe"));
}

#[tokio::test]
async fn ended_validity_hides_node_from_both_point_reads() {
    let store = store().await;
    let products = store.nodes("Product").unwrap();

    // Window entirely in the past; the row is never soft-deleted.
    let t1 = typegraph_core::value::parse_timestamp("2024-01-01T00:00:00.000Z").unwrap();
    let t2 = typegraph_core::value::parse_timestamp("2024-06-01T00:00:00.000Z").unwrap();
    products
        .create(
            props(json!({"title": "Seasonal", "price": 10})),
            CreateOptions {
                id: Some("ended".into()),
                valid_from: Some(t1),
                valid_to: Some(t2),
            },
        )
        .await
        .unwrap();
    products
        .create(
            props(json!({"title": "Evergreen", "price": 20})),
            CreateOptions {
                id: Some("live".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(products.get_by_id("ended").await.unwrap().is_none());
    assert!(products.get_by_id("live").await.unwrap().is_some());

    // Batch get agrees with single get on the same ids.
    let fetched = products
        .get_by_ids(&["ended".to_string(), "live".to_string()])
        .await
        .unwrap();
    assert!(fetched[0].is_none());
    assert_eq!(
        fetched[1].as_ref().unwrap().props["title"],
        json!("Evergreen")
    );

    // The ended row is still reachable once ended rows are requested.
    let found = products
        .get_by_id_with("ended", typegraph_core::TemporalMode::IncludeEnded)
        .await
        .unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn clear_wipes_graph_and_stats_reflect_live_rows() {
    let store = store().await;
    let people = store.nodes("Person").unwrap();
    people
        .create(person_props("Alice"), CreateOptions::default())
        .await
        .unwrap();
    people
        .create(person_props("Bob"), CreateOptions::default())
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.node_counts.get("Person"), Some(&2));

    store.clear().await.unwrap();
    let stats = store.stats().await.unwrap();
    assert!(stats.node_counts.is_empty());
}

#[tokio::test]
async fn schema_version_is_recorded_once() {
    let store = store().await;
    let active = store.active_schema().await.unwrap().unwrap();
    assert_eq!(active.version, 1);
    assert!(active.is_active);
    assert_eq!(active.schema_hash.len(), 64);
}

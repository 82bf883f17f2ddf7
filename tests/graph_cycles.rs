mod common;
use crate::common::add;

use anadag::config::AnalysisRequest;
use anadag::errors::AnadagError;
use anadag::graph::RelationGraph;
use anadag::task::TaskId;
use anadag_test_utils::builders::{AnalysisConfigBuilder, RequestBuilder, task};

#[test]
fn cyclic_edge_fails_and_leaves_graph_unchanged() {
    let mut g = RelationGraph::new();
    let a = add(&mut g, "a", &[]);
    let b = add(&mut g, "b", &[&a]);
    let c = add(&mut g, "c", &[&b]);

    let err = g.add_edge(&a, &c).unwrap_err();
    match err {
        AnadagError::Cycle(cycle) => {
            assert_eq!(cycle.consumer, a);
            assert_eq!(cycle.producer, c);
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }

    assert_eq!(g.len(), 3);
    assert!(g.producers_of(&a).is_empty());
    assert_eq!(g.consumers_of(&c), Vec::<TaskId>::new());
    assert_eq!(g.topological_ranks().unwrap()[&c], 2);
}

#[test]
fn self_edge_is_a_cycle() {
    let mut g = RelationGraph::new();
    let a = add(&mut g, "a", &[]);
    assert!(matches!(g.add_edge(&a, &a), Err(AnadagError::Cycle(_))));
    assert!(g.producers_of(&a).is_empty());
}

#[test]
fn unknown_dependency_adds_nothing() {
    let mut g = RelationGraph::new();
    let ghost = task("ghost").id().clone();

    let err = g.add_task(task("a"), [&ghost]).unwrap_err();
    assert!(matches!(err, AnadagError::UnknownDependency { .. }));
    assert!(g.is_empty());
}

#[test]
fn edge_in_the_forward_direction_is_accepted() {
    let mut g = RelationGraph::new();
    let a = add(&mut g, "a", &[]);
    let b = add(&mut g, "b", &[]);
    g.add_edge(&b, &a).unwrap();
    // Adding it twice is a no-op.
    g.add_edge(&b, &a).unwrap();
    assert_eq!(g.producers_of(&b), vec![a]);
}

#[test]
fn cyclic_request_is_rejected_at_validation() {
    let err = RequestBuilder::new()
        .with_analysis("pca", AnalysisConfigBuilder::new().after("tsne").build())
        .with_analysis("tsne", AnalysisConfigBuilder::new().input("pca").build())
        .try_build()
        .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("cycle"), "unexpected error: {msg}");
    assert!(msg.contains("pca") || msg.contains("tsne"));
}

#[test]
fn acyclic_request_validates() {
    let req: AnalysisRequest = RequestBuilder::new()
        .with_analysis("pca", AnalysisConfigBuilder::new().build())
        .with_analysis("tsne", AnalysisConfigBuilder::new().input("pca").build())
        .build();
    assert_eq!(req.analysis.len(), 2);
}

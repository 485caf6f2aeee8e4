//! Benchmarks for `ColumnGraph` construction, cycle checks, and
//! topological sort over linear and fan-out dependency shapes.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use enrichment_engine::graph::ColumnGraph;

/// col_0 requires col_1, col_1 requires col_2, ..., a single chain.
fn build_linear_graph(size: usize) -> (ColumnGraph, Vec<String>) {
    let ids: Vec<String> = (0..size).map(|i| format!("col_{i}")).collect();
    let edges = ids
        .windows(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect::<Vec<_>>();
    (ColumnGraph::from_edges(edges), ids)
}

/// `width` independent columns, each requiring a single shared root.
fn build_fanout_graph(width: usize) -> (ColumnGraph, Vec<String>) {
    let mut ids = vec!["root".to_string()];
    let edges: Vec<(String, String)> = (0..width)
        .map(|i| {
            let id = format!("leaf_{i}");
            ids.push(id.clone());
            (id, "root".to_string())
        })
        .collect();
    (ColumnGraph::from_edges(edges), ids)
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_construction");
    for size in [10, 50, 100, 500] {
        group.bench_with_input(BenchmarkId::new("linear", size), &size, |b, &size| {
            b.iter(|| build_linear_graph(size));
        });
    }
    group.finish();
}

fn bench_would_create_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("would_create_cycle");
    for size in [10, 50, 100, 500] {
        let (graph, ids) = build_linear_graph(size);
        let last = ids.last().unwrap().clone();
        let first = ids.first().unwrap().clone();
        group.bench_with_input(BenchmarkId::new("linear", size), &graph, |b, graph| {
            b.iter(|| graph.would_create_cycle(&last, &first));
        });
    }
    group.finish();
}

fn bench_topological_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_sort");

    for size in [10, 50, 100, 500] {
        let (graph, ids) = build_linear_graph(size);
        group.bench_with_input(BenchmarkId::new("linear", size), &(graph, ids), |b, (graph, ids)| {
            b.iter(|| graph.topological_sort(ids));
        });
    }

    for width in [10, 50, 100] {
        let (graph, ids) = build_fanout_graph(width);
        group.bench_with_input(BenchmarkId::new("fanout", width), &(graph, ids), |b, (graph, ids)| {
            b.iter(|| graph.topological_sort(ids));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_construction, bench_would_create_cycle, bench_topological_sort);
criterion_main!(benches);

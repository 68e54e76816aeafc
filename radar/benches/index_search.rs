use std::cmp::Reverse;
use std::collections::BinaryHeap;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

const DIM: usize = 384;
const K: usize = 30;

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_search");
    for n in [1_000usize, 10_000, 50_000].iter() {
        let vectors = generate_vectors(*n);
        let query = generate_vectors(1).pop().unwrap();
        group.bench_function(BenchmarkId::new("full_sort", n), |b| {
            b.iter(|| full_sort_topk(&vectors, &query))
        });
        group.bench_function(BenchmarkId::new("heap", n), |b| {
            b.iter(|| heap_topk(&vectors, &query))
        });
    }
    group.finish();
}

/// Deterministic pseudo-random unit vectors (LCG, no external RNG).
fn generate_vectors(n: usize) -> Vec<Vec<f32>> {
    let mut state = 0x2545F4914F6CDD1Du64;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
    };

    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..DIM).map(|_| next()).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in v.iter_mut() {
                    *x /= norm;
                }
            }
            v
        })
        .collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn full_sort_topk(vectors: &[Vec<f32>], query: &[f32]) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, dot(v, query)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(K);
    scored
}

#[derive(PartialEq)]
struct Scored(f32, usize);

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn heap_topk(vectors: &[Vec<f32>], query: &[f32]) -> Vec<(usize, f32)> {
    let mut heap: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(K + 1);
    for (i, v) in vectors.iter().enumerate() {
        heap.push(Reverse(Scored(dot(v, query), i)));
        if heap.len() > K {
            heap.pop();
        }
    }
    let mut out: Vec<(usize, f32)> = heap
        .into_iter()
        .map(|Reverse(Scored(score, i))| (i, score))
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1));
    out
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

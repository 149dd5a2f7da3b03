use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use doc_community::{
    cosine_matrix, cosine_matrix_self, top_k_matches, DocumentVector, MemoryVectorStore, OracleError, Partition,
    PartitionRequest, SubdivisionConfig, Subdivider,
};

// ベンチ用の再現可能な乱数 (xorshift)
struct Rng(u64);

impl Rng {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 40) as f32 / (1u64 << 24) as f32 + 0.01
    }
}

fn random_vectors(rng: &mut Rng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n).map(|_| (0..dim).map(|_| rng.next_f32()).collect()).collect()
}

fn similarity_benchmark(c: &mut Criterion) {
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let mut group = c.benchmark_group("cosine_matrix");
    for &n in &[100usize, 400] {
        let a = random_vectors(&mut rng, n, 256);
        let b = random_vectors(&mut rng, n / 2, 256);
        group.bench_with_input(BenchmarkId::new("cross", n), &n, |bench, _| {
            bench.iter(|| cosine_matrix(&a, &b))
        });
        group.bench_with_input(BenchmarkId::new("self", n), &n, |bench, _| {
            bench.iter(|| cosine_matrix_self(&a))
        });
    }
    group.finish();

    let a = random_vectors(&mut rng, 400, 256);
    c.bench_function("top_k_matches", |bench| {
        bench.iter(|| top_k_matches(&a, &a, 50))
    });
}

// 索引順に 4 等分するだけの oracle
fn quarter_oracle(request: &PartitionRequest<'_, usize>) -> Result<Partition<usize>, OracleError> {
    let n = request.ids.len();
    Ok(request.ids.iter().enumerate().map(|(i, id)| (*id, i * 4 / n)).collect())
}

fn subdivision_benchmark(c: &mut Criterion) {
    let mut rng = Rng(42);
    let store = MemoryVectorStore::from_documents(
        random_vectors(&mut rng, 300, 64)
            .into_iter()
            .enumerate()
            .map(|(i, v)| DocumentVector::new(i, v)),
    )
    .expect("uniform dimensions");
    let ids: Vec<usize> = store.keys().copied().collect();

    c.bench_function("subdivide", |bench| {
        bench.iter(|| {
            let mut sub = Subdivider::new(SubdivisionConfig::with_band(2, 8), quarter_oracle).expect("valid config");
            sub.run(&store, &ids).expect("converges")
        })
    });
}

criterion_group!(benches, similarity_benchmark, subdivision_benchmark);
criterion_main!(benches);

//! Subdivide a synthetic collection into communities.
//!
//! ```text
//! cargo run --example subdivide                       # built-in oracle
//! cargo run --example subdivide -- ./louvain.sh /tmp  # external program
//! RUST_LOG=doc_community=debug DOC_COMMUNITY_MAX_POPULATION=20 cargo run --example subdivide
//! ```

use std::{env, error::Error, path::Path};

use doc_community::{
    keyed_top_matches, CommandOracle, DocumentVector, MemoryVectorStore, OracleError, Partition, PartitionOracle,
    PartitionRequest, SubdivisionConfig, Subdivider,
};
use tracing_subscriber::EnvFilter;

/// Connected components of the thresholded similarity graph
fn components(request: &PartitionRequest<'_, String>) -> Result<Partition<String>, OracleError> {
    let graph = request.graph();
    let mut parent: Vec<usize> = (0..graph.nodes).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    for edge in &graph.edges {
        let (a, b) = (find(&mut parent, edge.source), find(&mut parent, edge.target));
        if a != b {
            parent[a.max(b)] = a.min(b);
        }
    }
    Ok(request
        .ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), find(&mut parent, i)))
        .collect())
}

/// 4 topics, each document leans on one topic axis plus noise
fn synthetic(n: usize) -> Vec<DocumentVector<String>> {
    let mut seed = 0x2545_F491_4F6C_DD1Du64;
    let mut noise = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed >> 40) as f32 / (1u64 << 24) as f32 * 0.3
    };
    (0..n)
        .map(|i| {
            let mut v: Vec<f32> = (0..8).map(|_| noise()).collect();
            v[i % 4] += 1.0;
            v[4 + (i / 4) % 4] += 0.5;
            DocumentVector::new(format!("doc-{i:03}"), v)
        })
        .collect()
}

fn run<O: PartitionOracle<String>>(
    config: SubdivisionConfig,
    oracle: O,
    docs: Vec<DocumentVector<String>>,
) -> Result<(), Box<dyn Error>> {
    let closest = keyed_top_matches(&docs, &docs, 5)?;
    println!("closest pairs:\n{closest:#?}");

    let store = MemoryVectorStore::from_documents(docs)?;
    let ids: Vec<String> = store.keys().cloned().collect();
    let mut subdivider = Subdivider::new(config, oracle)?;
    let report = subdivider.run(&store, &ids)?;

    println!("{report}");
    for (label, members) in &report.communities {
        println!("{label:>4}: {} documents", members.len());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SubdivisionConfig::load_from(Path::new("doc-community.toml"))?;
    let docs = synthetic(120);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [program, work_dir, ..] => run(config, CommandOracle::new(program, work_dir), docs),
        _ => {
            // connected components need a tighter graph than a modularity oracle
            let threshold = config.similarity_threshold.max(0.9);
            run(config.threshold(threshold), components, docs)
        }
    }
}

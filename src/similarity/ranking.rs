use std::fmt::{Debug, Display};

use num::Num;
use serde::{Deserialize, Serialize};

use crate::{error::{SimilarityError, SimilarityResult}, similarity::{compare::{Compare, DefaultCompare}, cosine_matrix, DocumentVector}};

/// One extracted similarity cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// cosine similarity
    pub value: f64,
    /// index into `a` (matrix column)
    pub a_index: usize,
    /// index into `b` (matrix row)
    pub b_index: usize,
}

/// A match with indices resolved to document keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedMatch<K> {
    pub a_key: K,
    pub b_key: K,
    pub similarity: f64,
}

/// Ranked matches, most similar first
pub struct KeyedMatches<K> {
    pub list: Vec<KeyedMatch<K>>,
}

impl<K> KeyedMatches<K> {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyedMatch<K>> {
        self.list.iter()
    }
}

impl<K> Debug for KeyedMatches<K>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "KeyedMatches [")?;
            for m in &self.list {
                writeln!(f, "    {:?} ~ {:?}: {:.6}", m.a_key, m.b_key, m.similarity)?;
            }
            write!(f, "]")
        } else {
            f.debug_list().entries(&self.list).finish()
        }
    }
}

impl<K> Display for KeyedMatches<K>
where
    K: Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (rank, m) in self.list.iter().enumerate() {
            writeln!(f, "{:>3}. {} ~ {} ({:.6})", rank + 1, m.a_key, m.b_key, m.similarity)?;
        }
        Ok(())
    }
}

/// `a` と `b` が要素単位で同一か
fn same_set<N, V>(a: &[V], b: &[V]) -> bool
where
    N: PartialEq,
    V: AsRef<[N]>,
{
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.as_ref() == y.as_ref())
}

/// Highest `k` similarities between `a` and `b`, best first.
///
/// When `a` and `b` are element-wise equal the diagonal is zeroed first and
/// never returned, so no self pair comes back.
/// Each extracted cell is zeroed and excluded before the next scan.
/// Scan order is row-major (`b_index` outer, `a_index` inner) and the first
/// maximum wins on ties. Non-finite cells are never selected.
///
/// Fails with `InsufficientData` if `k` exceeds the selectable cells.
pub fn top_k_matches<N, V>(a: &[V], b: &[V], k: usize) -> SimilarityResult<Vec<Match>>
where
    N: Num + Copy + Send + Sync,
    V: AsRef<[N]> + Sync,
    DefaultCompare: Compare<N>,
{
    let mut mat = cosine_matrix::<N, V>(a, b)?;
    let cols = mat.cols();
    let is_self = same_set::<N, V>(a, b);
    if is_self {
        mat.zero_diagonal();
    }

    // 除外セル: diagonal (self) と非有限値
    let mut excluded: Vec<bool> = mat
        .as_slice()
        .iter()
        .enumerate()
        .map(|(idx, v)| !v.is_finite() || (is_self && idx / cols == idx % cols))
        .collect();
    let available = excluded.iter().filter(|e| !**e).count();
    if k > available {
        return Err(SimilarityError::InsufficientData { requested: k, available });
    }

    let mut out = Vec::with_capacity(k);
    for _ in 0..k {
        let mut best: Option<(usize, f64)> = None;
        for (idx, &v) in mat.as_slice().iter().enumerate() {
            if excluded[idx] {
                continue;
            }
            match best {
                Some((_, bv)) if v <= bv => {}
                _ => best = Some((idx, v)),
            }
        }
        // available >= k なので必ず見つかる
        let Some((idx, value)) = best else { break };
        let (row, col) = (idx / cols, idx % cols);
        out.push(Match { value, a_index: col, b_index: row });
        // 次の走査で最大にならないように
        mat.set(row, col, 0.0);
        excluded[idx] = true;
    }
    Ok(out)
}

/// `top_k_matches` over keyed documents.
/// With a single document in `a` this is a nearest-neighbour query against `b`.
pub fn keyed_top_matches<K, N>(a: &[DocumentVector<K, N>], b: &[DocumentVector<K, N>], k: usize) -> SimilarityResult<KeyedMatches<K>>
where
    K: Clone + Sync,
    N: Num + Copy + Send + Sync,
    DefaultCompare: Compare<N>,
{
    let list = top_k_matches::<N, DocumentVector<K, N>>(a, b, k)?
        .into_iter()
        .map(|m| KeyedMatch {
            a_key: a[m.a_index].key().clone(),
            b_key: b[m.b_index].key().clone(),
            similarity: m.value,
        })
        .collect();
    Ok(KeyedMatches { list })
}

/// Mean cosine similarity.
///
/// `b == None`: mean of the off-diagonal cells of `a` against itself,
/// divisor n² − n, needs at least 2 vectors.
/// `b == Some(..)`: mean of every cell of `a` against `b`, divisor n·m,
/// needs at least one vector on each side.
pub fn average_similarity<N, V>(a: &[V], b: Option<&[V]>) -> SimilarityResult<f64>
where
    N: Num + Copy + Send + Sync,
    V: AsRef<[N]> + Sync,
    DefaultCompare: Compare<N>,
{
    match b {
        None => {
            let n = a.len();
            if n < 2 {
                return Err(SimilarityError::EmptyInput { required: 2, found: n });
            }
            let mat = cosine_matrix::<N, V>(a, a)?;
            let total: f64 = mat.as_slice().iter().sum();
            let diag: f64 = (0..n).filter_map(|i| mat.get(i, i)).sum();
            Ok((total - diag) / (n * n - n) as f64)
        }
        Some(b) => {
            let found = a.len().min(b.len());
            if found < 1 {
                return Err(SimilarityError::EmptyInput { required: 1, found });
            }
            let mat = cosine_matrix::<N, V>(a, b)?;
            let total: f64 = mat.as_slice().iter().sum();
            Ok(total / (a.len() * b.len()) as f64)
        }
    }
}

use std::{fmt::Debug, hash::Hash};

use ahash::RandomState;
use indexmap::IndexMap;

use crate::{error::{Side, SimilarityError, SimilarityResult, SubdivideError, SubdivideResult}, similarity::DocumentVector};

/// Source of document vectors for the subdivider
pub trait VectorStore<K, N> {
    fn vector(&self, key: &K) -> Option<&[N]>;

    /// Vectors for `keys`, same order.
    /// Fails with `MissingVector` on the first unknown key.
    fn gather(&self, keys: &[K]) -> SubdivideResult<Vec<&[N]>>
    where
        K: Debug,
    {
        keys.iter()
            .map(|k| self.vector(k).ok_or_else(|| SubdivideError::MissingVector(format!("{k:?}"))))
            .collect()
    }
}

/// In-memory store, insertion ordered
#[derive(Debug, Clone)]
pub struct MemoryVectorStore<K, N = f32>
where
    K: Eq + Hash,
{
    dim: Option<usize>,
    vectors: IndexMap<K, Vec<N>, RandomState>,
}

impl<K, N> Default for MemoryVectorStore<K, N>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, N> MemoryVectorStore<K, N>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            dim: None,
            vectors: IndexMap::with_hasher(RandomState::new()),
        }
    }

    pub fn from_documents(docs: impl IntoIterator<Item = DocumentVector<K, N>>) -> SimilarityResult<Self> {
        let mut store = Self::new();
        for doc in docs {
            store.insert(doc)?;
        }
        Ok(store)
    }

    /// Insert or replace a document.
    /// Every vector must share the dimension of the first one inserted.
    /// A rejected vector is reported at the slot it would occupy.
    pub fn insert(&mut self, doc: DocumentVector<K, N>) -> SimilarityResult<()> {
        let (key, vector) = doc.into_parts();
        let index = self.vectors.get_index_of(&key).unwrap_or(self.vectors.len());
        match self.dim {
            Some(expected) if expected != vector.len() => {
                return Err(SimilarityError::DimensionMismatch {
                    expected,
                    found: vector.len(),
                    side: Side::A,
                    index,
                });
            }
            Some(_) => {}
            None => self.dim = Some(vector.len()),
        }
        self.vectors.insert(key, vector);
        Ok(())
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.vectors.keys()
    }
}

impl<K, N> VectorStore<K, N> for MemoryVectorStore<K, N>
where
    K: Eq + Hash,
{
    fn vector(&self, key: &K) -> Option<&[N]> {
        self.vectors.get(key).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_keeps_requested_order() {
        let store = MemoryVectorStore::from_documents([
            DocumentVector::new("a", vec![1.0f32, 0.0]),
            DocumentVector::new("b", vec![0.0, 1.0]),
        ])
        .unwrap();
        let got = store.gather(&["b", "a"]).unwrap();
        assert_eq!(got, vec![&[0.0f32, 1.0][..], &[1.0, 0.0][..]]);
        assert!(matches!(store.gather(&["a", "zz"]), Err(SubdivideError::MissingVector(k)) if k == "\"zz\""));
    }

    #[test]
    fn insert_rejects_ragged_vectors() {
        let mut store = MemoryVectorStore::new();
        store.insert(DocumentVector::new(1u32, vec![1.0f64, 2.0])).unwrap();
        let err = store.insert(DocumentVector::new(2u32, vec![1.0f64])).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { expected: 2, found: 1, side: Side::A, index: 1 });
        assert_eq!(store.len(), 1);
        assert_eq!(store.dim(), Some(2));
    }

    #[test]
    fn ragged_replacement_reports_existing_slot() {
        let mut store = MemoryVectorStore::new();
        for key in ["a", "b", "c"] {
            store.insert(DocumentVector::new(key, vec![1.0f32, 0.0])).unwrap();
        }
        let err = store.insert(DocumentVector::new("b", vec![1.0f32])).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { expected: 2, found: 1, side: Side::A, index: 1 });
        assert_eq!(store.vector(&"b"), Some(&[1.0f32, 0.0][..]));

        // 同じ次元なら置き換え、位置は変わらない
        store.insert(DocumentVector::new("b", vec![0.0f32, 1.0])).unwrap();
        assert_eq!(store.keys().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(store.vector(&"b"), Some(&[0.0f32, 1.0][..]));
    }
}

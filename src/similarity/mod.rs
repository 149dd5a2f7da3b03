pub mod compare;
pub mod ranking;

use num::Num;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::{Side, SimilarityError, SimilarityResult}, similarity::compare::{Compare, DefaultCompare, VectorScale}};

/// Document key paired with its fixed-dimensional vector.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVector<K, N = f32> {
    key: K,
    vector: Vec<N>,
}

impl<K, N> DocumentVector<K, N> {
    pub fn new(key: K, vector: Vec<N>) -> Self {
        Self { key, vector }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn vector(&self) -> &[N] {
        &self.vector
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn into_parts(self) -> (K, Vec<N>) {
        (self.key, self.vector)
    }
}

impl<K, N> AsRef<[N]> for DocumentVector<K, N> {
    fn as_ref(&self) -> &[N] {
        &self.vector
    }
}

/// Row-major matrix of cosine similarities.
///
/// `rows` indexes the `b` sequence and `cols` indexes the `a` sequence,
/// so `get(i, j) == cosine(a[j], b[i])`.
/// Values computed here always lie in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl SimilarityMatrix {
    /// Build from raw row-major data.
    /// Returns `None` when `data.len() != rows * cols`.
    pub fn from_raw(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        if rows.checked_mul(cols)? != data.len() {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col] = value;
        }
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Force the main diagonal to zero (self-similarity excluded)
    pub fn zero_diagonal(&mut self) {
        for i in 0..self.rows.min(self.cols) {
            self.data[i * self.cols + i] = 0.0;
        }
    }

    /// Symmetric within `tol`. Non-square matrices are never symmetric.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        if !self.is_square() {
            return false;
        }
        (0..self.rows).all(|i| {
            (i + 1..self.cols).all(|j| {
                (self.data[i * self.cols + j] - self.data[j * self.cols + i]).abs() <= tol
            })
        })
    }
}

/// 次元を揃っているか確認して、その次元を返す
/// Both sequences empty yields dimension 0.
fn check_dims<N, V>(a: &[V], b: &[V]) -> SimilarityResult<usize>
where
    V: AsRef<[N]>,
{
    let expected = match a.first().or(b.first()) {
        Some(v) => v.as_ref().len(),
        None => return Ok(0),
    };
    for (side, set) in [(Side::A, a), (Side::B, b)] {
        for (index, v) in set.iter().enumerate() {
            let found = v.as_ref().len();
            if found != expected {
                return Err(SimilarityError::DimensionMismatch { expected, found, side, index });
            }
        }
    }
    Ok(expected)
}

/// 最大絶対値とスケール後のノルムを計算
/// zero-norm と非有限要素はエラー
fn scales<N, V>(set: &[V], side: Side) -> SimilarityResult<Vec<VectorScale>>
where
    N: Copy + Send + Sync,
    V: AsRef<[N]> + Sync,
    DefaultCompare: Compare<N>,
{
    let scales: Vec<SimilarityResult<VectorScale>> = set
        .par_iter()
        .enumerate()
        .map(|(index, v)| vector_scale::<N>(v.as_ref(), side, index))
        .collect();
    // 先頭のエラーを返すため順に集める
    scales.into_iter().collect()
}

fn vector_scale<N>(v: &[N], side: Side, index: usize) -> SimilarityResult<VectorScale>
where
    N: Copy,
    DefaultCompare: Compare<N>,
{
    let scale = <DefaultCompare as Compare<N>>::max_abs(v).ok_or(SimilarityError::NonFiniteElement { side, index })?;
    if scale == 0.0 {
        return Err(SimilarityError::ZeroNormVector { side, index });
    }
    let norm = <DefaultCompare as Compare<N>>::scaled_norm_sq(v, scale).sqrt();
    Ok(VectorScale { scale, norm })
}

/// Cosine similarity matrix between `a` (n vectors) and `b` (m vectors).
///
/// The result is m×n: entry (i, j) is `cosine(a[j], b[i])`.
/// Zero-norm vectors raise `ZeroNormVector` and vectors holding NaN or
/// infinite elements raise `NonFiniteElement`, so every cell is finite.
/// Vectors are scaled by their largest absolute element first, which keeps
/// very large and very small magnitudes exact.
/// The diagonal is left as computed; see [`cosine_matrix_self`].
pub fn cosine_matrix<N, V>(a: &[V], b: &[V]) -> SimilarityResult<SimilarityMatrix>
where
    N: Num + Copy + Send + Sync,
    V: AsRef<[N]> + Sync,
    DefaultCompare: Compare<N>,
{
    check_dims::<N, V>(a, b)?;
    let scale_a = scales::<N, V>(a, Side::A)?;
    let scale_b = scales::<N, V>(b, Side::B)?;

    let rows = b.len();
    let cols = a.len();
    let mut data = vec![0.0f64; rows * cols];
    if cols > 0 {
        data.par_chunks_mut(cols)
            .enumerate()
            .for_each(|(i, row)| {
                let bv = b[i].as_ref();
                for (j, cell) in row.iter_mut().enumerate() {
                    let cos = <DefaultCompare as Compare<N>>::cosine_scaled(a[j].as_ref(), bv, scale_a[j], scale_b[i]);
                    // 丸め誤差で 1 をわずかに超えることがある
                    *cell = cos.clamp(-1.0, 1.0);
                }
            });
    }
    Ok(SimilarityMatrix { rows, cols, data })
}

/// Square cosine matrix of a set against itself, diagonal forced to zero
pub fn cosine_matrix_self<N, V>(a: &[V]) -> SimilarityResult<SimilarityMatrix>
where
    N: Num + Copy + Send + Sync,
    V: AsRef<[N]> + Sync,
    DefaultCompare: Compare<N>,
{
    let mut mat = cosine_matrix::<N, V>(a, a)?;
    mat.zero_diagonal();
    Ok(mat)
}

/// Cosine similarity of a single pair
pub fn cosine<N>(a: &[N], b: &[N]) -> SimilarityResult<f64>
where
    N: Num + Copy,
    DefaultCompare: Compare<N>,
{
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
            side: Side::B,
            index: 0,
        });
    }
    let scale_a = vector_scale::<N>(a, Side::A, 0)?;
    let scale_b = vector_scale::<N>(b, Side::B, 0)?;
    let cos = <DefaultCompare as Compare<N>>::cosine_scaled(a, b, scale_a, scale_b);
    Ok(cos.clamp(-1.0, 1.0))
}

/// Component-wise mean of a vector set
pub fn mean_vector<N, V>(vectors: &[V]) -> SimilarityResult<Vec<f64>>
where
    N: Num + Copy + Into<f64>,
    V: AsRef<[N]>,
{
    let dim = match vectors.first() {
        Some(v) => v.as_ref().len(),
        None => return Err(SimilarityError::EmptyInput { required: 1, found: 0 }),
    };
    let mut acc = vec![0.0f64; dim];
    for (index, v) in vectors.iter().enumerate() {
        let v = v.as_ref();
        if v.len() != dim {
            return Err(SimilarityError::DimensionMismatch {
                expected: dim,
                found: v.len(),
                side: Side::A,
                index,
            });
        }
        for (slot, &x) in acc.iter_mut().zip(v) {
            *slot += x.into();
        }
    }
    let n = vectors.len() as f64;
    acc.iter_mut().for_each(|x| *x /= n);
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    /// tiny deterministic PRNG (xorshift32)
    struct Rng(u32);
    impl Rng {
        fn new(seed: u32) -> Self { Self(seed) }
        fn next_f64(&mut self) -> f64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            (x as f64 / u32::MAX as f64) * 2.0 - 1.0
        }
    }

    fn random_set(rng: &mut Rng, n: usize, dim: usize) -> Vec<Vec<f64>> {
        (0..n).map(|_| (0..dim).map(|_| rng.next_f64()).collect()).collect()
    }

    #[test]
    fn orientation_rows_are_b_cols_are_a() {
        let a = vec![vec![1.0f64, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let b = vec![vec![1.0f64, 0.0], vec![-1.0, 0.0]];
        let mat = cosine_matrix(&a, &b).unwrap();
        assert_eq!(mat.rows(), 2);
        assert_eq!(mat.cols(), 3);
        assert_eq!(mat.get(0, 0), Some(1.0));
        assert_eq!(mat.get(1, 0), Some(-1.0));
        assert!(mat.get(0, 1).unwrap().abs() < 1e-12);
        assert!((mat.get(0, 2).unwrap() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn self_matrix_is_bounded_and_symmetric() {
        let mut rng = Rng::new(0x1234_5678);
        for &(n, dim) in &[(1usize, 3usize), (5, 2), (17, 8), (40, 16)] {
            let set = random_set(&mut rng, n, dim);
            let mat = cosine_matrix(&set, &set).unwrap();
            assert!(mat.as_slice().iter().all(|v| (-1.0..=1.0).contains(v)), "out of bounds at n={n}");
            assert!(mat.is_symmetric(1e-12), "not symmetric at n={n}");
        }
    }

    #[test]
    fn self_matrix_has_zero_diagonal() {
        let set = vec![vec![1.0f32, 2.0], vec![2.0, 1.0], vec![3.0, 3.0]];
        let mat = cosine_matrix_self(&set).unwrap();
        for i in 0..3 {
            assert_eq!(mat.get(i, i), Some(0.0));
        }
        assert!(mat.get(0, 1).unwrap() > 0.0);
    }

    #[test]
    fn dimension_mismatch_reports_position() {
        let a = vec![vec![1.0f64, 0.0], vec![0.0, 1.0]];
        let b = vec![vec![1.0f64, 0.0, 0.0]];
        assert_eq!(
            cosine_matrix(&a, &b),
            Err(SimilarityError::DimensionMismatch { expected: 2, found: 3, side: Side::B, index: 0 })
        );
    }

    #[test]
    fn zero_norm_vector_is_an_error() {
        let a = vec![vec![1.0f64, 0.0], vec![0.0, 0.0]];
        assert_eq!(
            cosine_matrix(&a, &a),
            Err(SimilarityError::ZeroNormVector { side: Side::A, index: 1 })
        );
        assert_eq!(
            cosine(&[1.0f64, 2.0], &[0.0, 0.0]),
            Err(SimilarityError::ZeroNormVector { side: Side::B, index: 0 })
        );
    }

    #[test]
    fn empty_inputs_give_empty_matrix() {
        let a: Vec<Vec<f64>> = vec![];
        let b = vec![vec![1.0f64]];
        let mat = cosine_matrix(&a, &b).unwrap();
        assert_eq!((mat.rows(), mat.cols()), (1, 0));
        assert!(mat.as_slice().is_empty());
    }

    #[test]
    fn works_with_f16_and_document_vectors() {
        let docs = vec![
            DocumentVector::new("x", vec![f16::from_f32(1.0), f16::from_f32(0.0)]),
            DocumentVector::new("y", vec![f16::from_f32(1.0), f16::from_f32(1.0)]),
        ];
        let mat = cosine_matrix(&docs, &docs).unwrap();
        assert!((mat.get(0, 1).unwrap() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn mean_vector_averages_components() {
        let set = vec![vec![1.0f32, 2.0], vec![3.0, 4.0]];
        assert_eq!(mean_vector(&set).unwrap(), vec![2.0, 3.0]);
        let empty: Vec<Vec<f32>> = vec![];
        assert!(matches!(mean_vector(&empty), Err(SimilarityError::EmptyInput { .. })));
    }

    #[test]
    fn from_raw_checks_length() {
        let mat = SimilarityMatrix::from_raw(2, 2, vec![0.0, 0.5, 0.5, 0.0]).unwrap();
        assert_eq!(mat.row(1), &[0.5, 0.0]);
        assert!(SimilarityMatrix::from_raw(2, 2, vec![0.0; 3]).is_none());
    }

    #[test]
    fn extreme_magnitudes_give_bounded_cosines() {
        let huge = vec![vec![1e200f64, 0.0], vec![1e200, 1e200]];
        let mat = cosine_matrix(&huge, &huge).unwrap();
        assert!(mat.as_slice().iter().all(|v| v.is_finite() && (-1.0..=1.0).contains(v)));
        assert!((mat.get(0, 1).unwrap() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert_eq!(mat.get(0, 0), Some(1.0));

        let tiny = vec![vec![1e-200f64, 0.0], vec![1e-200, 1e-200]];
        let mat = cosine_matrix(&tiny, &tiny).unwrap();
        assert!((mat.get(1, 0).unwrap() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);

        // 桁の違うベクトル同士
        assert_eq!(cosine(&[1e-300f64, 0.0], &[1e300, 0.0]), Ok(1.0));
    }

    #[test]
    fn non_finite_elements_are_rejected() {
        let a = vec![vec![1.0f64, 0.0]];
        let b = vec![vec![1.0f64, 0.0], vec![f64::NAN, 1.0]];
        assert_eq!(
            cosine_matrix(&a, &b),
            Err(SimilarityError::NonFiniteElement { side: Side::B, index: 1 })
        );
        let inf = vec![vec![f32::INFINITY, 1.0]];
        assert_eq!(
            cosine_matrix_self(&inf),
            Err(SimilarityError::NonFiniteElement { side: Side::A, index: 0 })
        );
        assert_eq!(
            cosine(&[f64::NAN], &[1.0]),
            Err(SimilarityError::NonFiniteElement { side: Side::A, index: 0 })
        );
    }
}

use half::f16;

/// 要素型ごとの内積とノルム
/// Dense vectors only, both sides must already have the same length.
///
/// Every kernel works on vectors divided by their largest absolute element,
/// so each scaled component lies in [-1, 1] and sums neither overflow nor
/// underflow, whatever the magnitude of the input.
pub trait Compare<N>
where
    N: Copy,
{
    /// 最大絶対値
    /// `None` when any element is NaN or infinite
    fn max_abs(vec: &[N]) -> Option<f64>;
    /// スケール後の dot積
    /// d(a, b) = Σ((a_i / s_a) * (b_i / s_b))
    fn scaled_dot(vec: &[N], other: &[N], scale: f64, other_scale: f64) -> f64;
    /// スケール後の二乗ノルム
    /// ||a / s_a||^2, lies in [1, len] for a nonzero vector
    #[inline(always)]
    fn scaled_norm_sq(vec: &[N], scale: f64) -> f64 {
        Self::scaled_dot(vec, vec, scale, scale)
    }
    /// コサイン類似度 (scales and scaled norms precomputed)
    /// cos(θ) = Σ(a_i * b_i) / (||a|| * ||b||)
    #[inline(always)]
    fn cosine_scaled(vec: &[N], other: &[N], a: VectorScale, b: VectorScale) -> f64 {
        Self::scaled_dot(vec, other, a.scale, b.scale) / (a.norm * b.norm)
    }
}

/// Largest absolute element of a vector and the norm of the vector divided by it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorScale {
    pub scale: f64,
    pub norm: f64,
}

#[derive(Debug)]
pub struct DefaultCompare;

#[inline(always)]
fn max_abs_by<N: Copy>(vec: &[N], widen: impl Fn(N) -> f64) -> Option<f64> {
    let mut max = 0.0f64;
    for &x in vec {
        let v = widen(x);
        if !v.is_finite() {
            return None;
        }
        max = max.max(v.abs());
    }
    Some(max)
}

#[inline(always)]
fn scaled_dot_by<N: Copy>(vec: &[N], other: &[N], scale: f64, other_scale: f64, widen: impl Fn(N) -> f64) -> f64 {
    vec.iter()
        .zip(other)
        .map(|(&a, &b)| (widen(a) / scale) * (widen(b) / other_scale))
        .sum()
}

impl Compare<f32> for DefaultCompare {
    #[inline(always)]
    fn max_abs(vec: &[f32]) -> Option<f64> {
        max_abs_by(vec, |a| a as f64)
    }

    #[inline(always)]
    fn scaled_dot(vec: &[f32], other: &[f32], scale: f64, other_scale: f64) -> f64 {
        // 桁落ち対策で f64 に蓄積
        scaled_dot_by(vec, other, scale, other_scale, |a| a as f64)
    }
}

impl Compare<f64> for DefaultCompare {
    #[inline(always)]
    fn max_abs(vec: &[f64]) -> Option<f64> {
        max_abs_by(vec, |a| a)
    }

    #[inline(always)]
    fn scaled_dot(vec: &[f64], other: &[f64], scale: f64, other_scale: f64) -> f64 {
        scaled_dot_by(vec, other, scale, other_scale, |a| a)
    }
}

impl Compare<f16> for DefaultCompare {
    #[inline(always)]
    fn max_abs(vec: &[f16]) -> Option<f64> {
        max_abs_by(vec, |a| a.to_f64())
    }

    #[inline(always)]
    fn scaled_dot(vec: &[f16], other: &[f16], scale: f64, other_scale: f64) -> f64 {
        // f16 のまま掛けると overflow するので f64 に上げる
        scaled_dot_by(vec, other, scale, other_scale, |a| a.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dot_agrees_across_types() {
        let a64 = [1.0f64, 2.0, 3.0];
        let b64 = [4.0f64, -5.0, 6.0];
        let a32: Vec<f32> = a64.iter().map(|&x| x as f32).collect();
        let b32: Vec<f32> = b64.iter().map(|&x| x as f32).collect();
        let a16: Vec<f16> = a64.iter().map(|&x| f16::from_f64(x)).collect();
        let b16: Vec<f16> = b64.iter().map(|&x| f16::from_f64(x)).collect();

        // scale 1 は生の内積
        assert_eq!(<DefaultCompare as Compare<f64>>::scaled_dot(&a64, &b64, 1.0, 1.0), 12.0);
        assert_eq!(<DefaultCompare as Compare<f32>>::scaled_dot(&a32, &b32, 1.0, 1.0), 12.0);
        assert_eq!(<DefaultCompare as Compare<f16>>::scaled_dot(&a16, &b16, 1.0, 1.0), 12.0);
        assert_eq!(<DefaultCompare as Compare<f64>>::max_abs(&b64), Some(6.0));
        assert_eq!(<DefaultCompare as Compare<f16>>::max_abs(&b16), Some(6.0));
        assert_eq!(<DefaultCompare as Compare<f64>>::scaled_norm_sq(&[3.0, 4.0], 4.0), 1.5625);
    }

    #[test]
    fn f16_products_do_not_overflow() {
        let big = [f16::from_f32(300.0); 4];
        // 300*300*4 = 360000 > f16::MAX
        assert_eq!(<DefaultCompare as Compare<f16>>::scaled_dot(&big, &big, 1.0, 1.0), 360_000.0);
    }

    #[test]
    fn extreme_magnitudes_stay_finite() {
        let huge = [1e200f64, 1e200];
        let scale = <DefaultCompare as Compare<f64>>::max_abs(&huge).unwrap();
        assert_eq!(<DefaultCompare as Compare<f64>>::scaled_norm_sq(&huge, scale), 2.0);

        let tiny = [1e-200f64, 0.0];
        let scale = <DefaultCompare as Compare<f64>>::max_abs(&tiny).unwrap();
        assert!(scale > 0.0);
        assert_eq!(<DefaultCompare as Compare<f64>>::scaled_norm_sq(&tiny, scale), 1.0);
    }

    #[test]
    fn max_abs_rejects_non_finite_elements() {
        assert_eq!(<DefaultCompare as Compare<f64>>::max_abs(&[1.0, f64::NAN]), None);
        assert_eq!(<DefaultCompare as Compare<f32>>::max_abs(&[f32::NEG_INFINITY]), None);
        assert_eq!(<DefaultCompare as Compare<f16>>::max_abs(&[f16::INFINITY]), None);
        assert_eq!(<DefaultCompare as Compare<f64>>::max_abs(&[]), Some(0.0));
    }
}

//! Vector math for cosine similarity

/// Euclidean norm
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product over the shorter of the two slices
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity with optional precomputed magnitudes
///
/// Zero vectors have no direction; their similarity to anything is 0.
pub fn cosine_similarity(a: &[f32], b: &[f32], mag_a: Option<f32>, mag_b: Option<f32>) -> f32 {
    let ma = mag_a.unwrap_or_else(|| magnitude(a));
    let mb = mag_b.unwrap_or_else(|| magnitude(b));

    if ma == 0.0 || mb == 0.0 {
        return 0.0;
    }

    dot(a, b) / (ma * mb)
}

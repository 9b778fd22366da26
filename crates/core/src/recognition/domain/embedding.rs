/// Fixed-length face descriptor; faces of the same person lie close together.
pub type Embedding = Vec<f32>;

/// Cosine distance `1 - cos(a, b)`: 0 for the same direction, 1 for
/// orthogonal, 2 for opposite.
///
/// Inputs need not be normalized. Embeddings of different length, or a
/// zero vector, are incomparable and sit at infinite distance, so they can
/// never win a match.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norms = (norm_a * norm_b).sqrt();
    if norms == 0.0 {
        return f64::INFINITY;
    }
    (1.0 - dot / norms).clamp(0.0, 2.0)
}

/// Smallest distance from `query` to any of `candidates`; infinite when
/// there are none.
pub fn min_distance(candidates: &[Embedding], query: &[f32]) -> f64 {
    candidates
        .iter()
        .map(|c| cosine_distance(c, query))
        .fold(f64::INFINITY, f64::min)
}

//! Similarity computation for embeddings.

use crate::error::{EmbeddingError, Result};

/// Euclidean norm, accumulated in `f64`.
pub fn magnitude(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

/// Dot product, accumulated in `f64`.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum())
}

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
///
/// A zero-magnitude input has no direction and yields
/// [`EmbeddingError::DegenerateVector`] instead of NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = magnitude(a);
    if magnitude_a == 0.0 {
        return Err(EmbeddingError::DegenerateVector {
            subject: "left operand".to_string(),
        });
    }
    let magnitude_b = magnitude(b);
    if magnitude_b == 0.0 {
        return Err(EmbeddingError::DegenerateVector {
            subject: "right operand".to_string(),
        });
    }

    Ok(cosine_from_parts(dot, magnitude_a, magnitude_b))
}

/// Cosine from a dot product and two non-zero norms, clamped against rounding.
pub(crate) fn cosine_from_parts(dot: f64, magnitude_a: f64, magnitude_b: f64) -> f32 {
    (dot / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![0.3, -1.2, 4.5, 0.01];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_ignores_scale() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![10.0, 20.0, 30.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(matches!(
            cosine_similarity(&a, &b),
            Err(EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 0.0, 0.0];
        assert!(matches!(
            cosine_similarity(&zero, &v),
            Err(EmbeddingError::DegenerateVector { .. })
        ));
        assert!(matches!(
            cosine_similarity(&v, &zero),
            Err(EmbeddingError::DegenerateVector { .. })
        ));
    }
}

use ndarray::Array1;

pub(crate) fn normalize_vector(vec: &Array1<f32>) -> Array1<f32> {
    let norm: f32 = vec.iter().map(|&x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        vec / norm
    } else {
        Array1::zeros(vec.len())
    }
}

pub(crate) fn average_vectors(vectors: &[Array1<f32>], embedding_size: usize) -> Array1<f32> {
    if vectors.is_empty() {
        return Array1::zeros(embedding_size);
    }
    let sum = vectors.iter().fold(Array1::zeros(vectors[0].len()), |acc, v| acc + v);
    sum / vectors.len() as f32
}

pub(crate) fn euclidean_distance(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Numerically stable softmax. Falls back to a uniform distribution when
/// every exponent underflows.
pub(crate) fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    if logits.is_empty() {
        return Array1::zeros(0);
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.mapv(|v| (v - max).exp());
    let sum = exps.sum();
    if sum == 0.0 || !sum.is_finite() {
        return Array1::from_elem(logits.len(), 1.0 / logits.len() as f32);
    }
    exps / sum
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: &Array1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        match best {
            Some((_, best_val)) if v <= best_val => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&array![1.0, 2.0, 3.0]);
        assert!((probs.sum() - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_large_logits() {
        let probs = softmax(&array![1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        assert_eq!(argmax(&array![0.2, 0.5, 0.5]), Some(1));
        assert_eq!(argmax(&Array1::zeros(0)), None);
    }

    #[test]
    fn test_normalize_and_average() {
        let v = normalize_vector(&array![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert_eq!(normalize_vector(&array![0.0, 0.0]), array![0.0, 0.0]);

        let avg = average_vectors(&[array![0.0, 2.0], array![2.0, 4.0]], 2);
        assert_eq!(avg, array![1.0, 3.0]);
        assert_eq!(average_vectors(&[], 3), Array1::<f32>::zeros(3));
    }

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&array![0.0, 0.0], &array![3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}

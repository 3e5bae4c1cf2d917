//! Softmax-regression head trained on top of frozen embeddings.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::utils::{argmax, softmax};

/// Training options for the classification head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.5,
            l2: 1e-4,
            batch_size: 16,
            seed: 42,
        }
    }
}

/// In-memory (embedding, label) pairs.
#[derive(Debug, Clone, Default)]
pub struct TrainDataset {
    pub x: Vec<Array1<f32>>,
    pub y: Vec<usize>,
    pub classes: usize,
}

impl TrainDataset {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Linear map from an embedding to per-class scores, softmax-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearHead {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearHead {
    pub fn zeros(classes: usize, dim: usize) -> Self {
        Self {
            weights: Array2::zeros((classes, dim)),
            bias: Array1::zeros(classes),
        }
    }

    pub fn classes(&self) -> usize {
        self.bias.len()
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }

    fn logits(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weights.dot(x) + &self.bias
    }

    /// Class probabilities for a single embedding.
    pub fn predict_proba(&self, x: &Array1<f32>) -> Result<Array1<f32>, ClassifierError> {
        if x.len() != self.dim() {
            return Err(ClassifierError::PredictionError(format!(
                "Embedding has {} dimensions, head expects {}",
                x.len(),
                self.dim()
            )));
        }
        Ok(softmax(&self.logits(x)))
    }

    /// Arg-max class index and its probability.
    pub fn predict(&self, x: &Array1<f32>) -> Result<(usize, f32), ClassifierError> {
        let probs = self.predict_proba(x)?;
        let best = argmax(&probs)
            .ok_or_else(|| ClassifierError::PredictionError("Head has no classes".into()))?;
        Ok((best, probs[best]))
    }
}

/// Trains a head with shuffled mini-batch gradient descent on the
/// cross-entropy loss. `on_epoch(completed, total)` runs after every epoch.
pub fn train_head(
    dataset: &TrainDataset,
    options: &TrainOptions,
    mut on_epoch: impl FnMut(usize, usize),
) -> Result<LinearHead, ClassifierError> {
    if dataset.x.is_empty() {
        return Err(ClassifierError::InsufficientData("Empty training set".into()));
    }
    if dataset.x.len() != dataset.y.len() {
        return Err(ClassifierError::PredictionError("Mismatched training inputs/labels".into()));
    }
    let classes = dataset.classes;
    if classes == 0 {
        return Err(ClassifierError::InsufficientData("No classes available for training".into()));
    }
    if let Some(&label) = dataset.y.iter().find(|&&y| y >= classes) {
        return Err(ClassifierError::PredictionError(format!("Label {} out of range", label)));
    }
    let dim = dataset.x[0].len();
    if dataset.x.iter().any(|row| row.len() != dim) {
        return Err(ClassifierError::PredictionError("Inconsistent embedding row length".into()));
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut head = LinearHead::zeros(classes, dim);
    head.weights.mapv_inplace(|_| (rng.random::<f32>() - 0.5) * 0.01);

    let mut indices: Vec<usize> = (0..dataset.x.len()).collect();
    let batch_size = options.batch_size.max(1);
    let lr = options.learning_rate;
    let l2 = options.l2.max(0.0);

    for epoch in 0..options.epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = Array2::<f32>::zeros((classes, dim));
            let mut grad_b = Array1::<f32>::zeros(classes);
            for &idx in chunk {
                let x = &dataset.x[idx];
                let mut diff = softmax(&head.logits(x));
                diff[dataset.y[idx]] -= 1.0;
                for (c, mut row) in grad_w.rows_mut().into_iter().enumerate() {
                    row.scaled_add(diff[c], x);
                }
                grad_b += &diff;
            }
            let inv = 1.0 / chunk.len() as f32;
            let decay = head.weights.mapv(|w| w * l2);
            head.weights.scaled_add(-lr * inv, &grad_w);
            head.weights.scaled_add(-lr, &decay);
            head.bias.scaled_add(-lr * inv, &grad_b);
        }
        on_epoch(epoch + 1, options.epochs);
    }

    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn clusters() -> TrainDataset {
        TrainDataset {
            x: vec![
                array![1.0, 0.0, 0.1],
                array![0.9, 0.1, 0.0],
                array![1.0, 0.1, 0.1],
                array![0.0, 1.0, 0.1],
                array![0.1, 0.9, 0.0],
                array![0.0, 1.0, 0.0],
            ],
            y: vec![0, 0, 0, 1, 1, 1],
            classes: 2,
        }
    }

    #[test]
    fn test_separable_clusters_are_learned() {
        let dataset = clusters();
        let head = train_head(&dataset, &TrainOptions::default(), |_, _| {}).unwrap();
        for (x, &y) in dataset.x.iter().zip(&dataset.y) {
            let (predicted, confidence) = head.predict(x).unwrap();
            assert_eq!(predicted, y);
            assert!(confidence > 0.5 && confidence <= 1.0);
        }
    }

    #[test]
    fn test_progress_reported_once_per_epoch() {
        let options = TrainOptions { epochs: 7, ..TrainOptions::default() };
        let mut seen = Vec::new();
        train_head(&clusters(), &options, |done, total| seen.push((done, total))).unwrap();
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last(), Some(&(7, 7)));
    }

    #[test]
    fn test_training_is_deterministic_for_a_seed() {
        let a = train_head(&clusters(), &TrainOptions::default(), |_, _| {}).unwrap();
        let b = train_head(&clusters(), &TrainOptions::default(), |_, _| {}).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_datasets() {
        assert!(matches!(
            train_head(&TrainDataset::default(), &TrainOptions::default(), |_, _| {}),
            Err(ClassifierError::InsufficientData(_))
        ));

        let mut ragged = clusters();
        ragged.x[2] = array![1.0];
        assert!(train_head(&ragged, &TrainOptions::default(), |_, _| {}).is_err());

        let mut mislabeled = clusters();
        mislabeled.y[0] = 5;
        assert!(train_head(&mislabeled, &TrainOptions::default(), |_, _| {}).is_err());
    }

    #[test]
    fn test_dimension_mismatch_on_predict() {
        let head = LinearHead::zeros(2, 3);
        assert!(head.predict(&array![1.0, 2.0]).is_err());
        let probs = head.predict_proba(&array![1.0, 2.0, 3.0]).unwrap();
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }
}

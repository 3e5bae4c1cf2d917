//! Evaluation metrics for the transfer-learning classifier.

use serde::Serialize;

use crate::registry::ClassId;

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Fraction of samples on the diagonal; zero for an empty matrix.
    pub fn accuracy(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.n_classes).map(|k| u64::from(self.get(k, k))).sum();
        correct as f32 / total as f32
    }
}

/// One non-zero cell of the confusion matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfusionEntry {
    pub actual_class: String,
    pub predicted_class: String,
    pub count: u32,
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class_id: ClassId,
    pub class_name: String,
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Number of evaluated samples whose actual class is this one.
    pub support: u32,
}

/// Aggregate result of evaluating a freshly trained head.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingMetrics {
    pub accuracy: f32,
    pub total_samples: usize,
    pub confusion_matrix: Vec<ConfusionEntry>,
    pub per_class: Vec<ClassStats>,
}

impl TrainingMetrics {
    /// Builds the sparse report. `labels[k]` names class index `k`.
    pub fn from_confusion(cm: &ConfusionMatrix, labels: &[(ClassId, String)]) -> Self {
        let k = cm.n_classes.min(labels.len());
        let mut confusion_matrix = Vec::new();
        for truth in 0..k {
            for predicted in 0..k {
                let count = cm.get(truth, predicted);
                if count > 0 {
                    confusion_matrix.push(ConfusionEntry {
                        actual_class: labels[truth].1.clone(),
                        predicted_class: labels[predicted].1.clone(),
                        count,
                    });
                }
            }
        }

        let per_class = (0..k)
            .map(|class_idx| {
                let tp = cm.get(class_idx, class_idx) as f32;
                let support: u32 = (0..k).map(|j| cm.get(class_idx, j)).sum();
                let predicted: u32 = (0..k).map(|i| cm.get(i, class_idx)).sum();
                let precision = if predicted == 0 { 0.0 } else { tp / predicted as f32 };
                let recall = if support == 0 { 0.0 } else { tp / support as f32 };
                ClassStats {
                    class_id: labels[class_idx].0,
                    class_name: labels[class_idx].1.clone(),
                    precision,
                    recall,
                    support,
                }
            })
            .collect();

        Self {
            accuracy: cm.accuracy(),
            total_samples: cm.total() as usize,
            confusion_matrix,
            per_class,
        }
    }

    /// Sum of counts in rows whose actual class is `class_name`.
    pub fn row_total(&self, class_name: &str) -> u32 {
        self.confusion_matrix
            .iter()
            .filter(|e| e.actual_class == class_name)
            .map(|e| e.count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClassRegistry;

    fn labels() -> Vec<(ClassId, String)> {
        let mut registry = ClassRegistry::new();
        let a = registry.add_class("a").unwrap();
        let b = registry.add_class("b").unwrap();
        vec![(a, "a".to_string()), (b, "b".to_string())]
    }

    #[test]
    fn test_sparse_report() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(7, 0); // ignored

        let metrics = TrainingMetrics::from_confusion(&cm, &labels());
        assert_eq!(metrics.total_samples, 4);
        assert!((metrics.accuracy - 0.75).abs() < 1e-6);
        assert_eq!(metrics.confusion_matrix.len(), 3);
        let sum: u32 = metrics.confusion_matrix.iter().map(|e| e.count).sum();
        assert_eq!(sum as usize, metrics.total_samples);
        assert_eq!(metrics.row_total("a"), 3);
        assert_eq!(metrics.row_total("b"), 1);

        let a = &metrics.per_class[0];
        assert!((a.recall - 2.0 / 3.0).abs() < 1e-6);
        assert!((a.precision - 1.0).abs() < 1e-6);
        assert_eq!(a.support, 3);
    }

    #[test]
    fn test_empty_matrix() {
        let metrics = TrainingMetrics::from_confusion(&ConfusionMatrix::new(2), &labels());
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.total_samples, 0);
        assert!(metrics.confusion_matrix.is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(1, 0);
        let json = serde_json::to_value(TrainingMetrics::from_confusion(&cm, &labels())).unwrap();
        assert_eq!(json["totalSamples"], 1);
        assert_eq!(json["confusionMatrix"][0]["actualClass"], "b");
        assert_eq!(json["confusionMatrix"][0]["predictedClass"], "a");
    }
}

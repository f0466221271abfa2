// Evaluation module
// Scores test predictions against true labels and merges ensemble output

pub mod ensemble;
pub mod metrics;
pub mod roc;
pub mod topk;

pub use ensemble::average_predictions;
pub use metrics::{Cell, FoldResult, MetricValue, Table, TableError};

use ndarray::Array2;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::labels::Vocabulary;
use crate::model::network::argmax;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("No predictions to aggregate")]
    EmptyEnsemble,

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("No test examples to evaluate")]
    NoExamples,

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Identifies where a set of metrics came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalTag {
    /// Prepended to every metric name, e.g. `test_`
    pub prefix: String,
    /// Dataset name recorded in table rows
    pub ds: String,
    pub fold: usize,
}

impl EvalTag {
    pub fn test(fold: usize) -> Self {
        EvalTag {
            prefix: "test_".to_string(),
            ds: "test".to_string(),
            fold,
        }
    }

    /// Fold suffix, e.g. `ds_test-fold_3`
    pub fn suffix(&self) -> String {
        format!("ds_{}-fold_{}", self.ds, self.fold)
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

/// Everything an evaluator sees for one fold
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    /// Class probabilities `[n, n_classes]`
    pub predictions: &'a Array2<f32>,
    /// One-hot truth `[n, n_classes]`
    pub targets: &'a Array2<f32>,
    pub vocabulary: &'a Vocabulary,
    pub train_frequencies: &'a BTreeMap<String, usize>,
    pub tag: &'a EvalTag,
}

impl<'a> EvaluationInput<'a> {
    pub fn validate(&self) -> EvalResult<()> {
        if self.predictions.dim() != self.targets.dim() {
            return Err(EvalError::ShapeMismatch(format!(
                "predictions {:?} vs targets {:?}",
                self.predictions.dim(),
                self.targets.dim()
            )));
        }
        if self.predictions.ncols() != self.vocabulary.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "{} prediction columns for {} words",
                self.predictions.ncols(),
                self.vocabulary.len()
            )));
        }
        if self.predictions.nrows() == 0 {
            return Err(EvalError::NoExamples);
        }
        Ok(())
    }

    /// True class per example
    pub fn true_labels(&self) -> Vec<usize> {
        self.targets
            .rows()
            .into_iter()
            .map(|row| argmax(row.iter().copied()))
            .collect()
    }

    pub fn train_frequency(&self, class: usize) -> usize {
        self.vocabulary
            .words()
            .get(class)
            .and_then(|word| self.train_frequencies.get(word))
            .copied()
            .unwrap_or(0)
    }
}

/// Computes fold metrics from predictions
pub trait Evaluator {
    fn evaluate(&self, input: &EvaluationInput<'_>) -> EvalResult<FoldResult>;
}

/// Top-k and ROC-AUC evaluation
#[derive(Debug, Clone)]
pub struct RankEvaluator {
    top_k: Vec<usize>,
}

impl RankEvaluator {
    pub fn new(top_k: Vec<usize>) -> Self {
        RankEvaluator { top_k }
    }
}

impl Default for RankEvaluator {
    fn default() -> Self {
        RankEvaluator::new(topk::DEFAULT_TOP_K.to_vec())
    }
}

impl Evaluator for RankEvaluator {
    fn evaluate(&self, input: &EvaluationInput<'_>) -> EvalResult<FoldResult> {
        input.validate()?;

        let mut result = topk::evaluate_topk(input, &self.top_k)?;
        result.extend(roc::evaluate_roc(input)?);

        log::info!(
            "Evaluated {} {} examples ({})",
            input.predictions.nrows(),
            input.tag.ds,
            input.tag.suffix()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tag_suffix_and_keys() {
        let tag = EvalTag::test(3);
        assert_eq!(tag.suffix(), "ds_test-fold_3");
        assert_eq!(tag.key("rocauc"), "test_rocauc");
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let vocab = Vocabulary::build(["a", "b"]);
        let freqs = BTreeMap::new();
        let tag = EvalTag::test(0);
        let predictions = array![[0.5f32, 0.5]];
        let targets = array![[1.0f32, 0.0], [0.0, 1.0]];

        let input = EvaluationInput {
            predictions: &predictions,
            targets: &targets,
            vocabulary: &vocab,
            train_frequencies: &freqs,
            tag: &tag,
        };
        assert!(matches!(input.validate(), Err(EvalError::ShapeMismatch(_))));
    }

    #[test]
    fn test_rank_evaluator_merges_topk_and_roc() {
        let vocab = Vocabulary::build(["a", "b", "c"]);
        let freqs: BTreeMap<String, usize> =
            [("a", 3), ("b", 2), ("c", 1)].iter().map(|(w, n)| (w.to_string(), *n)).collect();
        let tag = EvalTag::test(1);
        let predictions = array![[0.7f32, 0.2, 0.1], [0.1, 0.8, 0.1], [0.3, 0.3, 0.4]];
        let targets = array![[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

        let input = EvaluationInput {
            predictions: &predictions,
            targets: &targets,
            vocabulary: &vocab,
            train_frequencies: &freqs,
            tag: &tag,
        };
        let result = RankEvaluator::default().evaluate(&input).unwrap();

        assert_eq!(result.scalar("test_top1_acc"), Some(1.0));
        assert_eq!(result.scalar("test_rocauc"), Some(1.0));
        assert!(result.table("test_topk_df").is_some());
        assert!(result.table("test_rocauc_df").is_some());
    }
}

// Results aggregation
// Folds per-fold metrics into one `avg_` summary: scalars averaged, tables stacked

use thiserror::Error;

use crate::eval::{FoldResult, MetricValue, Table, TableError};

pub const AVG_PREFIX: &str = "avg_";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("No fold results to aggregate")]
    NoFolds,

    #[error("Fold {fold} is missing metric '{key}'")]
    MissingMetric { key: String, fold: usize },

    #[error("Metric '{key}' changes kind in fold {fold}")]
    KindMismatch { key: String, fold: usize },

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

pub type AggregateResult<T> = Result<T, AggregateError>;

/// Average every metric of fold 0 across all folds
///
/// Keys missing from fold 0 are ignored. Scalars use a running mean so that
/// identical folds reproduce their value exactly.
pub fn aggregate(results: &[FoldResult]) -> AggregateResult<FoldResult> {
    let first = results.first().ok_or(AggregateError::NoFolds)?;
    let mut summary = FoldResult::new();

    for (key, value) in first.iter() {
        let avg_key = format!("{}{}", AVG_PREFIX, key);
        match value {
            MetricValue::Scalar(_) => {
                let mut mean = 0.0;
                for (fold, result) in results.iter().enumerate() {
                    let value = match result.get(key) {
                        Some(MetricValue::Scalar(v)) => *v,
                        Some(MetricValue::Table(_)) => {
                            return Err(AggregateError::KindMismatch {
                                key: key.clone(),
                                fold,
                            })
                        }
                        None => {
                            return Err(AggregateError::MissingMetric {
                                key: key.clone(),
                                fold,
                            })
                        }
                    };
                    if fold == 0 {
                        mean = value;
                    } else {
                        mean += (value - mean) / (fold + 1) as f64;
                    }
                }
                summary.insert_scalar(avg_key, mean);
            }
            MetricValue::Table(_) => {
                let mut tables: Vec<&Table> = Vec::with_capacity(results.len());
                for (fold, result) in results.iter().enumerate() {
                    match result.get(key) {
                        Some(MetricValue::Table(t)) => tables.push(t),
                        Some(MetricValue::Scalar(_)) => {
                            return Err(AggregateError::KindMismatch {
                                key: key.clone(),
                                fold,
                            })
                        }
                        None => {
                            return Err(AggregateError::MissingMetric {
                                key: key.clone(),
                                fold,
                            })
                        }
                    }
                }
                summary.insert_table(avg_key, Table::concat(&tables)?);
            }
        }
    }

    log::info!(
        "Aggregated {} metrics over {} folds",
        summary.len(),
        results.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Cell;

    fn fold(acc: f64, word: &str) -> FoldResult {
        let mut result = FoldResult::new();
        result.insert_scalar("test_top1_acc", acc);
        result.insert_count("n_train", 10);
        let mut table = Table::new(&["word", "top1"]);
        table.push_row(vec![word.into(), acc.into()]).unwrap();
        result.insert_table("test_topk_df", table);
        result
    }

    #[test]
    fn test_scalars_averaged_tables_concatenated() {
        let results = vec![fold(0.25, "a"), fold(0.5, "b"), fold(0.75, "c")];
        let summary = aggregate(&results).unwrap();

        assert_eq!(summary.scalar("avg_test_top1_acc"), Some(0.5));
        assert_eq!(summary.scalar("avg_n_train"), Some(10.0));

        let table = summary.table("avg_test_topk_df").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[2][0], Cell::Text("c".to_string()));
    }

    #[test]
    fn test_identical_folds_average_exactly() {
        let value = 0.1 + 0.2;
        let results: Vec<_> = (0..5).map(|_| fold(value, "a")).collect();
        let summary = aggregate(&results).unwrap();

        assert_eq!(summary.scalar("avg_test_top1_acc"), Some(value));
    }

    #[test]
    fn test_missing_metric_is_an_error() {
        let mut second = FoldResult::new();
        second.insert_scalar("n_train", 3.0);
        let results = vec![fold(0.5, "a"), second];

        assert!(matches!(
            aggregate(&results),
            Err(AggregateError::MissingMetric { fold: 1, .. })
        ));
    }

    #[test]
    fn test_extra_keys_after_fold_zero_are_ignored() {
        let mut second = fold(0.5, "b");
        second.insert_scalar("n_models", 2.0);
        let summary = aggregate(&[fold(0.5, "a"), second]).unwrap();

        assert!(summary.get("avg_n_models").is_none());
    }

    #[test]
    fn test_no_folds() {
        assert!(matches!(aggregate(&[]), Err(AggregateError::NoFolds)));
    }
}

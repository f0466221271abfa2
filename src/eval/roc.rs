// ROC-AUC
// One-vs-rest area under the ROC curve per word, via the rank-sum statistic

use crate::eval::metrics::{FoldResult, Table};
use crate::eval::{EvalResult, EvaluationInput};

/// Area under the ROC curve for binary labels
///
/// Tied scores share their average rank. Returns `None` unless both
/// classes are present.
pub fn roc_auc(scores: &[f32], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut pos_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks start..end (0-based) average to this 1-based rank
        let avg_rank = (start + end + 1) as f64 / 2.0;
        let tied_pos = order[start..end].iter().filter(|&&i| positives[i]).count();
        pos_rank_sum += avg_rank * tied_pos as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Per-word AUC over words present in the test split
///
/// Summary scalars are NaN when no word could be scored.
pub fn evaluate_roc(input: &EvaluationInput<'_>) -> EvalResult<FoldResult> {
    let tag = input.tag;
    let labels = input.true_labels();

    let mut table = Table::new(&["word", "ds", "fold", "rocauc"]);
    let mut auc_sum = 0.0;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut scored = 0usize;

    for class in 0..input.vocabulary.len() {
        let positives: Vec<bool> = labels.iter().map(|&c| c == class).collect();
        let scores: Vec<f32> = input.predictions.column(class).to_vec();
        let Some(auc) = roc_auc(&scores, &positives) else {
            continue;
        };

        let freq = input.train_frequency(class);
        table.push_row(vec![
            input.vocabulary.words()[class].as_str().into(),
            tag.ds.as_str().into(),
            tag.fold.into(),
            auc.into(),
        ])?;

        auc_sum += auc;
        weighted_sum += auc * freq as f64;
        weight_total += freq as f64;
        scored += 1;
    }

    if scored == 0 {
        log::warn!("No word could be scored for ROC-AUC ({})", tag.suffix());
    }

    let mut result = FoldResult::new();
    result.insert_scalar(
        tag.key("rocauc"),
        if scored > 0 {
            auc_sum / scored as f64
        } else {
            f64::NAN
        },
    );
    result.insert_scalar(
        tag.key("rocauc_weighted"),
        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            f64::NAN
        },
    );
    result.insert_count(tag.key("rocauc_n"), scored);
    result.insert_table(tag.key("rocauc_df"), table);
    Ok(result)
}

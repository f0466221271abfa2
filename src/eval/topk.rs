// Top-k accuracy
// Rank of the true word among predicted probabilities, with a frequency baseline

use ndarray::ArrayView1;
use std::collections::BTreeMap;

use crate::eval::metrics::{Cell, FoldResult, Table};
use crate::eval::{EvalResult, EvaluationInput};

pub const DEFAULT_TOP_K: [usize; 3] = [1, 5, 10];

/// Number of guesses listed per example in the guesses table
const GUESS_COUNT: usize = 5;

/// 1-based rank of `class` in `scores`; ties resolve in the true class's favor
pub fn rank_of(scores: ArrayView1<'_, f32>, class: usize) -> usize {
    let target = scores[class];
    1 + scores.iter().filter(|&&s| s > target).count()
}

/// Class indices ordered by descending score, lower index first on ties
pub fn top_guesses(scores: ArrayView1<'_, f32>, n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(n);
    order
}

/// Rank of each class when always guessing the most frequent training words
fn baseline_ranks(input: &EvaluationInput<'_>) -> Vec<usize> {
    let n_classes = input.vocabulary.len();
    let mut order: Vec<usize> = (0..n_classes).collect();
    order.sort_by(|&a, &b| {
        input
            .train_frequency(b)
            .cmp(&input.train_frequency(a))
            .then(a.cmp(&b))
    });

    let mut ranks = vec![0; n_classes];
    for (position, class) in order.into_iter().enumerate() {
        ranks[class] = position + 1;
    }
    ranks
}

fn fraction(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

pub fn evaluate_topk(input: &EvaluationInput<'_>, ks: &[usize]) -> EvalResult<FoldResult> {
    let tag = input.tag;
    let labels = input.true_labels();
    let n = labels.len();

    let ranks: Vec<usize> = labels
        .iter()
        .enumerate()
        .map(|(row, &class)| rank_of(input.predictions.row(row), class))
        .collect();
    let baseline = baseline_ranks(input);

    let mut result = FoldResult::new();
    for &k in ks {
        let hits = ranks.iter().filter(|&&r| r <= k).count();
        result.insert_scalar(tag.key(&format!("top{}_acc", k)), fraction(hits, n));

        let baseline_hits = labels.iter().filter(|&&c| baseline[c] <= k).count();
        result.insert_scalar(
            tag.key(&format!("top{}_baseline", k)),
            fraction(baseline_hits, n),
        );
    }

    // Per-word ranks, keyed by class index so rows follow vocabulary order
    let mut per_word: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (&class, &rank) in labels.iter().zip(&ranks) {
        per_word.entry(class).or_default().push(rank);
    }

    let mut columns = vec![
        "word".to_string(),
        "ds".to_string(),
        "fold".to_string(),
        "n_test".to_string(),
        "train_freq".to_string(),
    ];
    columns.extend(ks.iter().map(|k| format!("top{}", k)));
    let mut word_table = Table::new(&columns);

    let mut top1_sum = 0.0;
    for (&class, word_ranks) in &per_word {
        let word = input.vocabulary.words()[class].clone();
        let mut row: Vec<Cell> = vec![
            word.into(),
            tag.ds.as_str().into(),
            tag.fold.into(),
            word_ranks.len().into(),
            input.train_frequency(class).into(),
        ];
        for &k in ks {
            let hits = word_ranks.iter().filter(|&&r| r <= k).count();
            row.push(fraction(hits, word_ranks.len()).into());
        }
        top1_sum += fraction(
            word_ranks.iter().filter(|&&r| r == 1).count(),
            word_ranks.len(),
        );
        word_table.push_row(row)?;
    }
    let word_avg = if per_word.is_empty() {
        0.0
    } else {
        top1_sum / per_word.len() as f64
    };
    result.insert_scalar(tag.key("top1_acc_word_avg"), word_avg);
    result.insert_table(tag.key("topk_df"), word_table);

    let mut guesses = Table::new(&["word", "ds", "fold", "rank", "guesses"]);
    for (row, (&class, &rank)) in labels.iter().zip(&ranks).enumerate() {
        let listed: Vec<&str> = top_guesses(input.predictions.row(row), GUESS_COUNT)
            .into_iter()
            .map(|idx| input.vocabulary.words()[idx].as_str())
            .collect();
        guesses.push_row(vec![
            input.vocabulary.words()[class].as_str().into(),
            tag.ds.as_str().into(),
            tag.fold.into(),
            rank.into(),
            listed.join(" ").into(),
        ])?;
    }
    result.insert_table(tag.key("topk_guesses_df"), guesses);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalTag;
    use crate::labels::Vocabulary;
    use ndarray::{array, Array2};

    fn one_hot(labels: &[usize], n_classes: usize) -> Array2<f32> {
        let mut targets = Array2::zeros((labels.len(), n_classes));
        for (row, &class) in labels.iter().enumerate() {
            targets[[row, class]] = 1.0;
        }
        targets
    }

    #[test]
    fn test_rank_of_counts_strictly_greater() {
        let scores = array![0.1f32, 0.5, 0.5, 0.2];
        assert_eq!(rank_of(scores.view(), 1), 1);
        assert_eq!(rank_of(scores.view(), 2), 1);
        assert_eq!(rank_of(scores.view(), 3), 3);
        assert_eq!(rank_of(scores.view(), 0), 4);
    }

    #[test]
    fn test_top_guesses_order() {
        let scores = array![0.1f32, 0.5, 0.5, 0.2];
        assert_eq!(top_guesses(scores.view(), 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_topk_scalars_and_tables() {
        let vocab = Vocabulary::build(["a", "b", "c"]);
        let freqs: BTreeMap<String, usize> = [("a", 1usize), ("b", 5), ("c", 2)]
            .iter()
            .map(|(w, n)| (w.to_string(), *n))
            .collect();
        let tag = EvalTag::test(2);
        // Example ranks: 1, 2, 3, 1
        let predictions = array![
            [0.6f32, 0.3, 0.1],
            [0.5, 0.1, 0.4],
            [0.2, 0.7, 0.1],
            [0.1, 0.2, 0.7]
        ];
        let labels = [0, 2, 2, 2];
        let targets = one_hot(&labels, 3);

        let input = EvaluationInput {
            predictions: &predictions,
            targets: &targets,
            vocabulary: &vocab,
            train_frequencies: &freqs,
            tag: &tag,
        };
        let result = evaluate_topk(&input, &[1, 2]).unwrap();

        assert_eq!(result.scalar("test_top1_acc"), Some(0.5));
        assert_eq!(result.scalar("test_top2_acc"), Some(0.75));
        // Baseline order b, c, a: class a ranks 3, class c ranks 2
        assert_eq!(result.scalar("test_top1_baseline"), Some(0.0));
        assert_eq!(result.scalar("test_top2_baseline"), Some(0.75));
        // Word a: 1.0, word c: 1/3
        let word_avg = result.scalar("test_top1_acc_word_avg").unwrap();
        assert!((word_avg - 2.0 / 3.0).abs() < 1e-12);

        let words = result.table("test_topk_df").unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(
            words.columns(),
            &["word", "ds", "fold", "n_test", "train_freq", "top1", "top2"]
        );
        assert_eq!(words.rows()[1][0], Cell::Text("c".to_string()));
        assert_eq!(words.rows()[1][3], Cell::Int(3));

        let guesses = result.table("test_topk_guesses_df").unwrap();
        assert_eq!(guesses.len(), 4);
        assert_eq!(guesses.rows()[1][4], Cell::Text("a c b".to_string()));
    }
}

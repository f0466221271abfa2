// Ensemble aggregation
// Element-wise mean of class-probability matrices from several models

use ndarray::Array2;

use crate::eval::{EvalError, EvalResult};

/// Average predictions over the model axis
///
/// All matrices must share one shape. A single model is returned unchanged.
pub fn average_predictions(predictions: &[Array2<f32>]) -> EvalResult<Array2<f32>> {
    let (first, rest) = predictions.split_first().ok_or(EvalError::EmptyEnsemble)?;

    let mut total = first.clone();
    for (idx, prediction) in rest.iter().enumerate() {
        if prediction.dim() != first.dim() {
            return Err(EvalError::ShapeMismatch(format!(
                "model {} predicted {:?}, model 0 predicted {:?}",
                idx + 1,
                prediction.dim(),
                first.dim()
            )));
        }
        total += prediction;
    }

    if !rest.is_empty() {
        total /= predictions.len() as f32;
    }
    Ok(total)
}

// Training hooks
// Post-epoch observers driven by the trainer: early stopping and weight averaging

use std::collections::VecDeque;

use crate::model::weights::Snapshot;
use crate::model::EpochLogs;

/// What the trainer should do after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Stop,
}

/// Observer invoked by the training driver
///
/// Hooks run in registration order. The weights returned from
/// `on_train_end` replace the model's weights before the next hook sees them.
pub trait TrainingHook<W> {
    fn on_train_begin(&mut self) {}

    /// Called after every epoch with that epoch's metrics and weights
    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs, snapshot: &W) -> HookAction;

    /// Final weights to install, or `None` to keep the current ones
    fn on_train_end(&mut self, current: &W) -> Option<W>;
}

/// Stops when validation accuracy has not improved for `patience` epochs
/// and restores the best weights seen
#[derive(Debug, Clone)]
pub struct EarlyStopping<W> {
    patience: usize,
    best: Option<(f64, W)>,
    best_epoch: usize,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl<W: Clone> EarlyStopping<W> {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            best: None,
            best_epoch: 0,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl<W: Clone> TrainingHook<W> for EarlyStopping<W> {
    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs, snapshot: &W) -> HookAction {
        let current = logs.val_accuracy;
        let improved = match &self.best {
            Some((best, _)) => current > *best,
            None => true,
        };

        if improved {
            self.best = Some((current, snapshot.clone()));
            self.best_epoch = epoch;
            self.wait = 0;
            return HookAction::Continue;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(epoch);
            log::info!(
                "Early stopping at epoch {}: best val_accuracy {:.4} at epoch {}",
                epoch + 1,
                self.best.as_ref().map_or(0.0, |(acc, _)| *acc),
                self.best_epoch + 1
            );
            return HookAction::Stop;
        }

        HookAction::Continue
    }

    fn on_train_end(&mut self, _current: &W) -> Option<W> {
        self.best.take().map(|(_, weights)| weights)
    }
}

/// Averages weights over the tail of the training trajectory
///
/// Keeps a sliding window of at most `patience + epoch_count / 2` per-epoch
/// snapshots and, at train end, installs the running mean of the oldest
/// `epoch_count` of them.
#[derive(Debug, Clone)]
pub struct WeightAverager<W> {
    epoch_count: usize,
    patience: usize,
    snapshots: VecDeque<W>,
    averaged: usize,
}

impl<W: Snapshot> WeightAverager<W> {
    /// `epoch_count` is clamped to `2 * patience`
    pub fn new(epoch_count: usize, patience: usize) -> Self {
        WeightAverager {
            epoch_count: epoch_count.min(2 * patience),
            patience,
            snapshots: VecDeque::new(),
            averaged: 0,
        }
    }

    pub fn epoch_count(&self) -> usize {
        self.epoch_count
    }

    /// Maximum number of retained snapshots
    pub fn capacity(&self) -> usize {
        (self.patience + self.epoch_count / 2).max(1)
    }

    pub fn retained(&self) -> usize {
        self.snapshots.len()
    }

    /// Number of snapshots folded into the last average
    pub fn averaged(&self) -> usize {
        self.averaged
    }
}

impl<W: Snapshot> TrainingHook<W> for WeightAverager<W> {
    fn on_train_begin(&mut self) {
        log::info!("Weight averager over last {} epochs", self.epoch_count);
    }

    fn on_epoch_end(&mut self, _epoch: usize, _logs: &EpochLogs, snapshot: &W) -> HookAction {
        while self.snapshots.len() >= self.capacity() {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot.clone());
        HookAction::Continue
    }

    fn on_train_end(&mut self, _current: &W) -> Option<W> {
        let limit = self.epoch_count.max(1);
        let mut iter = self.snapshots.iter().take(limit);

        let mut mean = iter.next()?.clone();
        let mut seen = 1;
        for next in iter {
            mean = mean.running_mean(next, seen);
            seen += 1;
        }

        self.averaged = seen;
        log::info!("Averaged {} weights", seen);
        Some(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Snapshot for f64 {
        fn running_mean(&self, next: &Self, seen: usize) -> Self {
            (self * seen as f64 + next) / (seen as f64 + 1.0)
        }
    }

    fn logs(val_accuracy: f64) -> EpochLogs {
        EpochLogs {
            loss: 1.0,
            accuracy: 0.5,
            val_loss: 1.0,
            val_accuracy,
        }
    }

    #[test]
    fn test_early_stopping_waits_for_patience() {
        let mut stopper = EarlyStopping::new(2);
        let accs = [0.1, 0.3, 0.3, 0.2];
        let mut actions = Vec::new();

        for (epoch, acc) in accs.iter().enumerate() {
            actions.push(stopper.on_epoch_end(epoch, &logs(*acc), &(epoch as f64)));
        }

        assert_eq!(
            actions,
            vec![
                HookAction::Continue,
                HookAction::Continue,
                HookAction::Continue,
                HookAction::Stop
            ]
        );
        assert_eq!(stopper.best_epoch(), 1);
        assert_eq!(stopper.stopped_epoch(), Some(3));
        // Equal accuracy is not an improvement, so epoch 1 weights come back
        assert_eq!(stopper.on_train_end(&3.0), Some(1.0));
    }

    #[test]
    fn test_early_stopping_resets_wait_on_improvement() {
        let mut stopper = EarlyStopping::new(2);
        for (epoch, acc) in [0.1, 0.05, 0.2, 0.1].iter().enumerate() {
            assert_eq!(
                stopper.on_epoch_end(epoch, &logs(*acc), &(epoch as f64)),
                HookAction::Continue
            );
        }
        assert_eq!(stopper.on_train_end(&3.0), Some(2.0));
    }

    #[test]
    fn test_averager_clamps_epoch_count_to_twice_patience() {
        let averager: WeightAverager<f64> = WeightAverager::new(50, 10);
        assert_eq!(averager.epoch_count(), 20);
        assert_eq!(averager.capacity(), 20);

        let averager: WeightAverager<f64> = WeightAverager::new(6, 10);
        assert_eq!(averager.epoch_count(), 6);
        assert_eq!(averager.capacity(), 13);
    }

    #[test]
    fn test_averager_retention_is_bounded() {
        let mut averager = WeightAverager::new(4, 3);
        let cap = averager.capacity();
        assert_eq!(cap, 5);

        for epoch in 0..40 {
            averager.on_epoch_end(epoch, &logs(0.0), &(epoch as f64));
            assert!(averager.retained() <= cap);
        }
        assert_eq!(averager.retained(), cap);
    }

    #[test]
    fn test_averager_means_oldest_retained_snapshots() {
        let mut averager = WeightAverager::new(4, 3);
        for epoch in 0..10 {
            averager.on_epoch_end(epoch, &logs(0.0), &(epoch as f64));
        }

        // Retained: 5..=9, averaged: 5, 6, 7, 8
        let mean = averager.on_train_end(&9.0).unwrap();
        assert!((mean - 6.5).abs() < 1e-12);
        assert_eq!(averager.averaged(), 4);
    }

    #[test]
    fn test_averager_with_fewer_snapshots_than_count() {
        let mut averager = WeightAverager::new(4, 3);
        averager.on_epoch_end(0, &logs(0.0), &2.0);
        averager.on_epoch_end(1, &logs(0.0), &4.0);

        assert_eq!(averager.on_train_end(&4.0), Some(3.0));
        assert_eq!(averager.averaged(), 2);
    }

    #[test]
    fn test_averager_without_snapshots_keeps_weights() {
        let mut averager: WeightAverager<f64> = WeightAverager::new(4, 3);
        assert_eq!(averager.on_train_end(&1.0), None);
    }
}

// Fold orchestration
// Runs one cross-validation fold: split, extract, index, obtain models, evaluate

use ndarray::Array2;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

use crate::eval::{average_predictions, EvalTag, EvaluationInput, Evaluator, FoldResult};
use crate::labels::{
    distinct_count, partition, word_frequencies, LabelEvent, Vocabulary, NUM_FOLDS,
};
use crate::model::{Dataset, History, Model, ModelBackend};
use crate::pipeline::config::{RunConfig, RunMode};
use crate::pipeline::trace::{Stage, TraceBuilder, TraceEntry, TraceWriter};
use crate::pipeline::{PipelineError, PipelineResult};
use crate::signal::{extract, SignalStore};
use crate::state::storage::{read_file, store_file};
use crate::state::{Artifact, ArtifactKind, ArtifactRegistry};

/// File name of the persisted model for a fold
pub fn model_file_name(fold: usize) -> String {
    format!("model2-fold{}.json", fold)
}

/// What one fold produced
#[derive(Debug, Clone)]
pub struct FoldOutcome {
    pub fold: usize,
    pub result: FoldResult,
    /// Training history, present when the fold trained a model
    pub history: Option<History>,
    /// Layer listing of the trained model
    pub summary: Option<String>,
    pub artifacts: Vec<Artifact>,
}

/// Train/dev/test data of a fold, encoded against the training vocabulary
struct PreparedFold {
    vocabulary: Vocabulary,
    train_frequencies: BTreeMap<String, usize>,
    train: Dataset,
    dev: Dataset,
    test: Dataset,
}

/// Shared, read-only context for every fold of a run
pub struct FoldRunner<'a, B, E, R> {
    pub config: &'a RunConfig,
    pub store: &'a SignalStore,
    pub events: &'a [LabelEvent],
    pub backend: &'a B,
    pub evaluator: &'a E,
    pub registry: &'a R,
    pub run_dir: &'a Path,
    pub trace: Option<&'a TraceWriter>,
}

impl<'a, B, E, R> FoldRunner<'a, B, E, R>
where
    B: ModelBackend,
    E: Evaluator,
    R: ArtifactRegistry,
{
    pub fn run_fold(&self, fold: usize) -> PipelineResult<FoldOutcome> {
        let progress = fold as f32 / NUM_FOLDS as f32;
        log::info!("Running fold {}", fold);

        let prepared = self.prepare(fold)?;

        let mut outcome = FoldOutcome {
            fold,
            result: FoldResult::new(),
            history: None,
            summary: None,
            artifacts: Vec::new(),
        };
        let stats = [
            ("n_train", prepared.train.len()),
            ("n_dev", prepared.dev.len()),
            ("n_test", prepared.test.len()),
            ("n_classes", prepared.vocabulary.len()),
            ("n_classes_dev", distinct_count(&prepared.dev.labels)),
            ("n_classes_test", distinct_count(&prepared.test.labels)),
        ];
        for (name, value) in stats {
            outcome.result.insert_count(name, value);
        }
        self.record(
            TraceBuilder::new(Stage::Fold)
                .fold(fold)
                .data(json!(stats.iter().copied().collect::<BTreeMap<_, _>>()))
                .at(progress, format!("Prepared fold {}", fold)),
        )?;

        let models = self.obtain_models(fold, &prepared, &mut outcome)?;
        self.evaluate(fold, &prepared, &models, &mut outcome.result)?;

        self.record(
            TraceBuilder::new(Stage::Evaluate)
                .fold(fold)
                .data(json!({
                    "n_models": models.len(),
                    "test_top1_acc": outcome.result.scalar("test_top1_acc"),
                }))
                .at(
                    progress + 1.0 / NUM_FOLDS as f32,
                    format!("Evaluated fold {}", fold),
                ),
        )?;

        Ok(outcome)
    }

    fn record(&self, entry: TraceEntry) -> PipelineResult<()> {
        if let Some(trace) = self.trace {
            trace.write(entry)?;
        }
        Ok(())
    }

    fn prepare(&self, fold: usize) -> PipelineResult<PreparedFold> {
        let spec = self.config.window_spec();
        let split = partition(self.events, fold);

        let train = extract(split.train.iter().copied(), self.store, &spec);
        let dev = extract(split.dev.iter().copied(), self.store, &spec);
        let test = extract(split.test.iter().copied(), self.store, &spec);

        for (name, windows) in [("train", &train), ("dev", &dev), ("test", &test)] {
            if windows.rejected > 0 {
                log::info!(
                    "Fold {}: dropped {} {} events whose window leaves the signal",
                    fold,
                    windows.rejected,
                    name
                );
            }
            if windows.is_empty() {
                return Err(PipelineError::EmptySplit { fold, split: name });
            }
        }

        let vocabulary = Vocabulary::build(&train.words);
        let train_labels = vocabulary.encode(&train.words)?;
        let dev_labels = vocabulary.encode(&dev.words)?;
        let test_labels = vocabulary.encode(&test.words)?;
        let train_frequencies = word_frequencies(&train.words);

        log::info!(
            "Fold {}: {} train, {} dev, {} test windows over {} words",
            fold,
            train.len(),
            dev.len(),
            test.len(),
            vocabulary.len()
        );

        Ok(PreparedFold {
            vocabulary,
            train_frequencies,
            train: Dataset::new(train.windows, train_labels),
            dev: Dataset::new(dev.windows, dev_labels),
            test: Dataset::new(test.windows, test_labels),
        })
    }

    fn obtain_models(
        &self,
        fold: usize,
        prepared: &PreparedFold,
        outcome: &mut FoldOutcome,
    ) -> PipelineResult<Vec<B::Model>> {
        let file_name = model_file_name(fold);

        match self.config.mode() {
            RunMode::Train => {
                let fitted = self.backend.fit(
                    &prepared.train,
                    &prepared.dev,
                    &prepared.vocabulary,
                    self.config.seed,
                )?;

                for (name, value) in fitted.history.final_metrics() {
                    outcome.result.insert_scalar(name, value);
                }

                let bytes = fitted.model.to_bytes()?;
                let (path, sha256) = store_file(self.run_dir, &file_name, &bytes)?;
                let artifact = Artifact::new(ArtifactKind::Model, &path, sha256, bytes.len());
                outcome.artifacts.push(artifact.for_fold(fold));

                self.record(
                    TraceBuilder::new(Stage::Train)
                        .fold(fold)
                        .data(json!({
                            "epochs": fitted.history.len(),
                            "path": path.display().to_string(),
                        }))
                        .at(
                            (fold as f32 + 0.5) / NUM_FOLDS as f32,
                            format!("Trained fold {} for {} epochs", fold, fitted.history.len()),
                        ),
                )?;

                outcome.summary = Some(fitted.model.summary());
                outcome.history = Some(fitted.history);
                Ok(vec![fitted.model])
            }

            RunMode::Ensemble => {
                let mut models = Vec::new();
                for path in self.registry.list_artifacts(&file_name)? {
                    let loaded = read_file(&path)
                        .map_err(PipelineError::from)
                        .and_then(|bytes| self.backend.load(&bytes).map_err(PipelineError::from));

                    let model = match loaded {
                        Ok(model) => model,
                        Err(e) => {
                            log::warn!("Skipping {}: {}", path.display(), e);
                            continue;
                        }
                    };
                    if model.vocabulary() != &prepared.vocabulary {
                        log::warn!(
                            "Skipping {}: its {} words differ from the fold's {}",
                            path.display(),
                            model.vocabulary().len(),
                            prepared.vocabulary.len()
                        );
                        continue;
                    }
                    if let Err(e) = model.check_input(&prepared.test.windows) {
                        log::warn!("Skipping {}: {}", path.display(), e);
                        continue;
                    }

                    log::info!("Loaded ensemble member {}", path.display());
                    models.push(model);
                }

                if models.is_empty() {
                    return Err(PipelineError::NoEnsembleModels { fold });
                }
                outcome.result.insert_count("n_models", models.len());
                Ok(models)
            }

            RunMode::Reuse => {
                let path = self.run_dir.join(&file_name);
                if !path.is_file() {
                    return Err(PipelineError::NoTrainedModel { fold, path });
                }

                let model = self.backend.load(&read_file(&path)?)?;
                if model.vocabulary() != &prepared.vocabulary {
                    return Err(PipelineError::VocabularyMismatch {
                        fold,
                        expected: prepared.vocabulary.len(),
                        found: model.vocabulary().len(),
                    });
                }
                log::info!("Reusing {}", path.display());
                Ok(vec![model])
            }
        }
    }

    fn evaluate(
        &self,
        fold: usize,
        prepared: &PreparedFold,
        models: &[B::Model],
        result: &mut FoldResult,
    ) -> PipelineResult<()> {
        if let [model] = models {
            let scalars = model.evaluate(&prepared.test)?;
            result.insert_scalar("test_loss", scalars.loss);
            result.insert_scalar("test_accuracy", scalars.accuracy);
        }

        let predictions = models
            .iter()
            .map(|model| model.predict(&prepared.test.windows))
            .collect::<Result<Vec<Array2<f32>>, _>>()?;
        let averaged = average_predictions(&predictions)?;
        let targets = prepared.test.one_hot(prepared.vocabulary.len());

        let tag = EvalTag::test(fold);
        let input = EvaluationInput {
            predictions: &averaged,
            targets: &targets,
            vocabulary: &prepared.vocabulary,
            train_frequencies: &prepared.train_frequencies,
            tag: &tag,
        };
        result.extend(self.evaluator.evaluate(&input)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::RankEvaluator;
    use crate::labels::FoldTag;
    use crate::model::{DecoderBackend, TrainConfig};
    use crate::signal::StitchIndex;
    use crate::state::StorageResult;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const HALF_WINDOW: usize = 4;
    const SPACING: usize = 20;

    /// Registry returning a fixed list of paths
    struct FixedRegistry(Vec<PathBuf>);

    impl ArtifactRegistry for FixedRegistry {
        fn list_artifacts(&self, _file_name: &str) -> StorageResult<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    fn tags_for(index: usize) -> [FoldTag; NUM_FOLDS] {
        let mut tags = [FoldTag::Train; NUM_FOLDS];
        for (fold, tag) in tags.iter_mut().enumerate() {
            if index % NUM_FOLDS == fold {
                *tag = FoldTag::Test;
            } else if index % NUM_FOLDS == (fold + 1) % NUM_FOLDS {
                *tag = FoldTag::Dev;
            }
        }
        tags
    }

    /// Two words whose windows carry opposite-signed signal
    fn synthetic(n_events: usize) -> (SignalStore, Vec<LabelEvent>) {
        let total = SPACING * (n_events + 2);
        let mut signal = Array2::<f32>::zeros((total, 3));
        let mut events = Vec::new();

        for idx in 0..n_events {
            let bin = SPACING * (idx + 1);
            let word = if idx % 2 == 0 { "yes" } else { "no" };
            let sign = if idx % 2 == 0 { 1.0 } else { -1.0 };
            for b in bin - HALF_WINDOW..bin + HALF_WINDOW {
                for e in 0..3 {
                    signal[[b, e]] = sign * (1.0 + 0.1 * e as f32);
                }
            }
            events.push(LabelEvent::new((bin * 32) as i64, word, tags_for(idx)));
        }

        let stitch = StitchIndex::from_raw(&[total]).unwrap();
        (SignalStore::new(signal, stitch, 3).unwrap(), events)
    }

    fn config(fine_epochs: usize) -> RunConfig {
        RunConfig {
            half_window: HALF_WINDOW,
            fine_epochs,
            patience: 0,
            hidden_units: 8,
            batch_size: 8,
            dropout: 0.0,
            reg: 0.0,
            verbose: 0,
            ..RunConfig::default()
        }
    }

    fn backend(config: &RunConfig) -> DecoderBackend {
        DecoderBackend::new(TrainConfig {
            epochs: config.fine_epochs.max(1),
            ..config.train_config()
        })
    }

    #[test]
    fn test_train_fold_records_stats_and_persists_model() {
        let temp_dir = TempDir::new().unwrap();
        let (store, events) = synthetic(40);
        let config = config(30);
        let backend = backend(&config);
        let registry = FixedRegistry(Vec::new());
        let runner = FoldRunner {
            config: &config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &RankEvaluator::default(),
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        };

        let outcome = runner.run_fold(2).unwrap();
        let result = &outcome.result;

        assert_eq!(result.scalar("n_train"), Some(24.0));
        assert_eq!(result.scalar("n_dev"), Some(8.0));
        assert_eq!(result.scalar("n_test"), Some(8.0));
        assert_eq!(result.scalar("n_classes"), Some(2.0));
        assert_eq!(result.scalar("n_classes_test"), Some(2.0));
        assert!(result.scalar("val_accuracy").is_some());
        assert!(result.scalar("test_loss").is_some());
        assert_eq!(result.scalar("test_top1_acc"), Some(1.0));
        assert!(result.table("test_topk_df").is_some());

        assert_eq!(outcome.history.as_ref().map(History::len), Some(30));
        assert!(outcome.summary.is_some());
        assert_eq!(outcome.artifacts.len(), 1);
        assert!(temp_dir.path().join("model2-fold2.json").is_file());
    }

    #[test]
    fn test_reuse_requires_persisted_model() {
        let temp_dir = TempDir::new().unwrap();
        let (store, events) = synthetic(40);
        let train_config = config(10);
        let backend = backend(&train_config);
        let registry = FixedRegistry(Vec::new());
        let evaluator = RankEvaluator::default();

        let reuse_config = config(0);
        let reuse = FoldRunner {
            config: &reuse_config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &evaluator,
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        };
        assert!(matches!(
            reuse.run_fold(0),
            Err(PipelineError::NoTrainedModel { fold: 0, .. })
        ));

        let train = FoldRunner {
            config: &train_config,
            ..reuse
        };
        let trained = train.run_fold(0).unwrap();

        let reused = FoldRunner {
            config: &reuse_config,
            ..train
        }
        .run_fold(0)
        .unwrap();
        assert_eq!(
            reused.result.scalar("test_top1_acc"),
            trained.result.scalar("test_top1_acc")
        );
        assert!(reused.history.is_none());
    }

    #[test]
    fn test_ensemble_skips_unloadable_members() {
        let temp_dir = TempDir::new().unwrap();
        let (store, events) = synthetic(40);
        let train_config = config(10);
        let backend = backend(&train_config);
        let evaluator = RankEvaluator::default();

        let member_dir = temp_dir.path().join("member");
        let empty = FixedRegistry(Vec::new());
        FoldRunner {
            config: &train_config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &evaluator,
            registry: &empty,
            run_dir: &member_dir,
            trace: None,
        }
        .run_fold(1)
        .unwrap();

        let broken = temp_dir.path().join("broken.json");
        std::fs::write(&broken, b"not a model").unwrap();
        let registry = FixedRegistry(vec![
            broken,
            member_dir.join("model2-fold1.json"),
            member_dir.join("model2-fold1.json"),
        ]);

        let ensemble_config = RunConfig {
            ensemble: true,
            ..train_config.clone()
        };
        let outcome = FoldRunner {
            config: &ensemble_config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &evaluator,
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        }
        .run_fold(1)
        .unwrap();

        assert_eq!(outcome.result.scalar("n_models"), Some(2.0));
        // Scalar loss is only reported for single-model folds
        assert!(outcome.result.scalar("test_loss").is_none());
        assert!(outcome.result.scalar("test_top1_acc").is_some());
    }

    #[test]
    fn test_folds_with_equal_splits_give_equal_results() {
        let temp_dir = TempDir::new().unwrap();
        let (store, events) = synthetic(40);
        // Every fold uses fold 0's split
        let events: Vec<LabelEvent> = events
            .iter()
            .map(|event| LabelEvent::new(event.onset, &event.word, [event.tag(0); NUM_FOLDS]))
            .collect();
        let config = config(10);
        let backend = backend(&config);
        let registry = FixedRegistry(Vec::new());
        let runner = FoldRunner {
            config: &config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &RankEvaluator::default(),
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        };

        let first = runner.run_fold(0).unwrap();
        let last = runner.run_fold(NUM_FOLDS - 1).unwrap();

        assert_eq!(first.result.scalars(), last.result.scalars());
        assert_eq!(first.history, last.history);
    }

    #[test]
    fn test_ensemble_skips_members_with_other_window_shape() {
        let temp_dir = TempDir::new().unwrap();
        let (store, events) = synthetic(40);
        let evaluator = RankEvaluator::default();
        let empty = FixedRegistry(Vec::new());

        let mut members = Vec::new();
        for half_window in [HALF_WINDOW, HALF_WINDOW + 1] {
            let member_config = RunConfig {
                half_window,
                ..config(10)
            };
            let member_dir = temp_dir.path().join(format!("hw{}", half_window));
            FoldRunner {
                config: &member_config,
                store: &store,
                events: &events,
                backend: &backend(&member_config),
                evaluator: &evaluator,
                registry: &empty,
                run_dir: &member_dir,
                trace: None,
            }
            .run_fold(0)
            .unwrap();
            members.push(member_dir.join("model2-fold0.json"));
        }

        let ensemble_config = RunConfig {
            ensemble: true,
            ..config(10)
        };
        let registry = FixedRegistry(members);
        let outcome = FoldRunner {
            config: &ensemble_config,
            store: &store,
            events: &events,
            backend: &backend(&ensemble_config),
            evaluator: &evaluator,
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        }
        .run_fold(0)
        .unwrap();

        assert_eq!(outcome.result.scalar("n_models"), Some(1.0));
        assert!(outcome.result.scalar("test_loss").is_some());
    }

    #[test]
    fn test_ensemble_without_members_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (store, events) = synthetic(40);
        let config = RunConfig {
            ensemble: true,
            ..config(10)
        };
        let backend = backend(&config);
        let registry = FixedRegistry(Vec::new());

        let result = FoldRunner {
            config: &config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &RankEvaluator::default(),
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        }
        .run_fold(3);

        assert!(matches!(
            result,
            Err(PipelineError::NoEnsembleModels { fold: 3 })
        ));
    }

    #[test]
    fn test_empty_split_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (store, mut events) = synthetic(40);
        // Nobody is in fold 4's dev split any more
        for event in events.iter_mut() {
            if event.tag(4) == FoldTag::Dev {
                let tags = [FoldTag::Train; NUM_FOLDS];
                *event = LabelEvent::new(event.onset, event.word.clone(), tags);
            }
        }
        let config = config(5);
        let backend = backend(&config);
        let registry = FixedRegistry(Vec::new());

        let result = FoldRunner {
            config: &config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &RankEvaluator::default(),
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        }
        .run_fold(4);

        assert!(matches!(
            result,
            Err(PipelineError::EmptySplit { fold: 4, split: "dev" })
        ));
    }

    #[test]
    fn test_unknown_test_word_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (store, mut events) = synthetic(40);
        let mut tags = [FoldTag::Other; NUM_FOLDS];
        tags[0] = FoldTag::Test;
        events.push(LabelEvent::new(events[0].onset, "maybe", tags));

        let config = config(5);
        let backend = backend(&config);
        let registry = FixedRegistry(Vec::new());

        let result = FoldRunner {
            config: &config,
            store: &store,
            events: &events,
            backend: &backend,
            evaluator: &RankEvaluator::default(),
            registry: &registry,
            run_dir: temp_dir.path(),
            trace: None,
        }
        .run_fold(0);

        assert!(matches!(result, Err(PipelineError::Vocabulary(_))));
    }
}

//! Scorer
//!
//! Classifies stored records in batches, walking the table by primary key.
//! The cursor is the last id seen, not an offset, so records inserted while a
//! run is in progress can never shift the window.

use tracing::{debug, info};

use kestrel_core::{FeatureExtractor, FeatureVector, RecordField, Source, DEFAULT_BATCH_SIZE};
use kestrel_store::{RecordQuery, RecordStore};

use crate::{Classifier, PipelineError, ProgressObserver};

/// Per-run options
#[derive(Debug, Clone, Copy)]
pub struct ScoreOptions {
    /// Records classified and written per batch
    pub batch_size: usize,
    /// Re-score records that already carry a predicted label
    pub overwrite: bool,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            overwrite: false,
        }
    }
}

/// Outcome of a scoring run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreReport {
    pub scored: u64,
    pub positive: u64,
    pub batches: u64,
}

/// Applies a trained classifier to stored records
pub struct Scorer<'a> {
    store: &'a dyn RecordStore,
    classifier: &'a dyn Classifier,
    extractor: &'a dyn FeatureExtractor,
}

impl<'a> Scorer<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        classifier: &'a dyn Classifier,
        extractor: &'a dyn FeatureExtractor,
    ) -> Self {
        Self {
            store,
            classifier,
            extractor,
        }
    }

    pub fn score(
        &self,
        source: Source,
        options: ScoreOptions,
        progress: &mut dyn ProgressObserver,
    ) -> Result<ScoreReport, PipelineError> {
        if options.batch_size == 0 {
            return Err(PipelineError::InvalidOptions(
                "batch size must be at least 1".to_string(),
            ));
        }

        let candidates = RecordQuery::for_source(source)
            .unscored(!options.overwrite)
            .limit(options.batch_size);

        let total = self.store.count(&candidates)?;
        progress.on_total(total, 0);
        info!("Predicting labels for {} ({} candidates)", source, total);

        let mut report = ScoreReport::default();
        let mut last_id = None;

        loop {
            let query = match last_id {
                Some(id) => candidates.clone().after(id),
                None => candidates.clone(),
            };
            let mut records = self.store.filter_by(&query)?;
            let Some(last) = records.last() else {
                break;
            };
            let batch_last_id = last.id;

            let features: Vec<FeatureVector> = records
                .iter()
                .map(|record| self.extractor.extract(source, &record.response))
                .collect();
            let labels = self.classifier.predict(&features);
            let probabilities = self.classifier.predict_proba(&features);

            if labels.len() != records.len() || probabilities.len() != records.len() {
                return Err(PipelineError::Classifier(format!(
                    "{} records but {} labels and {} probabilities",
                    records.len(),
                    labels.len(),
                    probabilities.len()
                )));
            }

            for ((record, label), [_, p]) in records.iter_mut().zip(labels).zip(probabilities) {
                if !(0.0..=1.0).contains(&p) {
                    return Err(PipelineError::Classifier(format!(
                        "probability {} for record {} outside [0, 1]",
                        p, record.id
                    )));
                }
                record.predicted_label = Some(label);
                record.predicted_score = Some(p);
                if label {
                    report.positive += 1;
                }
            }

            self.store.bulk_update(
                &records,
                &[RecordField::PredictedLabel, RecordField::PredictedScore],
            )?;

            report.scored += records.len() as u64;
            report.batches += 1;
            last_id = Some(batch_last_id);

            debug!("Batch {} ends at id {}", report.batches, batch_last_id);
            progress.on_batch_scored(records.len(), report.positive);
        }

        info!(
            "Scored {} {} records, {} positive",
            report.scored, source, report.positive
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{Record, TextFeatures};
    use kestrel_store::{SourceStats, SqliteStore, StoreError};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::{LogisticModel, NoProgress};

    /// Uses the item's numeric id as its only feature bucket
    struct IdFeatures;

    impl FeatureExtractor for IdFeatures {
        fn extract(&self, _source: Source, response: &Value) -> FeatureVector {
            let id = response["id"].as_u64().unwrap_or(0) as u32;
            FeatureVector::from_pairs([(id, 1.0)])
        }
    }

    /// Answers from a fixed table keyed by feature bucket
    struct TableClassifier {
        table: HashMap<u32, (bool, f64)>,
    }

    impl TableClassifier {
        fn new(rows: &[(u32, bool, f64)]) -> Self {
            Self {
                table: rows.iter().map(|(id, l, p)| (*id, (*l, *p))).collect(),
            }
        }

        fn lookup(&self, x: &FeatureVector) -> (bool, f64) {
            let bucket = x.entries()[0].0;
            self.table.get(&bucket).copied().unwrap_or((false, 0.0))
        }
    }

    impl Classifier for TableClassifier {
        fn predict(&self, batch: &[FeatureVector]) -> Vec<bool> {
            batch.iter().map(|x| self.lookup(x).0).collect()
        }

        fn predict_proba(&self, batch: &[FeatureVector]) -> Vec<[f64; 2]> {
            batch
                .iter()
                .map(|x| {
                    let p = self.lookup(x).1;
                    [1.0 - p, p]
                })
                .collect()
        }
    }

    /// Returns one label too few
    struct ShortClassifier;

    impl Classifier for ShortClassifier {
        fn predict(&self, batch: &[FeatureVector]) -> Vec<bool> {
            vec![true; batch.len().saturating_sub(1)]
        }

        fn predict_proba(&self, batch: &[FeatureVector]) -> Vec<[f64; 2]> {
            vec![[0.0, 1.0]; batch.len()]
        }
    }

    /// Counts bulk writes and inserts a record the first time a batch is read
    struct TrackingStore {
        inner: SqliteStore,
        bulk_calls: AtomicUsize,
        insert_on_first_read: Mutex<Option<u64>>,
    }

    impl TrackingStore {
        fn new(inner: SqliteStore) -> Self {
            Self {
                inner,
                bulk_calls: AtomicUsize::new(0),
                insert_on_first_read: Mutex::new(None),
            }
        }
    }

    impl RecordStore for TrackingStore {
        fn upsert(&self, source: Source, external_id: &str, response: &Value) -> Result<(Record, bool), StoreError> {
            self.inner.upsert(source, external_id, response)
        }

        fn get(&self, source: Source, external_id: &str) -> Result<Option<Record>, StoreError> {
            self.inner.get(source, external_id)
        }

        fn filter_by(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
            let records = self.inner.filter_by(query)?;
            if let Some(id) = self.insert_on_first_read.lock().unwrap().take() {
                self.inner
                    .upsert(query.source, &id.to_string(), &json!({"id": id}))?;
            }
            Ok(records)
        }

        fn count(&self, query: &RecordQuery) -> Result<u64, StoreError> {
            self.inner.count(query)
        }

        fn bulk_update(&self, records: &[Record], fields: &[RecordField]) -> Result<usize, StoreError> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.bulk_update(records, fields)
        }

        fn stats(&self, source: Source) -> Result<SourceStats, StoreError> {
            self.inner.stats(source)
        }
    }

    fn seeded(ids: &[u64]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ids {
            store
                .upsert(Source::MuckrockFoia, &id.to_string(), &json!({"id": id}))
                .unwrap();
        }
        store
    }

    fn stored(store: &dyn RecordStore, id: u64) -> Record {
        store.get(Source::MuckrockFoia, &id.to_string()).unwrap().unwrap()
    }

    #[test]
    fn test_batch_write() {
        let store = seeded(&[1, 2, 3]);
        let classifier = TableClassifier::new(&[(1, true, 0.9), (2, false, 0.2), (3, true, 0.81)]);
        let scorer = Scorer::new(&store, &classifier, &IdFeatures);

        let report = scorer
            .score(Source::MuckrockFoia, ScoreOptions { batch_size: 3, overwrite: false }, &mut NoProgress)
            .unwrap();

        assert_eq!(report, ScoreReport { scored: 3, positive: 2, batches: 1 });
        let labels: Vec<_> = (1..=3).map(|id| stored(&store, id).predicted_label).collect();
        let scores: Vec<_> = (1..=3).map(|id| stored(&store, id).predicted_score).collect();
        assert_eq!(labels, vec![Some(true), Some(false), Some(true)]);
        assert_eq!(scores, vec![Some(0.9), Some(0.2), Some(0.81)]);
    }

    #[test]
    fn test_one_bulk_write_per_batch() {
        let store = TrackingStore::new(seeded(&[1, 2, 3, 4, 5]));
        let classifier = TableClassifier::new(&[(2, true, 0.7)]);
        let scorer = Scorer::new(&store, &classifier, &IdFeatures);

        let report = scorer
            .score(Source::MuckrockFoia, ScoreOptions { batch_size: 2, overwrite: false }, &mut NoProgress)
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.scored, 5);
        assert_eq!(report.positive, 1);
        assert_eq!(store.bulk_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_skips_scored_without_overwrite() {
        let store = seeded(&[1, 2]);
        let mut first = stored(&store, 1);
        first.predicted_label = Some(false);
        first.predicted_score = Some(0.3);
        store
            .bulk_update(&[first], &[RecordField::PredictedLabel, RecordField::PredictedScore])
            .unwrap();

        let classifier = TableClassifier::new(&[(1, true, 0.99), (2, true, 0.6)]);
        let scorer = Scorer::new(&store, &classifier, &IdFeatures);
        let report = scorer
            .score(Source::MuckrockFoia, ScoreOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(report.scored, 1);
        assert_eq!(stored(&store, 1).predicted_label, Some(false));
        assert_eq!(stored(&store, 1).predicted_score, Some(0.3));
        assert_eq!(stored(&store, 2).predicted_label, Some(true));
    }

    #[test]
    fn test_overwrite_rescores() {
        let store = seeded(&[1, 2]);
        let classifier = TableClassifier::new(&[(1, false, 0.1), (2, false, 0.2)]);
        Scorer::new(&store, &classifier, &IdFeatures)
            .score(Source::MuckrockFoia, ScoreOptions::default(), &mut NoProgress)
            .unwrap();

        let retrained = TableClassifier::new(&[(1, true, 0.8), (2, false, 0.4)]);
        let report = Scorer::new(&store, &retrained, &IdFeatures)
            .score(Source::MuckrockFoia, ScoreOptions { batch_size: 10, overwrite: true }, &mut NoProgress)
            .unwrap();

        assert_eq!(report.scored, 2);
        assert_eq!(stored(&store, 1).predicted_label, Some(true));
        assert_eq!(stored(&store, 2).predicted_score, Some(0.4));
    }

    #[test]
    fn test_insert_during_run_skips_nothing() {
        let store = TrackingStore::new(seeded(&[1, 2, 3]));
        *store.insert_on_first_read.lock().unwrap() = Some(4);

        let classifier = TableClassifier::new(&[]);
        let report = Scorer::new(&store, &classifier, &IdFeatures)
            .score(Source::MuckrockFoia, ScoreOptions { batch_size: 2, overwrite: false }, &mut NoProgress)
            .unwrap();

        for id in 1..=3 {
            assert!(stored(&store, id).is_scored(), "record {} was skipped", id);
        }
        // The late arrival sorts after the cursor and is picked up too.
        assert!(stored(&store, 4).is_scored());
        assert_eq!(report.scored, 4);
    }

    #[test]
    fn test_length_mismatch_writes_nothing() {
        let store = seeded(&[1, 2]);
        let err = Scorer::new(&store, &ShortClassifier, &IdFeatures)
            .score(Source::MuckrockFoia, ScoreOptions::default(), &mut NoProgress)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Classifier(_)));
        assert_eq!(store.stats(Source::MuckrockFoia).unwrap().scored, 0);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let store = seeded(&[1]);
        let classifier = TableClassifier::new(&[]);
        let err = Scorer::new(&store, &classifier, &IdFeatures)
            .score(Source::MuckrockFoia, ScoreOptions { batch_size: 0, overwrite: false }, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOptions(_)));
    }

    #[test]
    fn test_empty_store() {
        let store = seeded(&[]);
        let classifier = TableClassifier::new(&[]);
        let report = Scorer::new(&store, &classifier, &IdFeatures)
            .score(Source::MuckrockFoia, ScoreOptions::default(), &mut NoProgress)
            .unwrap();
        assert_eq!(report, ScoreReport::default());
    }

    #[test]
    fn test_logistic_model_with_text_features() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert(Source::MuckrockFoia, "1", &json!({"id": 1, "title": "Procurement contract"}))
            .unwrap();
        store
            .upsert(Source::MuckrockFoia, "2", &json!({"id": 2, "title": "Meeting minutes"}))
            .unwrap();

        let contract = kestrel_core::hash_features("contract").entries()[0].0;
        let model = LogisticModel {
            source: Source::MuckrockFoia,
            dim: kestrel_core::FEATURE_DIM,
            bias: -1.0,
            threshold: 0.5,
            weights: [(contract, 5.0)].into_iter().collect(),
        };

        let report = Scorer::new(&store, &model, &TextFeatures)
            .score(Source::MuckrockFoia, ScoreOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(report.positive, 1);
        assert_eq!(stored(&store, 1).predicted_label, Some(true));
        assert_eq!(stored(&store, 2).predicted_label, Some(false));
        let score = stored(&store, 2).predicted_score.unwrap();
        assert!(score > 0.0 && score < 0.5);
    }
}

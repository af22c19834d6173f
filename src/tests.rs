use chrono::DateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::csv_reader::{from_reader, Cell, Table};
use crate::features::engineer;
use crate::features::temporal::{
    AMOUNT_DEV_24H, NO_HISTORY_SECONDS, TIME_SINCE_LAST_TX, TX_COUNT_1H,
};
use crate::schema::{Algorithm, FeatureParams, FeatureSchema, RecordInput, TrainSpec};
use crate::scoring::{score_record, score_table, Score};
use crate::store::ModelStore;
use crate::trainer::{train, ModelArtifact};

#[cfg(test)]
mod tests {
    use super::*;

    const N_CARDS: usize = 5;
    const TX_PER_CARD: usize = 200;
    // 2024-01-01T00:00:00Z
    const START: i64 = 1_704_067_200;

    #[derive(Clone)]
    struct Tx {
        card: usize,
        epoch: i64,
        amount: f64,
    }

    fn format_ts(epoch: i64) -> String {
        DateTime::from_timestamp(epoch, 0)
            .unwrap()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    // Box-Muller draw from N(mean, sd)
    fn normal(rng: &mut StdRng, mean: f64, sd: f64) -> f64 {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        mean + sd * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    // 5 cards x 200 transactions, amounts ~ N(100, 20), about 10 days per card.
    fn synthetic_transactions() -> Vec<Tx> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut txs = Vec::with_capacity(N_CARDS * TX_PER_CARD);
        for card in 0..N_CARDS {
            let mut epoch = START + card as i64 * 420;
            for _ in 0..TX_PER_CARD {
                epoch += rng.gen_range(1_800..6_840);
                txs.push(Tx {
                    card,
                    epoch,
                    amount: normal(&mut rng, 100.0, 20.0),
                });
            }
        }
        txs
    }

    fn to_table(txs: &[Tx]) -> Table {
        let mut csv = String::from("card_id,ts,amt\n");
        for tx in txs {
            csv.push_str(&format!(
                "card_{},{},{:.2}\n",
                tx.card,
                format_ts(tx.epoch),
                tx.amount
            ));
        }
        from_reader(csv.as_bytes()).unwrap()
    }

    fn card_spec(algorithm: Algorithm) -> TrainSpec {
        TrainSpec {
            numerical_features: vec!["amt".into()],
            feature_engineering: Some(FeatureParams {
                entity_column: "card_id".into(),
                timestamp_column: "ts".into(),
                amount_column: "amt".into(),
            }),
            algorithm,
            seed: Some(42),
            ..TrainSpec::default()
        }
    }

    fn with_injected_fraud(txs: &[Tx]) -> Vec<Tx> {
        let last = txs.iter().filter(|t| t.card == 0).map(|t| t.epoch).max().unwrap();
        let mut out = txs.to_vec();
        out.push(Tx {
            card: 0,
            epoch: last + 600,
            amount: 100_000.0,
        });
        out
    }

    fn trained(algorithm: Algorithm, txs: &[Tx]) -> (ModelArtifact, FeatureSchema) {
        train(&to_table(txs), &card_spec(algorithm)).unwrap()
    }

    #[test]
    fn test_isolation_forest_scores_synthetic_cards() {
        let txs = synthetic_transactions();
        let (artifact, schema) = trained(Algorithm::IsolationForest, &txs);
        let scores = score_table(&to_table(&txs), &artifact, &schema).unwrap();

        assert_eq!(scores.len(), N_CARDS * TX_PER_CARD, "One score per transaction");
        assert!(
            scores.iter().all(|s| s.anomaly_score.is_finite()),
            "Every score should be a finite real"
        );
        let flagged = scores.iter().filter(|s| s.is_anomaly).count();
        assert!(flagged < scores.len() / 2, "Most training rows should look normal");
    }

    #[test]
    fn test_injected_fraud_is_flagged_and_history_is_untouched() {
        let txs = synthetic_transactions();
        let (artifact, schema) = trained(Algorithm::IsolationForest, &txs);

        let baseline = score_table(&to_table(&txs), &artifact, &schema).unwrap();
        let injected = with_injected_fraud(&txs);
        let scores = score_table(&to_table(&injected), &artifact, &schema).unwrap();

        let fraud = scores[txs.len()];
        assert!(fraud.anomaly_score < 0.0, "Injected fraud score {}", fraud.anomaly_score);
        assert!(fraud.is_anomaly, "Injected fraud should be flagged");

        for i in 0..txs.len() {
            assert_eq!(
                scores[i].anomaly_score.to_bits(),
                baseline[i].anomaly_score.to_bits(),
                "Row {} changed after a later transaction was added",
                i
            );
        }
    }

    #[test]
    fn test_rows_without_history_ignore_other_cards() {
        let txs = synthetic_transactions();
        let (artifact, schema) = trained(Algorithm::IsolationForest, &txs);
        assert!(
            (schema.amount_fallback_mean - 100.0).abs() < 5.0,
            "Training mean amount {}",
            schema.amount_fallback_mean
        );

        // A batch of card 0 alone versus card 0 mixed with a huge spender
        let card_0: Vec<Tx> = txs.iter().filter(|t| t.card == 0).cloned().collect();
        let mut mixed = card_0.clone();
        mixed.push(Tx {
            card: 9,
            epoch: START,
            amount: 1_000_000.0,
        });

        let alone = score_table(&to_table(&card_0), &artifact, &schema).unwrap();
        let together = score_table(&to_table(&mixed), &artifact, &schema).unwrap();
        for i in 0..card_0.len() {
            assert_eq!(
                alone[i].anomaly_score.to_bits(),
                together[i].anomaly_score.to_bits(),
                "Row {} depends on another card's transactions",
                i
            );
        }
    }

    #[test]
    fn test_every_algorithm_flags_the_injected_fraud() {
        let txs: Vec<Tx> = synthetic_transactions()
            .into_iter()
            .filter(|t| t.card < 2)
            .collect();
        let injected = with_injected_fraud(&txs);
        for algorithm in [Algorithm::LocalOutlierFactor, Algorithm::OneClassSvm] {
            let (artifact, schema) = trained(algorithm, &txs);
            let scores = score_table(&to_table(&injected), &artifact, &schema).unwrap();
            assert!(
                scores.iter().all(|s| s.anomaly_score.is_finite()),
                "{} produced a non-finite score",
                algorithm
            );
            let fraud = scores[txs.len()];
            assert!(
                fraud.is_anomaly,
                "{} missed the injected fraud (score {})",
                algorithm,
                fraud.anomaly_score
            );
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let txs = synthetic_transactions();
        let table = to_table(&txs);
        let (first, _) = trained(Algorithm::IsolationForest, &txs);
        let (second, schema) = trained(Algorithm::IsolationForest, &txs);

        assert_eq!(first, second, "Same seed should give the same model");
        let a: Vec<Score> = score_table(&table, &first, &schema).unwrap();
        let b: Vec<Score> = score_table(&table, &second, &schema).unwrap();
        assert_eq!(a, b, "Same model should give the same scores");
    }

    #[test]
    fn test_schema_round_trip_through_the_store() {
        let txs = synthetic_transactions();
        let table = to_table(&txs);
        let (artifact, schema) = trained(Algorithm::IsolationForest, &txs);

        let engineered = engineer(
            &table,
            schema.feature_engineering.as_ref(),
            schema.amount_fallback_mean,
            &schema.date_features,
        )
        .unwrap();
        assert_eq!(
            engineered.generated_temporal_features, schema.generated_temporal_features,
            "Scoring should rebuild exactly the trained temporal features"
        );
        assert_eq!(
            artifact.transform.output_columns(),
            schema.feature_columns,
            "Persisted feature columns should match what reaches the estimator"
        );
        assert_eq!(
            artifact.transform.transform(&engineered.table).unwrap().ncols(),
            schema.feature_columns.len()
        );

        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        store.save("cards", &artifact, &schema).unwrap();
        let (loaded, loaded_schema) = store.load("cards").unwrap();
        assert_eq!(loaded_schema, schema, "Schema should survive the JSON round trip");
        assert_eq!(
            score_table(&table, &loaded, &loaded_schema).unwrap(),
            score_table(&table, &artifact, &schema).unwrap(),
            "Stored model should score exactly like the in-memory one"
        );
    }

    #[test]
    fn test_single_record_has_no_history() {
        let mut record = RecordInput::default();
        record.fields.insert("card_id".into(), Cell::Text("card_9".into()));
        record
            .fields
            .insert("ts".into(), Cell::Text("2024-01-05 12:00:00".into()));
        record.fields.insert("amt".into(), Cell::Number(120.0));

        let txs = synthetic_transactions();
        let (artifact, schema) = trained(Algorithm::IsolationForest, &txs);

        let table = Table::from_record(&record.fields);
        let engineered = engineer(
            &table,
            schema.feature_engineering.as_ref(),
            schema.amount_fallback_mean,
            &[],
        )
        .unwrap();
        assert_eq!(
            engineered.table.column(TX_COUNT_1H).unwrap()[0].as_f64(),
            Some(0.0),
            "A lone record has no transactions in the past hour"
        );
        assert_eq!(
            engineered.table.column(TIME_SINCE_LAST_TX).unwrap()[0].as_f64(),
            Some(NO_HISTORY_SECONDS),
            "A lone record has no predecessor"
        );
        assert_eq!(
            engineered.table.column(AMOUNT_DEV_24H).unwrap()[0].as_f64(),
            Some(120.0 - schema.amount_fallback_mean),
            "A lone record deviates from the training mean amount"
        );

        let score = score_record(&record, &artifact, &schema).unwrap();
        assert!(score.anomaly_score.is_finite(), "Lone record should still score");
    }
}

//! Integration tests for RiskForge

use riskforge::model::{CLUSTER, RISK_LABEL};
use riskforge::{
    calculate_rfm, clean_transactions, load_transactions, run_pipeline, ClusterParams,
    DiagnosticOutcome, PipelineConfig, PipelineError, ScoringError, ScoringService, Stage,
};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "TransactionId,BatchId,CustomerId,Amount,TransactionStartTime,ChannelId";

/// Create a test CSV file with sample data
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();

    // Dormant, low-value customers
    writeln!(file, "T01,B1,C1,100.0,2023-01-01T10:00:00Z,Web").unwrap();
    writeln!(file, "T02,B1,C1,200.0,2023-01-02T12:30:00Z,Web").unwrap();
    writeln!(file, "T03,B2,C3,50.0,2023-01-03T09:00:00Z,Web").unwrap();
    writeln!(file, "T04,B2,C4,80.0,2023-01-01T08:00:00Z,Mobile").unwrap();

    // Active, high-value customers
    for (i, day) in (20..30).enumerate() {
        writeln!(file, "A{i:02},B3,C5,{}.0,2023-03-{day}T10:00:00Z,Mobile", 900 + i * 10).unwrap();
        writeln!(file, "B{i:02},B3,C6,{}.0,2023-03-{day}T11:00:00Z,Web", 1000 + i * 5).unwrap();
        writeln!(file, "D{i:02},B3,C7,{}.0,2023-03-{day}T12:00:00Z,Mobile", 950 + i).unwrap();
    }

    writeln!(file, "T05,B4,C2,500.0,2023-03-31T15:45:00Z,Mobile").unwrap();
    // Exact duplicate, dropped during cleaning
    writeln!(file, "T05,B4,C2,500.0,2023-03-31T15:45:00Z,Mobile").unwrap();

    file
}

fn config_for(input: &NamedTempFile, output: std::path::PathBuf, n_clusters: usize) -> PipelineConfig {
    PipelineConfig {
        input: Some(input.path().to_path_buf()),
        output,
        cluster: ClusterParams {
            n_clusters,
            ..ClusterParams::default()
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn test_rfm_for_sample_customers() {
    let test_file = create_test_csv();
    let frame = clean_transactions(load_transactions(test_file.path()).unwrap()).unwrap();
    let rfm = calculate_rfm(&frame).unwrap();

    assert_eq!(rfm.len(), 7);

    let c1 = rfm.get("C1").unwrap();
    // Global latest is 2023-03-31 15:45, C1's latest is 2023-01-02 12:30
    assert_eq!(c1.recency, 88);
    assert_eq!(c1.frequency, 2);
    assert_eq!(c1.monetary_total, 300.0);
    assert_eq!(c1.monetary_mean, 150.0);
    assert!(c1.monetary_std > 0.0);
    assert_eq!(c1.channel_id, "Web");

    let c2 = rfm.get("C2").unwrap();
    assert_eq!(c2.recency, 0);
    assert_eq!(c2.frequency, 1);
    assert_eq!(c2.monetary_total, 500.0);
    assert_eq!(c2.monetary_std, 0.0);
    assert_eq!(c2.channel_id, "Mobile");
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let out_dir = tempfile::tempdir().unwrap();
    let output = out_dir.path().join("processed").join("data.csv");

    let report = run_pipeline(&config_for(&test_file, output.clone(), 2)).unwrap();
    let labeled = &report.labeled;

    assert_eq!(report.transactions, 35);
    assert_eq!(labeled.rfm.len(), 7);
    assert!(labeled.risk_labels.iter().all(|&l| l <= 1));

    // The dormant customers fall in the high-risk cluster, the active ones never do
    let label_of = |id: &str| {
        let idx = labeled
            .rfm
            .customers
            .iter()
            .position(|c| c.customer_id == id)
            .unwrap();
        labeled.risk_labels[idx]
    };
    for id in ["C1", "C3", "C4"] {
        assert_eq!(label_of(id), 1, "{id} should be high risk");
    }
    for id in ["C5", "C6", "C7"] {
        assert_eq!(label_of(id), 0, "{id} should be normal");
    }

    let means = labeled.cluster_mean_recency();
    let flagged = means[labeled.high_risk_cluster].unwrap();
    for (cluster, mean) in means.iter().enumerate() {
        if cluster != labeled.high_risk_cluster {
            assert!(flagged > mean.unwrap());
        }
    }

    assert_eq!(report.diagnostics.len(), 3);
    for diagnostic in &report.diagnostics {
        if let DiagnosticOutcome::Computed(woe) = &diagnostic.outcome {
            assert!(woe.iv.is_finite() && woe.iv >= 0.0);
            assert!(woe.table.iter().all(|bin| bin.woe.is_finite()));
        }
    }

    let written = load_transactions(&output).unwrap();
    assert_eq!(written.height(), 7);
    assert!(written.column(CLUSTER).is_ok());
    assert!(written.column(RISK_LABEL).is_ok());
}

#[test]
fn test_pipeline_is_deterministic() {
    let test_file = create_test_csv();
    let out_dir = tempfile::tempdir().unwrap();

    let first = run_pipeline(&config_for(&test_file, out_dir.path().join("a.csv"), 3)).unwrap();
    let second = run_pipeline(&config_for(&test_file, out_dir.path().join("b.csv"), 3)).unwrap();

    assert_eq!(first.labeled.clusters, second.labeled.clusters);
    assert_eq!(first.labeled.risk_labels, second.labeled.risk_labels);
}

#[test]
fn test_too_many_clusters_aborts_label_stage() {
    let test_file = create_test_csv();
    let out_dir = tempfile::tempdir().unwrap();
    let output = out_dir.path().join("data.csv");

    let err = run_pipeline(&config_for(&test_file, output.clone(), 8)).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Label));
    assert!(!output.exists());
}

#[test]
fn test_missing_customer_column_aborts_aggregate_stage() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "TransactionId,Amount,TransactionStartTime,ChannelId").unwrap();
    writeln!(file, "T1,10.0,2023-01-01T00:00:00Z,Web").unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let err = run_pipeline(&config_for(&file, out_dir.path().join("data.csv"), 2)).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Aggregate));
    assert!(err.to_string().contains("CustomerId"));
}

#[test]
fn test_missing_input_directory() {
    let config = PipelineConfig {
        raw_dir: "/definitely/not/a/dir".into(),
        ..PipelineConfig::default()
    };
    assert!(matches!(run_pipeline(&config), Err(PipelineError::NoInput { .. })));
}

#[test]
fn test_score_from_artifact_file() {
    let mut artifact = NamedTempFile::new().unwrap();
    let body = json!({
        "schema": "rfm",
        "scaler": { "mean": [30.0, 5.0, 1000.0, 200.0, 50.0], "scale": [20.0, 4.0, 800.0, 150.0, 40.0] },
        "model": { "coefficients": [1.2, -0.8, -0.4, 0.0, 0.1], "intercept": -0.3, "threshold": 0.5 }
    });
    write!(artifact, "{body}").unwrap();

    let service = ScoringService::load(artifact.path()).unwrap();
    assert!(service.is_ready());

    let response = service
        .score(&json!({
            "Recency": 0, "Frequency": 1, "Monetary_Total": 100.0,
            "Monetary_Mean": 100.0, "Monetary_Std": 0.0
        }))
        .unwrap();
    assert!((0.0..=1.0).contains(&response.risk_probability));
    assert_eq!(response.is_high_risk, response.risk_probability >= 0.5);

    let err = service.score(&json!({ "Recency": 0 })).unwrap_err();
    assert!(matches!(err, ScoringError::Validation(_)));
}

#[test]
fn test_corrupt_artifact_fails_to_load() {
    let mut artifact = NamedTempFile::new().unwrap();
    write!(artifact, "{{ not json").unwrap();
    assert!(ScoringService::load(artifact.path()).is_err());
}

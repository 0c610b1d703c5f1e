mod common;

use std::fs;
use std::sync::Arc;

use common::{assert_snapshot, FixtureAligner, PlateFixture};
use platecall::experiment::{PILEUP_FASTA_FILE, POSITION_COUNTS_FILE};
use platecall::plate::WELLS_PER_PLATE;
use platecall::{run_experiment, CallerError, CancellationToken, ExperimentVariantTable, VariantLabel, WellIdentity};

fn well(plate: u32, name: &str) -> WellIdentity {
    WellIdentity::parse(plate, name).unwrap()
}

fn run(fixture: &PlateFixture, aligner: &Arc<FixtureAligner>) -> ExperimentVariantTable {
    let context = fixture.context(fixture.config(), aligner);
    run_experiment(&context, &CancellationToken::new()).expect("experiment runs")
}

fn summary(table: &ExperimentVariantTable) -> String {
    let fmt = |p: Option<f64>| p.map(|p| format!("{p:.3e}")).unwrap_or_else(|| "-".to_string());
    let mut out = String::new();
    for record in table.records() {
        if record.label == VariantLabel::InsufficientData && record.alignment_count == 0 {
            continue;
        }
        out.push_str(&format!(
            "{} {} {} count={} freq={} p={} adj={} mixed={}\n",
            record.plate_name.as_deref().unwrap_or("?"),
            record.identity.well_name(),
            record.label,
            record.alignment_count,
            record.average_frequency.map(|f| format!("{f:.2}")).unwrap_or_else(|| "-".to_string()),
            fmt(record.p_value),
            fmt(record.adjusted_p_value),
            record.mixed_well,
        ));
    }
    out
}

#[test]
fn every_expected_well_gets_a_row() {
    let fixture = PlateFixture::new();
    let aligner = Arc::new(FixtureAligner::default());
    let table = run(&fixture, &aligner);

    assert_eq!(table.len(), 2 * WELLS_PER_PLATE);
    let (called, parent, insufficient, failed) = table.label_counts();
    assert_eq!((called, parent, failed), (2, 1, 1));
    assert_eq!(insufficient, 2 * WELLS_PER_PLATE - 4);

    let empty = table.get(well(2, "H12")).unwrap();
    assert_eq!(empty.label, VariantLabel::InsufficientData);
    assert_eq!(empty.alignment_count, 0);
    assert_eq!(empty.plate_name.as_deref(), Some("kinase"));

    let on_disk = fs::read_to_string(fixture.output().join("variants.csv")).unwrap();
    assert_eq!(on_disk, table.to_csv_string());
    assert!(fixture.output().join("references/1_lipase.fasta").exists());
}

#[test]
fn parent_well_is_fully_confident() {
    let fixture = PlateFixture::new();
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));

    let record = table.get(well(1, "A1")).unwrap();
    assert_eq!(record.label.to_string(), "#PARENT#");
    assert!(record.calls.is_empty());
    assert_eq!(record.alignment_count, 10);
    assert_eq!(record.average_frequency, Some(0.0));
    assert_eq!(record.p_value, None);
    assert_eq!(record.adjusted_p_value, Some(1.0));
}

#[test]
fn majority_substitution_is_called() {
    let fixture = PlateFixture::new();
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));

    let record = table.get(well(2, "A1")).unwrap();
    assert_eq!(record.label.to_string(), "T2G");
    assert_eq!(record.calls.len(), 1);
    assert!((record.average_frequency.unwrap() - 0.9).abs() < 1e-12);
    let p = record.p_value.unwrap();
    assert!(p < 1e-8);
    let adjusted = record.adjusted_p_value.unwrap();
    assert!((adjusted - (p * 192.0).min(1.0)).abs() < 1e-15);
    assert!(!record.mixed_well);
}

#[test]
fn thin_and_broken_wells_carry_sentinels() {
    let fixture = PlateFixture::new();
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));

    let thin = table.get(well(1, "A2")).unwrap();
    assert_eq!(thin.label.to_string(), "#N.A.#");
    assert_eq!(thin.alignment_count, 3);
    assert_eq!(thin.adjusted_p_value, None);

    let broken = table.get(well(1, "A3")).unwrap();
    assert_eq!(broken.label.to_string(), "#FAILED#");
    assert_eq!(broken.adjusted_p_value, None);
}

#[test]
fn artifact_write_failure_fails_only_its_well() {
    let fixture = PlateFixture::new();
    fs::create_dir_all(fixture.root().join("RB01/NB01").join(POSITION_COUNTS_FILE).join("x")).unwrap();
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));

    assert_eq!(table.len(), 2 * WELLS_PER_PLATE);
    assert!(fixture.output().join("variants.csv").exists());
    let blocked = table.get(well(1, "A1")).unwrap();
    assert_eq!(blocked.label, VariantLabel::Failed);
    assert_eq!(blocked.alignment_count, 10);
    assert_eq!(table.get(well(2, "A1")).unwrap().label.to_string(), "T2G");
}

#[test]
fn calls_carry_their_protein_consequence() {
    let fixture = PlateFixture::new();
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));

    let parent = table.get(well(1, "A1")).unwrap().protein.as_ref().unwrap();
    assert_eq!(parent.nc_variant, "ATGCATGC");
    assert_eq!(parent.aa_variant, "MH");
    assert_eq!(parent.mutations.to_string(), "#PARENT#");

    let lipase = table.get(well(1, "B1")).unwrap().protein.as_ref().unwrap();
    assert_eq!(lipase.nc_variant, "ATGTATGC");
    assert_eq!(lipase.mutations.to_string(), "H2Y");

    let kinase = table.get(well(2, "A1")).unwrap().protein.as_ref().unwrap();
    assert_eq!(kinase.aa_variant, "R");
    assert_eq!(kinase.mutations.to_string(), "M1R");

    assert!(table.get(well(1, "A2")).unwrap().protein.is_none());
    let csv = table.to_csv_string();
    assert!(csv.lines().any(|line| line.starts_with("kinase,A1,2,T2G,") && line.ends_with(",M1R,AGGC,R")));
}

#[test]
fn called_wells_get_diagnostic_artifacts() {
    let fixture = PlateFixture::new();
    run(&fixture, &Arc::new(FixtureAligner::default()));

    let well_dir = fixture.root().join("RB02/NB01");
    let counts = fs::read_to_string(well_dir.join(POSITION_COUNTS_FILE)).unwrap();
    assert_eq!(counts.lines().count(), 5);
    assert!(counts.lines().nth(2).unwrap().starts_with("2,T,G,true,0.9,"));

    let pileup = fs::read_to_string(well_dir.join(PILEUP_FASTA_FILE)).unwrap();
    assert!(pileup.starts_with(">kinase\nATGC\n"));
    assert_eq!(pileup.lines().filter(|l| l.starts_with('>')).count(), 11);

    assert!(!fixture.root().join("RB01/NB02").join(POSITION_COUNTS_FILE).exists());
}

#[test]
fn rerun_does_not_realign() {
    let fixture = PlateFixture::new();
    let aligner = Arc::new(FixtureAligner::default());
    let first = run(&fixture, &aligner);
    // A1, A2, A3 and B1 on plate 1, A1 on plate 2
    assert_eq!(aligner.calls(), 5);

    let context = fixture.context(fixture.config().with_resume(false), &aligner);
    let second = run_experiment(&context, &CancellationToken::new()).unwrap();
    // only the failed well has no cached alignment
    assert_eq!(aligner.calls(), 6);
    assert_eq!(first.to_csv_string(), second.to_csv_string());
}

#[test]
fn resume_reuses_finished_rows() {
    let fixture = PlateFixture::new();
    let aligner = Arc::new(FixtureAligner::default());
    run(&fixture, &aligner);

    let table_path = fixture.output().join("variants.csv");
    let edited = fs::read_to_string(&table_path).unwrap().replace("T2G", "T2A");
    fs::write(&table_path, edited).unwrap();

    let table = run(&fixture, &aligner);
    assert_eq!(table.get(well(2, "A1")).unwrap().label.to_string(), "T2A");
    assert_eq!(table.get(well(1, "A3")).unwrap().label, VariantLabel::Failed);
}

#[test]
fn cancelled_run_writes_no_table() {
    let fixture = PlateFixture::new();
    let aligner = Arc::new(FixtureAligner::default());
    let context = fixture.context(fixture.config(), &aligner);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_experiment(&context, &cancel).unwrap_err();
    assert!(matches!(err, CallerError::Cancelled));
    assert_eq!(aligner.calls(), 0);
    assert!(!fixture.output().join("variants.csv").exists());
}

#[test]
fn plates_without_reference_fail_their_wells() {
    let fixture = PlateFixture::new();
    common::write_named_reads(
        &fixture.root().join("RB03/NB01"),
        &common::repeated("r", b"ATGC", 8),
    );
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));
    assert_eq!(table.len(), 3 * WELLS_PER_PLATE);
    let orphan = table.get(well(3, "A1")).unwrap();
    assert_eq!(orphan.label, VariantLabel::Failed);
    assert_eq!(orphan.plate_name, None);
}

#[test]
fn called_rows_match_snapshot() {
    let fixture = PlateFixture::new();
    let table = run(&fixture, &Arc::new(FixtureAligner::default()));
    assert_snapshot("experiment_summary.txt", &summary(&table));
}

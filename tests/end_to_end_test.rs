//! Whole-pipeline run against a scripted worker: partition, filter,
//! chunk pass, attack pass, feedback. Checks conservation end to end.

use std::collections::BTreeMap;
use std::path::Path;

use sluice::baseline;
use sluice::config::{
    AttackPhase, AttackRecipe, AttacksConfig, ExecutorConfig, PipelineConfig,
};
use sluice::distribute::CrackedLog;
use sluice::hashline::{self, sha1_hex};
use sluice::remote::mock::{MockTransport, WorkerTick};
use sluice::state::{BatchStatus, StateStore};
use sluice::Pipeline;
use tempfile::TempDir;

const DF_PLENTY: &str = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                         /dev/sda1 104857600 10485760 94371840 10% /srv\n";

fn test_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.work_dir = dir.join("work");
    config.baseline.index_path = dir.join("baseline.idx");
    config.show_progress = false;
    config.partition.batch_size = 3;
    config.chunk.batches_per_chunk = 2;
    config.executor = ExecutorConfig {
        poll_interval_secs: 1,
        max_wait_secs: 60,
        settle_secs: 0,
        reconnect_base_secs: 1,
        reconnect_cap_secs: 2,
        reconnect_ceiling_secs: 3,
        min_asset_bytes: 1,
        min_remote_disk_bytes: 1024,
    };
    config.attacks = AttacksConfig {
        recipes: vec![AttackRecipe {
            name: "first-pass".to_string(),
            phase: AttackPhase::NewWordlists,
            command_template: "hashcat -m 100 -a 0 -w 3 #HL# fresh-words.txt".to_string(),
            assets: Vec::new(),
            max_parallelism: 1,
            priority: 0,
            expected_yield_rate: 0.05,
            description: String::new(),
        }],
        default_order: Vec::new(),
        asset_map: BTreeMap::new(),
    };
    config
}

/// Pre-launch, running, finished - one triple per supervised run
fn run_triples(n: usize) -> Vec<WorkerTick> {
    let mut ticks = Vec::new();
    for _ in 0..n {
        ticks.push(WorkerTick::default());
        ticks.push(WorkerTick::running("Progress.........: 50/100"));
        ticks.push(WorkerTick::finished("Status...........: Exhausted"));
    }
    ticks
}

#[test]
fn test_full_pipeline_conserves_and_feeds_back() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    // Universe: six plaintexts, one of them baseline-known
    let plains = [
        "password",
        "minecraft2024",
        "dragon99",
        "tiger!",
        "summer2020",
        "winter2021",
    ];
    let hashes: Vec<String> = plains.iter().map(|p| sha1_hex(p.as_bytes())).collect();
    let source = dir.path().join("universe.txt");
    std::fs::write(&source, hashes.join("\n")).unwrap();

    let wordlist = dir.path().join("baseline-words.txt");
    std::fs::write(&wordlist, "password\n").unwrap();
    baseline::build_index(&wordlist, &config.baseline.index_path).unwrap();

    let pipeline = Pipeline::new(config.clone()).unwrap();

    // Stages 1-2: partition and filter
    let parted = pipeline.partition_universe(&source).unwrap();
    assert_eq!(parted.batches.len(), 2);
    let filtered = pipeline.filter_baseline().unwrap();
    assert_eq!(filtered.total_removed(), 1);
    assert_eq!(filtered.total_kept(), 5);

    // Stage 3: chunk pass. The worker cracks one hash from each batch
    // and reports one stray entry that belongs to no batch.
    let transport = MockTransport::new(run_triples(3));
    transport.set_df_output(DF_PLENTY);
    transport.add_remote_file(
        "/srv/sluice/sluice-chunk-0000.pot",
        format!(
            "{}:dragon99\n{}:summer2020\n{}:stray\n",
            sha1_hex(b"dragon99"),
            sha1_hex(b"summer2020"),
            sha1_hex(b"stray"),
        )
        .as_bytes(),
    );
    // Stage 4 artifact: the attack pass recovers minecraft2024 from
    // batch 0000's remainder; batch 0001 yields nothing further.
    transport.add_remote_file(
        "/srv/sluice/sluice-0000-first-pass.pot",
        format!("{}:minecraft2024\n", sha1_hex(b"minecraft2024")).as_bytes(),
    );

    let chunk_report = pipeline.run_chunk_pass(transport.clone()).unwrap();
    assert_eq!(chunk_report.chunks_run, 1);
    assert_eq!(chunk_report.pearls, 2);
    assert_eq!(chunk_report.sand, 3);
    assert_eq!(chunk_report.orphans, 1);
    // The chunk file is transient and gone after distribution
    assert!(!config
        .paths
        .chunks_dir()
        .join("chunk-0000.txt")
        .exists());

    // Stage 4: attack pass over the remainders
    let summaries = pipeline
        .run_attack_pass(transport, None, None)
        .unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].total_new_cracks(), 1);
    assert_eq!(summaries[1].total_new_cracks(), 0);

    // State: both batches completed with correct cumulative counts
    let state = StateStore::open(&config.paths.state_file()).unwrap();
    let batch0 = state.batch("0000").unwrap();
    let batch1 = state.batch("0001").unwrap();
    assert_eq!(batch0.cracked, 2);
    assert_eq!(batch1.cracked, 1);
    assert_eq!(batch0.status, BatchStatus::Completed);
    assert_eq!(batch1.status, BatchStatus::Completed);

    // Conservation across the whole run: every candidate hash is either
    // in the cracked log or in a remainder file, never both, never lost
    let records = CrackedLog::new(config.paths.cracked_log()).read_all().unwrap();
    let sand0 = hashline::read_hashlist(&config.paths.sand_dir().join("batch-0000.txt"))
        .unwrap()
        .hashes;
    let sand1 = hashline::read_hashlist(&config.paths.sand_dir().join("batch-0001.txt"))
        .unwrap()
        .hashes;
    assert_eq!(records.len(), 3);
    assert_eq!(sand0.len(), 0);
    assert_eq!(sand1.len(), 2);
    assert_eq!(records.len() + sand0.len() + sand1.len(), 5);

    let cracked_hashes: Vec<&str> = records.iter().map(|r| r.hash.as_str()).collect();
    for sand_hash in sand0.iter().chain(&sand1) {
        assert!(!cracked_hashes.contains(&sand_hash.as_str()));
    }

    // Feedback loop: minecraft made it into the accumulated roots and
    // the batch carries its feedback metrics
    let roots = std::fs::read_to_string(config.paths.accumulated_roots()).unwrap();
    assert!(roots.lines().any(|l| l == "minecraft"));
    let feedback = batch0.feedback.as_ref().unwrap();
    assert_eq!(feedback.new_roots_discovered, 1);
    assert!(batch1.feedback.is_none());

    // Every stored hash is lowercase 40-hex
    for hash in cracked_hashes.iter().map(|h| h.to_string()).chain(sand1) {
        assert!(hashline::is_valid_hash(&hash));
        assert_eq!(hash, hash.to_lowercase());
    }
}

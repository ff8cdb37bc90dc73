//! Disconnect-and-resume behavior: a run interrupted by transport loss
//! is picked up by the next orchestrator invocation through the
//! still-alive detached session, without double-counting.

use std::collections::BTreeMap;
use std::path::Path;

use sluice::config::{AttackPhase, AttackRecipe, AttacksConfig, ExecutorConfig, RemoteConfig};
use sluice::distribute::{CrackedLog, Distributor};
use sluice::hashline::sha1_hex;
use sluice::remote::mock::{MockTransport, WorkerTick};
use sluice::remote::RemoteExecutor;
use sluice::sequencer::{AttackDisposition, AttackRegistry, Sequencer};
use sluice::state::StateStore;
use tempfile::TempDir;

const DF_PLENTY: &str = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                         /dev/sda1 104857600 10485760 94371840 10% /srv\n";

fn single_attack_config() -> AttacksConfig {
    AttacksConfig {
        recipes: vec![AttackRecipe {
            name: "brute-3".to_string(),
            phase: AttackPhase::Brute,
            command_template: "hashcat -m 100 -a 3 -w 3 #HL# ?a?a?a".to_string(),
            assets: Vec::new(),
            max_parallelism: 1,
            priority: 3,
            expected_yield_rate: 0.0,
            description: String::new(),
        }],
        default_order: Vec::new(),
        asset_map: BTreeMap::new(),
    }
}

fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        poll_interval_secs: 1,
        max_wait_secs: 120,
        settle_secs: 1,
        reconnect_base_secs: 1,
        reconnect_cap_secs: 2,
        reconnect_ceiling_secs: 3,
        min_asset_bytes: 1,
        min_remote_disk_bytes: 1024,
    }
}

fn sequencer(transport: MockTransport, dir: &Path) -> Sequencer<MockTransport> {
    let executor = RemoteExecutor::new(transport, fast_executor_config())
        .with_sleeper(Box::new(|_| {}));
    let distributor = Distributor::new(
        CrackedLog::new(dir.join("cracked.jsonl")),
        dir.join("sand"),
        false,
    );
    Sequencer::new(
        AttackRegistry::from_config(&single_attack_config()),
        executor,
        distributor,
        RemoteConfig::default(),
        fast_executor_config(),
        BTreeMap::new(),
        dir.join("potfiles"),
    )
}

#[test]
fn test_disconnect_then_resume_records_attack_once() {
    let dir = TempDir::new().unwrap();

    let plains = ["abc", "uncracked-1", "uncracked-2"];
    let hashes: Vec<String> = plains.iter().map(|p| sha1_hex(p.as_bytes())).collect();
    let input = dir.path().join("batch-0008.txt");
    std::fs::write(&input, hashes.join("\n")).unwrap();

    let state_path = dir.path().join("state.json");
    let order = vec!["brute-3".to_string()];

    // --- Run 1: the transport dies mid-poll -------------------------
    //
    // Exec call budget before the injected disconnect:
    //   resume-exists(1), stat hashlist(2), pgrep(3), df(4)  [pre-flight]
    //   exists(5), launch(6), pgrep(7), exists(8), tail(9)   [startup]
    // The first poll after that hits the dead transport.
    {
        let transport = MockTransport::new(vec![
            WorkerTick::default(),
            WorkerTick::running("Progress.........: 10/100"),
        ]);
        transport.set_df_output(DF_PLENTY);
        transport.fail_after_execs(9);
        transport.fail_next_reconnects(100);

        let mut state = StateStore::open(&state_path).unwrap();
        state.init("0008", 3, &order);

        let mut sequencer = sequencer(transport.clone(), dir.path());
        let summary = sequencer.run_batch("0008", &input, &mut state, None).unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.rows.len(), 1);
        assert!(matches!(
            summary.rows[0].disposition,
            AttackDisposition::Aborted(_)
        ));
        assert_eq!(transport.launches(), 1);

        // The attack started but never completed
        let batch = state.batch("0008").unwrap();
        assert!(!state.is_attack_applied("0008", "brute-3"));
        assert_eq!(batch.current_ref.as_deref(), Some("sluice-0008-brute-3"));
        assert_eq!(batch.cracked, 0);
    }

    // --- Run 2: a fresh orchestrator finds the session still alive --
    //
    // The detached session kept cracking through the disconnect; by now
    // the worker has finished and left its potfile behind.
    {
        let transport = MockTransport::new(vec![
            WorkerTick::running("Progress.........: 90/100"),
            WorkerTick::finished("Status...........: Exhausted"),
        ]);
        transport.set_df_output(DF_PLENTY);
        transport.add_remote_file(
            "/srv/sluice/sluice-0008-brute-3.pot",
            format!("{}:abc\n", hashes[0]).as_bytes(),
        );

        let mut state = StateStore::open(&state_path).unwrap();
        let mut sequencer = sequencer(transport.clone(), dir.path());
        let summary = sequencer.run_batch("0008", &input, &mut state, None).unwrap();

        assert!(!summary.aborted);
        assert_eq!(summary.rows[0].disposition, AttackDisposition::Applied);
        assert_eq!(summary.rows[0].new_cracks, 1);
        // The existing session was adopted, never relaunched
        assert_eq!(transport.launches(), 0);

        let batch = state.batch("0008").unwrap();
        assert_eq!(
            batch
                .attacks_applied
                .iter()
                .filter(|a| a.as_str() == "brute-3")
                .count(),
            1
        );
        assert_eq!(batch.cracked, 1);
        assert_eq!(batch.attack_results.len(), 1);
        assert_eq!(batch.attack_results[0].new_cracks, 1);
    }

    // State survived both runs atomically; reload and re-check
    let reloaded = StateStore::open(&state_path).unwrap();
    assert!(reloaded.is_attack_applied("0008", "brute-3"));
    assert_eq!(reloaded.batch("0008").unwrap().cracked, 1);
}

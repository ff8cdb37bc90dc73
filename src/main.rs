/*!
 * Sluice - distributed password-recovery pipeline
 *
 * Command-line driver for the pipeline stages:
 * - partition: split a hash universe into batch files
 * - index: build the baseline digest index from a wordlist
 * - filter: remove baseline-cracked hashes from every batch
 * - chunk: run the first worker pass over concatenated batches
 * - attack: walk the attack schedule over batch remainders
 * - distribute: split an already-downloaded potfile over batches
 * - analyze: mine the cracked log and emit feedback artifacts
 * - reorder: re-sort remaining attacks by observed effectiveness
 * - status: show the batch ledger
 *
 * Exit codes: 0 when the requested work completed (zero cracks is
 * success), 1 on orchestrator error, 2 on pre-flight failure.
 */

use std::path::PathBuf;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};

use sluice::baseline;
use sluice::config::PipelineConfig;
use sluice::error::SluiceError;
use sluice::remote::SshTransport;
use sluice::state::StateStore;
use sluice::{logging, stats, Pipeline};

fn main() {
    let matches = cli().get_matches();

    if let Err(err) = run(&matches) {
        eprintln!("Error: {:#}", err);
        let code = match err.downcast_ref::<SluiceError>() {
            Some(e) => {
                if let Some(hint) = e.suggestion() {
                    eprintln!("Hint: {}", hint);
                }
                e.exit_code()
            }
            None => 1,
        };
        std::process::exit(code);
    }
}

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Path to the TOML configuration (default: ./sluice.toml)")
        .global(true);
    let verbose_arg = Arg::new("verbose")
        .short('v')
        .long("verbose")
        .help("Enable debug logging")
        .action(ArgAction::SetTrue)
        .global(true);

    Command::new("sluice")
        .version(sluice::VERSION)
        .about("Distributed password-recovery pipeline with resume and feedback mining")
        .arg(config_arg)
        .arg(verbose_arg)
        .subcommand_required(true)
        .subcommand(
            Command::new("partition")
                .about("Split a hash universe into fixed-size batch files")
                .arg(
                    Arg::new("source")
                        .short('s')
                        .long("source")
                        .value_name("FILE")
                        .help("Hash universe, one 40-hex SHA-1 per line")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("index")
                .about("Build the sorted baseline digest index from a plaintext wordlist")
                .arg(
                    Arg::new("wordlist")
                        .short('w')
                        .long("wordlist")
                        .value_name("FILE")
                        .help("Baseline wordlist, one plaintext per line")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("filter")
                .about("Remove baseline-cracked hashes from every batch (resumable)"),
        )
        .subcommand(
            Command::new("chunk")
                .about("Run the first worker pass over concatenated candidate batches"),
        )
        .subcommand(
            Command::new("attack")
                .about("Walk the attack schedule over batch remainders")
                .arg(
                    Arg::new("batch")
                        .short('b')
                        .long("batch")
                        .value_name("ID")
                        .help("Limit to specific batch ids (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("order")
                        .long("order")
                        .value_name("NAMES")
                        .help("Comma-separated attack order override for this run"),
                ),
        )
        .subcommand(
            Command::new("distribute")
                .about("Split an already-downloaded potfile over batch remainders")
                .arg(
                    Arg::new("potfile")
                        .short('p')
                        .long("potfile")
                        .value_name("FILE")
                        .help("Worker potfile, one <hash>:<plaintext> per line")
                        .required(true),
                )
                .arg(
                    Arg::new("batch")
                        .short('b')
                        .long("batch")
                        .value_name("ID")
                        .help("Limit to specific batch ids (repeatable)")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("analyze")
                .about("Analyze the full cracked log and emit feedback artifacts"),
        )
        .subcommand(
            Command::new("reorder")
                .about("Re-sort remaining attacks by observed cracks per second"),
        )
        .subcommand(Command::new("status").about("Show the batch ledger"))
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = PipelineConfig::load_with_fallback(config_path.as_deref())
        .context("loading configuration")?;
    if matches.get_flag("verbose") {
        config.verbose = true;
    }
    logging::init_logging(&config).context("initializing logging")?;

    match matches.subcommand() {
        Some(("partition", sub)) => {
            let source = PathBuf::from(
                sub.get_one::<String>("source")
                    .expect("source is a required argument"),
            );
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.partition_universe(&source)?;
            println!(
                "Partitioned {} hashes into {} batches ({} lines rejected)",
                report.total_hashes,
                report.batches.len(),
                report.rejected
            );
        }
        Some(("index", sub)) => {
            let wordlist = PathBuf::from(
                sub.get_one::<String>("wordlist")
                    .expect("wordlist is a required argument"),
            );
            let records = baseline::build_index(&wordlist, &config.baseline.index_path)?;
            println!(
                "Indexed {} unique baseline digests into {}",
                records,
                config.baseline.index_path.display()
            );
        }
        Some(("filter", _)) => {
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.filter_baseline()?;
            println!(
                "Filtered {} batches ({} already done): {} kept, {} removed",
                report.outcomes.len(),
                report.skipped,
                report.total_kept(),
                report.total_removed()
            );
        }
        Some(("chunk", _)) => {
            let transport = SshTransport::new(config.remote.clone());
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.run_chunk_pass(transport)?;
            println!(
                "Chunk pass: {} run, {} skipped; {} recovered, {} remaining, {} orphan potfile entries",
                report.chunks_run, report.chunks_skipped, report.pearls, report.sand, report.orphans
            );
        }
        Some(("attack", sub)) => {
            let only: Option<Vec<String>> = sub
                .get_many::<String>("batch")
                .map(|values| values.cloned().collect());
            let order: Option<Vec<String>> = sub.get_one::<String>("order").map(|s| {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            });

            let transport = SshTransport::new(config.remote.clone());
            let pipeline = Pipeline::new(config)?;
            let summaries =
                pipeline.run_attack_pass(transport, only.as_deref(), order.as_deref())?;

            let mut run_stats = stats::RunStats::default();
            for summary in &summaries {
                run_stats.absorb(summary);
            }
            stats::print_attack_table(&summaries);
            stats::print_run_stats(&run_stats);

            // Per-attack failures are recoverable and still exit 0;
            // an aborted batch is not
            if !run_stats.is_success() {
                anyhow::bail!(
                    "{} batch(es) aborted; re-run with the same arguments to resume",
                    run_stats.batches_aborted
                );
            }
        }
        Some(("distribute", sub)) => {
            let potfile = PathBuf::from(
                sub.get_one::<String>("potfile")
                    .expect("potfile is a required argument"),
            );
            let only: Option<Vec<String>> = sub
                .get_many::<String>("batch")
                .map(|values| values.cloned().collect());

            let pipeline = Pipeline::new(config)?;
            let report = pipeline.distribute_potfile(&potfile, only.as_deref())?;
            println!(
                "Distributed {} batches: {} recovered, {} remaining, {} orphan potfile entries",
                report.outcomes.len(),
                report.total_pearls(),
                report.total_sand(),
                report.orphans
            );
        }
        Some(("analyze", _)) => {
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.run_feedback_corpus()?;
            println!(
                "Feedback: {} new roots ({} total), composite wordlist {} entries, {} rules emitted",
                report.new_roots, report.total_roots, report.composite_size, report.rules_emitted
            );
            for (label, growth) in &report.cohort_growth {
                println!("  cohort {}: +{} roots ({} total)", label, growth.added, growth.total);
            }
        }
        Some(("reorder", _)) => {
            let pipeline = Pipeline::new(config)?;
            pipeline.reorder_attacks()?;
            println!("Remaining attacks re-ordered by observed cracks per second");
        }
        Some(("status", _)) => {
            let doc = StateStore::peek(&config.paths.state_file())?;
            stats::print_state_table(&doc);
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}

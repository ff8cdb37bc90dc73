/*!
 * Run summaries
 *
 * Aggregates pipeline results for the operator: per-attack yields and
 * durations (zero-crack rows included) and overall recovery figures,
 * rendered as tables on stdout.
 */

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use crate::sequencer::{AttackDisposition, BatchRunSummary};
use crate::state::StateDocument;

/// Aggregate view over one orchestrator run
#[derive(Debug, Default)]
pub struct RunStats {
    pub batches_processed: usize,
    pub batches_aborted: usize,
    pub attacks_applied: usize,
    pub attacks_skipped: usize,
    pub attacks_failed: usize,
    pub new_cracks: u64,
    pub total_duration_seconds: u64,
}

impl RunStats {
    /// Fold one batch summary into the totals
    pub fn absorb(&mut self, summary: &BatchRunSummary) {
        self.batches_processed += 1;
        if summary.aborted {
            self.batches_aborted += 1;
        }
        for row in &summary.rows {
            match row.disposition {
                AttackDisposition::Applied => self.attacks_applied += 1,
                AttackDisposition::Skipped => self.attacks_skipped += 1,
                AttackDisposition::Failed(_) | AttackDisposition::Aborted(_) => {
                    self.attacks_failed += 1
                }
            }
            self.new_cracks += row.new_cracks;
            self.total_duration_seconds += row.duration_seconds;
        }
    }

    /// Whether the run completed its requested work (recoverable
    /// per-attack failures still count as success)
    pub fn is_success(&self) -> bool {
        self.batches_aborted == 0
    }
}

/// Render per-attack rows for a set of batch summaries
pub fn print_attack_table(summaries: &[BatchRunSummary]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Batch", "Attack", "Outcome", "New cracks", "Duration (s)"]);

    for summary in summaries {
        for row in &summary.rows {
            let outcome = match &row.disposition {
                AttackDisposition::Applied => "applied".to_string(),
                AttackDisposition::Skipped => "skipped (already applied)".to_string(),
                AttackDisposition::Failed(reason) => format!("failed: {}", truncate(reason, 48)),
                AttackDisposition::Aborted(reason) => {
                    format!("aborted batch: {}", truncate(reason, 48))
                }
            };
            table.add_row(vec![
                Cell::new(&summary.batch_id),
                Cell::new(&row.attack),
                Cell::new(outcome),
                Cell::new(row.new_cracks),
                Cell::new(row.duration_seconds),
            ]);
        }
    }

    println!("{table}");
}

/// Render the overall batch ledger from a persisted state document
pub fn print_state_table(doc: &StateDocument) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Batch",
            "Hashes",
            "Cracked",
            "Recovery",
            "Status",
            "Applied",
            "Remaining",
        ]);

    for (id, batch) in &doc.batches {
        let recovery = if batch.hash_count > 0 {
            format!(
                "{:.1}%",
                batch.cracked as f64 / batch.hash_count as f64 * 100.0
            )
        } else {
            "-".to_string()
        };
        table.add_row(vec![
            Cell::new(id),
            Cell::new(batch.hash_count),
            Cell::new(batch.cracked),
            Cell::new(recovery),
            Cell::new(format!("{:?}", batch.status).to_lowercase()),
            Cell::new(batch.attacks_applied.len()),
            Cell::new(batch.attacks_remaining.len()),
        ]);
    }

    println!("{table}");
    let cracked: u64 = doc.batches.values().map(|b| b.cracked).sum();
    let hashes: u64 = doc.batches.values().map(|b| b.hash_count).sum();
    println!("Total: {} / {} hashes recovered", cracked, hashes);
}

/// Print the closing run summary
pub fn print_run_stats(stats: &RunStats) {
    println!("\nRun summary");
    println!("===========");
    println!("Batches processed: {}", stats.batches_processed);
    if stats.batches_aborted > 0 {
        println!("Batches aborted:   {}", stats.batches_aborted);
    }
    println!(
        "Attacks: {} applied, {} skipped, {} failed",
        stats.attacks_applied, stats.attacks_skipped, stats.attacks_failed
    );
    println!("New cracks: {}", stats.new_cracks);
    println!("GPU time: {} s", stats.total_duration_seconds);
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::AttackRow;

    fn summary(aborted: bool) -> BatchRunSummary {
        BatchRunSummary {
            batch_id: "0001".to_string(),
            rows: vec![
                AttackRow {
                    attack: "feedback-roots".to_string(),
                    disposition: AttackDisposition::Applied,
                    new_cracks: 42,
                    duration_seconds: 120,
                },
                AttackRow {
                    attack: "brute-1".to_string(),
                    disposition: AttackDisposition::Applied,
                    new_cracks: 0,
                    duration_seconds: 30,
                },
                AttackRow {
                    attack: "brute-2".to_string(),
                    disposition: AttackDisposition::Skipped,
                    new_cracks: 0,
                    duration_seconds: 0,
                },
            ],
            pearls: Vec::new(),
            aborted,
        }
    }

    #[test]
    fn test_absorb_counts_zero_crack_rows() {
        let mut stats = RunStats::default();
        stats.absorb(&summary(false));

        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.attacks_applied, 2);
        assert_eq!(stats.attacks_skipped, 1);
        assert_eq!(stats.new_cracks, 42);
        assert_eq!(stats.total_duration_seconds, 150);
        assert!(stats.is_success());
    }

    #[test]
    fn test_aborted_batch_fails_run() {
        let mut stats = RunStats::default();
        stats.absorb(&summary(true));
        assert!(!stats.is_success());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789...");
    }
}

/*!
 * Attack sequencer
 *
 * Owns the registry of attack recipes and drives them, one at a time,
 * against a chosen batch: translate the recipe template into a worker
 * command, pre-flight the worker, hand the command to the remote
 * executor, then reconcile the resulting potfile into new cracks before
 * the next attack starts. Completed attacks are consulted in batch
 * state, so re-running a batch skips work that already finished.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::{AttackRecipe, AttacksConfig, ExecutorConfig, RemoteConfig};
use crate::distribute::{Distributor, PotfileMap};
use crate::error::{Result, SluiceError};
use crate::remote::{preflight, RemoteExecutor, RunSpec, Transport};
use crate::state::StateStore;

/// Named registry of attack recipes with a computed default order
#[derive(Debug, Clone)]
pub struct AttackRegistry {
    recipes: BTreeMap<String, AttackRecipe>,
    default_order: Vec<String>,
}

impl AttackRegistry {
    /// Build the registry from configuration. Names listed in
    /// `default_order` come first; every remaining recipe follows in
    /// (phase, priority, name) order.
    pub fn from_config(config: &AttacksConfig) -> Self {
        let recipes: BTreeMap<String, AttackRecipe> = config
            .recipes
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();

        let mut order: Vec<String> = config
            .default_order
            .iter()
            .filter(|name| recipes.contains_key(*name))
            .cloned()
            .collect();
        let mut rest: Vec<&AttackRecipe> = recipes
            .values()
            .filter(|r| !order.contains(&r.name))
            .collect();
        rest.sort_by(|a, b| {
            (a.phase, a.priority, &a.name).cmp(&(b.phase, b.priority, &b.name))
        });
        order.extend(rest.into_iter().map(|r| r.name.clone()));

        Self {
            recipes,
            default_order: order,
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttackRecipe> {
        self.recipes.get(name)
    }

    /// The computed default attack order
    pub fn default_order(&self) -> &[String] {
        &self.default_order
    }

    /// Rewrite a recipe template into a runnable worker command.
    ///
    /// `#HL#` becomes the remote hashlist path; each asset filename
    /// literal becomes its absolute remote path from the asset map
    /// (falling back to the configured asset directory). Returns the
    /// command and the resolved asset paths for pre-flight.
    pub fn translate(
        &self,
        recipe: &AttackRecipe,
        remote_hashlist: &str,
        remote: &RemoteConfig,
        asset_map: &BTreeMap<String, String>,
    ) -> (String, Vec<String>) {
        let mut command = recipe.command_template.replace("#HL#", remote_hashlist);
        let mut asset_paths = Vec::with_capacity(recipe.assets.len());
        for asset in &recipe.assets {
            let remote_path = asset_map
                .get(asset)
                .cloned()
                .unwrap_or_else(|| format!("{}/{}", remote.asset_dir.trim_end_matches('/'), asset));
            command = command.replace(asset.as_str(), &remote_path);
            asset_paths.push(remote_path);
        }
        (command, asset_paths)
    }
}

/// How one attack in the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackDisposition {
    /// Completed (possibly with zero new cracks)
    Applied,
    /// Already applied in a previous run
    Skipped,
    /// Failed; the loop moved on
    Failed(String),
    /// Failed in a way that aborted the whole batch
    Aborted(String),
}

/// One row of the batch run summary
#[derive(Debug, Clone)]
pub struct AttackRow {
    pub attack: String,
    pub disposition: AttackDisposition,
    pub new_cracks: u64,
    pub duration_seconds: u64,
}

/// Outcome of running the schedule against one batch
#[derive(Debug, Default)]
pub struct BatchRunSummary {
    pub batch_id: String,
    pub rows: Vec<AttackRow>,
    /// Pairs recovered across all attacks of this run
    pub pearls: Vec<crate::hashline::PotfileEntry>,
    /// True when the loop stopped before exhausting the schedule
    pub aborted: bool,
}

impl BatchRunSummary {
    pub fn total_new_cracks(&self) -> u64 {
        self.rows.iter().map(|r| r.new_cracks).sum()
    }
}

/// Drives the attack schedule for batches
pub struct Sequencer<T: Transport> {
    registry: AttackRegistry,
    executor: RemoteExecutor<T>,
    distributor: Distributor,
    remote: RemoteConfig,
    executor_config: ExecutorConfig,
    asset_map: BTreeMap<String, String>,
    /// Local scratch directory for downloaded potfiles
    potfile_dir: PathBuf,
}

impl<T: Transport> Sequencer<T> {
    pub fn new(
        registry: AttackRegistry,
        executor: RemoteExecutor<T>,
        distributor: Distributor,
        remote: RemoteConfig,
        executor_config: ExecutorConfig,
        asset_map: BTreeMap<String, String>,
        potfile_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            executor,
            distributor,
            remote,
            executor_config,
            asset_map,
            potfile_dir: potfile_dir.into(),
        }
    }

    pub fn registry(&self) -> &AttackRegistry {
        &self.registry
    }

    fn remote_hashlist_path(&self, batch_id: &str) -> String {
        format!(
            "{}/batch-{}.txt",
            self.remote.work_dir.trim_end_matches('/'),
            batch_id
        )
    }

    fn session_name(batch_id: &str, attack: &str) -> String {
        format!("sluice-{}-{}", batch_id, attack)
    }

    /// Run every remaining attack against one batch.
    ///
    /// `input_path` is the batch's current uncracked hashlist (the
    /// candidate batch on the first pass, its remainder afterwards).
    /// An explicit `order` overrides the batch's remaining-attack list
    /// for this call only.
    pub fn run_batch(
        &mut self,
        batch_id: &str,
        input_path: &Path,
        state: &mut StateStore,
        order: Option<&[String]>,
    ) -> Result<BatchRunSummary> {
        let mut summary = BatchRunSummary {
            batch_id: batch_id.to_string(),
            ..Default::default()
        };

        let schedule: Vec<String> = match order {
            Some(explicit) => explicit.to_vec(),
            None => state
                .batch(batch_id)
                .map(|b| b.attacks_remaining.clone())
                .unwrap_or_default(),
        };
        if schedule.is_empty() {
            info!(batch = batch_id, "no attacks remaining; nothing to do");
            return Ok(summary);
        }

        // The worker always operates on the batch's current remainder
        let remote_hashlist = self.remote_hashlist_path(batch_id);
        self.executor
            .transport_mut()
            .upload(input_path, &remote_hashlist)
            .map_err(SluiceError::Transport)?;

        let mut current_input = input_path.to_path_buf();

        for attack in &schedule {
            if state.is_attack_applied(batch_id, attack) {
                summary.rows.push(AttackRow {
                    attack: attack.clone(),
                    disposition: AttackDisposition::Skipped,
                    new_cracks: 0,
                    duration_seconds: 0,
                });
                continue;
            }

            let recipe = self.registry.get(attack).ok_or_else(|| {
                SluiceError::Config(format!(
                    "batch {} schedules unknown attack '{}'",
                    batch_id, attack
                ))
            })?;
            let recipe = recipe.clone();

            let (row, pearls, abort) =
                self.run_attack(batch_id, &recipe, &remote_hashlist, &mut current_input, state)?;
            summary.rows.push(row);
            summary.pearls.extend(pearls);
            if abort {
                summary.aborted = true;
                break;
            }
        }

        Ok(summary)
    }

    /// Run one attack; returns its summary row, the pairs it
    /// recovered, and whether the batch loop must stop.
    fn run_attack(
        &mut self,
        batch_id: &str,
        recipe: &AttackRecipe,
        remote_hashlist: &str,
        current_input: &mut PathBuf,
        state: &mut StateStore,
    ) -> Result<(AttackRow, Vec<crate::hashline::PotfileEntry>, bool)> {
        let session = Self::session_name(batch_id, &recipe.name);
        let work_dir = self.remote.work_dir.trim_end_matches('/').to_string();
        let log_path = format!("{}/{}.log", work_dir, session);
        let artifact_path = format!("{}/{}.pot", work_dir, session);

        let (base_command, asset_paths) =
            self.registry
                .translate(recipe, remote_hashlist, &self.remote, &self.asset_map);
        // Status lines feed the log-terminality signal; the per-session
        // potfile is the artifact the distributor reconciles
        let command = format!(
            "{} --status --status-timer={} --potfile-path={}",
            base_command, self.executor_config.poll_interval_secs, artifact_path
        );

        // An existing detached session means this attack is being
        // resumed; pre-flight would reject our own worker process
        let resuming = crate::remote::DetachedSession::new(session.as_str(), log_path.as_str())
            .exists(self.executor.transport_mut())
            .unwrap_or(false);
        if !resuming {
            if let Err(e) = preflight(
                self.executor.transport_mut(),
                &self.remote,
                &self.executor_config,
                remote_hashlist,
                &asset_paths,
            ) {
                error!(batch = batch_id, attack = %recipe.name, error = %e, "pre-flight failed; aborting batch");
                return Ok((
                    AttackRow {
                        attack: recipe.name.clone(),
                        disposition: AttackDisposition::Aborted(e.to_string()),
                        new_cracks: 0,
                        duration_seconds: 0,
                    },
                    Vec::new(),
                    true,
                ));
            }
        }

        state.start_attack(batch_id, &recipe.name, &session)?;

        let spec = RunSpec {
            session_name: session.clone(),
            command,
            log_path,
            artifact_path: artifact_path.clone(),
            process_pattern: self.remote.worker_process.clone(),
        };

        match self.executor.run(&spec) {
            Ok(outcome) => {
                let (new_cracks, pearls) =
                    self.reconcile_increment(batch_id, &artifact_path, current_input)?;
                state.complete_attack(
                    batch_id,
                    &recipe.name,
                    new_cracks,
                    outcome.duration_seconds,
                )?;
                Ok((
                    AttackRow {
                        attack: recipe.name.clone(),
                        disposition: AttackDisposition::Applied,
                        new_cracks,
                        duration_seconds: outcome.duration_seconds,
                    },
                    pearls,
                    false,
                ))
            }
            Err(e @ SluiceError::LaunchFailed { .. }) => {
                // A launch failure usually means the environment is broken
                // for every remaining attack too
                error!(batch = batch_id, attack = %recipe.name, error = %e, "launch failed; aborting batch");
                state.mark_failed(batch_id)?;
                Ok((
                    AttackRow {
                        attack: recipe.name.clone(),
                        disposition: AttackDisposition::Aborted(e.to_string()),
                        new_cracks: 0,
                        duration_seconds: 0,
                    },
                    Vec::new(),
                    true,
                ))
            }
            Err(e @ SluiceError::ConnectionLost { .. }) => {
                // The executor already exhausted its reconnect budget;
                // the session stays alive on the worker for resume
                error!(batch = batch_id, attack = %recipe.name, error = %e, "transport lost; stopping batch");
                Ok((
                    AttackRow {
                        attack: recipe.name.clone(),
                        disposition: AttackDisposition::Aborted(e.to_string()),
                        new_cracks: 0,
                        duration_seconds: 0,
                    },
                    Vec::new(),
                    true,
                ))
            }
            Err(e) => {
                warn!(batch = batch_id, attack = %recipe.name, error = %e, "attack failed; continuing with next");
                Ok((
                    AttackRow {
                        attack: recipe.name.clone(),
                        disposition: AttackDisposition::Failed(e.to_string()),
                        new_cracks: 0,
                        duration_seconds: 0,
                    },
                    Vec::new(),
                    false,
                ))
            }
        }
    }

    /// Download the attack's potfile, split the batch's current
    /// remainder against it, and roll the remainder forward. Returns
    /// the number of newly recovered hashes and the pairs themselves.
    fn reconcile_increment(
        &mut self,
        batch_id: &str,
        artifact_path: &str,
        current_input: &mut PathBuf,
    ) -> Result<(u64, Vec<crate::hashline::PotfileEntry>)> {
        let local_pot = self.potfile_dir.join(format!("{}.pot", batch_id));
        let downloaded = match self
            .executor
            .transport_mut()
            .download(artifact_path, &local_pot)
        {
            Ok(bytes) => bytes > 0,
            // A zero-yield attack may produce no potfile at all
            Err(crate::remote::TransportError::Transfer { .. }) => false,
            Err(e) => return Err(SluiceError::Transport(e)),
        };
        if !downloaded {
            return Ok((0, Vec::new()));
        }

        let mut pot = PotfileMap::load(&local_pot)?;
        if pot.is_empty() {
            return Ok((0, Vec::new()));
        }

        let outcome = self
            .distributor
            .distribute_batch(batch_id, current_input, &mut pot)?;
        *current_input = outcome.sand_path.clone();

        // The shrunken remainder becomes the hashlist for the next attack
        let remote_hashlist = self.remote_hashlist_path(batch_id);
        self.executor
            .transport_mut()
            .upload(&outcome.sand_path, &remote_hashlist)
            .map_err(SluiceError::Transport)?;

        Ok((outcome.pearls as u64, outcome.pearl_entries))
    }
}

//! The backend pledge service (spec §4.6): the single-threaded coordinator
//! owning every project's open/claimed pledge sets and lifecycle state, all
//! operations scheduled on one affinity executor.

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{OutPoint, Transaction};
use tracing::{info, warn};

use crate::backend::db::Db;
use crate::backend::project_state::{Lifecycle, ProjectState};
use crate::envelope::pledge::Pledge;
use crate::envelope::project::Project;
use crate::error::CrowdfundError;
use crate::executor::AffinityExecutor;
use crate::http::status::ProjectStatus;
use crate::observable::{Mirror, ObservableMap};
use crate::utxo::batcher::BatchingUtxoSource;
use crate::validation::validate_pledge;

/// Per-project mutable state the coordinator owns outright — never shared
/// without going through `executor`, so no lock is needed here (spec §5).
struct ProjectEntry {
    project: Project,
    state: ProjectState,
    open: ObservableMap<String, Pledge>,
    claimed: ObservableMap<String, Pledge>,
}

pub struct Coordinator {
    executor: AffinityExecutor,
    utxo_source: BatchingUtxoSource,
    secp: Secp256k1<VerifyOnly>,
    server_mode: bool,
    db: Option<Db>,
    // Protected separately from the per-project entries because project
    // lifecycle is mirrored as one flat collection (`mirrorProjectStates`)
    // independent of any single project's pledge sets.
    projects: Mutex<HashMap<String, ProjectEntry>>,
    project_states: Mutex<ObservableMap<String, ProjectState>>,
}

impl Coordinator {
    pub fn new(executor: AffinityExecutor, utxo_source: BatchingUtxoSource, server_mode: bool, db: Option<Db>) -> Self {
        Coordinator {
            executor,
            utxo_source,
            secp: Secp256k1::verification_only(),
            server_mode,
            db,
            projects: Mutex::new(HashMap::new()),
            project_states: Mutex::new(ObservableMap::new()),
        }
    }

    pub fn executor(&self) -> &AffinityExecutor {
        &self.executor
    }

    /// Flush the persistence store, if running in server mode.
    pub fn close(&self) -> Result<(), CrowdfundError> {
        if let Some(db) = &self.db {
            db.close()?;
        }
        Ok(())
    }

    pub fn register_project(&self, project: Project) {
        let id = project.id_hex();
        if self.server_mode {
            if let Some(db) = &self.db {
                if let Err(e) = db.store_project_bytes(&id, project.raw_bytes()) {
                    tracing::error!(project = %id, error = %e, "failed to persist project bytes");
                }
            }
        }
        let mut projects = self.projects.lock().unwrap();
        projects.entry(id.clone()).or_insert_with(|| ProjectEntry {
            project,
            state: ProjectState::new(),
            open: ObservableMap::new(),
            claimed: ObservableMap::new(),
        });
        self.project_states.lock().unwrap().insert(id, ProjectState::new());
    }

    /// Reload every project and its open/claimed pledges from the
    /// persistence store, reconstructing lifecycle state, so a server
    /// restart doesn't lose claimed/revoked transitions that only ever
    /// lived in the database (spec §7/§9 "persistent local state survives
    /// crashes"). Called once at startup, before any file-based project
    /// registration, so restored entries take precedence.
    pub fn restore_from_db(&self) -> Result<(), CrowdfundError> {
        let Some(db) = &self.db else {
            return Ok(());
        };

        for raw_bytes in db.all_project_bytes()? {
            let project = Project::parse(&raw_bytes)?;
            let id = project.id_hex();

            let open_pledges = db.load_pledges(&id, false)?;
            let claimed_pledges = db.load_pledges(&id, true)?;
            let claim_txid = db.load_claim_txid(&id)?;

            let mut state = ProjectState::new();
            if !open_pledges.is_empty() || !claimed_pledges.is_empty() {
                state.on_first_pledge();
            }
            if let Some(txid) = claim_txid {
                state.on_claimed(txid);
            }

            let mut open = ObservableMap::new();
            for pledge in open_pledges {
                open.insert(pledge.id_hex(), pledge);
            }
            let mut claimed = ObservableMap::new();
            for pledge in claimed_pledges {
                claimed.insert(pledge.id_hex(), pledge);
            }

            self.project_states.lock().unwrap().insert(id.clone(), state.clone());
            self.projects
                .lock()
                .unwrap()
                .entry(id)
                .or_insert_with(|| ProjectEntry { project, state, open, claimed });
        }
        Ok(())
    }

    /// Merge a remote server's status view into this project's local
    /// open/claimed observables (client mode only, spec §4.6 "Remote status
    /// fetch"). Pledges the remote server already knows about but we don't
    /// are added as scrubbed stubs; a `claimedBy` txid closes the project.
    pub fn reconcile_remote_status(&self, project_id_hex: &str, remote: &crate::http::client::RemoteProjectStatus) {
        let mut projects = self.projects.lock().unwrap();
        let Some(entry) = projects.get_mut(project_id_hex) else {
            return;
        };

        for view in &remote.pledges {
            if entry.open.get(&view.id).is_some() || entry.claimed.get(&view.id).is_some() {
                continue;
            }
            match Pledge::from_remote_stub(&view.id, view.total_input_value, project_id_hex.to_string()) {
                Ok(pledge) => {
                    entry.state.on_first_pledge();
                    entry.open.insert(view.id.clone(), pledge);
                }
                Err(e) => tracing::warn!(project = project_id_hex, pledge = %view.id, error = %e, "discarding unparseable remote pledge"),
            }
        }

        if let Some(claimed_by) = &remote.claimed_by {
            if let Ok(txid) = claimed_by.parse() {
                let all_ids: Vec<String> = entry.open.values().map(|p| p.id_hex()).collect();
                for id in all_ids {
                    if let Some(pledge) = entry.open.remove(&id) {
                        entry.claimed.insert(id, pledge);
                    }
                }
                entry.state.on_claimed(txid);
            }
        }
        self.project_states.lock().unwrap().insert(project_id_hex.to_string(), entry.state.clone());
    }

    /// Normalize (re-hash if scrubbed is already handled by `Pledge::id`),
    /// reject duplicates and closed projects, validate against the peer
    /// set, then add to `open` and persist if in server mode (spec §4.6).
    pub async fn submit_pledge(&self, project_id_hex: &str, pledge: Pledge) -> Result<(), CrowdfundError> {
        let project = {
            let projects = self.projects.lock().unwrap();
            let entry = projects
                .get(project_id_hex)
                .ok_or_else(|| CrowdfundError::Inconsistent(format!("unknown project {project_id_hex}")))?;
            if entry.state.is_closed() {
                return Err(CrowdfundError::ProjectClosed(project_id_hex.to_string()));
            }
            // A re-upload of the un-scrubbed form of a pledge the server
            // already holds scrubbed is a merge, not a duplicate: the
            // incoming full transaction data replaces the stored stub under
            // the same `origHash` identity. Anything else matching an
            // existing id is a real duplicate.
            if let Some(existing) = entry.open.get(&pledge.id_hex()) {
                let is_merge = existing.is_scrubbed() && !pledge.is_scrubbed();
                if !is_merge {
                    return Err(CrowdfundError::DuplicatePledge(pledge.id_hex()));
                }
            }
            entry.project.clone()
        };

        validate_pledge(&self.secp, &project, &pledge, &self.utxo_source).await?;

        let new_state = {
            let mut projects = self.projects.lock().unwrap();
            let entry = projects.get_mut(project_id_hex).expect("checked above");
            let was_new = entry.state.lifecycle == Lifecycle::New;
            entry.state.on_first_pledge();
            entry.open.insert(pledge.id_hex(), pledge.clone());
            was_new.then(|| entry.state.clone())
        };
        if let Some(state) = new_state {
            self.project_states.lock().unwrap().insert(project_id_hex.to_string(), state);
        }

        if self.server_mode {
            if let Some(db) = &self.db {
                db.store_pledge(project_id_hex, false, &pledge)?;
            }
        }

        info!(project = project_id_hex, pledge = %pledge.id_hex(), "pledge accepted");
        Ok(())
    }

    /// A thread-confined observable view of a project's open pledges. The
    /// returned `Mirror` must only ever be touched from `target`'s thread —
    /// never the backend's own executor — typically by driving
    /// `Mirror::apply_next` in a loop submitted via
    /// `target.spawn_detached(..)` (spec §4.6/§5).
    pub fn mirror_open_pledges(&self, project_id_hex: &str, target: &AffinityExecutor) -> Option<Mirror<String, Pledge>> {
        debug_assert!(!target.is_on_thread() || target.name() != self.executor.name());
        let mut projects = self.projects.lock().unwrap();
        let entry = projects.get_mut(project_id_hex)?;
        let (snapshot, rx) = entry.open.mirror();
        Some(Mirror::from_snapshot(snapshot, rx))
    }

    pub fn mirror_claimed_pledges(&self, project_id_hex: &str, target: &AffinityExecutor) -> Option<Mirror<String, Pledge>> {
        debug_assert!(!target.is_on_thread() || target.name() != self.executor.name());
        let mut projects = self.projects.lock().unwrap();
        let entry = projects.get_mut(project_id_hex)?;
        let (snapshot, rx) = entry.claimed.mirror();
        Some(Mirror::from_snapshot(snapshot, rx))
    }

    pub fn mirror_project_states(&self, target: &AffinityExecutor) -> Mirror<String, ProjectState> {
        debug_assert!(!target.is_on_thread() || target.name() != self.executor.name());
        let (snapshot, rx) = self.project_states.lock().unwrap().mirror();
        Mirror::from_snapshot(snapshot, rx)
    }

    /// Chain watcher (spec §4.6): for every open pledge whose stub outpoint
    /// is spent by `tx`, either move the whole project to `CLAIMED` (if
    /// `tx`'s outputs structurally match the project's) or revoke just that
    /// pledge.
    pub fn observe_chain_tx(&self, tx: &Transaction) {
        let spent: Vec<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        let mut projects = self.projects.lock().unwrap();
        for (project_id, entry) in projects.iter_mut() {
            let matching_pledge_ids: Vec<String> = entry
                .open
                .values()
                .filter(|p| {
                    p.pledge_tx()
                        .ok()
                        .map(|ptx| ptx.input.iter().any(|i| spent.contains(&i.previous_output)))
                        .unwrap_or(false)
                })
                .map(|p| p.id_hex())
                .collect();
            if matching_pledge_ids.is_empty() {
                continue;
            }

            let outputs = entry.project.outputs();
            let is_claim = tx.output.len() == outputs.len()
                && tx.output.iter().zip(outputs.iter()).all(|(a, e)| a.value.to_sat() == e.value && a.script_pubkey == e.script);

            if is_claim {
                let txid = tx.compute_txid();
                let all_ids: Vec<String> = entry.open.values().map(|p| p.id_hex()).collect();
                for id in all_ids {
                    if let Some(pledge) = entry.open.remove(&id) {
                        if self.server_mode {
                            if let Some(db) = &self.db {
                                if let Err(e) = db.remove_pledge(project_id, false, &id) {
                                    tracing::error!(project = project_id, pledge = %id, error = %e, "failed to remove claimed pledge from open tree");
                                }
                                if let Err(e) = db.store_pledge(project_id, true, &pledge) {
                                    tracing::error!(project = project_id, pledge = %id, error = %e, "failed to persist claimed pledge");
                                }
                            }
                        }
                        entry.claimed.insert(id, pledge);
                    }
                }
                entry.state.on_claimed(txid);
                if self.server_mode {
                    if let Some(db) = &self.db {
                        if let Err(e) = db.store_claim_txid(project_id, &txid) {
                            tracing::error!(project = project_id, error = %e, "failed to persist claim txid");
                        }
                    }
                }
                self.project_states.lock().unwrap().insert(project_id.clone(), entry.state.clone());
            } else {
                for id in matching_pledge_ids {
                    warn!(project = project_id, pledge = id, "pledge revoked by conflicting on-chain spend");
                    entry.open.remove(&id);
                    if self.server_mode {
                        if let Some(db) = &self.db {
                            if let Err(e) = db.remove_pledge(project_id, false, &id) {
                                tracing::error!(project = project_id, pledge = %id, error = %e, "failed to remove revoked pledge");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Every currently-registered project id, for callers (e.g. the client
    /// mode remote-status-fetch loop) that need to iterate all projects.
    pub fn project_ids(&self) -> Vec<String> {
        self.projects.lock().unwrap().keys().cloned().collect()
    }

    /// Look up a registered project by id, for handlers that need the
    /// envelope bytes directly (e.g. the raw `.lighthouse-project` format).
    pub fn project(&self, project_id_hex: &str) -> Option<Project> {
        self.projects.lock().unwrap().get(project_id_hex).map(|e| e.project.clone())
    }

    /// Assemble a `ProjectStatus` for the HTTP surface (spec §6). Unless
    /// `authenticated` (a valid owner `sig`/`msg` was presented) every
    /// pledge is scrubbed, except once the project is claimed — full
    /// pledges are always returned for a claimed project.
    pub fn project_status(&self, project_id_hex: &str, authenticated: bool, now_unix_secs: u64) -> Option<ProjectStatus> {
        let projects = self.projects.lock().unwrap();
        let entry = projects.get(project_id_hex)?;

        let claimed_by = match &entry.state.lifecycle {
            Lifecycle::Claimed { claim_txid } => Some(claim_txid.to_string()),
            _ => None,
        };
        let is_claimed = claimed_by.is_some();

        let source = if is_claimed { entry.claimed.values() } else { entry.open.values() };
        let pledges: Vec<Pledge> = source.map(|p| if authenticated || is_claimed { p.clone() } else { p.scrub() }).collect();

        Some(ProjectStatus::build(&entry.project, pledges, claimed_by, now_unix_secs))
    }
}

//! Backend binary: parses CLI configuration, stands up the peer-set UTXO
//! oracle, the pledge coordinator, and the HTTP surface, then serves until
//! shutdown.

use std::sync::Arc;

use clap::Parser;

use assurance_contracts::backend::coordinator::Coordinator;
use assurance_contracts::backend::db::Db;
use assurance_contracts::backend::project_index::ProjectIndex;
use assurance_contracts::config::Args;
use assurance_contracts::error::CrowdfundError;
use assurance_contracts::executor::AffinityExecutor;
use assurance_contracts::http::server;
use assurance_contracts::utxo::batcher::BatchingUtxoSource;
use assurance_contracts::utxo::oracle::{PeerSetUtxoOracle, UtxoPeer};
use assurance_contracts::utxo::rpc_peer::RpcUtxoPeer;

#[tokio::main]
async fn main() -> Result<(), CrowdfundError> {
    assurance_contracts::logging::init();
    let args = Args::parse();

    if args.peers.len() < args.min_peers_for_utxo_query {
        return Err(CrowdfundError::Inconsistent(format!(
            "configured {} peer(s), but minPeersForUTXOQuery is {}",
            args.peers.len(),
            args.min_peers_for_utxo_query
        )));
    }

    std::fs::create_dir_all(&args.data_dir)?;
    let projects_dir = args.data_dir.join("projects");
    std::fs::create_dir_all(&projects_dir)?;

    let mut peers: Vec<Arc<dyn UtxoPeer>> = Vec::with_capacity(args.peers.len());
    for endpoint in &args.peers {
        peers.push(Arc::new(RpcUtxoPeer::connect(endpoint).await?));
    }
    let oracle = PeerSetUtxoOracle::new(peers);
    let utxo_source = BatchingUtxoSource::new(oracle);

    let db = if args.server_mode { Some(Db::open(&args.data_dir)?) } else { None };

    let executor = AffinityExecutor::spawn("backend")?;
    let coordinator = Arc::new(Coordinator::new(executor, utxo_source, args.server_mode, db));

    // Restore persisted state before file-based registration, so a restart
    // doesn't lose claimed/revoked pledge state the DB already has.
    coordinator.restore_from_db()?;

    let mut project_index = ProjectIndex::new(projects_dir);
    project_index.rescan().await?;
    for project in project_index.iter() {
        coordinator.register_project(project.clone());
    }
    tracing::info!(count = project_index.len(), "projects indexed");

    if !args.server_mode {
        tokio::spawn(remote_status_poll_loop(coordinator.clone()));
    }

    let router = server::router(coordinator.clone());
    let listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    tracing::info!(addr = %args.http_addr, server_mode = args.server_mode, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.close()?;
    Ok(())
}

/// Client mode only (spec §4.6 "Remote status fetch"): for every project
/// with a payment URL, periodically fetch its authoritative status from
/// that URL and reconcile it into the local open/claimed observables.
async fn remote_status_poll_loop(coordinator: Arc<Coordinator>) {
    const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
    loop {
        for id in coordinator.project_ids() {
            let Some(project) = coordinator.project(&id) else { continue };
            let Some(payment_url) = project.payment_url() else { continue };
            match assurance_contracts::http::client::fetch_project_status(&payment_url, None).await {
                Ok(status) => coordinator.reconcile_remote_status(&id, &status),
                Err(e) => tracing::warn!(project = %id, error = %e, "remote status fetch failed"),
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

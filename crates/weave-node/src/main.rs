//! weave-node — the Weave full-node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Apply genesis if the DB is fresh
//!   3. Start the P2P network (libp2p GossipSub + Kademlia + request/response)
//!   4. Start the JSON-RPC 2.0 server
//!   5. Run the main loop: validate inbound joints (C5) → save (C7) →
//!      stabilize (C6) → compose due AA triggers (C9) → broadcast

mod stabilize;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use libp2p::PeerId;
use tracing::{info, warn};

use weave_aa::Composer;
use weave_core::constants::{RESPONSE_TIMEOUT_SECS, STALLED_TIMEOUT_SECS, WITNESS_COUNT};
use weave_core::unit::Unit;
use weave_crypto::KeyPair;
use weave_dag::UnitSource;
use weave_genesis::{apply_genesis, GenesisParams};
use weave_mainchain::MainChainEngine;
use weave_mutex::ResourceGovernor;
use weave_p2p::{
    prepare_catchup_chain, prepare_witness_proof, GossipMessage, Inbound, Outbound, P2pConfig,
    P2pNetwork, PendingRequestTable, Register, UnhandledJoints, WireRequest, WireResponse,
};
use weave_rpc::{RpcServer, RpcServerState};
use weave_state::{Cache, StateDb, StateEngine};
use weave_validator::{Outcome, Validator};

use crate::stabilize::Stabilizer;

#[derive(Parser, Debug)]
#[command(name = "weave-node", version, about = "Weave full node")]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.weave/data")]
    data_dir: PathBuf,

    /// P2P listen address.
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/7777")]
    p2p_listen: String,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8545")]
    rpc_addr: SocketAddr,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Path to genesis params JSON (only required on first run).
    #[arg(long)]
    genesis_params: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,weave=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("Weave node starting");

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);

    // ── Genesis if fresh ──────────────────────────────────────────────────────
    if db.genesis_unit()?.is_none() {
        info!("fresh database — applying genesis");
        let params = load_or_generate_genesis_params(args.genesis_params.as_deref())?;
        apply_genesis(Arc::clone(&db), &params).context("applying genesis")?;
    } else {
        info!("existing database found — skipping genesis");
    }

    let genesis_unit = db.genesis_unit()?.context("genesis unit must exist after startup")?;
    let last_stable_mci = db.last_stable_mci()?.unwrap_or(0);
    let witnesses: std::collections::BTreeSet<_> =
        db.witness_list()?.context("witness list must exist after genesis")?.into_iter().collect();

    // ── Shared engine state ───────────────────────────────────────────────────
    let cache = Arc::new(Cache::new(Arc::clone(&db)));
    let governor = Arc::new(ResourceGovernor::new());
    let engine = Arc::new(StateEngine::new(Arc::clone(&db)));
    let validator = Arc::new(Validator::new(
        Arc::clone(&db),
        Arc::clone(&cache),
        Arc::clone(&governor),
        MainChainEngine::new(witnesses.clone()),
    ));
    let composer = Composer::new(Arc::clone(&engine));
    let mut stabilizer = Stabilizer::new(MainChainEngine::new(witnesses), last_stable_mci, genesis_unit);

    // ── Inbound joint queue (fed by RPC `postJoint` and P2P gossip) ──────────
    let (unit_sender, mut unit_receiver) = tokio::sync::mpsc::channel::<Unit>(512);

    // ── P2P network ───────────────────────────────────────────────────────────
    let p2p_config = P2pConfig {
        listen_addr: args.p2p_listen.clone(),
        bootstrap_peers: args.bootstrap.clone(),
        protocol_version: "/weave/1.0.0".into(),
        joint_topic: "weave-joints".into(),
    };
    let (p2p_network, mut p2p_handle) =
        P2pNetwork::new(&p2p_config).map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P identity");

    let peer_multiaddr = format!("{}/p2p/{}", p2p_config.listen_addr, p2p_handle.local_peer_id);
    let outbound_tx = p2p_handle.outbound_tx.clone();
    tokio::spawn(async move { p2p_network.run().await });

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState {
        db: Arc::clone(&db),
        unit_sender: Some(unit_sender),
        peer_multiaddr: Some(peer_multiaddr),
    });
    let _rpc_handle =
        RpcServer::new(rpc_state).start(args.rpc_addr).await.context("starting RPC server")?;

    // ── Main loop state ───────────────────────────────────────────────────────
    let mut peers: HashSet<PeerId> = HashSet::new();
    let mut pending = PendingRequestTable::default();
    let mut unhandled = UnhandledJoints::default();
    let mut stall_sweep = tokio::time::interval(Duration::from_secs(STALLED_TIMEOUT_SECS));

    info!("node ready");
    loop {
        tokio::select! {
            Some(unit) = unit_receiver.recv() => {
                ingest(unit, &validator, &engine, &governor, &cache, &mut unhandled, &mut pending,
                    &peers, &outbound_tx).await;
                run_stabilization(&mut stabilizer, &db, &cache, &engine, &governor, &composer).await;
            }
            Some(event) = p2p_handle.inbound_rx.recv() => {
                match event {
                    Inbound::PeerConnected(peer) => { peers.insert(peer); }
                    Inbound::PeerDisconnected(peer) => { peers.remove(&peer); }
                    Inbound::Joint(GossipMessage::Joint(unit)) => {
                        ingest(unit, &validator, &engine, &governor, &cache, &mut unhandled, &mut pending,
                            &peers, &outbound_tx).await;
                        run_stabilization(&mut stabilizer, &db, &cache, &engine, &governor, &composer).await;
                    }
                    Inbound::Request { peer: _, channel, request } => {
                        let response = answer_request(&db, request);
                        let _ = outbound_tx.send(Outbound::Respond { channel, response }).await;
                    }
                    Inbound::Response { peer: _, response } => {
                        if let WireResponse::Joint(Some(unit)) = response {
                            let Some(hash) = unit.unit_hash else { continue };
                            pending.resolve(&hash);
                            ingest(unit, &validator, &engine, &governor, &cache, &mut unhandled, &mut pending,
                                &peers, &outbound_tx).await;
                            let ready = unhandled.on_saved(hash, |h| cache.props(h).is_some());
                            for ready_unit in ready {
                                ingest(ready_unit, &validator, &engine, &governor, &cache, &mut unhandled,
                                    &mut pending, &peers, &outbound_tx).await;
                            }
                            run_stabilization(&mut stabilizer, &db, &cache, &engine, &governor, &composer).await;
                        }
                    }
                    Inbound::OutboundFailure { peer, request: _ } => {
                        warn!(%peer, "request failed, will retry on next stall sweep");
                    }
                }
            }
            _ = stall_sweep.tick() => {
                let timeout = Duration::from_secs(RESPONSE_TIMEOUT_SECS);
                let mut peer_iter = peers.iter().cloned().cycle();
                let reissue = pending.sweep_stalled(timeout, |_| peer_iter.next());
                for (unit_hash, peer) in reissue {
                    let _ = outbound_tx
                        .send(Outbound::Request { peer, request: WireRequest::GetJoint { unit: unit_hash } })
                        .await;
                }
            }
        }
    }
}

/// Run one unit through the validator and, on success, the writer. Units
/// missing parents are queued and a `get_joint` request is issued for each
/// missing hash against any currently-connected peer.
async fn ingest(
    unit: Unit,
    validator: &Arc<Validator>,
    engine: &Arc<StateEngine>,
    governor: &Arc<ResourceGovernor>,
    cache: &Arc<Cache>,
    unhandled: &mut UnhandledJoints,
    pending: &mut PendingRequestTable,
    peers: &HashSet<PeerId>,
    outbound_tx: &tokio::sync::mpsc::Sender<Outbound>,
) {
    match validator.validate(unit.clone()).await {
        Outcome::OkSave { unit, props, spends } => {
            let hash = props.unit_hash;
            {
                let _write = governor.acquire_write().await;
                if let Err(e) = engine.save_joint(unit.clone(), props.clone(), spends) {
                    warn!(error = %e, "failed to save joint");
                    return;
                }
            }
            cache.insert_unstable(props);
            let _ = outbound_tx.send(Outbound::Broadcast(GossipMessage::Joint(unit))).await;

            let ready = unhandled.on_saved(hash, |h| cache.props(h).is_some());
            for ready_unit in ready {
                Box::pin(ingest(
                    ready_unit, validator, engine, governor, cache, unhandled, pending, peers, outbound_tx,
                ))
                .await;
            }
        }
        Outcome::NeedParents(missing) => {
            let Some(dependent) = weave_crypto::unit_hash(&unit).ok() else { return };
            let mut unit = unit;
            unit.unit_hash = Some(dependent);
            unhandled.queue(unit, &missing);
            for parent in missing {
                let Some(peer) = peers.iter().next().copied() else { continue };
                if matches!(pending.register(parent, dependent, peer), Register::SendRequest) {
                    let _ = outbound_tx
                        .send(Outbound::Request { peer, request: WireRequest::GetJoint { unit: parent } })
                        .await;
                }
            }
        }
        Outcome::NeedHashTree => {
            warn!("unit needs hash-tree catchup; catchup client not wired into the main loop yet");
        }
        Outcome::UnitError(e) | Outcome::JointError(e) | Outcome::Transient(e) => {
            warn!(error = %e, "joint rejected");
        }
        Outcome::AssetNotAccepted => {
            warn!("joint pays an AA an asset outside its declared bounce_fees");
        }
    }
}

async fn run_stabilization(
    stabilizer: &mut Stabilizer,
    db: &Arc<StateDb>,
    cache: &Arc<Cache>,
    engine: &Arc<StateEngine>,
    governor: &Arc<ResourceGovernor>,
    composer: &Composer,
) {
    match stabilizer.advance(db, cache, engine, governor).await {
        Ok(0) => {}
        Ok(_) => match composer.run_due_triggers(64) {
            Ok(responses) if !responses.is_empty() => {
                info!(count = responses.len(), "AA triggers composed");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "AA composer failed"),
        },
        Err(e) => warn!(error = %e, "stabilization failed"),
    }
}

fn answer_request(db: &Arc<StateDb>, request: WireRequest) -> WireResponse {
    match request {
        WireRequest::GetJoint { unit } => match db.get_unit(&unit) {
            Ok(found) => WireResponse::Joint(found),
            Err(e) => WireResponse::Error(e.to_string()),
        },
        WireRequest::Catchup { from_mci, to_mci } => match prepare_catchup_chain(db, from_mci, to_mci) {
            Ok(balls) => WireResponse::Catchup(balls),
            Err(e) => WireResponse::Error(e.to_string()),
        },
        WireRequest::HashTree { from_mci, to_mci } => {
            match prepare_witness_proof(db, from_mci) {
                Ok(proof) => WireResponse::HashTree(
                    proof
                        .unstable_mc_joints
                        .into_iter()
                        .filter(|u| u.main_chain_index.map(|m| m <= to_mci).unwrap_or(false))
                        .filter_map(|u| u.unit_hash.map(|h| (u.main_chain_index.unwrap(), h)))
                        .collect(),
                ),
                Err(e) => WireResponse::Error(e.to_string()),
            }
        }
        WireRequest::GetWitnesses => match db.witness_list() {
            Ok(Some(w)) => WireResponse::Witnesses(w),
            Ok(None) => WireResponse::Witnesses(Vec::new()),
            Err(e) => WireResponse::Error(e.to_string()),
        },
    }
}

/// Load genesis parameters from a JSON file, or generate ephemeral keypairs
/// if no path is given.
///
/// # Warning
/// Ephemeral keys are **not reproducible**. A node started without
/// `--genesis-params` will produce a genesis that cannot be shared with
/// other nodes. Only use this for local development and testing.
fn load_or_generate_genesis_params(path: Option<&Path>) -> anyhow::Result<GenesisParams> {
    if let Some(p) = path {
        let json = std::fs::read_to_string(p)
            .with_context(|| format!("reading genesis params from {}", p.display()))?;
        return serde_json::from_str(&json).context("parsing genesis params JSON");
    }
    warn!("No --genesis-params provided. Generating ephemeral keys — DO NOT USE IN PRODUCTION.");
    let supply_recipient = KeyPair::generate();
    let witnesses = (0..WITNESS_COUNT).map(|_| KeyPair::generate().address).collect();
    Ok(GenesisParams {
        witnesses,
        supply_recipient: supply_recipient.address,
        supply_recipient_definition: supply_recipient.definition(),
    })
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

//! Persistent storage (C2) and the dual-store journal/replay discipline (§4.2).
//!
//! Two sled trees realize the two storage backends the design calls for:
//! `relational`-flavoured trees (units, unit props, balls, the spend index,
//! the AA trigger queue) are updated inside one sled transaction per commit;
//! `kv_state` (AA state vars and balances) is updated afterwards through a
//! single batched, synced write. A `journal` tree records the pending kv
//! batch inside the same relational transaction that produced it, so a crash
//! between the relational commit and the kv batch can be detected and
//! replayed on the next startup (P7, L3, scenario 6).
use std::path::Path;

use weave_core::aa::{AaDefinition, AaResponse, AaTrigger, AaValue};
use weave_core::error::WeaveError;
use weave_core::ids::{Address, Amount, Asset, AssetId, MainChainIndex, UnitHash};
use weave_core::unit::{AppKind, Ball, Unit, UnitProps};

const META_LAST_STABLE_MCI: &str = "last_stable_mci";
const META_GENESIS_UNIT: &str = "genesis_unit";
const META_WITNESS_LIST: &str = "witness_list";

/// Named trees:
///   units           — UnitHash            → bincode(Unit)
///   unit_props      — UnitHash            → bincode(UnitProps)
///   balls           — BallHash            → bincode(Ball)
///   unit_to_ball    — UnitHash            → BallHash
///   free_units      — UnitHash            → [] (units with no child yet)
///   spent_outputs   — src_unit|msg|out    → spending UnitHash (double-spend index, I5)
///   definitions     — Address             → bincode(serde_json::Value) (any author's definition tree)
///   aa_definitions  — Address             → bincode(AaDefinition)
///   aa_triggers     — be(mci)|unit|addr   → bincode(AaTrigger)  (FIFO queue)
///   aa_responses    — mci|trigger_unit|addr → bincode(AaResponse)
///   meta            — utf8 key            → raw bytes
///   journal         — be(seq)             → bincode(KvBatch)    (replay log)
///   kv_state        — address|0|name      → bincode(AaValue)    (AA state vars)
///                     address|1|asset-tag → le(u128) amount     (AA balances)
///   data_feeds      — oracle|feed_name    → bincode(IndexedValue) (best candidate so far, §4.8)
///   attestations    — attestor|addr|field → bincode(IndexedValue) (most recent by mci/level)
///   asset_fields    — AssetId|field       → utf8 value (write-once, set at the defining unit)
pub struct StateDb {
    db: sled::Db,
    units: sled::Tree,
    unit_props: sled::Tree,
    balls: sled::Tree,
    unit_to_ball: sled::Tree,
    free_units: sled::Tree,
    spent_outputs: sled::Tree,
    definitions: sled::Tree,
    aa_definitions: sled::Tree,
    aa_triggers: sled::Tree,
    aa_responses: sled::Tree,
    meta: sled::Tree,
    journal: sled::Tree,
    kv_state: sled::Tree,
    data_feeds: sled::Tree,
    attestations: sled::Tree,
    asset_fields: sled::Tree,
}

/// One candidate posting behind a `data_feeds`/`attestations` entry: enough
/// to compare two candidates for recency without re-reading the unit itself
/// (§4.8's `(latest_included_mc_index, level)` then `unit_hash` tie-break).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct IndexedValue {
    mci: MainChainIndex,
    level: u64,
    unit_hash: UnitHash,
    value: String,
}

/// `true` if `candidate` should replace `current` as the best-known posting:
/// higher `(mci, level)` wins outright; on an exact tie the smaller
/// `unit_hash` wins, giving a total and deterministic order (§4.8).
fn candidate_wins(current: Option<&IndexedValue>, candidate: &IndexedValue) -> bool {
    match current {
        None => true,
        Some(cur) => {
            (candidate.mci, candidate.level, std::cmp::Reverse(candidate.unit_hash))
                > (cur.mci, cur.level, std::cmp::Reverse(cur.unit_hash))
        }
    }
}

/// A batch of key-value writes staged against `kv_state`, recorded in the
/// journal before the relational transaction commits and replayed from the
/// journal if the node crashes before applying it (§4.2).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KvBatch {
    pub writes: Vec<(Vec<u8>, Vec<u8>)>,
}

impl KvBatch {
    fn to_sled_batch(&self) -> sled::Batch {
        let mut batch = sled::Batch::default();
        for (k, v) in &self.writes {
            batch.insert(k.as_slice(), v.as_slice());
        }
        batch
    }
}

fn state_var_key(address: &Address, name: &str) -> Vec<u8> {
    let mut key = address.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(name.as_bytes());
    key
}

fn balance_key(address: &Address, asset: &Asset) -> Vec<u8> {
    let mut key = address.as_bytes().to_vec();
    key.push(1);
    key.extend_from_slice(asset.to_string().as_bytes());
    key
}

fn spent_output_key(src_unit: &UnitHash, message_index: u32, output_index: u32) -> Vec<u8> {
    let mut key = src_unit.as_bytes().to_vec();
    key.extend_from_slice(&message_index.to_be_bytes());
    key.extend_from_slice(&output_index.to_be_bytes());
    key
}

fn trigger_key(mci: MainChainIndex, unit: &UnitHash, address: &Address) -> Vec<u8> {
    let mut key = mci.to_be_bytes().to_vec();
    key.extend_from_slice(unit.as_bytes());
    key.extend_from_slice(address.as_bytes());
    key
}

fn data_feed_key(oracle: &Address, feed_name: &str) -> Vec<u8> {
    let mut key = oracle.as_bytes().to_vec();
    key.extend_from_slice(feed_name.as_bytes());
    key
}

fn attestation_key(attestor: &Address, address: &Address, field: &str) -> Vec<u8> {
    let mut key = attestor.as_bytes().to_vec();
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(field.as_bytes());
    key
}

fn asset_field_key(asset: &AssetId, field: &str) -> Vec<u8> {
    let mut key = asset.0.as_bytes().to_vec();
    key.extend_from_slice(field.as_bytes());
    key
}

/// One posted value to index while scanning a newly-stable unit's messages
/// (§4.8): a `data_feed`, an `attestation`, or an issued asset's own field.
pub enum IndexablePosting {
    DataFeed { oracle: Address, feed_name: String, value: String },
    Attestation { attestor: Address, address: Address, field: String, value: String },
    AssetField { asset: AssetId, field: String, value: String },
}

/// Pull every `data_feed`/`attestation`/`asset` message out of a stabilizing
/// unit's body, in the shape [`StateDb::index_posting`] expects. The defining
/// unit of an issued asset is its own `unit_hash`, by convention (`Asset`).
pub fn postings_in_unit(unit: &Unit, unit_hash: UnitHash) -> Vec<IndexablePosting> {
    let author = unit.authors.first().map(|a| a.address);
    let mut out = Vec::new();
    for message in &unit.messages {
        let Some(payload) = &message.payload else { continue };
        match message.app {
            AppKind::DataFeed => {
                let Some(oracle) = author else { continue };
                let Some(obj) = payload.as_object() else { continue };
                for (feed_name, value) in obj {
                    out.push(IndexablePosting::DataFeed {
                        oracle,
                        feed_name: feed_name.clone(),
                        value: json_scalar_to_string(value),
                    });
                }
            }
            AppKind::Attestation => {
                let Some(attestor) = author else { continue };
                let Some(obj) = payload.as_object() else { continue };
                let Some(address) = obj.get("address").and_then(|v| v.as_str()).and_then(Address::from_b32)
                else {
                    continue;
                };
                let Some(profile) = obj.get("profile").and_then(|v| v.as_object()) else { continue };
                for (field, value) in profile {
                    out.push(IndexablePosting::Attestation {
                        attestor,
                        address,
                        field: field.clone(),
                        value: json_scalar_to_string(value),
                    });
                }
            }
            AppKind::Asset => {
                let Some(obj) = payload.as_object() else { continue };
                for (field, value) in obj {
                    out.push(IndexablePosting::AssetField {
                        asset: AssetId(unit_hash),
                        field: field.clone(),
                        value: json_scalar_to_string(value),
                    });
                }
            }
            _ => {}
        }
    }
    out
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl StateDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WeaveError> {
        let db = sled::open(path)?;
        let units = db.open_tree("units")?;
        let unit_props = db.open_tree("unit_props")?;
        let balls = db.open_tree("balls")?;
        let unit_to_ball = db.open_tree("unit_to_ball")?;
        let free_units = db.open_tree("free_units")?;
        let spent_outputs = db.open_tree("spent_outputs")?;
        let definitions = db.open_tree("definitions")?;
        let aa_definitions = db.open_tree("aa_definitions")?;
        let aa_triggers = db.open_tree("aa_triggers")?;
        let aa_responses = db.open_tree("aa_responses")?;
        let meta = db.open_tree("meta")?;
        let journal = db.open_tree("journal")?;
        let kv_state = db.open_tree("kv_state")?;
        let data_feeds = db.open_tree("data_feeds")?;
        let attestations = db.open_tree("attestations")?;
        let asset_fields = db.open_tree("asset_fields")?;
        let state = Self {
            db,
            units,
            unit_props,
            balls,
            unit_to_ball,
            free_units,
            spent_outputs,
            definitions,
            aa_definitions,
            aa_triggers,
            aa_responses,
            meta,
            journal,
            kv_state,
            data_feeds,
            attestations,
            asset_fields,
        };
        state.replay_journal()?;
        Ok(state)
    }

    /// Apply any journalled kv batch left over from a crash between the
    /// relational commit and the post-commit kv write (scenario 6).
    fn replay_journal(&self) -> Result<(), WeaveError> {
        for item in self.journal.iter() {
            let (key, bytes) = item?;
            let batch: KvBatch = bincode::deserialize(&bytes)?;
            self.kv_state.apply_batch(batch.to_sled_batch())?;
            self.kv_state.flush()?;
            self.journal.remove(key)?;
        }
        self.journal.flush()?;
        Ok(())
    }

    // ── Units ────────────────────────────────────────────────────────────────

    pub fn get_unit(&self, hash: &UnitHash) -> Result<Option<Unit>, WeaveError> {
        match self.units.get(hash.as_bytes())? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    pub fn unit_exists(&self, hash: &UnitHash) -> bool {
        self.units.contains_key(hash.as_bytes()).unwrap_or(false)
    }

    pub fn get_props(&self, hash: &UnitHash) -> Result<Option<UnitProps>, WeaveError> {
        match self.unit_props.get(hash.as_bytes())? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    /// Every main-chain unit's props with `main_chain_index > since` (catchup
    /// witness-proof building, §4.10). Full scan of `unit_props`: there is no
    /// secondary index by `main_chain_index`, the same documented trade-off
    /// as `get_address_balance`'s full scan — acceptable because catchup is a
    /// cold, infrequent path, not the hot validation/stabilization path.
    pub fn main_chain_units_since(&self, since: MainChainIndex) -> Result<Vec<UnitProps>, WeaveError> {
        let mut out = Vec::new();
        for item in self.unit_props.iter() {
            let (_, v) = item?;
            let props: UnitProps = bincode::deserialize(&v)?;
            if props.is_on_main_chain && props.main_chain_index.map(|m| m > since).unwrap_or(false) {
                out.push(props);
            }
        }
        out.sort_by_key(|p| p.main_chain_index);
        Ok(out)
    }

    pub fn get_ball(&self, hash: &weave_core::ids::BallHash) -> Result<Option<Ball>, WeaveError> {
        match self.balls.get(hash.as_bytes())? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    pub fn ball_for_unit(&self, unit: &UnitHash) -> Result<Option<weave_core::ids::BallHash>, WeaveError> {
        match self.unit_to_ball.get(unit.as_bytes())? {
            Some(b) => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&b);
                Ok(Some(weave_core::ids::BallHash::from_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn get_free_units(&self) -> Result<Vec<UnitHash>, WeaveError> {
        let mut out = Vec::new();
        for item in self.free_units.iter() {
            let (key, _) = item?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&key);
            out.push(UnitHash::from_bytes(arr));
        }
        Ok(out)
    }

    pub fn is_output_spent(&self, src_unit: &UnitHash, message_index: u32, output_index: u32) -> bool {
        self.spent_outputs
            .contains_key(spent_output_key(src_unit, message_index, output_index))
            .unwrap_or(false)
    }

    pub fn spending_unit(
        &self,
        src_unit: &UnitHash,
        message_index: u32,
        output_index: u32,
    ) -> Result<Option<UnitHash>, WeaveError> {
        match self
            .spent_outputs
            .get(spent_output_key(src_unit, message_index, output_index))?
        {
            Some(b) => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&b);
                Ok(Some(UnitHash::from_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// The definition tree published by `address`'s first unit, regardless of
    /// whether it turns out to be an AA (step 6, §4.5).
    pub fn get_author_definition(&self, address: &Address) -> Result<Option<serde_json::Value>, WeaveError> {
        match self.definitions.get(address.as_bytes())? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    /// The output `(src_unit, message_index, output_index)` references, if it
    /// exists and has not already been spent.
    pub fn get_spendable_output(
        &self,
        src_unit: &UnitHash,
        message_index: u32,
        output_index: u32,
    ) -> Result<Option<weave_core::unit::Output>, WeaveError> {
        if self.is_output_spent(src_unit, message_index, output_index) {
            return Ok(None);
        }
        let Some(unit) = self.get_unit(src_unit)? else { return Ok(None) };
        let Some(message) = unit.messages.get(message_index as usize) else { return Ok(None) };
        Ok(message.outputs.get(output_index as usize).cloned())
    }

    // ── AA definitions / triggers / responses ───────────────────────────────

    pub fn get_aa_definition(&self, address: &Address) -> Result<Option<AaDefinition>, WeaveError> {
        match self.aa_definitions.get(address.as_bytes())? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    pub fn is_aa(&self, address: &Address) -> bool {
        self.aa_definitions.contains_key(address.as_bytes()).unwrap_or(false)
    }

    pub fn pop_due_triggers(&self, limit: usize) -> Result<Vec<AaTrigger>, WeaveError> {
        let mut out = Vec::new();
        for item in self.aa_triggers.iter().take(limit) {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    pub fn get_aa_response(
        &self,
        mci: MainChainIndex,
        trigger_unit: &UnitHash,
        address: &Address,
    ) -> Result<Option<AaResponse>, WeaveError> {
        let key = trigger_key(mci, trigger_unit, address);
        match self.aa_responses.get(key)? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    // ── AA state / balances (kv_state tree) ─────────────────────────────────

    pub fn get_state_var(&self, address: &Address, name: &str) -> Result<Option<AaValue>, WeaveError> {
        match self.kv_state.get(state_var_key(address, name))? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    pub fn get_balance(&self, address: &Address, asset: &Asset) -> Result<Amount, WeaveError> {
        match self.kv_state.get(balance_key(address, asset))? {
            Some(b) => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&b);
                Ok(Amount::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Spendable UTXO balance of a plain (non-AA) address: `kv_state`'s
    /// `balance_key` only tracks AA balances (§4.2's "two storage backends"
    /// split keeps ordinary UTXOs out of it by design), so this scans
    /// `units` for unspent outputs instead. Full scan, same documented
    /// trade-off as `main_chain_units_since`: fine for an RPC read, wrong for
    /// anything on the validation/stabilization hot path. A real deployment
    /// would keep `weave-core::AddressSummary` as an address-to-output
    /// secondary index instead; out of scope here.
    pub fn get_address_balance(&self, address: &Address, asset: &Asset) -> Result<Amount, WeaveError> {
        let mut total: Amount = 0;
        for item in self.units.iter() {
            let (_, v) = item?;
            let unit: Unit = bincode::deserialize(&v)?;
            if !unit.is_stable {
                continue;
            }
            let unit_hash = unit.unit_hash.expect("stored unit is always hashed");
            for (message_index, message) in unit.messages.iter().enumerate() {
                for (output_index, output) in message.outputs.iter().enumerate() {
                    if &output.address != address || &output.asset != asset {
                        continue;
                    }
                    if !self.is_output_spent(&unit_hash, message_index as u32, output_index as u32) {
                        total += output.amount;
                    }
                }
            }
        }
        Ok(total)
    }

    // ── Data feeds / attestations / asset fields (§4.8) ─────────────────────

    /// Index every `data_feed`/`attestation`/`asset` posting in a
    /// newly-stable unit. Called once per unit at stabilization, before its
    /// `mci`/`level` are used to decide whether it beats whatever is already
    /// indexed for the same feed, attestor+address+field, or asset+field.
    pub fn index_posting(&self, posting: IndexablePosting, mci: MainChainIndex, level: u64, unit_hash: UnitHash) -> Result<(), WeaveError> {
        match posting {
            IndexablePosting::DataFeed { oracle, feed_name, value } => {
                let key = data_feed_key(&oracle, &feed_name);
                self.update_indexed(&self.data_feeds, key, mci, level, unit_hash, value)
            }
            IndexablePosting::Attestation { attestor, address, field, value } => {
                let key = attestation_key(&attestor, &address, &field);
                self.update_indexed(&self.attestations, key, mci, level, unit_hash, value)
            }
            IndexablePosting::AssetField { asset, field, value } => {
                let key = asset_field_key(&asset, &field);
                // Write-once: an asset's defining fields never change after stabilization.
                if self.asset_fields.get(&key)?.is_none() {
                    self.asset_fields.insert(key, value.as_bytes())?;
                }
                Ok(())
            }
        }
    }

    fn update_indexed(
        &self,
        tree: &sled::Tree,
        key: Vec<u8>,
        mci: MainChainIndex,
        level: u64,
        unit_hash: UnitHash,
        value: String,
    ) -> Result<(), WeaveError> {
        let current = match tree.get(&key)? {
            Some(b) => Some(bincode::deserialize::<IndexedValue>(&b)?),
            None => None,
        };
        let candidate = IndexedValue { mci, level, unit_hash, value };
        if candidate_wins(current.as_ref(), &candidate) {
            tree.insert(key, bincode::serialize(&candidate)?)?;
        }
        Ok(())
    }

    /// The most recent value posted to `feed_name` by any of `oracles`
    /// (§4.8): the highest `(mci, level)` candidate across all of them,
    /// ties broken by smallest `unit_hash`.
    pub fn data_feed(&self, oracles: &[Address], feed_name: &str) -> Result<Option<String>, WeaveError> {
        let mut best: Option<IndexedValue> = None;
        for oracle in oracles {
            let key = data_feed_key(oracle, feed_name);
            if let Some(b) = self.data_feeds.get(key)? {
                let candidate: IndexedValue = bincode::deserialize(&b)?;
                if candidate_wins(best.as_ref(), &candidate) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best.map(|v| v.value))
    }

    pub fn attestation(&self, attestor: &Address, address: &Address, field: &str) -> Result<Option<String>, WeaveError> {
        let key = attestation_key(attestor, address, field);
        match self.attestations.get(key)? {
            Some(b) => Ok(Some(bincode::deserialize::<IndexedValue>(&b)?.value)),
            None => Ok(None),
        }
    }

    pub fn asset_field(&self, asset: &AssetId, field: &str) -> Result<Option<String>, WeaveError> {
        let key = asset_field_key(asset, field);
        match self.asset_fields.get(key)? {
            Some(b) => Ok(Some(String::from_utf8_lossy(&b).into_owned())),
            None => Ok(None),
        }
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn last_stable_mci(&self) -> Result<Option<MainChainIndex>, WeaveError> {
        match self.meta.get(META_LAST_STABLE_MCI)? {
            Some(b) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b);
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn genesis_unit(&self) -> Result<Option<UnitHash>, WeaveError> {
        match self.meta.get(META_GENESIS_UNIT)? {
            Some(b) => UnitHash::from_hex(&String::from_utf8_lossy(&b))
                .map(Some)
                .map_err(|e| WeaveError::Storage(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn witness_list(&self) -> Result<Option<Vec<Address>>, WeaveError> {
        match self.meta.get(META_WITNESS_LIST)? {
            Some(b) => Ok(Some(bincode::deserialize(&b)?)),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<(), WeaveError> {
        self.db.flush()?;
        Ok(())
    }

    // ── Writer entry point (used exclusively by `weave_state::engine`) ──────

    /// The trees joined into one sled transaction per `save_joint` /
    /// stabilization commit. `aa_definitions`, `aa_triggers`, `aa_responses`
    /// and `meta` are written just after this transaction commits rather
    /// than inside it — callers already hold the write lock (C11) for the
    /// whole operation, so plain sequential inserts are enough to keep them
    /// consistent in practice without exceeding sled's join arity.
    pub(crate) fn relational_trees(
        &self,
    ) -> (
        &sled::Tree,
        &sled::Tree,
        &sled::Tree,
        &sled::Tree,
        &sled::Tree,
        &sled::Tree,
        &sled::Tree,
    ) {
        (
            &self.units,
            &self.unit_props,
            &self.balls,
            &self.unit_to_ball,
            &self.free_units,
            &self.spent_outputs,
            &self.journal,
        )
    }

    pub(crate) fn definitions_tree(&self) -> &sled::Tree {
        &self.definitions
    }

    pub(crate) fn aa_definitions_tree(&self) -> &sled::Tree {
        &self.aa_definitions
    }

    pub(crate) fn aa_triggers_tree(&self) -> &sled::Tree {
        &self.aa_triggers
    }

    pub(crate) fn aa_responses_tree(&self) -> &sled::Tree {
        &self.aa_responses
    }

    pub(crate) fn meta_tree(&self) -> &sled::Tree {
        &self.meta
    }

    pub(crate) fn kv_tree(&self) -> &sled::Tree {
        &self.kv_state
    }
}

pub(crate) fn state_var_key_pub(address: &Address, name: &str) -> Vec<u8> {
    state_var_key(address, name)
}

pub(crate) fn balance_key_pub(address: &Address, asset: &Asset) -> Vec<u8> {
    balance_key(address, asset)
}

pub(crate) fn spent_output_key_pub(src_unit: &UnitHash, message_index: u32, output_index: u32) -> Vec<u8> {
    spent_output_key(src_unit, message_index, output_index)
}

pub(crate) fn trigger_key_pub(mci: MainChainIndex, unit: &UnitHash, address: &Address) -> Vec<u8> {
    trigger_key(mci, unit, address)
}

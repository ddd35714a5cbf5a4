//! The trigger dispatch loop and per-trigger evaluation (§4.9).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use weave_core::aa::{AaDefinition, AaMessagesTemplate, AaResponse, AaTrigger};
use weave_core::ids::{Address, Amount, Asset, AssetId, UnitHash};
use weave_core::unit::{AppKind, Author, Message, Output, PayloadLocation, Sequence, Unit, UnitProps};
use weave_formula::{eval, Env, EvalContext, EvalError, Expr, StateWrite, Value};
use weave_state::{StateDb, StateEngine};

use crate::env::DbEnv;
use crate::template::resolve_effective_definition;
use crate::ComposeError;

/// Max depth of `AA pays AA` recursion within one top-level trigger (§4.9 point 6).
const MAX_AA_NESTING: u32 = weave_core::constants::MAX_AA_NESTING;

pub struct Composer {
    engine: Arc<StateEngine>,
    db: Arc<StateDb>,
}

impl Composer {
    pub fn new(engine: Arc<StateEngine>) -> Self {
        let db = engine.db.clone();
        Self { engine, db }
    }

    /// Dequeue and compose up to `limit` due triggers, each committed as its
    /// own atomic batch. Returns the top-level response for each.
    pub fn run_due_triggers(&self, limit: usize) -> Result<Vec<AaResponse>, ComposeError> {
        let due = self.db.pop_due_triggers(limit)?;
        let mut top_level = Vec::with_capacity(due.len());
        for trigger_row in due {
            top_level.push(self.compose_and_commit(trigger_row)?);
        }
        Ok(top_level)
    }

    fn compose_and_commit(&self, trigger_row: AaTrigger) -> Result<AaResponse, ComposeError> {
        let unit = self.db.get_unit(&trigger_row.unit)?.ok_or(ComposeError::MissingUnit)?;
        let payer = unit.author_addresses().first().copied().unwrap_or(trigger_row.address);
        let root = (payer, trigger_row.unit);

        let mci = trigger_row.mci;
        let mut ledger = Ledger {
            db: self.db.as_ref(),
            balances: HashMap::new(),
            state_writes: Vec::new(),
            nested_responses: Vec::new(),
            response_units: Vec::new(),
        };
        let top_response = self.compose(&mut ledger, &unit, trigger_row.address, payer, mci, root, 0);

        let balance_writes: Vec<(Address, Asset, Amount)> =
            ledger.balances.into_iter().map(|((a, asset), amt)| (a, asset, amt)).collect();
        let mut responses = vec![top_response.clone()];
        responses.append(&mut ledger.nested_responses);

        self.engine.commit_aa_response(
            trigger_row,
            ledger.state_writes,
            balance_writes,
            ledger.response_units,
            responses,
        )?;
        Ok(top_response)
    }

    /// Compose one trigger (top-level or nested), crediting its payment to
    /// the target AA's balance unconditionally and then either applying a
    /// successful evaluation's effects (and posting its response unit) or
    /// bouncing them. `payer` is who a bounce refunds: the unit's author at
    /// the top level, or the paying AA for a nested trigger. `trigger_unit`
    /// is always a real, hashed unit: the triggering unit at the top level,
    /// or the parent AA's own just-built response unit for a nested call.
    fn compose(
        &self,
        ledger: &mut Ledger,
        trigger_unit: &Unit,
        aa_address: Address,
        payer: Address,
        mci: weave_core::ids::MainChainIndex,
        root: (Address, UnitHash),
        depth: u32,
    ) -> AaResponse {
        let paid = payment_to(trigger_unit, aa_address);
        for (asset, amount) in &paid {
            ledger.credit(aa_address, *asset, *amount);
        }

        let trigger_unit_hash = trigger_unit.unit_hash.expect("trigger units are always hashed");

        if depth > MAX_AA_NESTING {
            return self.bounce(ledger, aa_address, payer, &BTreeMap::new(), &paid, mci, trigger_unit_hash, "MAX_AA_NESTING exceeded".into());
        }

        let defn = match self.db.get_aa_definition(&aa_address) {
            Ok(Some(d)) => d,
            Ok(None) => {
                return self.bounce(ledger, aa_address, payer, &BTreeMap::new(), &paid, mci, trigger_unit_hash, "not an AA".into())
            }
            Err(e) => {
                return self.bounce(ledger, aa_address, payer, &BTreeMap::new(), &paid, mci, trigger_unit_hash, e.to_string())
            }
        };
        let effective = match resolve_effective_definition(self.db.as_ref(), &defn) {
            Ok(d) => d,
            Err(e) => {
                return self.bounce(ledger, aa_address, payer, &defn.bounce_fees, &paid, mci, trigger_unit_hash, e.to_string())
            }
        };

        let trigger = weave_core::aa::Trigger {
            address: aa_address,
            initial_address: root.0,
            unit: trigger_unit_hash,
            initial_unit: root.1,
            outputs: paid.iter().map(|(a, amt)| (a.to_string(), *amt)).collect(),
            data: trigger_data(trigger_unit),
        };

        let snapshot_balances = ledger.balances.clone();
        let snapshot_writes_len = ledger.state_writes.len();

        match self.try_execute(ledger, &effective, &trigger, trigger_unit.timestamp) {
            Ok(outcome) => {
                let (response_unit, props) =
                    match build_response_unit(aa_address, trigger_unit, outcome.messages) {
                        Ok(pair) => pair,
                        Err(e) => {
                            ledger.balances = snapshot_balances;
                            ledger.state_writes.truncate(snapshot_writes_len);
                            return self.bounce(
                                ledger, aa_address, payer, &effective.bounce_fees, &paid, mci, trigger_unit_hash,
                                format!("failed to build response unit: {e}"),
                            );
                        }
                    };
                let response_hash = response_unit.unit_hash.expect("just hashed");
                ledger.response_units.push((response_unit.clone(), props));

                for recipient in outcome.nested_payments {
                    let nested = self.compose(ledger, &response_unit, recipient, aa_address, mci, root, depth + 1);
                    ledger.nested_responses.push(nested);
                }

                AaResponse {
                    mci,
                    trigger_unit: trigger_unit_hash,
                    aa_address,
                    response_unit: Some(response_hash),
                    bounced: false,
                    response: outcome.effects,
                }
            }
            Err(reason) => {
                ledger.balances = snapshot_balances;
                ledger.state_writes.truncate(snapshot_writes_len);
                self.bounce(ledger, aa_address, payer, &effective.bounce_fees, &paid, mci, trigger_unit_hash, reason)
            }
        }
    }

    /// Evaluate `init` then `messages`/`cases`, applying payment messages
    /// directly to `ledger`. Returns the response unit's messages, the
    /// nested AA payments to recurse into afterward, and a human-readable
    /// effect summary — or an error describing why this trigger must
    /// bounce. `now` is the causing unit's own timestamp, never wall clock.
    fn try_execute(
        &self,
        ledger: &mut Ledger,
        defn: &AaDefinition,
        trigger: &weave_core::aa::Trigger,
        now: i64,
    ) -> Result<ExecutionOutcome, String> {
        let env = DbEnv::new(self.db.clone(), now);
        let mut ctx = EvalContext::new(&env, trigger.address, trigger);

        if let Some(init) = &defn.init {
            eval_formula_str(init, &mut ctx).map_err(|e| e.to_string())?;
        }

        let messages = match &defn.messages {
            AaMessagesTemplate::Flat(list) => list.clone(),
            AaMessagesTemplate::Cases(cases) => {
                let mut chosen = Vec::new();
                for case in cases {
                    let matches = match &case.if_formula {
                        Some(f) => eval_formula_str(f, &mut ctx).map_err(|e| e.to_string())?.as_bool(),
                        None => true,
                    };
                    if matches {
                        chosen = case.messages.clone();
                        break;
                    }
                }
                chosen
            }
        };

        let mut effects = Vec::new();
        let mut nested_payments: Vec<Address> = Vec::new();
        let mut response_messages: Vec<Message> = Vec::new();
        for message in &messages {
            let app = message.get("app").and_then(|v| v.as_str()).unwrap_or("");
            match app {
                "state" => {
                    if let Some(formula) = message.get("state").and_then(|v| v.as_str()) {
                        eval_formula_str(formula, &mut ctx).map_err(|e| e.to_string())?;
                        effects.push("state".to_string());
                    }
                }
                "data" => {
                    let payload = message.get("data").cloned().unwrap_or(serde_json::Value::Null);
                    response_messages.push(Message {
                        app: AppKind::Data,
                        payload_location: PayloadLocation::Inline,
                        payload_hash: [0u8; 32],
                        payload: Some(payload),
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                    });
                    effects.push("data".to_string());
                }
                "payment" => {
                    let asset_label = message
                        .get("asset")
                        .map(|v| eval_field(v, &mut ctx))
                        .transpose()
                        .map_err(|e| e.to_string())?
                        .map(|v| v.as_str())
                        .unwrap_or_else(|| weave_core::constants::BASE_ASSET_LABEL.to_string());
                    let asset = parse_asset_label(&asset_label);
                    let outputs = message.get("outputs").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                    let mut unit_outputs = Vec::with_capacity(outputs.len());
                    for output in &outputs {
                        let address_str = output
                            .get("address")
                            .map(|v| eval_field(v, &mut ctx))
                            .transpose()
                            .map_err(|e| e.to_string())?
                            .map(|v| v.as_str())
                            .ok_or_else(|| "payment output missing address".to_string())?;
                        let recipient = Address::from_b32(&address_str)
                            .ok_or_else(|| format!("malformed payment address {address_str}"))?;
                        let amount_value = output
                            .get("amount")
                            .map(|v| eval_field(v, &mut ctx))
                            .transpose()
                            .map_err(|e| e.to_string())?
                            .ok_or_else(|| "payment output missing amount".to_string())?;
                        let amount = decimal_to_amount(
                            amount_value.as_decimal().ok_or_else(|| "payment amount not numeric".to_string())?,
                        )?;
                        if !ledger.try_debit(trigger.address, asset, amount) {
                            return Err(format!("insufficient {asset} balance for payment"));
                        }
                        ledger.credit(recipient, asset, amount);
                        if self.db.is_aa(&recipient) {
                            nested_payments.push(recipient);
                        }
                        unit_outputs.push(Output {
                            address: recipient,
                            amount,
                            asset,
                            blinding: None,
                            is_spent: false,
                            denomination: None,
                        });
                        effects.push(format!("pay {amount} {asset} to {recipient}"));
                    }
                    response_messages.push(Message {
                        app: AppKind::Payment,
                        payload_location: PayloadLocation::None,
                        payload_hash: [0u8; 32],
                        payload: None,
                        inputs: Vec::new(),
                        outputs: unit_outputs,
                    });
                }
                other => effects.push(format!("unhandled app '{other}'")),
            }
        }

        let (writes, _response_vars) = ctx.into_effects();
        ledger.state_writes.extend(writes);

        Ok(ExecutionOutcome { effects: effects.join("; "), messages: response_messages, nested_payments })
    }

    fn bounce(
        &self,
        ledger: &mut Ledger,
        aa_address: Address,
        payer: Address,
        bounce_fees: &BTreeMap<String, Amount>,
        paid: &[(Asset, Amount)],
        mci: weave_core::ids::MainChainIndex,
        trigger_unit: UnitHash,
        reason: String,
    ) -> AaResponse {
        for (asset, amount) in paid {
            let fee = bounce_fees
                .get(&asset.to_string())
                .or_else(|| bounce_fees.get(weave_core::constants::BASE_ASSET_LABEL))
                .copied()
                .unwrap_or(0)
                .min(*amount);
            let refund = amount - fee;
            // The AA keeps `fee`, already reflected in its credited balance;
            // only the surplus goes back to whoever funded the trigger.
            if ledger.try_debit(aa_address, *asset, refund) {
                ledger.credit(payer, *asset, refund);
            }
        }
        AaResponse {
            mci,
            trigger_unit,
            aa_address,
            response_unit: None,
            bounced: true,
            response: format!("bounced: {reason}"),
        }
    }
}

/// What one successful `try_execute` produced: the messages its response
/// unit should carry, any nested AA-to-AA payments to compose afterward
/// (once the response unit carrying them has been built and hashed), and a
/// human-readable effect summary for the `aa_responses` record.
struct ExecutionOutcome {
    effects: String,
    messages: Vec<Message>,
    nested_payments: Vec<Address>,
}

struct Ledger<'a> {
    db: &'a StateDb,
    balances: HashMap<(Address, Asset), Amount>,
    state_writes: Vec<StateWrite>,
    nested_responses: Vec<AaResponse>,
    response_units: Vec<(Unit, UnitProps)>,
}

impl<'a> Ledger<'a> {
    fn balance(&mut self, address: Address, asset: Asset) -> Amount {
        *self
            .balances
            .entry((address, asset))
            .or_insert_with(|| self.db.get_balance(&address, &asset).unwrap_or(0))
    }

    fn credit(&mut self, address: Address, asset: Asset, amount: Amount) {
        let current = self.balance(address, asset);
        self.balances.insert((address, asset), current.saturating_add(amount));
    }

    fn try_debit(&mut self, address: Address, asset: Asset, amount: Amount) -> bool {
        let current = self.balance(address, asset);
        if current < amount {
            return false;
        }
        self.balances.insert((address, asset), current - amount);
        true
    }
}

fn payment_to(unit: &Unit, address: Address) -> Vec<(Asset, Amount)> {
    let mut totals: BTreeMap<Asset, Amount> = BTreeMap::new();
    for message in &unit.messages {
        if !message.is_payment() {
            continue;
        }
        for output in &message.outputs {
            if output.address == address {
                *totals.entry(output.asset).or_insert(0) += output.amount;
            }
        }
    }
    totals.into_iter().collect()
}

fn trigger_data(unit: &Unit) -> serde_json::Value {
    unit.messages
        .iter()
        .find(|m| matches!(m.app, AppKind::Data))
        .and_then(|m| m.payload.clone())
        .unwrap_or(serde_json::Value::Null)
}

/// Builds the real unit an AA posts in response to a successful trigger
/// (§4.9 point 3, I9, P6). `causing` is the unit that funded this
/// execution — the real triggering unit at the top level, or the parent
/// AA's own response unit for a nested call — and becomes this unit's sole
/// parent. AAs hold no private key, so `authors[0].definition` is `None`
/// and `authentifiers` is empty: this unit is never re-validated through
/// `weave_crypto::verify_author`, it is written straight to storage by the
/// writer the same way genesis is, because every honest node derives the
/// identical response deterministically from the identical stable state
/// (§4.9's "Deterministic execution property") rather than trusting a
/// signature. `level`/`witnessed_level` are derived from `causing` directly
/// rather than recomputed via `weave-dag`'s graph walk, since a response
/// unit's only parent is already known and fixed; see DESIGN.md.
fn build_response_unit(
    aa_address: Address,
    causing: &Unit,
    messages: Vec<Message>,
) -> Result<(Unit, UnitProps), ComposeError> {
    let parent = causing.unit_hash.expect("causing unit is always hashed");
    let level = causing.level + 1;
    let witnessed_level = causing.level;
    let latest_included_mc_index = causing.main_chain_index.or(causing.latest_included_mc_index);

    let mut unit = Unit {
        unit_hash: None,
        version: "1.0".into(),
        alt_chain_id: String::new(),
        parent_units: vec![parent],
        last_ball: None,
        last_ball_unit: None,
        witness_list_unit: None,
        headers_commission: 0,
        payload_commission: 0,
        authors: vec![Author { address: aa_address, definition: None, authentifiers: BTreeMap::new() }],
        messages,
        timestamp: causing.timestamp,
        main_chain_index: None,
        level,
        latest_included_mc_index,
        is_on_main_chain: false,
        is_stable: false,
        is_free: true,
        sequence: Sequence::Good,
    };
    let hash = weave_crypto::canonical::unit_hash(&unit).map_err(|e| ComposeError::Hashing(e.to_string()))?;
    unit.unit_hash = Some(hash);

    let props = UnitProps {
        unit_hash: hash,
        parent_units: unit.parent_units.clone(),
        level,
        witnessed_level,
        latest_included_mc_index,
        main_chain_index: None,
        is_on_main_chain: false,
        is_stable: false,
        is_free: true,
        sequence: Sequence::Good,
        best_parent_unit: Some(parent),
        witness_list_unit: None,
        author_addresses: vec![aa_address],
        timestamp: causing.timestamp,
    };
    Ok((unit, props))
}

fn eval_formula_str<E: Env>(s: &str, ctx: &mut EvalContext<'_, E>) -> Result<Value, EvalError> {
    let expr: Expr = serde_json::from_str(s)
        .map_err(|e| EvalError::TypeError(format!("malformed formula: {e}")))?;
    eval(&expr, ctx)
}

/// A template field is either a literal JSON value or a JSON-encoded formula
/// string; a string that fails to parse as [`Expr`] is treated as a literal.
fn eval_field<E: Env>(value: &serde_json::Value, ctx: &mut EvalContext<'_, E>) -> Result<Value, EvalError> {
    if let serde_json::Value::String(s) = value {
        if let Ok(expr) = serde_json::from_str::<Expr>(s) {
            return eval(&expr, ctx);
        }
        return Ok(Value::Str(s.clone()));
    }
    Ok(Value::Json(value.clone()))
}

fn parse_asset_label(s: &str) -> Asset {
    if s == weave_core::constants::BASE_ASSET_LABEL {
        return Asset::Base;
    }
    UnitHash::from_hex(s).map(|h| Asset::Issued(AssetId(h))).unwrap_or(Asset::Base)
}

fn decimal_to_amount(d: Decimal) -> Result<Amount, String> {
    if d.is_sign_negative() || d.scale() != 0 {
        return Err("payment amount must be a non-negative integer".into());
    }
    d.to_string().parse::<Amount>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::aa::AaTrigger;

    fn hash(b: u8) -> UnitHash {
        UnitHash::from_bytes([b; 32])
    }

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn payment_unit(author: Address, recipient: Address, amount: Amount, unit_hash: UnitHash) -> Unit {
        Unit {
            unit_hash: Some(unit_hash),
            version: "1.0".into(),
            alt_chain_id: String::new(),
            parent_units: vec![hash(0)],
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            headers_commission: 0,
            payload_commission: 0,
            authors: vec![Author { address: author, definition: None, authentifiers: Default::default() }],
            messages: vec![Message {
                app: AppKind::Payment,
                payload_location: PayloadLocation::None,
                payload_hash: [0u8; 32],
                payload: None,
                inputs: vec![],
                outputs: vec![Output { address: recipient, amount, asset: Asset::Base, blinding: None, is_spent: false, denomination: None }],
            }],
            timestamp: 1000,
            main_chain_index: Some(5),
            level: 1,
            latest_included_mc_index: None,
            is_on_main_chain: false,
            is_stable: true,
            is_free: false,
            sequence: Sequence::Good,
        }
    }

    fn props_for(unit: &Unit) -> UnitProps {
        UnitProps {
            unit_hash: unit.unit_hash.unwrap(),
            parent_units: unit.parent_units.clone(),
            level: unit.level,
            witnessed_level: unit.level,
            latest_included_mc_index: None,
            main_chain_index: unit.main_chain_index,
            is_on_main_chain: false,
            is_stable: true,
            is_free: false,
            sequence: Sequence::Good,
            best_parent_unit: unit.parent_units.first().copied(),
            witness_list_unit: None,
            author_addresses: unit.author_addresses(),
            timestamp: unit.timestamp,
        }
    }

    fn open_engine() -> (tempfile::TempDir, Arc<StateEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        (dir, Arc::new(StateEngine::new(db)))
    }

    #[test]
    fn counter_aa_increments_state_and_posts_response_unit() {
        let (_dir, engine) = open_engine();
        let aa_address = addr(9);
        let author = addr(1);
        let trigger_unit_hash = hash(42);

        let unit = payment_unit(author, aa_address, 10_000, trigger_unit_hash);
        engine.save_joint(unit, props_for(&payment_unit(author, aa_address, 10_000, trigger_unit_hash)), vec![]).unwrap();

        let init = Expr::StateSet {
            name: Box::new(Expr::Str { value: "n".into() }),
            op: weave_formula::StateOp::AddAssign,
            value: Box::new(Expr::Num { value: "1".into() }),
        };
        let defn = AaDefinition {
            address: aa_address,
            unit: trigger_unit_hash,
            mci: 5,
            init: Some(serde_json::to_string(&init).unwrap()),
            messages: AaMessagesTemplate::Flat(vec![]),
            bounce_fees: BTreeMap::new(),
            base_aa: None,
            params: BTreeMap::new(),
            getters: BTreeMap::new(),
        };
        let trigger_row = AaTrigger { mci: 5, unit: trigger_unit_hash, address: aa_address };
        engine.commit_stabilization(5, vec![], vec![defn], vec![trigger_row]).unwrap();

        let composer = Composer::new(engine.clone());
        let responses = composer.run_due_triggers(10).unwrap();

        assert_eq!(responses.len(), 1);
        assert!(!responses[0].bounced);
        let response_hash = responses[0].response_unit.expect("successful trigger posts a response unit");

        // The aa_trigger row is consumed in the same commit (I9).
        assert!(engine.db.pop_due_triggers(10).unwrap().is_empty());

        // The response unit is real: hashed, stored, and the new free tip.
        let stored = engine.db.get_unit(&response_hash).unwrap().expect("response unit persisted");
        assert_eq!(stored.authors[0].address, aa_address);
        assert_eq!(stored.parent_units, vec![trigger_unit_hash]);
        let tips = engine.db.get_free_units().unwrap();
        assert!(tips.contains(&response_hash));
        assert!(!tips.contains(&trigger_unit_hash));

        let n = engine.db.get_state_var(&aa_address, "n").unwrap().unwrap();
        assert_eq!(n, weave_core::aa::AaValue::Decimal(rust_decimal::Decimal::from(1)));
        assert_eq!(engine.db.get_balance(&aa_address, &Asset::Base).unwrap(), 10_000);
    }

    #[test]
    fn payment_beyond_balance_bounces_and_refunds() {
        let (_dir, engine) = open_engine();
        let aa_address = addr(9);
        let author = addr(1);
        let recipient = addr(2);
        let trigger_unit_hash = hash(42);

        let unit = payment_unit(author, aa_address, 1_000, trigger_unit_hash);
        engine.save_joint(unit.clone(), props_for(&unit), vec![]).unwrap();

        let overpay = serde_json::json!({
            "app": "payment",
            "outputs": [{"address": recipient.to_b32(), "amount": "5000"}],
        });
        let mut fees = BTreeMap::new();
        fees.insert("base".to_string(), 100u128);
        let defn = AaDefinition {
            address: aa_address,
            unit: trigger_unit_hash,
            mci: 5,
            init: None,
            messages: AaMessagesTemplate::Flat(vec![overpay]),
            bounce_fees: fees,
            base_aa: None,
            params: BTreeMap::new(),
            getters: BTreeMap::new(),
        };
        let trigger_row = AaTrigger { mci: 5, unit: trigger_unit_hash, address: aa_address };
        engine.commit_stabilization(5, vec![], vec![defn], vec![trigger_row]).unwrap();

        let composer = Composer::new(engine.clone());
        let responses = composer.run_due_triggers(10).unwrap();

        assert!(responses[0].bounced);
        assert!(responses[0].response_unit.is_none());
        // AA keeps the declared bounce fee, author gets the rest back.
        assert_eq!(engine.db.get_balance(&aa_address, &Asset::Base).unwrap(), 100);
        assert_eq!(engine.db.get_balance(&author, &Asset::Base).unwrap(), 900);
    }

    #[test]
    fn aa_paying_aa_posts_a_chained_response_unit() {
        let (_dir, engine) = open_engine();
        let first = addr(9);
        let second = addr(10);
        let author = addr(1);
        let trigger_unit_hash = hash(42);

        let unit = payment_unit(author, first, 10_000, trigger_unit_hash);
        engine.save_joint(unit.clone(), props_for(&unit), vec![]).unwrap();

        let forward = serde_json::json!({
            "app": "payment",
            "outputs": [{"address": second.to_b32(), "amount": "4000"}],
        });
        let first_defn = AaDefinition {
            address: first,
            unit: trigger_unit_hash,
            mci: 5,
            init: None,
            messages: AaMessagesTemplate::Flat(vec![forward]),
            bounce_fees: BTreeMap::new(),
            base_aa: None,
            params: BTreeMap::new(),
            getters: BTreeMap::new(),
        };
        let second_defn = AaDefinition {
            address: second,
            unit: trigger_unit_hash,
            mci: 5,
            init: None,
            messages: AaMessagesTemplate::Flat(vec![]),
            bounce_fees: BTreeMap::new(),
            base_aa: None,
            params: BTreeMap::new(),
            getters: BTreeMap::new(),
        };
        let trigger_row = AaTrigger { mci: 5, unit: trigger_unit_hash, address: first };
        engine.commit_stabilization(5, vec![], vec![first_defn, second_defn], vec![trigger_row]).unwrap();

        let composer = Composer::new(engine.clone());
        let responses = composer.run_due_triggers(10).unwrap();

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| !r.bounced));
        let first_response = responses.iter().find(|r| r.aa_address == first).unwrap();
        let second_response = responses.iter().find(|r| r.aa_address == second).unwrap();
        // The second AA's trigger unit is the first AA's posted response unit.
        assert_eq!(Some(second_response.trigger_unit), first_response.response_unit);
        assert_eq!(engine.db.get_balance(&first, &Asset::Base).unwrap(), 6_000);
        assert_eq!(engine.db.get_balance(&second, &Asset::Base).unwrap(), 4_000);
    }
}

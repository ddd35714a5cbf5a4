//! The formula language interpreter (§4.8).
//!
//! Evaluation threads a [`Budget`] through every node so that a (definition,
//! trigger) pair costs the same `MAX_COMPLEXITY`/`MAX_OPS` on every node,
//! and an explicit `Locals`/state-mutation accumulator so that `$x = ...`
//! and `var['...'] = ...` are visible to later expressions in the same
//! evaluation without reaching back into the store until commit.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use weave_core::aa::Trigger;
use weave_core::constants::{MAX_HASH_INPUT_LENGTH, MAX_STATE_VAR_VALUE_LENGTH};
use weave_core::ids::Address;

use crate::ast::{Case, EncodeAlgo, Expr, HashAlgo, StateOp};
use crate::budget::{Budget, BudgetError};
use crate::env::Env;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Budget(BudgetError),
    UnknownLocal(String),
    TypeError(String),
    DivideByZero,
    HashInputTooLarge,
    StateValueTooLarge,
    MalformedAddress,
    /// `bounce` was reached: the whole trigger response is rolled back and
    /// `bounce_fees` are charged instead (§3 AA trigger, §4.8).
    Bounced(String),
}

impl From<BudgetError> for EvalError {
    fn from(e: BudgetError) -> Self {
        EvalError::Budget(e)
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Budget(e) => write!(f, "{e}"),
            EvalError::UnknownLocal(n) => write!(f, "unknown local ${n}"),
            EvalError::TypeError(msg) => write!(f, "type error: {msg}"),
            EvalError::DivideByZero => write!(f, "division by zero"),
            EvalError::HashInputTooLarge => write!(f, "hash input exceeds MAX_HASH_INPUT_LENGTH"),
            EvalError::StateValueTooLarge => write!(f, "state var value exceeds MAX_STATE_VAR_VALUE_LENGTH"),
            EvalError::MalformedAddress => write!(f, "malformed address"),
            EvalError::Bounced(reason) => write!(f, "bounced: {reason}"),
        }
    }
}

/// A `var['name']` write recorded during evaluation, applied atomically by
/// the AA composer (C9) only if the whole trigger evaluation completes
/// without bouncing.
#[derive(Debug, Clone, PartialEq)]
pub struct StateWrite {
    pub address: Address,
    pub name: String,
    pub value: Value,
}

/// Everything one formula evaluation accumulates as a side effect: local
/// variables, staged state writes, and response-unit key/value pairs.
pub struct EvalContext<'a, E: Env> {
    pub env: &'a E,
    pub self_address: Address,
    pub trigger: &'a Trigger,
    pub budget: Budget,
    locals: BTreeMap<String, Value>,
    state_writes: Vec<StateWrite>,
    response_vars: BTreeMap<String, Value>,
    frozen: bool,
}

impl<'a, E: Env> EvalContext<'a, E> {
    pub fn new(env: &'a E, self_address: Address, trigger: &'a Trigger) -> Self {
        Self {
            env,
            self_address,
            trigger,
            budget: Budget::default(),
            locals: BTreeMap::new(),
            state_writes: Vec::new(),
            response_vars: BTreeMap::new(),
            frozen: false,
        }
    }

    pub fn into_effects(self) -> (Vec<StateWrite>, BTreeMap<String, Value>) {
        (self.state_writes, self.response_vars)
    }

    fn current_state(&self, name: &str) -> Option<Value> {
        if let Some(w) = self.state_writes.iter().rev().find(|w| w.name == name) {
            return Some(w.value.clone());
        }
        self.env
            .state_var(&self.self_address, name)
            .as_ref()
            .map(Value::from_aa_value)
    }
}

/// Evaluate `expr`, returning its value or an [`EvalError`].
///
/// `bounce` propagates as `Err(EvalError::Bounced(..))` all the way to the
/// caller: there is no partial commit of a bounced trigger (I9).
pub fn eval<E: Env>(expr: &Expr, ctx: &mut EvalContext<'_, E>) -> Result<Value, EvalError> {
    ctx.budget.tick_complexity()?;
    ctx.budget.tick_ops(1)?;

    match expr {
        Expr::Num { value } => {
            let d: Decimal = value
                .parse()
                .map_err(|_| EvalError::TypeError(format!("not a number: {value}")))?;
            Ok(Value::Decimal(d))
        }
        Expr::Str { value } => Ok(Value::Str(value.clone())),
        Expr::Bool { value } => Ok(Value::Bool(*value)),

        Expr::Local { name } => ctx
            .locals
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownLocal(name.clone())),
        Expr::AssignLocal { name, value } => {
            let v = eval(value, ctx)?;
            ctx.locals.insert(name.clone(), v.clone());
            Ok(v)
        }

        Expr::StateGet { name } => {
            let name = eval(name, ctx)?.as_str();
            Ok(ctx.current_state(&name).unwrap_or(Value::Unset))
        }
        Expr::StateGetOr { name, default } => {
            let name = eval(name, ctx)?.as_str();
            match ctx.current_state(&name) {
                Some(v) => Ok(v),
                None => eval(default, ctx),
            }
        }
        Expr::StateSet { name, op, value } => {
            let name = eval(name, ctx)?.as_str();
            let rhs = eval(value, ctx)?;
            let new_value = match op {
                StateOp::Set => rhs,
                StateOp::OrSet => match ctx.current_state(&name) {
                    Some(existing) => existing,
                    None => rhs,
                },
                StateOp::AddAssign => {
                    let cur = ctx
                        .current_state(&name)
                        .and_then(|v| v.as_decimal())
                        .unwrap_or(Decimal::ZERO);
                    let rhs = rhs
                        .as_decimal()
                        .ok_or_else(|| EvalError::TypeError("+= requires a number".into()))?;
                    Value::Decimal(cur + rhs)
                }
                StateOp::SubAssign => {
                    let cur = ctx
                        .current_state(&name)
                        .and_then(|v| v.as_decimal())
                        .unwrap_or(Decimal::ZERO);
                    let rhs = rhs
                        .as_decimal()
                        .ok_or_else(|| EvalError::TypeError("-= requires a number".into()))?;
                    Value::Decimal(cur - rhs)
                }
            };
            if new_value.byte_len() > MAX_STATE_VAR_VALUE_LENGTH as usize {
                return Err(EvalError::StateValueTooLarge);
            }
            if !ctx.frozen {
                ctx.state_writes.push(StateWrite {
                    address: ctx.self_address,
                    name,
                    value: new_value.clone(),
                });
            }
            Ok(new_value)
        }

        Expr::Add(a, b) => arith(a, b, ctx, |x, y| Ok(x + y)),
        Expr::Sub(a, b) => arith(a, b, ctx, |x, y| Ok(x - y)),
        Expr::Mul(a, b) => arith(a, b, ctx, |x, y| Ok(x * y)),
        Expr::Div(a, b) => arith(a, b, ctx, |x, y| {
            if y.is_zero() {
                Err(EvalError::DivideByZero)
            } else {
                Ok(x / y)
            }
        }),
        Expr::Mod(a, b) => arith(a, b, ctx, |x, y| {
            if y.is_zero() {
                Err(EvalError::DivideByZero)
            } else {
                Ok(x % y)
            }
        }),
        Expr::Concat(parts) => {
            let mut s = String::new();
            for p in parts {
                s.push_str(&eval(p, ctx)?.as_str());
            }
            Ok(Value::Str(s))
        }

        Expr::Eq(a, b) => cmp(a, b, ctx, |o| o == std::cmp::Ordering::Equal, true),
        Expr::Ne(a, b) => cmp(a, b, ctx, |o| o != std::cmp::Ordering::Equal, true),
        Expr::Lt(a, b) => cmp(a, b, ctx, |o| o == std::cmp::Ordering::Less, false),
        Expr::Lte(a, b) => cmp(a, b, ctx, |o| o != std::cmp::Ordering::Greater, false),
        Expr::Gt(a, b) => cmp(a, b, ctx, |o| o == std::cmp::Ordering::Greater, false),
        Expr::Gte(a, b) => cmp(a, b, ctx, |o| o != std::cmp::Ordering::Less, false),

        Expr::And(parts) => {
            for p in parts {
                if !eval(p, ctx)?.as_bool() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expr::Or(parts) => {
            for p in parts {
                if eval(p, ctx)?.as_bool() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Not(e) => Ok(Value::Bool(!eval(e, ctx)?.as_bool())),

        Expr::If { cond, then, otherwise } => {
            if eval(cond, ctx)?.as_bool() {
                eval(then, ctx)
            } else if let Some(o) = otherwise {
                eval(o, ctx)
            } else {
                Ok(Value::Unset)
            }
        }

        Expr::Hash { algo, input } => {
            let bytes = eval(input, ctx)?.as_str().into_bytes();
            if bytes.len() > MAX_HASH_INPUT_LENGTH as usize {
                return Err(EvalError::HashInputTooLarge);
            }
            ctx.budget.tick_ops(1)?;
            match algo {
                HashAlgo::Sha256 => Ok(Value::Str(hex::encode(weave_crypto::sha256(&bytes)))),
                HashAlgo::Sha1 => Ok(Value::Str(hex::encode(weave_crypto::sha1(&bytes)))),
                HashAlgo::Chash160 => {
                    let def: serde_json::Value = serde_json::from_slice(&bytes)
                        .map_err(|_| EvalError::MalformedAddress)?;
                    let addr = weave_crypto::chash160(&def).map_err(|_| EvalError::MalformedAddress)?;
                    Ok(Value::Str(addr.to_b32()))
                }
            }
        }
        Expr::Encode { algo, input } => {
            let s = eval(input, ctx)?.as_str();
            ctx.budget.tick_ops(1)?;
            let encoded = match algo {
                EncodeAlgo::Base32 => weave_core::ids::base32_encode(s.as_bytes()),
                EncodeAlgo::Base64 => {
                    use base64::Engine;
                    base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
                }
                EncodeAlgo::Hex => hex::encode(s.as_bytes()),
            };
            Ok(Value::Str(encoded))
        }

        Expr::ObjectNew { fields } => {
            let mut map = serde_json::Map::new();
            for (k, v) in fields {
                let value = eval(v, ctx)?;
                map.insert(k.clone(), value_to_json(&value));
            }
            Ok(Value::Json(serde_json::Value::Object(map)))
        }
        Expr::ObjectIndex { object, key } => {
            let obj = eval(object, ctx)?;
            let key = eval(key, ctx)?.as_str();
            match obj {
                Value::Json(serde_json::Value::Object(map)) => Ok(map
                    .get(&key)
                    .map(json_to_value)
                    .unwrap_or(Value::Unset)),
                _ => Err(EvalError::TypeError("index of non-object".into())),
            }
        }
        Expr::Length { value } => {
            let v = eval(value, ctx)?;
            let len = match &v {
                Value::Str(s) => s.len(),
                Value::Json(serde_json::Value::Array(a)) => a.len(),
                Value::Json(serde_json::Value::Object(o)) => o.len(),
                _ => return Err(EvalError::TypeError("length of scalar".into())),
            };
            Ok(Value::Decimal(Decimal::from(len)))
        }
        Expr::Keys { value } => {
            let v = eval(value, ctx)?;
            match v {
                Value::Json(serde_json::Value::Object(o)) => {
                    let keys: Vec<serde_json::Value> =
                        o.keys().map(|k| serde_json::Value::String(k.clone())).collect();
                    Ok(Value::Json(serde_json::Value::Array(keys)))
                }
                _ => Err(EvalError::TypeError("keys of non-object".into())),
            }
        }
        Expr::Reverse { value } => {
            let v = eval(value, ctx)?;
            match v {
                Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
                Value::Json(serde_json::Value::Array(mut a)) => {
                    a.reverse();
                    Ok(Value::Json(serde_json::Value::Array(a)))
                }
                _ => Err(EvalError::TypeError("reverse of scalar".into())),
            }
        }

        Expr::Balance { asset } => {
            let asset_str = eval(asset, ctx)?.as_str();
            let asset = parse_asset(&asset_str);
            Ok(Value::Decimal(Decimal::from(ctx.env.balance(&ctx.self_address, &asset))))
        }
        Expr::AssetMeta { asset, field } => {
            let asset_str = eval(asset, ctx)?.as_str();
            let asset = parse_asset(&asset_str);
            Ok(ctx
                .env
                .asset_field(&asset, field)
                .map(Value::Str)
                .unwrap_or(Value::Unset))
        }
        Expr::DataFeed { oracles, feed_name } => {
            let addrs = parse_addresses(oracles)?;
            Ok(ctx
                .env
                .data_feed(&addrs, feed_name)
                .map(Value::Str)
                .unwrap_or(Value::Unset))
        }
        Expr::InDataFeed { oracles, feed_name, value } => {
            let addrs = parse_addresses(oracles)?;
            let needle = eval(value, ctx)?.as_str();
            let found = ctx
                .env
                .data_feed(&addrs, feed_name)
                .map(|v| v == needle)
                .unwrap_or(false);
            Ok(Value::Bool(found))
        }
        Expr::Attestation { attestor, address, field } => {
            let attestor = parse_address(&eval(attestor, ctx)?.as_str())?;
            let address = parse_address(&eval(address, ctx)?.as_str())?;
            Ok(ctx
                .env
                .attestation(&attestor, &address, field)
                .map(Value::Str)
                .unwrap_or(Value::Unset))
        }

        Expr::TriggerAddress => Ok(Value::Str(ctx.trigger.address.to_b32())),
        Expr::TriggerInitialAddress => Ok(Value::Str(ctx.trigger.initial_address.to_b32())),
        Expr::TriggerUnit => Ok(Value::Str(ctx.trigger.unit.to_hex())),
        Expr::TriggerInitialUnit => Ok(Value::Str(ctx.trigger.initial_unit.to_hex())),
        Expr::TriggerOutputs { asset } => {
            let asset = eval(asset, ctx)?.as_str();
            let amount = ctx.trigger.outputs.get(&asset).copied().unwrap_or(0);
            Ok(Value::Decimal(Decimal::from(amount)))
        }
        Expr::TriggerData { path } => {
            let path = eval(path, ctx)?.as_str();
            Ok(json_pointer_value(&ctx.trigger.data, &path))
        }

        // The id of the unit this trigger's response will be attached to is
        // assigned by the writer (C7) after evaluation completes, so it
        // resolves to `Unset` during evaluation itself.
        Expr::ResponseUnit => Ok(Value::Unset),
        Expr::ResponseSet { key, value } => {
            let key = eval(key, ctx)?.as_str();
            let v = eval(value, ctx)?;
            ctx.response_vars.insert(key, v.clone());
            Ok(v)
        }

        Expr::Now => Ok(Value::Decimal(Decimal::from(ctx.env.reference_timestamp()))),

        Expr::Block(exprs) => {
            let mut last = Value::Unset;
            for e in exprs {
                last = eval(e, ctx)?;
            }
            Ok(last)
        }
        Expr::Freeze => {
            // `freeze` (§4.8): the remaining formula may still read state and
            // compute a response, but further `var['...'] = ...` writes are
            // suppressed instead of staged.
            ctx.frozen = true;
            Ok(Value::Unset)
        }
        Expr::Delete { name } => {
            let name = eval(name, ctx)?.as_str();
            if !ctx.frozen {
                ctx.state_writes.push(StateWrite {
                    address: ctx.self_address,
                    name,
                    value: Value::Unset,
                });
            }
            Ok(Value::Unset)
        }
        Expr::Return { value } => eval(value, ctx),
        Expr::Bounce { reason } => {
            let reason = eval(reason, ctx)?.as_str();
            Err(EvalError::Bounced(reason))
        }

        Expr::Cases(cases) => eval_cases(cases, ctx),
    }
}

fn eval_cases<E: Env>(cases: &[Case], ctx: &mut EvalContext<'_, E>) -> Result<Value, EvalError> {
    for case in cases {
        match &case.if_expr {
            Some(cond) => {
                if eval(cond, ctx)?.as_bool() {
                    return eval(&case.body, ctx);
                }
            }
            None => return eval(&case.body, ctx),
        }
    }
    Ok(Value::Unset)
}

fn arith<E: Env>(
    a: &Expr,
    b: &Expr,
    ctx: &mut EvalContext<'_, E>,
    f: impl FnOnce(Decimal, Decimal) -> Result<Decimal, EvalError>,
) -> Result<Value, EvalError> {
    let x = eval(a, ctx)?
        .as_decimal()
        .ok_or_else(|| EvalError::TypeError("arithmetic on non-number".into()))?;
    let y = eval(b, ctx)?
        .as_decimal()
        .ok_or_else(|| EvalError::TypeError("arithmetic on non-number".into()))?;
    Ok(Value::Decimal(f(x, y)?))
}

fn cmp<E: Env>(
    a: &Expr,
    b: &Expr,
    ctx: &mut EvalContext<'_, E>,
    pred: impl FnOnce(std::cmp::Ordering) -> bool,
    allow_string_fallback: bool,
) -> Result<Value, EvalError> {
    let x = eval(a, ctx)?;
    let y = eval(b, ctx)?;
    let ordering = match (x.as_decimal(), y.as_decimal()) {
        (Some(dx), Some(dy)) => dx.cmp(&dy),
        _ if allow_string_fallback => x.as_str().cmp(&y.as_str()),
        _ => return Err(EvalError::TypeError("comparison on non-number".into())),
    };
    Ok(Value::Bool(pred(ordering)))
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Decimal(d) => serde_json::Number::from_f64(d.to_string().parse().unwrap_or(0.0))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Json(j) => j.clone(),
        Value::Unset => serde_json::Value::Null,
    }
}

/// Dotted-path lookup into `trigger.data` (e.g. `"a.b.0.c"`), used by
/// `trigger.data[...]` expressions.
fn json_pointer_value(root: &serde_json::Value, path: &str) -> Value {
    let mut cur = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        cur = match cur {
            serde_json::Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return Value::Unset,
            },
            serde_json::Value::Array(arr) => match segment.parse::<usize>().ok().and_then(|i| arr.get(i)) {
                Some(v) => v,
                None => return Value::Unset,
            },
            _ => return Value::Unset,
        };
    }
    json_to_value(cur)
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .to_string()
            .parse::<Decimal>()
            .map(Value::Decimal)
            .unwrap_or(Value::Unset),
        serde_json::Value::Null => Value::Unset,
        other => Value::Json(other.clone()),
    }
}

fn parse_asset(s: &str) -> weave_core::ids::Asset {
    if s == weave_core::constants::BASE_ASSET_LABEL {
        weave_core::ids::Asset::Base
    } else if let Ok(hash) = weave_core::ids::UnitHash::from_hex(s) {
        weave_core::ids::Asset::Issued(weave_core::ids::AssetId(hash))
    } else {
        weave_core::ids::Asset::Base
    }
}

fn parse_address(s: &str) -> Result<Address, EvalError> {
    Address::from_b32(s).ok_or(EvalError::MalformedAddress)
}

fn parse_addresses(ss: &[String]) -> Result<Vec<Address>, EvalError> {
    ss.iter().map(|s| parse_address(s)).collect()
}

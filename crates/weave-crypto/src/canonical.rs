//! Canonical encoding (C1): the sole source of truth for every hash and
//! signature in the system. `canonical_bytes` is deterministic across
//! platforms and produces the same byte sequence for the same logical value
//! regardless of map insertion order or float formatting quirks.

use serde_json::Value;
use thiserror::Error;

use weave_core::ids::{Address, Asset, BallHash, UnitHash};
use weave_core::unit::{AppKind, Author, Input, InputKind, Message, PayloadLocation, Unit};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("non-finite number")]
    NonFiniteNumber,
    #[error("null value")]
    NullValue,
    #[error("empty container")]
    EmptyContainer,
    #[error("unsupported type")]
    UnsupportedType,
}

/// Produce the deterministic UTF-8 byte sequence for `value`.
///
/// Rules: object keys sorted lexicographically; empty objects/arrays are
/// rejected unless `allow_empty`; numbers are written as their shortest
/// finite decimal representation; NaN/Infinity and `null` are rejected.
pub fn canonical_bytes(value: &Value, allow_empty: bool) -> Result<Vec<u8>, CanonicalError> {
    let mut out = Vec::new();
    write_value(value, allow_empty, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, allow_empty: bool, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    match value {
        Value::Null => Err(CanonicalError::NullValue),
        Value::Bool(b) => {
            out.extend_from_slice(if *b { b"true" } else { b"false" });
            Ok(())
        }
        Value::Number(n) => {
            let f = n.as_f64().ok_or(CanonicalError::NonFiniteNumber)?;
            if !f.is_finite() {
                return Err(CanonicalError::NonFiniteNumber);
            }
            out.extend_from_slice(shortest_decimal(n).as_bytes());
            Ok(())
        }
        Value::String(s) => {
            write_json_string(s, out);
            Ok(())
        }
        Value::Array(items) => {
            if items.is_empty() && !allow_empty {
                return Err(CanonicalError::EmptyContainer);
            }
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, allow_empty, out)?;
            }
            out.push(b']');
            Ok(())
        }
        Value::Object(map) => {
            if map.is_empty() && !allow_empty {
                return Err(CanonicalError::EmptyContainer);
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(k, out);
                out.push(b':');
                write_value(&map[*k], allow_empty, out)?;
            }
            out.push(b'}');
            Ok(())
        }
    }
}

fn shortest_decimal(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    let mut s = format!("{f}");
    if !s.contains('.') && !s.contains('e') {
        s.push_str(".0");
    }
    s
}

fn write_json_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes())
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

// ── Unit -> canonical Value ───────────────────────────────────────────────────

fn app_kind_str(k: &AppKind) -> &'static str {
    match k {
        AppKind::Payment => "payment",
        AppKind::Data => "data",
        AppKind::DataFeed => "data_feed",
        AppKind::Asset => "asset",
        AppKind::AssetAttestors => "asset_attestors",
        AppKind::Attestation => "attestation",
        AppKind::Profile => "profile",
        AppKind::Poll => "poll",
        AppKind::Vote => "vote",
        AppKind::Definition => "definition",
        AppKind::Text => "text",
        AppKind::DefinitionTemplate => "definition_template",
    }
}

fn input_kind_str(k: &InputKind) -> &'static str {
    match k {
        InputKind::Transfer => "transfer",
        InputKind::HeadersCommission => "headers_commission",
        InputKind::Witnessing => "witnessing",
        InputKind::Issue => "issue",
    }
}

fn asset_value(a: &Asset) -> Value {
    match a {
        Asset::Base => Value::String("base".to_string()),
        Asset::Issued(id) => Value::String(id.to_string()),
    }
}

fn input_to_value(i: &Input) -> Value {
    let mut m = serde_json::Map::new();
    m.insert("type".into(), Value::String(input_kind_str(&i.kind).into()));
    m.insert("address".into(), Value::String(i.address.to_string()));
    m.insert("asset".into(), asset_value(&i.asset));
    if let Some(u) = &i.src_unit {
        m.insert("unit".into(), Value::String(u.to_string()));
    }
    if let Some(mi) = i.src_message_index {
        m.insert("message_index".into(), Value::Number(mi.into()));
    }
    if let Some(oi) = i.src_output_index {
        m.insert("output_index".into(), Value::Number(oi.into()));
    }
    if let Some(sn) = i.serial_number {
        m.insert("serial_number".into(), Value::Number(sn.into()));
    }
    if let Some(amt) = i.amount {
        m.insert("amount".into(), Value::String(amt.to_string()));
    }
    Value::Object(m)
}

fn output_to_value(o: &weave_core::unit::Output) -> Value {
    let mut m = serde_json::Map::new();
    m.insert("address".into(), Value::String(o.address.to_string()));
    m.insert("amount".into(), Value::String(o.amount.to_string()));
    m.insert("asset".into(), asset_value(&o.asset));
    Value::Object(m)
}

fn message_to_value(msg: &Message) -> Value {
    let mut m = serde_json::Map::new();
    m.insert("app".into(), Value::String(app_kind_str(&msg.app).into()));
    m.insert(
        "payload_location".into(),
        Value::String(match msg.payload_location {
            PayloadLocation::Inline => "inline".into(),
            PayloadLocation::None => "none".into(),
        }),
    );
    m.insert(
        "payload_hash".into(),
        Value::String(hex::encode(msg.payload_hash)),
    );
    if msg.is_payment() {
        m.insert(
            "inputs".into(),
            Value::Array(msg.inputs.iter().map(input_to_value).collect()),
        );
        m.insert(
            "outputs".into(),
            Value::Array(msg.outputs.iter().map(output_to_value).collect()),
        );
    }
    if let Some(p) = &msg.payload {
        m.insert("payload".into(), p.clone());
    }
    Value::Object(m)
}

fn author_to_value(a: &Author) -> Value {
    let mut m = serde_json::Map::new();
    m.insert("address".into(), Value::String(a.address.to_string()));
    if let Some(def) = &a.definition {
        m.insert("definition".into(), def.clone());
    }
    Value::Object(m)
}

/// The field subset that is signed over and hashed into `unit_hash` (§4.1).
/// Excludes `authentifiers` (the signatures themselves) and all
/// engine-computed fields (`main_chain_index`, `level`, `is_stable`, ...).
pub fn unit_to_canonical_value(u: &Unit) -> Value {
    let mut m = serde_json::Map::new();
    m.insert("version".into(), Value::String(u.version.clone()));
    m.insert("alt".into(), Value::String(u.alt_chain_id.clone()));
    m.insert(
        "parent_units".into(),
        Value::Array(
            u.parent_units
                .iter()
                .map(|p| Value::String(p.to_string()))
                .collect(),
        ),
    );
    if let Some(lb) = &u.last_ball {
        m.insert("last_ball".into(), Value::String(lb.to_string()));
    }
    if let Some(lbu) = &u.last_ball_unit {
        m.insert("last_ball_unit".into(), Value::String(lbu.to_string()));
    }
    if let Some(wlu) = &u.witness_list_unit {
        m.insert("witness_list_unit".into(), Value::String(wlu.to_string()));
    }
    m.insert(
        "headers_commission".into(),
        Value::Number(u.headers_commission.into()),
    );
    m.insert(
        "payload_commission".into(),
        Value::Number(u.payload_commission.into()),
    );
    m.insert(
        "authors".into(),
        Value::Array(u.authors.iter().map(author_to_value).collect()),
    );
    m.insert(
        "messages".into(),
        Value::Array(u.messages.iter().map(message_to_value).collect()),
    );
    m.insert("timestamp".into(), Value::Number(u.timestamp.into()));
    Value::Object(m)
}

/// Compute `unit_hash` — a pure function of the unit's canonically encoded
/// content (I1). Genesis units have no parents, which is the one legitimate
/// empty array in this tree; everything else must be non-empty.
pub fn unit_hash(u: &Unit) -> Result<UnitHash, CanonicalError> {
    let value = unit_to_canonical_value(u);
    let bytes = canonical_bytes(&value, true)?;
    Ok(crate::hash::unit_hash_from_bytes(&bytes))
}

/// `ball_hash = H(unit, sorted(parent_balls), sorted(skiplist_balls), is_nonserial)`.
pub fn ball_hash(
    unit: &UnitHash,
    parent_balls: &[BallHash],
    skiplist_balls: &[BallHash],
    is_nonserial: bool,
) -> BallHash {
    let mut sorted_parents: Vec<String> = parent_balls.iter().map(|b| b.to_string()).collect();
    sorted_parents.sort();
    let mut sorted_skip: Vec<String> = skiplist_balls.iter().map(|b| b.to_string()).collect();
    sorted_skip.sort();

    let mut m = serde_json::Map::new();
    m.insert("unit".into(), Value::String(unit.to_string()));
    m.insert(
        "parent_balls".into(),
        Value::Array(sorted_parents.into_iter().map(Value::String).collect()),
    );
    m.insert(
        "skiplist_balls".into(),
        Value::Array(sorted_skip.into_iter().map(Value::String).collect()),
    );
    m.insert("is_nonserial".into(), Value::Bool(is_nonserial));
    let value = Value::Object(m);
    let bytes = canonical_bytes(&value, true).expect("ball hash input is well-formed");
    BallHash::from_bytes(crate::hash::blake3_hash(&bytes))
}

/// Derive a 160-bit address from an author's definition tree.
pub fn chash160(definition: &Value) -> Result<Address, CanonicalError> {
    let bytes = canonical_bytes(definition, false)?;
    let full = crate::hash::blake3_hash(&bytes);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&full[..20]);
    Ok(Address::from_bytes(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_sorted_regardless_of_insertion_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            canonical_bytes(&a, true).unwrap(),
            canonical_bytes(&b, true).unwrap()
        );
    }

    #[test]
    fn empty_array_rejected_by_default() {
        let v = json!([]);
        assert_eq!(
            canonical_bytes(&v, false).unwrap_err(),
            CanonicalError::EmptyContainer
        );
        assert!(canonical_bytes(&v, true).is_ok());
    }

    #[test]
    fn null_is_always_rejected() {
        let v = json!({"x": null});
        assert_eq!(
            canonical_bytes(&v, true).unwrap_err(),
            CanonicalError::NullValue
        );
    }

    #[test]
    fn chash160_is_deterministic() {
        let def = json!(["sig", {"pubkey": "abc"}]);
        assert_eq!(chash160(&def).unwrap(), chash160(&def).unwrap());
    }
}

//! The formula language's abstract syntax (§4.8).
//!
//! Formulas are authored and stored as JSON expression trees — the same
//! encoding already used for address definitions — rather than as the
//! bespoke curly-brace surface syntax of a historical implementation. This
//! keeps the whole protocol's embedded-language surface (addresses, AA
//! templates, formulas) on one canonical-JSON substrate instead of adding a
//! second bespoke text grammar, and was an explicit open-question decision
//! (see the design ledger).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Expr {
    Num { value: String },
    Str { value: String },
    Bool { value: bool },

    /// Local variable `$x` set earlier in the same evaluation.
    Local { name: String },
    /// `$x = e`
    AssignLocal { name: String, value: Box<Expr> },

    /// `var['name']`
    StateGet { name: Box<Expr> },
    /// `var['name'] otherwise default`
    StateGetOr { name: Box<Expr>, default: Box<Expr> },
    /// `var['name'] = e`, `var['name'] += e`, `var['name'] ||= e`, ...
    StateSet {
        name: Box<Expr>,
        op: StateOp,
        value: Box<Expr>,
    },

    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Concat(Vec<Expr>),

    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),

    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(default)]
        otherwise: Option<Box<Expr>>,
    },

    Hash { algo: HashAlgo, input: Box<Expr> },
    Encode { algo: EncodeAlgo, input: Box<Expr> },

    ObjectNew { fields: Vec<(String, Expr)> },
    ObjectIndex { object: Box<Expr>, key: Box<Expr> },
    Length { value: Box<Expr> },
    Keys { value: Box<Expr> },
    Reverse { value: Box<Expr> },

    Balance { asset: Box<Expr> },
    AssetMeta { asset: Box<Expr>, field: String },
    DataFeed { oracles: Vec<String>, feed_name: String },
    InDataFeed { oracles: Vec<String>, feed_name: String, value: Box<Expr> },
    Attestation { attestor: Box<Expr>, address: Box<Expr>, field: String },

    TriggerAddress,
    TriggerInitialAddress,
    TriggerUnit,
    TriggerInitialUnit,
    TriggerOutputs { asset: Box<Expr> },
    TriggerData { path: Box<Expr> },

    ResponseUnit,
    ResponseSet { key: Box<Expr>, value: Box<Expr> },

    Now,

    Block(Vec<Expr>),
    Freeze,
    Delete { name: Box<Expr> },
    Return { value: Box<Expr> },
    Bounce { reason: Box<Expr> },

    /// A `cases` list: the first `if` that evaluates true wins; a case with
    /// no `if` (the last one) is the default.
    Cases(Vec<Case>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Case {
    #[serde(default)]
    pub if_expr: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateOp {
    Set,
    OrSet,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgo {
    Sha256,
    Sha1,
    Chash160,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncodeAlgo {
    Base32,
    Base64,
    Hex,
}

//! The Autonomous Agent formula language: AST, runtime values, and a
//! deterministic, budget-bounded tree-walking interpreter (§4.8, §4.9).

pub mod ast;
pub mod budget;
pub mod env;
pub mod eval;
pub mod value;

pub use ast::{Case, EncodeAlgo, Expr, HashAlgo, StateOp};
pub use budget::{Budget, BudgetError};
pub use env::Env;
pub use eval::{eval, EvalContext, EvalError, StateWrite};
pub use value::Value;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;
    use weave_core::aa::{AaValue, Trigger};
    use weave_core::ids::{Address, Amount, Asset};

    use super::*;

    struct TestEnv {
        state: BTreeMap<(Address, String), AaValue>,
        balances: BTreeMap<(Address, Asset), Amount>,
        now: i64,
    }

    impl Env for TestEnv {
        fn state_var(&self, address: &Address, name: &str) -> Option<AaValue> {
            self.state.get(&(*address, name.to_string())).cloned()
        }
        fn balance(&self, address: &Address, asset: &Asset) -> Amount {
            self.balances.get(&(*address, *asset)).copied().unwrap_or(0)
        }
        fn data_feed(&self, _oracles: &[Address], _feed_name: &str) -> Option<String> {
            None
        }
        fn attestation(&self, _attestor: &Address, _address: &Address, _field: &str) -> Option<String> {
            None
        }
        fn asset_field(&self, _asset: &Asset, _field: &str) -> Option<String> {
            None
        }
        fn reference_timestamp(&self) -> i64 {
            self.now
        }
    }

    fn test_trigger(address: Address) -> Trigger {
        Trigger {
            address,
            initial_address: address,
            unit: weave_core::ids::UnitHash::from_bytes([7u8; 32]),
            initial_unit: weave_core::ids::UnitHash::from_bytes([7u8; 32]),
            outputs: [("base".to_string(), 1_000u128)].into_iter().collect(),
            data: serde_json::json!({"action": "deposit", "nested": {"n": 3}}),
        }
    }

    #[test]
    fn arithmetic_and_locals_evaluate() {
        let env = TestEnv { state: BTreeMap::new(), balances: BTreeMap::new(), now: 0 };
        let address = Address::from_bytes([1u8; 20]);
        let trigger = test_trigger(address);
        let mut ctx = EvalContext::new(&env, address, &trigger);

        let expr = Expr::AssignLocal {
            name: "x".into(),
            value: Box::new(Expr::Add(
                Box::new(Expr::Num { value: "2".into() }),
                Box::new(Expr::Num { value: "3".into() }),
            )),
        };
        let v = eval(&expr, &mut ctx).unwrap();
        assert_eq!(v.as_decimal(), Some(Decimal::from(5)));

        let read_back = eval(&Expr::Local { name: "x".into() }, &mut ctx).unwrap();
        assert_eq!(read_back.as_decimal(), Some(Decimal::from(5)));
    }

    #[test]
    fn state_add_assign_accumulates_without_touching_store() {
        let env = TestEnv { state: BTreeMap::new(), balances: BTreeMap::new(), now: 0 };
        let address = Address::from_bytes([2u8; 20]);
        let trigger = test_trigger(address);
        let mut ctx = EvalContext::new(&env, address, &trigger);

        let set = Expr::StateSet {
            name: Box::new(Expr::Str { value: "count".into() }),
            op: StateOp::AddAssign,
            value: Box::new(Expr::Num { value: "1".into() }),
        };
        eval(&set, &mut ctx).unwrap();
        let second = eval(&set, &mut ctx).unwrap();
        assert_eq!(second.as_decimal(), Some(Decimal::from(2)));

        let (writes, _) = ctx.into_effects();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes.last().unwrap().value.as_decimal(), Some(Decimal::from(2)));
    }

    #[test]
    fn bounce_short_circuits_evaluation() {
        let env = TestEnv { state: BTreeMap::new(), balances: BTreeMap::new(), now: 0 };
        let address = Address::from_bytes([3u8; 20]);
        let trigger = test_trigger(address);
        let mut ctx = EvalContext::new(&env, address, &trigger);

        let expr = Expr::Block(vec![
            Expr::AssignLocal { name: "x".into(), value: Box::new(Expr::Num { value: "1".into() }) },
            Expr::Bounce { reason: Box::new(Expr::Str { value: "nope".into() }) },
            Expr::AssignLocal { name: "y".into(), value: Box::new(Expr::Num { value: "2".into() }) },
        ]);
        let err = eval(&expr, &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::Bounced("nope".into()));
    }

    #[test]
    fn trigger_data_path_resolves_nested_field() {
        let env = TestEnv { state: BTreeMap::new(), balances: BTreeMap::new(), now: 0 };
        let address = Address::from_bytes([4u8; 20]);
        let trigger = test_trigger(address);
        let mut ctx = EvalContext::new(&env, address, &trigger);

        let expr = Expr::TriggerData { path: Box::new(Expr::Str { value: "nested.n".into() }) };
        let v = eval(&expr, &mut ctx).unwrap();
        assert_eq!(v.as_decimal(), Some(Decimal::from(3)));
    }

    #[test]
    fn runaway_recursion_hits_complexity_budget() {
        let env = TestEnv { state: BTreeMap::new(), balances: BTreeMap::new(), now: 0 };
        let address = Address::from_bytes([5u8; 20]);
        let trigger = test_trigger(address);
        let mut ctx = EvalContext::new(&env, address, &trigger);

        let mut expr = Expr::Num { value: "1".into() };
        for _ in 0..200 {
            expr = Expr::Add(Box::new(expr), Box::new(Expr::Num { value: "1".into() }));
        }
        let err = eval(&expr, &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::Budget(BudgetError::ComplexityExceeded));
    }
}

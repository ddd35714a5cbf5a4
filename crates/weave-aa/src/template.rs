//! Resolving a published [`AaDefinition`] into the template actually
//! evaluated for a trigger, including `base_aa` inheritance (§4.9 point 1).

use weave_core::aa::AaDefinition;
use weave_state::StateDb;

use crate::ComposeError;

/// Follows one `base_aa` hop and returns the template to evaluate.
///
/// A derived AA inherits its base's `init`/`messages`/`bounce_fees`/`getters`
/// wholesale; the base is looked up once, not recursively, matching how
/// `base_aa` is documented as a single indirection rather than a chain.
/// `params` are carried on `defn` itself and are visible to getters through
/// the definition record but are not substituted into the inherited
/// formula trees — full template parameterization is out of scope here
/// (see DESIGN.md).
pub fn resolve_effective_definition(
    db: &StateDb,
    defn: &AaDefinition,
) -> Result<AaDefinition, ComposeError> {
    let Some(base_address) = defn.base_aa else {
        return Ok(defn.clone());
    };
    let base = db
        .get_aa_definition(&base_address)?
        .ok_or(ComposeError::MissingBaseAa(base_address))?;
    Ok(AaDefinition {
        address: defn.address,
        unit: defn.unit,
        mci: defn.mci,
        init: base.init,
        messages: base.messages,
        bounce_fees: base.bounce_fees,
        base_aa: defn.base_aa,
        params: defn.params.clone(),
        getters: base.getters,
    })
}

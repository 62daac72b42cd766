//! Binding data contract builder.
//!
//! The contract is computed once per trigger binding and reused for every
//! dispatch.

use tracing::debug;

use crate::builtin::BUILT_IN_FIELDS;
use crate::BindingDataContract;

/// Returns the contract of the built-in fields alone.
pub fn built_in_contract() -> BindingDataContract {
    BUILT_IN_FIELDS
        .iter()
        .map(|field| (field.name, field.binding_type))
        .collect()
}

/// Merges an argument-specific contract over the built-in fields.
///
/// Entries from `argument_contract` are inserted or overwrite same-named
/// built-ins (case-insensitively); nothing is ever removed. An override may
/// change a built-in field's type, including the handle-typed fields.
pub fn build_contract(argument_contract: &BindingDataContract) -> BindingDataContract {
    let mut contract = built_in_contract();
    for (name, binding_type) in argument_contract.iter() {
        if let Some(previous) = contract.insert(name, *binding_type) {
            if previous != *binding_type {
                debug!(
                    field = name,
                    built_in = %previous,
                    overridden_by = %binding_type,
                    "Argument binding data redefines a built-in field type"
                );
            }
        }
    }
    contract
}

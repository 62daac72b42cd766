//! Binding data extraction.
//!
//! Each built-in field is an independent try-read: a read that fails or finds
//! nothing omits that field and never affects the others. Some properties are
//! only readable in certain message states (a message that was never received
//! has no delivery count), and one such field must not abort binding for the
//! rest.

use tracing::trace;

use crate::builtin::{FieldSource, BUILT_IN_FIELDS};
use crate::{BindingData, BindingValue, ClientEntityHandle, Message, PropertyError, ReceiverHandle};

/// Computes the binding data for one dispatch.
///
/// `receiver` and `client_entity` are the handles of the live listener, if
/// one exists. Entries in `value_data` (supplied by the argument binding)
/// overwrite same-named built-ins.
pub fn extract_binding_data(
    message: &Message,
    receiver: Option<&ReceiverHandle>,
    client_entity: Option<&ClientEntityHandle>,
    value_data: &BindingData,
) -> BindingData {
    let source = FieldSource {
        message,
        receiver,
        client_entity,
    };

    let mut data = BindingData::new();
    for field in BUILT_IN_FIELDS.iter() {
        try_add(&mut data, field.name, field.read(&source));
    }

    data.overlay(value_data);
    data
}

fn try_add(
    data: &mut BindingData,
    name: &'static str,
    read: Result<Option<BindingValue>, PropertyError>,
) {
    match read {
        Ok(Some(value)) => {
            data.insert(name, value);
        }
        Ok(None) => {}
        Err(error) => trace!(field = name, %error, "Binding data field unavailable"),
    }
}

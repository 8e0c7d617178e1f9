//! Small helpers over quick-xml shared by the descriptor parsers.

use crate::error::{DataError, DataResult};
use quick_xml::events::BytesStart;
use std::collections::HashMap;

/// Element name as an owned string.
pub(crate) fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Collect and unescape every attribute of `e`.
pub(crate) fn attributes(e: &BytesStart<'_>, resource: &str) -> DataResult<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| malformed(resource, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(resource, err))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

pub(crate) fn malformed(resource: &str, err: impl std::fmt::Display) -> DataError {
    DataError::configuration(format!("Malformed XML: {}", err), resource)
}

/// Fetch a required, non-blank attribute.
pub(crate) fn required<'a>(
    attrs: &'a HashMap<String, String>,
    key: &str,
    element: &str,
    resource: &str,
) -> DataResult<&'a str> {
    attrs
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            DataError::configuration(
                format!("<{}> is missing required attribute '{}'", element, key),
                resource,
            )
        })
}

//! Column label conversion between snake_case and camelCase.

use crate::models::RowMap;

/// `user_id` -> `userId`. An underscore followed by a lowercase ASCII
/// letter becomes that letter uppercased; everything else is kept.
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('_', Some(next)) if next.is_ascii_lowercase() => {
                out.push(next.to_ascii_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// `userId` -> `user_id`. Each uppercase ASCII letter becomes `_` plus its
/// lowercase form.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Rename every key of a decoded row to camelCase.
pub fn camel_case_keys(row: RowMap) -> RowMap {
    row.into_iter()
        .map(|(key, value)| (snake_to_camel(&key), value))
        .collect()
}

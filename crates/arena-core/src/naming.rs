//! Display-name disambiguation for engines that share a base name.

use std::collections::BTreeMap;

/// Attribute key holding the base display name.
pub const NAME_KEY: &str = "name";

/// Flat, ordered description of how an engine instance is configured.
pub type IdentityAttributes = BTreeMap<String, String>;

/// Compute a display name for each attribute set, in input order.
///
/// Entries whose base name is unique keep it. Within a group sharing a base
/// name, each member gets a suffix listing every attribute where some other
/// member of the group lacks it or has a different value, rendered as
/// `key=value` (or just `key` when the value is empty). Members that end up
/// with no distinguishing attributes keep the base name, so identical
/// configurations still collide.
///
/// # Examples
///
/// ```
/// use arena_core::{IdentityAttributes, NAME_KEY, disambiguate};
///
/// let engine = |hash: &str| {
///     IdentityAttributes::from([
///         (NAME_KEY.to_owned(), "Foo".to_owned()),
///         ("Hash".to_owned(), hash.to_owned()),
///     ])
/// };
/// let names = disambiguate(&[engine("16"), engine("32")]);
/// assert_eq!(names, ["Foo [Hash=16]", "Foo [Hash=32]"]);
/// ```
pub fn disambiguate(entries: &[IdentityAttributes]) -> Vec<String> {
    let base = |entry: &IdentityAttributes| entry.get(NAME_KEY).cloned().unwrap_or_default();

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        groups.entry(base(entry)).or_default().push(index);
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let name = base(entry);
            let group = &groups[&name];
            if group.len() < 2 {
                return name;
            }

            let distinguishing: Vec<String> = entry
                .iter()
                .filter(|(key, _)| key.as_str() != NAME_KEY)
                .filter(|(key, value)| {
                    group
                        .iter()
                        .filter(|&&other| other != index)
                        .any(|&other| entries[other].get(*key) != Some(*value))
                })
                .map(|(key, value)| {
                    if value.is_empty() {
                        key.clone()
                    } else {
                        format!("{key}={value}")
                    }
                })
                .collect();

            if distinguishing.is_empty() {
                name
            } else {
                format!("{name} [{}]", distinguishing.join(", "))
            }
        })
        .collect()
}

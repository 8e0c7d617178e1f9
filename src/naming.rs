//! Class-name convention shared with the entity generator.
//!
//! Generated artifacts for a table are named from its PascalCase base name
//! with a per-kind prefix or suffix. Hand-written code (the entity types,
//! the mapper `resultType` aliases) relies on these names.

use serde::{Deserialize, Serialize};

/// Kind of generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassMode {
    /// Table reference type
    Default,
    Pojo,
    Record,
    Interface,
    Dao,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorStrategy;

impl GeneratorStrategy {
    /// `user_account` -> `UserAccount`
    pub fn base_name(table: &str) -> String {
        table
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.flat_map(char::to_lowercase))
                        .collect(),
                    None => String::new(),
                }
            })
            .collect()
    }

    pub fn class_name(&self, table: &str, mode: ClassMode) -> String {
        let base = Self::base_name(table);
        match mode {
            ClassMode::Default => format!("J{}", base),
            ClassMode::Pojo => format!("{}Entity", base),
            ClassMode::Record => format!("{}Record", base),
            ClassMode::Interface => format!("I{}", base),
            ClassMode::Dao => format!("{}Dao", base),
        }
    }
}

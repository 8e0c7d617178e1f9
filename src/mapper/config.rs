//! Master mapper configuration (`mybatis-config.xml`).
//!
//! Only `<settings>` carries behavior. `<typeAliases>` and `<mappers>` are
//! accepted and skipped: result types are matched by short name and mapper
//! descriptors are found through the configured glob.

use crate::error::{DataError, DataResult};
use crate::mapper::resources::Resource;
use crate::mapper::xml::{attributes, element_name, malformed, required};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::time::Duration;
use tracing::debug;

const SETTING_MAP_UNDERSCORE: &str = "mapUnderscoreToCamelCase";
const SETTING_DEFAULT_TIMEOUT: &str = "defaultStatementTimeout";

/// Elements allowed directly under `<configuration>` that we ignore.
const SKIPPED_SECTIONS: &[&str] = &["typeAliases", "mappers", "properties"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapperConfiguration {
    pub map_underscore_to_camel_case: bool,
    /// Fallback timeout for statements that do not declare one.
    pub default_statement_timeout: Option<Duration>,
}

impl MapperConfiguration {
    pub fn load(resource: &Resource) -> DataResult<Self> {
        let xml = resource.read_to_string()?;
        Self::parse(&xml, &resource.location)
    }

    /// Parse the master descriptor. `resource` names it in errors.
    pub fn parse(xml: &str, resource: &str) -> DataResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut config = Self::default();
        let mut stack: Vec<String> = Vec::new();
        let mut seen_root = false;

        loop {
            let event = reader.read_event().map_err(|e| malformed(resource, e))?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let name = element_name(e);
                    let in_skipped = stack
                        .iter()
                        .any(|s| SKIPPED_SECTIONS.contains(&s.as_str()));

                    match (stack.last().map(String::as_str), name.as_str()) {
                        (None, "configuration") => seen_root = true,
                        (None, other) => {
                            return Err(DataError::configuration(
                                format!("Expected <configuration> root, found <{}>", other),
                                resource,
                            ));
                        }
                        _ if in_skipped => {}
                        (Some("configuration"), "settings") => {}
                        (Some("configuration"), section)
                            if SKIPPED_SECTIONS.contains(&section) =>
                        {
                            debug!(resource = %resource, section, "Skipping configuration section");
                        }
                        (Some("settings"), "setting") => {
                            let attrs = attributes(e, resource)?;
                            let key = required(&attrs, "name", "setting", resource)?;
                            let value = required(&attrs, "value", "setting", resource)?;
                            config.apply(key, value, resource)?;
                        }
                        (Some(parent), other) => {
                            return Err(DataError::configuration(
                                format!("Unsupported element <{}> inside <{}>", other, parent),
                                resource,
                            ));
                        }
                    }

                    if !is_empty {
                        stack.push(name);
                    }
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if stack.pop().as_deref() != Some(name.as_str()) {
                        return Err(malformed(resource, format!("unexpected </{}>", name)));
                    }
                }
                Event::Text(ref t) if stack.len() <= 2 => {
                    let text = t.unescape().map_err(|e| malformed(resource, e))?;
                    if !text.trim().is_empty() {
                        return Err(DataError::configuration(
                            format!("Unexpected text '{}'", text.trim()),
                            resource,
                        ));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(malformed(resource, format!("unclosed <{}>", open)));
        }
        if !seen_root {
            return Err(DataError::configuration("Missing <configuration> root", resource));
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str, resource: &str) -> DataResult<()> {
        match key {
            SETTING_MAP_UNDERSCORE => {
                self.map_underscore_to_camel_case = parse_bool(value).ok_or_else(|| {
                    DataError::configuration(
                        format!("Setting '{}' expects true or false, got '{}'", key, value),
                        resource,
                    )
                })?;
            }
            SETTING_DEFAULT_TIMEOUT => {
                let secs: u64 = value.parse().map_err(|_| {
                    DataError::configuration(
                        format!("Setting '{}' expects seconds, got '{}'", key, value),
                        resource,
                    )
                })?;
                self.default_statement_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            other => {
                return Err(DataError::configuration(
                    format!("Unknown setting '{}'", other),
                    resource,
                ));
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

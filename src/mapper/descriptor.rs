//! Mapping descriptors (`<mapper namespace="...">` XML files).
//!
//! Each descriptor declares static SQL statements under a namespace. `#{name}`
//! parameter markers are compiled to the datasource's positional
//! placeholders when the descriptor is loaded. Dynamic SQL elements and `${}`
//! text substitution are rejected.

use crate::error::{DataError, DataResult};
use crate::mapper::resources::Resource;
use crate::mapper::xml::{attributes, element_name, malformed, required};
use crate::models::DatabaseType;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::time::Duration;

const DYNAMIC_ELEMENTS: &[&str] = &[
    "if", "where", "foreach", "choose", "when", "otherwise", "trim", "set", "include", "bind",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    fn from_element(name: &str) -> Option<Self> {
        match name {
            "select" => Some(Self::Select),
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn element(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.element())
    }
}

/// One statement, ready to bind and run.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedStatement {
    /// `namespace.localId`
    pub id: String,
    pub kind: StatementKind,
    /// SQL with positional placeholders for the target dialect.
    pub sql: String,
    /// Parameter names in placeholder order; a name may repeat.
    pub param_names: Vec<String>,
    pub result_type: Option<String>,
    pub timeout: Option<Duration>,
    /// Descriptor this statement came from.
    pub resource: String,
}

#[derive(Debug, Clone)]
pub struct MapperDescriptor {
    pub namespace: String,
    pub resource: String,
    pub statements: Vec<MappedStatement>,
}

impl MapperDescriptor {
    pub fn load(resource: &Resource, db_type: DatabaseType) -> DataResult<Self> {
        let xml = resource.read_to_string()?;
        Self::parse(&xml, &resource.location, db_type)
    }

    pub fn parse(xml: &str, resource: &str, db_type: DatabaseType) -> DataResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut namespace: Option<String> = None;
        let mut statements: Vec<MappedStatement> = Vec::new();
        let mut current: Option<PendingStatement> = None;
        let mut depth = 0usize;

        loop {
            let event = reader.read_event().map_err(|e| malformed(resource, e))?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let name = element_name(e);

                    if current.is_some() {
                        return Err(unsupported_in_statement(&name, resource));
                    }

                    match (depth, name.as_str()) {
                        (0, "mapper") => {
                            let attrs = attributes(e, resource)?;
                            namespace =
                                Some(required(&attrs, "namespace", "mapper", resource)?.to_string());
                        }
                        (0, other) => {
                            return Err(DataError::configuration(
                                format!("Expected <mapper> root, found <{}>", other),
                                resource,
                            ));
                        }
                        (1, element) => {
                            let Some(kind) = StatementKind::from_element(element) else {
                                return Err(DataError::configuration(
                                    format!("Unsupported mapper element <{}>", element),
                                    resource,
                                ));
                            };
                            let attrs = attributes(e, resource)?;
                            let pending = PendingStatement::new(kind, &attrs, resource)?;
                            if is_empty {
                                return Err(DataError::configuration(
                                    format!("Statement '{}' has no SQL", pending.local_id),
                                    resource,
                                ));
                            }
                            current = Some(pending);
                        }
                        _ => return Err(unsupported_in_statement(&name, resource)),
                    }

                    if !is_empty {
                        depth += 1;
                    }
                }
                Event::Text(ref t) => {
                    let text = t.unescape().map_err(|e| malformed(resource, e))?;
                    match current.as_mut() {
                        Some(pending) => pending.body.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(DataError::configuration(
                                format!("Unexpected text '{}'", text.trim()),
                                resource,
                            ));
                        }
                    }
                }
                Event::CData(ref c) => match current.as_mut() {
                    Some(pending) => pending.body.push_str(&String::from_utf8_lossy(c)),
                    None => {
                        return Err(DataError::configuration(
                            "CDATA outside a statement",
                            resource,
                        ));
                    }
                },
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == 1 {
                        if let Some(pending) = current.take() {
                            let ns = namespace.as_deref().unwrap_or_default();
                            let statement = pending.finish(ns, resource, db_type)?;
                            if statements.iter().any(|s| s.id == statement.id) {
                                return Err(DataError::configuration(
                                    format!("Duplicate statement id '{}'", statement.id),
                                    resource,
                                ));
                            }
                            statements.push(statement);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(malformed(resource, "unclosed element"));
        }
        let namespace = namespace
            .ok_or_else(|| DataError::configuration("Missing <mapper> root", resource))?;

        Ok(Self {
            namespace,
            resource: resource.to_string(),
            statements,
        })
    }
}

fn unsupported_in_statement(name: &str, resource: &str) -> DataError {
    let message = if DYNAMIC_ELEMENTS.contains(&name) {
        format!("Dynamic SQL element <{}> is not supported", name)
    } else {
        format!("Unsupported element <{}> inside a statement", name)
    };
    DataError::configuration(message, resource)
}

struct PendingStatement {
    kind: StatementKind,
    local_id: String,
    result_type: Option<String>,
    timeout: Option<Duration>,
    body: String,
}

impl PendingStatement {
    fn new(
        kind: StatementKind,
        attrs: &HashMap<String, String>,
        resource: &str,
    ) -> DataResult<Self> {
        let element = kind.element();
        let local_id = required(attrs, "id", element, resource)?.to_string();

        if attrs.contains_key("resultMap") {
            return Err(DataError::configuration(
                format!("Statement '{}': resultMap is not supported, use resultType", local_id),
                resource,
            ));
        }

        let timeout = match attrs.get("timeout") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    DataError::configuration(
                        format!("Statement '{}': invalid timeout '{}'", local_id, raw),
                        resource,
                    )
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            kind,
            local_id,
            result_type: attrs.get("resultType").map(|s| s.trim().to_string()),
            timeout,
            body: String::new(),
        })
    }

    fn finish(
        self,
        namespace: &str,
        resource: &str,
        db_type: DatabaseType,
    ) -> DataResult<MappedStatement> {
        let id = format!("{}.{}", namespace, self.local_id);
        let (sql, param_names) = compile_sql(self.body.trim(), db_type)
            .map_err(|message| DataError::configuration(format!("Statement '{}': {}", id, message), resource))?;
        if sql.is_empty() {
            return Err(DataError::configuration(
                format!("Statement '{}' has no SQL", id),
                resource,
            ));
        }

        Ok(MappedStatement {
            id,
            kind: self.kind,
            sql,
            param_names,
            result_type: self.result_type,
            timeout: self.timeout,
            resource: resource.to_string(),
        })
    }
}

/// Replace `#{name}` markers (optionally `#{name,jdbcType=...}`) with
/// positional placeholders. Returns the rewritten SQL and the parameter
/// names in order.
pub fn compile_sql(body: &str, db_type: DatabaseType) -> Result<(String, Vec<String>), String> {
    if body.contains("${") {
        return Err("${} text substitution is not supported".to_string());
    }

    let mut sql = String::with_capacity(body.len());
    let mut names = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find("#{") {
        sql.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| "unterminated #{ marker".to_string())?;
        let name = after[..end].split(',').next().unwrap_or_default().trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(format!("invalid parameter marker '#{{{}}}'", &after[..end]));
        }
        names.push(name.to_string());
        sql.push_str(&db_type.placeholder(names.len()));
        rest = &after[end + 1..];
    }
    sql.push_str(rest);

    Ok((sql, names))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCE: &str = "classpath:mybatis-mapper/user/UserMapper.xml";

    const USER_MAPPER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE mapper PUBLIC "-//mybatis.org//DTD Mapper 3.0//EN" "http://mybatis.org/dtd/mybatis-3-mapper.dtd">
<mapper namespace="com.platform.datasource.platform.mapper.user.UserMapper">
    <!-- lookup by business key -->
    <select id="findUserByUserId" resultType="UserEntity" timeout="5">
        SELECT id, user_id, name, email, status
        FROM user
        WHERE user_id = #{userId,jdbcType=VARCHAR}
    </select>
    <update id="renameUser">
        UPDATE user SET name = #{name} WHERE user_id = #{userId}
    </update>
    <delete id="deleteInactive"><![CDATA[DELETE FROM user WHERE status < #{status}]]></delete>
</mapper>"#;

    #[test]
    fn test_parse_user_mapper() {
        let d = MapperDescriptor::parse(USER_MAPPER, RESOURCE, DatabaseType::MySQL).unwrap();
        assert_eq!(d.namespace, "com.platform.datasource.platform.mapper.user.UserMapper");
        assert_eq!(d.statements.len(), 3);

        let find = &d.statements[0];
        assert_eq!(
            find.id,
            "com.platform.datasource.platform.mapper.user.UserMapper.findUserByUserId"
        );
        assert_eq!(find.kind, StatementKind::Select);
        assert!(find.sql.starts_with("SELECT id, user_id"));
        assert!(find.sql.ends_with("WHERE user_id = ?"));
        assert_eq!(find.param_names, vec!["userId"]);
        assert_eq!(find.result_type.as_deref(), Some("UserEntity"));
        assert_eq!(find.timeout, Some(Duration::from_secs(5)));

        let delete = &d.statements[2];
        assert_eq!(delete.sql, "DELETE FROM user WHERE status < ?");
    }

    #[test]
    fn test_postgres_placeholders_numbered() {
        let d = MapperDescriptor::parse(USER_MAPPER, RESOURCE, DatabaseType::PostgreSQL).unwrap();
        assert_eq!(
            d.statements[1].sql,
            "UPDATE user SET name = $1 WHERE user_id = $2"
        );
        assert_eq!(d.statements[1].param_names, vec!["name", "userId"]);
    }

    #[test]
    fn test_dynamic_sql_rejected() {
        let xml = r#"<mapper namespace="n">
            <select id="q">SELECT * FROM t <where><if test="a != null">a = #{a}</if></where></select>
        </mapper>"#;
        let err = MapperDescriptor::parse(xml, RESOURCE, DatabaseType::MySQL).unwrap_err();
        assert!(matches!(err, DataError::Configuration { .. }));
        let msg = err.to_string();
        assert!(msg.contains("<where>"));
        assert!(msg.contains(RESOURCE));
    }

    #[test]
    fn test_text_substitution_rejected() {
        let xml = r#"<mapper namespace="n"><select id="q">SELECT * FROM ${table}</select></mapper>"#;
        let err = MapperDescriptor::parse(xml, RESOURCE, DatabaseType::MySQL).unwrap_err();
        assert!(err.to_string().contains("${}"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let xml = r#"<mapper namespace="n">
            <select id="q">SELECT 1</select>
            <select id="q">SELECT 2</select>
        </mapper>"#;
        let err = MapperDescriptor::parse(xml, RESOURCE, DatabaseType::SQLite).unwrap_err();
        assert!(err.to_string().contains("Duplicate statement id 'n.q'"));
    }

    #[test]
    fn test_structural_errors() {
        for xml in [
            r#"<mapper><select id="q">SELECT 1</select></mapper>"#,
            r#"<mapper namespace="n"><select>SELECT 1</select></mapper>"#,
            r#"<mapper namespace="n"><select id="q"/></mapper>"#,
            r#"<mapper namespace="n"><resultMap id="m"/></mapper>"#,
            r#"<mapper namespace="n"><select id="q" timeout="soon">SELECT 1</select></mapper>"#,
            r#"<mapper namespace="n"><select id="q">SELECT #{}</select></mapper>"#,
            r#"<mapper namespace="n"><select id="q">SELECT #{a</select></mapper>"#,
            r#"<configuration/>"#,
            r#"<mapper namespace="n"><select id="q">SELECT 1</select>"#,
        ] {
            assert!(
                MapperDescriptor::parse(xml, RESOURCE, DatabaseType::SQLite).is_err(),
                "{}",
                xml
            );
        }
    }

    #[test]
    fn test_compile_sql_repeated_name() {
        let (sql, names) =
            compile_sql("a = #{x} OR b = #{ x }", DatabaseType::PostgreSQL).unwrap();
        assert_eq!(sql, "a = $1 OR b = $2");
        assert_eq!(names, vec!["x", "x"]);
    }
}

//! Session factory and sessions for descriptor-backed statements.
//!
//! The factory is built once: it resolves the master configuration and every
//! mapping descriptor, compiles all statements for the datasource's dialect,
//! and fails as a whole if any piece is wrong. Sessions are cheap handles
//! that run statements by id on a pooled or transactional connection.

use crate::config::{DEFAULT_CONFIG_LOCATION, DEFAULT_MAPPER_LOCATIONS, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::db::{ConnectionProvider, TransactionContext};
use crate::error::{DataError, DataResult};
use crate::mapper::config::MapperConfiguration;
use crate::mapper::descriptor::{MappedStatement, MapperDescriptor, StatementKind};
use crate::mapper::naming::camel_case_keys;
use crate::mapper::resources::ResourceResolver;
use crate::models::{RowMap, SqlParam};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where to find descriptors and how to override the master settings.
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    pub config_location: String,
    /// Glob patterns; every match is loaded.
    pub mapper_locations: Vec<String>,
    /// Overrides `mapUnderscoreToCamelCase` from the master descriptor.
    pub map_underscore_to_camel_case: Option<bool>,
    /// Timeout for statements when neither the statement nor the master
    /// descriptor sets one.
    pub fallback_timeout: Duration,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            config_location: DEFAULT_CONFIG_LOCATION.to_string(),
            mapper_locations: vec![DEFAULT_MAPPER_LOCATIONS.to_string()],
            map_underscore_to_camel_case: None,
            fallback_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug)]
struct FactoryInner {
    provider: ConnectionProvider,
    configuration: MapperConfiguration,
    statements: HashMap<String, MappedStatement>,
    default_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SqlSessionFactory {
    inner: Arc<FactoryInner>,
}

impl SqlSessionFactory {
    /// Load and compile every descriptor. Nothing is kept on failure.
    pub fn build(
        provider: ConnectionProvider,
        resolver: &ResourceResolver,
        options: FactoryOptions,
    ) -> DataResult<Self> {
        let config_resource = resolver.resolve(&options.config_location)?;
        let mut configuration = MapperConfiguration::load(&config_resource)?;
        if let Some(forced) = options.map_underscore_to_camel_case {
            configuration.map_underscore_to_camel_case = forced;
        }

        let db_type = provider.db_type();
        let mut statements: HashMap<String, MappedStatement> = HashMap::new();
        let mut descriptors = 0usize;

        for pattern in &options.mapper_locations {
            for resource in resolver.resolve_pattern(pattern)? {
                let descriptor = MapperDescriptor::load(&resource, db_type)?;
                debug!(
                    resource = %resource.location,
                    namespace = %descriptor.namespace,
                    statements = descriptor.statements.len(),
                    "Loaded mapping descriptor"
                );
                for statement in descriptor.statements {
                    if let Some(existing) = statements.get(&statement.id) {
                        return Err(DataError::configuration(
                            format!(
                                "Duplicate statement id '{}' (already declared in {})",
                                statement.id, existing.resource
                            ),
                            resource.location.clone(),
                        ));
                    }
                    statements.insert(statement.id.clone(), statement);
                }
                descriptors += 1;
            }
        }

        if descriptors == 0 {
            return Err(DataError::configuration(
                "No mapping descriptors found",
                options.mapper_locations.join(", "),
            ));
        }

        let default_timeout = configuration
            .default_statement_timeout
            .unwrap_or(options.fallback_timeout);

        info!(
            config = %config_resource.location,
            descriptors,
            statements = statements.len(),
            map_underscore_to_camel_case = configuration.map_underscore_to_camel_case,
            "Session factory built"
        );

        Ok(Self {
            inner: Arc::new(FactoryInner {
                provider,
                configuration,
                statements,
                default_timeout,
            }),
        })
    }

    pub fn configuration(&self) -> &MapperConfiguration {
        &self.inner.configuration
    }

    pub fn provider(&self) -> &ConnectionProvider {
        &self.inner.provider
    }

    pub fn statement(&self, id: &str) -> Option<&MappedStatement> {
        self.inner.statements.get(id)
    }

    /// Every statement id, sorted.
    pub fn statement_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.inner.statements.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// A session that borrows a pooled connection per statement.
    pub fn open_session(&self) -> SqlSession {
        SqlSession {
            factory: self.clone(),
            provider: self.inner.provider.clone(),
        }
    }

    /// A session whose statements run on `tx`'s connection.
    pub fn open_session_in(&self, tx: &TransactionContext) -> SqlSession {
        SqlSession {
            factory: self.clone(),
            provider: self.inner.provider.with_transaction(tx),
        }
    }
}

/// Parameters for one statement call.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MapperParams {
    #[default]
    None,
    /// One value, bound to every marker.
    Single(SqlParam),
    /// Values in marker order.
    Positional(Vec<SqlParam>),
    /// Values by marker name.
    Named(HashMap<String, SqlParam>),
}

impl MapperParams {
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlParam>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Named parameters from the fields of a serializable struct.
    pub fn from_object<T: Serialize>(value: &T) -> DataResult<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| DataError::invalid_input(format!("Cannot serialize parameters: {}", e)))?;
        let JsonValue::Object(fields) = json else {
            return Err(DataError::invalid_input("Parameter object must serialize to a map"));
        };
        fields
            .into_iter()
            .map(|(k, v)| json_to_param(&k, v).map(|p| (k, p)))
            .collect::<DataResult<HashMap<_, _>>>()
            .map(Self::Named)
    }

    fn bind(self, statement: &MappedStatement) -> DataResult<Vec<SqlParam>> {
        let names = &statement.param_names;
        match self {
            Self::None if names.is_empty() => Ok(Vec::new()),
            Self::None => Err(DataError::mapping(
                &statement.id,
                format!("missing parameter '{}'", names[0]),
            )),
            Self::Single(value) => Ok(vec![value; names.len()]),
            Self::Positional(values) if values.len() == names.len() => Ok(values),
            Self::Positional(values) => Err(DataError::mapping(
                &statement.id,
                format!("expected {} parameters, got {}", names.len(), values.len()),
            )),
            Self::Named(map) => names
                .iter()
                .map(|name| {
                    map.get(name).cloned().ok_or_else(|| {
                        DataError::mapping(&statement.id, format!("missing parameter '{}'", name))
                    })
                })
                .collect(),
        }
    }
}

fn json_to_param(key: &str, value: JsonValue) -> DataResult<SqlParam> {
    match value {
        JsonValue::Null => Ok(SqlParam::Null),
        JsonValue::Bool(b) => Ok(SqlParam::Bool(b)),
        JsonValue::Number(n) => n
            .as_i64()
            .map(SqlParam::Int)
            .or_else(|| n.as_f64().map(SqlParam::Float))
            .ok_or_else(|| DataError::invalid_input(format!("Parameter '{}' is out of range", key))),
        JsonValue::String(s) => Ok(SqlParam::String(s)),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(DataError::invalid_input(format!(
            "Parameter '{}' must be a scalar",
            key
        ))),
    }
}

impl From<SqlParam> for MapperParams {
    fn from(value: SqlParam) -> Self {
        Self::Single(value)
    }
}

impl From<&str> for MapperParams {
    fn from(value: &str) -> Self {
        Self::Single(value.into())
    }
}

impl From<i64> for MapperParams {
    fn from(value: i64) -> Self {
        Self::Single(value.into())
    }
}

impl From<Vec<SqlParam>> for MapperParams {
    fn from(values: Vec<SqlParam>) -> Self {
        Self::Positional(values)
    }
}

impl From<HashMap<String, SqlParam>> for MapperParams {
    fn from(map: HashMap<String, SqlParam>) -> Self {
        Self::Named(map)
    }
}

impl From<()> for MapperParams {
    fn from(_: ()) -> Self {
        Self::None
    }
}

/// Runs statements by id. Obtain one from `SqlSessionFactory`.
#[derive(Debug, Clone)]
pub struct SqlSession {
    factory: SqlSessionFactory,
    provider: ConnectionProvider,
}

impl SqlSession {
    pub fn is_transactional(&self) -> bool {
        self.provider.transaction().is_some()
    }

    /// Zero rows is `Ok(None)`; more than one row is a mapping error.
    pub async fn select_one<T: DeserializeOwned>(
        &self,
        id: &str,
        params: impl Into<MapperParams>,
    ) -> DataResult<Option<T>> {
        let statement = self.statement(id, StatementKind::Select)?;
        check_result_type::<T>(statement)?;
        let mut rows = self.fetch(statement, params.into()).await?;
        if rows.len() > 1 {
            return Err(DataError::mapping(
                id,
                format!("expected at most one row, got {}", rows.len()),
            ));
        }
        rows.pop().map(|row| materialize(id, row)).transpose()
    }

    pub async fn select_list<T: DeserializeOwned>(
        &self,
        id: &str,
        params: impl Into<MapperParams>,
    ) -> DataResult<Vec<T>> {
        let statement = self.statement(id, StatementKind::Select)?;
        check_result_type::<T>(statement)?;
        self.fetch(statement, params.into())
            .await?
            .into_iter()
            .map(|row| materialize(id, row))
            .collect()
    }

    /// Rows as maps, keys converted when the naming policy is on.
    pub async fn select_maps(
        &self,
        id: &str,
        params: impl Into<MapperParams>,
    ) -> DataResult<Vec<RowMap>> {
        let statement = self.statement(id, StatementKind::Select)?;
        self.fetch(statement, params.into()).await
    }

    pub async fn insert(&self, id: &str, params: impl Into<MapperParams>) -> DataResult<u64> {
        let statement = self.statement(id, StatementKind::Insert)?;
        self.execute(statement, params.into()).await
    }

    pub async fn update(&self, id: &str, params: impl Into<MapperParams>) -> DataResult<u64> {
        let statement = self.statement(id, StatementKind::Update)?;
        self.execute(statement, params.into()).await
    }

    pub async fn delete(&self, id: &str, params: impl Into<MapperParams>) -> DataResult<u64> {
        let statement = self.statement(id, StatementKind::Delete)?;
        self.execute(statement, params.into()).await
    }

    fn statement(&self, id: &str, expected: StatementKind) -> DataResult<&MappedStatement> {
        let statement = self
            .factory
            .statement(id)
            .ok_or_else(|| DataError::mapping(id, "no such mapped statement"))?;
        if statement.kind != expected {
            return Err(DataError::mapping(
                id,
                format!("statement is a <{}>, not a <{}>", statement.kind, expected),
            ));
        }
        Ok(statement)
    }

    fn timeout_for(&self, statement: &MappedStatement) -> Duration {
        statement.timeout.unwrap_or(self.factory.inner.default_timeout)
    }

    async fn fetch(
        &self,
        statement: &MappedStatement,
        params: MapperParams,
    ) -> DataResult<Vec<RowMap>> {
        let bound = params.bind(statement)?;
        debug!(statement = %statement.id, transactional = self.is_transactional(), "Running mapped select");
        let mut lease = self.provider.acquire().await?;
        let rows = lease
            .fetch_rows(&statement.sql, &bound, self.timeout_for(statement))
            .await?;

        if self.factory.configuration().map_underscore_to_camel_case {
            Ok(rows.into_iter().map(camel_case_keys).collect())
        } else {
            Ok(rows)
        }
    }

    async fn execute(&self, statement: &MappedStatement, params: MapperParams) -> DataResult<u64> {
        let bound = params.bind(statement)?;
        debug!(statement = %statement.id, transactional = self.is_transactional(), "Running mapped write");
        let mut lease = self.provider.acquire().await?;
        lease
            .execute(&statement.sql, &bound, self.timeout_for(statement))
            .await
    }
}

/// When a statement names a result type, the target type's short name must
/// match it. Lowercase aliases (`map`, `string`, ...) and generic targets
/// are not checked.
fn check_result_type<T>(statement: &MappedStatement) -> DataResult<()> {
    let Some(declared) = statement.result_type.as_deref() else {
        return Ok(());
    };
    let declared = declared.rsplit('.').next().unwrap_or(declared);
    if declared.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Ok(());
    }

    let target = std::any::type_name::<T>();
    if target.contains('<') {
        return Ok(());
    }
    let target = target.rsplit("::").next().unwrap_or(target);
    if target != declared {
        return Err(DataError::mapping(
            &statement.id,
            format!("declared resultType {} but caller asked for {}", declared, target),
        ));
    }
    Ok(())
}

fn materialize<T: DeserializeOwned>(id: &str, row: RowMap) -> DataResult<T> {
    serde_json::from_value(JsonValue::Object(row)).map_err(|e| DataError::mapping(id, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSourceProperties;
    use crate::db::{DataSource, TransactionCoordinator, executor};
    use serde::Deserialize;
    use std::fs;
    use std::path::Path;

    const NS: &str = "test.ItemMapper";

    const CONFIG: &str = r#"<configuration>
        <settings><setting name="mapUnderscoreToCamelCase" value="false"/></settings>
    </configuration>"#;

    const MAPPER: &str = r#"<mapper namespace="test.ItemMapper">
        <select id="findById" resultType="Item">SELECT item_id, item_name FROM items WHERE item_id = #{id}</select>
        <select id="findAll" resultType="Item">SELECT item_id, item_name FROM items ORDER BY item_id</select>
        <select id="findByName" resultType="map">SELECT item_id FROM items WHERE item_name = #{name}</select>
        <insert id="insert">INSERT INTO items (item_id, item_name) VALUES (#{id}, #{name})</insert>
        <update id="rename">UPDATE items SET item_name = #{name} WHERE item_id = #{id}</update>
        <delete id="deleteById">DELETE FROM items WHERE item_id = #{id}</delete>
    </mapper>"#;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Item {
        item_id: i64,
        item_name: String,
    }

    #[derive(Debug, Deserialize)]
    struct Other {}

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    async fn data_source() -> DataSource {
        let props = DataSourceProperties::new("sqlite::memory:").unwrap();
        let ds = DataSource::connect(&props).await.unwrap();
        let mut conn = ds.acquire().await.unwrap();
        executor::execute(
            conn.as_connection(),
            "CREATE TABLE items (item_id INTEGER PRIMARY KEY, item_name TEXT NOT NULL)",
            &[],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        ds
    }

    fn options(camel: Option<bool>) -> FactoryOptions {
        FactoryOptions {
            map_underscore_to_camel_case: camel,
            ..FactoryOptions::default()
        }
    }

    fn resources() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mybatis-config.xml", CONFIG);
        write(dir.path(), "mybatis-mapper/item/ItemMapper.xml", MAPPER);
        dir
    }

    #[tokio::test]
    async fn test_crud_through_session() {
        let dir = resources();
        let resolver = ResourceResolver::new([dir.path()]);
        let ds = data_source().await;
        let factory =
            SqlSessionFactory::build(ConnectionProvider::new(ds), &resolver, options(Some(true)))
                .unwrap();
        assert!(factory.configuration().map_underscore_to_camel_case);
        assert_eq!(factory.statement_ids().len(), 6);

        let session = factory.open_session();
        let id = |local: &str| format!("{}.{}", NS, local);

        let params = MapperParams::named([
            ("id", SqlParam::Int(1)),
            ("name", SqlParam::from("anvil")),
        ]);
        assert_eq!(session.insert(&id("insert"), params).await.unwrap(), 1);
        session
            .insert(&id("insert"), vec![SqlParam::Int(2), SqlParam::from("bolt")])
            .await
            .unwrap();

        let item: Option<Item> = session.select_one(&id("findById"), 1i64).await.unwrap();
        assert_eq!(
            item,
            Some(Item {
                item_id: 1,
                item_name: "anvil".to_string()
            })
        );

        let missing: Option<Item> = session.select_one(&id("findById"), 99i64).await.unwrap();
        assert!(missing.is_none());

        let all: Vec<Item> = session.select_list(&id("findAll"), ()).await.unwrap();
        assert_eq!(all.len(), 2);

        let maps = session.select_maps(&id("findByName"), "bolt").await.unwrap();
        assert_eq!(maps[0].get("itemId"), Some(&JsonValue::from(2)));

        let renamed = session
            .update(
                &id("rename"),
                MapperParams::named([("id", SqlParam::Int(2)), ("name", SqlParam::from("nut"))]),
            )
            .await
            .unwrap();
        assert_eq!(renamed, 1);
        assert_eq!(session.delete(&id("deleteById"), 1i64).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_select_one_with_many_rows_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mybatis-config.xml", "<configuration/>");
        write(
            dir.path(),
            "mybatis-mapper/M.xml",
            r#"<mapper namespace="m"><select id="all">SELECT item_id FROM items</select></mapper>"#,
        );
        let ds = data_source().await;
        let factory = SqlSessionFactory::build(
            ConnectionProvider::new(ds.clone()),
            &ResourceResolver::new([dir.path()]),
            options(None),
        )
        .unwrap();
        assert!(!factory.configuration().map_underscore_to_camel_case);

        let mut conn = ds.acquire().await.unwrap();
        executor::execute(
            conn.as_connection(),
            "INSERT INTO items (item_id, item_name) VALUES (1, 'a'), (2, 'b')",
            &[],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        drop(conn);

        let err = factory
            .open_session()
            .select_one::<RowMap>("m.all", ())
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Mapping { .. }));
    }

    #[tokio::test]
    async fn test_statement_misuse() {
        let dir = resources();
        let factory = SqlSessionFactory::build(
            ConnectionProvider::new(data_source().await),
            &ResourceResolver::new([dir.path()]),
            options(Some(true)),
        )
        .unwrap();
        let session = factory.open_session();

        let err = session.update(&format!("{}.insert", NS), ()).await.unwrap_err();
        assert!(err.to_string().contains("not a <update>"));

        let err = session.delete("test.ItemMapper.nope", ()).await.unwrap_err();
        assert!(err.to_string().contains("no such mapped statement"));

        let err = session
            .select_one::<Item>(&format!("{}.findById", NS), ())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing parameter 'id'"));

        let err = session
            .select_one::<Other>(&format!("{}.findById", NS), 1i64)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("declared resultType Item"));
    }

    #[tokio::test]
    async fn test_build_failures() {
        let ds = data_source().await;
        let provider = ConnectionProvider::new(ds);

        // Missing master descriptor.
        let empty = tempfile::tempdir().unwrap();
        let err = SqlSessionFactory::build(
            provider.clone(),
            &ResourceResolver::new([empty.path()]),
            options(None),
        )
        .unwrap_err();
        assert!(err.to_string().contains("classpath:mybatis-config.xml"));

        // Master present, no descriptors.
        write(empty.path(), "mybatis-config.xml", CONFIG);
        let err = SqlSessionFactory::build(
            provider.clone(),
            &ResourceResolver::new([empty.path()]),
            options(None),
        )
        .unwrap_err();
        assert!(err.to_string().contains("No mapping descriptors found"));

        // Same statement id in two descriptors.
        let dir = resources();
        write(dir.path(), "mybatis-mapper/copy/ItemMapper.xml", MAPPER);
        let err = SqlSessionFactory::build(
            provider,
            &ResourceResolver::new([dir.path()]),
            options(None),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::Configuration { .. }));
        assert!(err.to_string().contains("Duplicate statement id"));
    }

    #[tokio::test]
    async fn test_session_in_transaction_rolls_back() {
        let dir = resources();
        let ds = data_source().await;
        let coordinator = TransactionCoordinator::new(ds.clone());
        let factory = SqlSessionFactory::build(
            ConnectionProvider::new(ds),
            &ResourceResolver::new([dir.path()]),
            options(Some(true)),
        )
        .unwrap();

        let tx = coordinator.begin().await.unwrap();
        let session = factory.open_session_in(&tx);
        assert!(session.is_transactional());
        session
            .insert(
                &format!("{}.insert", NS),
                MapperParams::named([("id", SqlParam::Int(7)), ("name", SqlParam::from("gear"))]),
            )
            .await
            .unwrap();
        let seen: Option<Item> = session
            .select_one(&format!("{}.findById", NS), 7i64)
            .await
            .unwrap();
        assert!(seen.is_some());
        coordinator.rollback(&tx).await.unwrap();

        let after: Option<Item> = factory
            .open_session()
            .select_one(&format!("{}.findById", NS), 7i64)
            .await
            .unwrap();
        assert!(after.is_none());
    }

    #[test]
    fn test_params_from_object() {
        #[derive(Serialize)]
        struct Args {
            id: i64,
            name: Option<String>,
        }
        let params = MapperParams::from_object(&Args { id: 3, name: None }).unwrap();
        let MapperParams::Named(map) = params else {
            panic!("expected named parameters");
        };
        assert_eq!(map.get("id"), Some(&SqlParam::Int(3)));
        assert_eq!(map.get("name"), Some(&SqlParam::Null));

        assert!(MapperParams::from_object(&vec![1, 2]).is_err());
    }
}

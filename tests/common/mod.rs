//! Shared setup for integration tests: a file-backed SQLite database plus
//! mapper resources in a temporary directory.

#![allow(dead_code)]

use platform_datasource::config::DataSourceProperties;
use platform_datasource::dsl::QuerySettings;
use platform_datasource::entity::user::{self, user_table};
use platform_datasource::mapper::{FactoryOptions, ResourceResolver};
use platform_datasource::models::SqlParam;
use platform_datasource::Platform;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

pub const CONFIG_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<configuration>
    <settings>
        <setting name="mapUnderscoreToCamelCase" value="false"/>
        <setting name="defaultStatementTimeout" value="30"/>
    </settings>
</configuration>"#;

pub const USER_MAPPER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mapper namespace="com.platform.datasource.platform.mapper.user.UserMapper">
    <select id="findUserByUserId" resultType="UserEntity">
        SELECT id, user_id, name, email, status FROM user WHERE user_id = #{userId}
    </select>
    <select id="countUsers" resultType="map">
        SELECT COUNT(*) AS total_users FROM user
    </select>
    <insert id="insertUser">
        INSERT INTO user (id, user_id, name, email, status)
        VALUES (#{id}, #{userId}, #{name}, #{email}, #{status})
    </insert>
</mapper>"#;

pub const CREATE_USER_TABLE: &str = "CREATE TABLE user (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT,
    status TEXT
)";

pub struct TestEnv {
    pub platform: Platform,
    pub dir: TempDir,
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn write_resources(root: &Path) {
    write_file(root, "mybatis-config.xml", CONFIG_XML);
    write_file(root, "mybatis-mapper/user/UserMapper.xml", USER_MAPPER_XML);
}

pub fn sqlite_props(dir: &Path, max_pool_size: u32, acquire_timeout: Duration) -> DataSourceProperties {
    let url = format!("sqlite:{}", dir.join("platform.db").display());
    DataSourceProperties::new(url)
        .unwrap()
        .with_pool_size(1, max_pool_size)
        .unwrap()
        .with_connection_timeout(acquire_timeout)
        .unwrap()
}

/// Build a platform over a fresh database with the `user` table created.
pub async fn setup(max_pool_size: u32, settings: QuerySettings) -> TestEnv {
    setup_with_timeout(max_pool_size, settings, Duration::from_secs(5)).await
}

pub async fn setup_with_timeout(
    max_pool_size: u32,
    settings: QuerySettings,
    acquire_timeout: Duration,
) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    write_resources(dir.path());

    let props = sqlite_props(dir.path(), max_pool_size, acquire_timeout);
    let resolver = ResourceResolver::new([dir.path()]);
    let platform = Platform::from_parts(&props, &resolver, settings, FactoryOptions::default())
        .await
        .unwrap();
    platform.dsl().execute_sql(CREATE_USER_TABLE, &[]).await.unwrap();

    TestEnv { platform, dir }
}

pub async fn insert_user(platform: &Platform, id: i64, user_id: &str, name: &str) {
    platform
        .dsl()
        .insert_into(&user_table())
        .columns(user::COLUMNS)
        .values(vec![
            SqlParam::Int(id),
            user_id.into(),
            name.into(),
            SqlParam::Null,
            "ACTIVE".into(),
        ])
        .execute()
        .await
        .unwrap();
}

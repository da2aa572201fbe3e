use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_records",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS records_seq START 1;

CREATE TABLE IF NOT EXISTS records (
    seq BIGINT PRIMARY KEY DEFAULT nextval('records_seq'),
    dataset_class TEXT NOT NULL,
    asset_id TEXT NOT NULL,
    currency TEXT NOT NULL,
    chart_interval TEXT,
    chart_range TEXT,
    source TEXT NOT NULL,
    fetched_at_ms BIGINT NOT NULL,
    payload TEXT NOT NULL,
    written_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_record_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_records_series
    ON records(dataset_class, asset_id, currency, chart_interval, fetched_at_ms);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            ::duckdb::params![migration.version],
            |row| row.get(0),
        )?;
        if applied > 0 {
            continue;
        }

        connection.execute_batch(migration.sql)?;
        connection.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            ::duckdb::params![migration.version],
        )?;
        tracing::debug!(version = migration.version, "applied warehouse migration");
    }

    Ok(())
}

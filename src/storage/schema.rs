use duckdb::Connection;

/// SQL statement to create the counters table.
///
/// A counter row's identity is (site, metric name, metric value, date);
/// scalar metrics such as `pageviews` use an empty value, hour and
/// dimension metrics carry their discriminating string in `value`. The
/// UNIQUE constraint is what makes the insert-or-increment upsert atomic.
pub const CREATE_COUNTERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS counters (
    site_id BIGINT NOT NULL,
    name    VARCHAR NOT NULL,
    value   VARCHAR NOT NULL DEFAULT '',
    date    DATE NOT NULL,
    count   BIGINT NOT NULL,
    UNIQUE (site_id, name, value, date)
)
";

/// SQL statement to create the recent-activity feed.
///
/// Append-only and observational; no uniqueness constraint.
pub const CREATE_RECENT_ACTIVITY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS recent_activity (
    site_id   BIGINT NOT NULL,
    path      VARCHAR NOT NULL,
    referrer  VARCHAR,
    os        VARCHAR,
    browser   VARCHAR,
    device    VARCHAR,
    country   VARCHAR,
    city      VARCHAR,
    language  VARCHAR,
    timestamp TIMESTAMP NOT NULL
)
";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_COUNTERS_TABLE)?;
    conn.execute_batch(CREATE_RECENT_ACTIVITY_TABLE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM counters").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM recent_activity").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_counters_unique_key() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO counters (site_id, name, value, date, count)
             VALUES (1, 'pageviews', '', CAST('2025-03-14' AS DATE), 1)",
            [],
        )
        .unwrap();

        // A second plain insert on the same key must violate the constraint.
        let duplicate = conn.execute(
            "INSERT INTO counters (site_id, name, value, date, count)
             VALUES (1, 'pageviews', '', CAST('2025-03-14' AS DATE), 1)",
            [],
        );
        assert!(duplicate.is_err());
    }
}

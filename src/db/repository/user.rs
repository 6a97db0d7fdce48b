use rusqlite::{params, Connection};

use crate::db::DatabaseError;

pub fn insert_user(conn: &Connection, email: &str, name: &str) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO users (email, name) VALUES (?1, ?2)",
        params![email, name],
    )?;
    Ok(conn.last_insert_rowid())
}

//! SQLite database migrations.

use rusqlite::Connection;
use tracing::info;

/// Run all database migrations.
pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Track applied migrations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM migrations")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let mut applied_count = 0;

    // Migration 1: live record tables. FIFO and insertion order ride on the
    // autoincrement seq column.
    if !applied.contains(&"001_create_live_records".to_string()) {
        conn.execute_batch(
            "CREATE TABLE enqueued (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_id TEXT NOT NULL,
                command_id INTEGER NOT NULL,
                try_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL
            );

            CREATE TABLE scheduled (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_id TEXT NOT NULL,
                command_id INTEGER NOT NULL,
                try_count INTEGER NOT NULL DEFAULT 0,
                run_at INTEGER NOT NULL
            );

            CREATE TABLE assigned (
                queue_id TEXT NOT NULL,
                command_id INTEGER NOT NULL,
                worker_id INTEGER NOT NULL,
                try_count INTEGER NOT NULL DEFAULT 0,
                assigned_at INTEGER NOT NULL
            );

            CREATE INDEX idx_enqueued_queue ON enqueued(queue_id, seq);
            CREATE INDEX idx_scheduled_queue ON scheduled(queue_id, seq);
            CREATE INDEX idx_assigned_queue ON assigned(queue_id);
            CREATE INDEX idx_assigned_worker ON assigned(queue_id, worker_id);

            INSERT INTO migrations (name, applied_at) VALUES ('001_create_live_records', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    // Migration 2: finished audit trail (append-only)
    if !applied.contains(&"002_create_finished".to_string()) {
        conn.execute_batch(
            "CREATE TABLE finished (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_id TEXT NOT NULL,
                command_id INTEGER NOT NULL,
                try_count INTEGER NOT NULL DEFAULT 0,
                finished_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                reason TEXT
            );

            CREATE INDEX idx_finished_queue ON finished(queue_id, seq);

            INSERT INTO migrations (name, applied_at) VALUES ('002_create_finished', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    if applied_count > 0 {
        info!(count = applied_count, "Applied database migrations");
    }

    Ok(())
}

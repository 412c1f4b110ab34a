use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use pm_domain::model::{
    Annotation, ApiKey, Event, EventKind, EventPayload, Organization, Session, SessionStatus,
    User, UserRole,
};
use pm_domain::{Error, Result};

use super::{Backend, BackendKind};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    org_id TEXT NOT NULL REFERENCES organizations(id),
    role TEXT NOT NULL DEFAULT 'member',
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    key_prefix TEXT NOT NULL,
    key_hash TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT,
    project_id TEXT,
    metadata TEXT,
    user_id TEXT REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS annotations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    status TEXT NOT NULL DEFAULT 'pending',
    timestamp INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    session_id TEXT NOT NULL,
    sequence INTEGER NOT NULL UNIQUE,
    payload TEXT NOT NULL,
    user_id TEXT REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_users_org ON users(org_id);
CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_annotations_session ON annotations(session_id);
CREATE INDEX IF NOT EXISTS idx_events_session_seq ON events(session_id, sequence);
CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id);
"#;

const SESSION_COLS: &str =
    "id, url, status, created_at, updated_at, project_id, metadata, user_id";
const USER_COLS: &str = "id, email, org_id, role, created_at, updated_at";
const KEY_COLS: &str =
    "id, key_prefix, key_hash, user_id, name, created_at, expires_at, last_used_at";

/// Durable backend on a single SQLite file in WAL mode.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (creating parent directories and tables as needed).
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ── conversions ─────────────────────────────────────────────────────

fn storage(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

/// Fixed-width RFC 3339 so text comparison orders chronologically.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

struct SessionRow {
    id: String,
    url: String,
    status: String,
    created_at: String,
    updated_at: Option<String>,
    project_id: Option<String>,
    metadata: Option<String>,
    user_id: Option<String>,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            project_id: row.get(5)?,
            metadata: row.get(6)?,
            user_id: row.get(7)?,
        })
    }

    fn into_session(self) -> Result<Session> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| Error::Storage(format!("unknown session status {:?}", self.status)))?;
        Ok(Session {
            id: self.id,
            url: self.url,
            status,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_opt_ts(self.updated_at)?,
            project_id: self.project_id,
            metadata: self
                .metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            user_id: self.user_id,
        })
    }
}

struct UserRow {
    id: String,
    email: String,
    org_id: String,
    role: String,
    created_at: String,
    updated_at: Option<String>,
}

impl UserRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            org_id: row.get(2)?,
            role: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_user(self) -> Result<User> {
        Ok(User {
            role: UserRole::parse(&self.role)
                .ok_or_else(|| Error::Storage(format!("unknown role {:?}", self.role)))?,
            id: self.id,
            email: self.email,
            org_id: self.org_id,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_opt_ts(self.updated_at)?,
        })
    }
}

struct KeyRow {
    id: String,
    key_prefix: String,
    key_hash: String,
    user_id: String,
    name: String,
    created_at: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
}

impl KeyRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key_prefix: row.get(1)?,
            key_hash: row.get(2)?,
            user_id: row.get(3)?,
            name: row.get(4)?,
            created_at: row.get(5)?,
            expires_at: row.get(6)?,
            last_used_at: row.get(7)?,
        })
    }

    fn into_key(self) -> Result<ApiKey> {
        Ok(ApiKey {
            id: self.id,
            key_prefix: self.key_prefix,
            key_hash: self.key_hash,
            user_id: self.user_id,
            name: self.name,
            created_at: parse_ts(&self.created_at)?,
            expires_at: parse_opt_ts(self.expires_at)?,
            last_used_at: parse_opt_ts(self.last_used_at)?,
        })
    }
}

fn decode_annotation(body: String) -> Result<Annotation> {
    Ok(serde_json::from_str(&body)?)
}

fn decode_event(
    (kind, timestamp, session_id, sequence, payload): (String, String, String, i64, String),
) -> Result<Event> {
    let kind = EventKind::parse(&kind)
        .ok_or_else(|| Error::Storage(format!("unknown event type {kind:?}")))?;
    let payload = EventPayload::from_json(kind, serde_json::from_str(&payload)?)?;
    Ok(Event {
        kind,
        timestamp: parse_ts(&timestamp)?,
        session_id,
        sequence: sequence as u64,
        payload,
    })
}

impl SqliteBackend {
    fn query_events(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        rows.into_iter().map(decode_event).collect()
    }

    fn query_sessions(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, SessionRow::read)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    fn query_annotations(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Annotation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let bodies = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        bodies.into_iter().map(decode_annotation).collect()
    }

    fn query_users(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, UserRow::read)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    fn query_keys(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ApiKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, KeyRow::read)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        rows.into_iter().map(KeyRow::into_key).collect()
    }

    fn execute(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        self.conn.lock().execute(sql, params).map_err(storage)
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    // ── sessions ────────────────────────────────────────────────────

    fn insert_session(&self, session: &Session) -> Result<()> {
        let metadata = session.metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.execute(
            "INSERT INTO sessions (id, url, status, created_at, updated_at, project_id, metadata, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                session.url,
                session.status.as_str(),
                ts(session.created_at),
                opt_ts(session.updated_at),
                session.project_id,
                metadata,
                session.user_id,
            ],
        )?;
        Ok(())
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1");
        Ok(self.query_sessions(&sql, params![id])?.into_iter().next())
    }

    fn update_session(&self, session: &Session) -> Result<()> {
        let metadata = session.metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.execute(
            "UPDATE sessions SET url = ?2, status = ?3, updated_at = ?4, project_id = ?5,
                 metadata = ?6, user_id = ?7
             WHERE id = ?1",
            params![
                session.id,
                session.url,
                session.status.as_str(),
                opt_ts(session.updated_at),
                session.project_id,
                metadata,
                session.user_id,
            ],
        )?;
        Ok(())
    }

    fn sessions(&self, owner: Option<&str>) -> Result<Vec<Session>> {
        match owner {
            Some(user_id) => {
                let sql = format!(
                    "SELECT {SESSION_COLS} FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC"
                );
                self.query_sessions(&sql, params![user_id])
            }
            None => {
                let sql = format!("SELECT {SESSION_COLS} FROM sessions ORDER BY created_at DESC");
                self.query_sessions(&sql, params![])
            }
        }
    }

    // ── annotations ─────────────────────────────────────────────────

    fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        let body = serde_json::to_string(annotation)?;
        self.execute(
            "INSERT INTO annotations (id, session_id, status, timestamp, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                annotation.id,
                annotation.session_id,
                annotation.status.as_str(),
                annotation.timestamp,
                ts(annotation.created_at),
                body,
            ],
        )?;
        Ok(())
    }

    fn annotation(&self, id: &str) -> Result<Option<Annotation>> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM annotations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        body.map(decode_annotation).transpose()
    }

    fn update_annotation(&self, annotation: &Annotation) -> Result<()> {
        let body = serde_json::to_string(annotation)?;
        self.execute(
            "UPDATE annotations SET status = ?2, body = ?3 WHERE id = ?1",
            params![annotation.id, annotation.status.as_str(), body],
        )?;
        Ok(())
    }

    fn delete_annotation(&self, id: &str) -> Result<bool> {
        Ok(self.execute("DELETE FROM annotations WHERE id = ?1", params![id])? > 0)
    }

    fn session_annotations(&self, session_id: &str, pending_only: bool) -> Result<Vec<Annotation>> {
        let sql = if pending_only {
            "SELECT body FROM annotations WHERE session_id = ?1 AND status = 'pending'
             ORDER BY timestamp, created_at"
        } else {
            "SELECT body FROM annotations WHERE session_id = ?1 ORDER BY timestamp, created_at"
        };
        self.query_annotations(sql, params![session_id])
    }

    fn pending_annotations(&self, owner: Option<&str>) -> Result<Vec<Annotation>> {
        match owner {
            Some(user_id) => self.query_annotations(
                "SELECT a.body FROM annotations a
                 JOIN sessions s ON a.session_id = s.id
                 WHERE s.user_id = ?1 AND a.status = 'pending'
                 ORDER BY a.timestamp, a.created_at",
                params![user_id],
            ),
            None => self.query_annotations(
                "SELECT body FROM annotations WHERE status = 'pending' ORDER BY timestamp, created_at",
                params![],
            ),
        }
    }

    // ── events ──────────────────────────────────────────────────────

    fn append_event(&self, event: &Event, user_id: Option<&str>) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO events (type, timestamp, session_id, sequence, payload, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.kind.as_str(),
                    ts(event.timestamp),
                    event.session_id,
                    event.sequence as i64,
                    payload,
                    user_id,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!("event sequence {} already recorded", event.sequence))
                } else {
                    storage(e)
                }
            })?;
        Ok(())
    }

    fn events_since(&self, session_id: &str, after: u64) -> Result<Vec<Event>> {
        self.query_events(
            "SELECT type, timestamp, session_id, sequence, payload FROM events
             WHERE session_id = ?1 AND sequence > ?2 ORDER BY sequence",
            params![session_id, after as i64],
        )
    }

    fn events_after(&self, after: u64, owner: Option<&str>) -> Result<Vec<Event>> {
        match owner {
            Some(user_id) => self.query_events(
                "SELECT type, timestamp, session_id, sequence, payload FROM events
                 WHERE sequence > ?1 AND user_id = ?2 ORDER BY sequence",
                params![after as i64, user_id],
            ),
            None => self.query_events(
                "SELECT type, timestamp, session_id, sequence, payload FROM events
                 WHERE sequence > ?1 AND user_id IS NULL ORDER BY sequence",
                params![after as i64],
            ),
        }
    }

    fn max_sequence(&self) -> Result<u64> {
        let max: Option<i64> = self
            .conn
            .lock()
            .query_row("SELECT MAX(sequence) FROM events", [], |row| row.get(0))
            .map_err(storage)?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute("DELETE FROM events WHERE timestamp < ?1", params![ts(cutoff)])
    }

    // ── tenants ─────────────────────────────────────────────────────

    fn insert_organization(&self, org: &Organization) -> Result<()> {
        self.execute(
            "INSERT INTO organizations (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![org.id, org.name, ts(org.created_at), opt_ts(org.updated_at)],
        )?;
        Ok(())
    }

    fn organization(&self, id: &str) -> Result<Option<Organization>> {
        let row: Option<(String, String, String, Option<String>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT id, name, created_at, updated_at FROM organizations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(storage)?;
        row.map(|(id, name, created_at, updated_at)| {
            Ok(Organization {
                id,
                name,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_opt_ts(updated_at)?,
            })
        })
        .transpose()
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO users (id, email, org_id, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.email,
                    user.org_id,
                    user.role.as_str(),
                    ts(user.created_at),
                    opt_ts(user.updated_at),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!("email {} already registered", user.email))
                } else {
                    storage(e)
                }
            })?;
        Ok(())
    }

    fn user(&self, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE id = ?1");
        Ok(self.query_users(&sql, params![id])?.into_iter().next())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE email = ?1");
        Ok(self.query_users(&sql, params![email])?.into_iter().next())
    }

    fn users_by_org(&self, org_id: &str) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE org_id = ?1 ORDER BY created_at");
        self.query_users(&sql, params![org_id])
    }

    fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        self.execute(
            "INSERT INTO api_keys (id, key_prefix, key_hash, user_id, name, created_at, expires_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                key.id,
                key.key_prefix,
                key.key_hash,
                key.user_id,
                key.name,
                ts(key.created_at),
                opt_ts(key.expires_at),
                opt_ts(key.last_used_at),
            ],
        )?;
        Ok(())
    }

    fn api_key_by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        let sql = format!("SELECT {KEY_COLS} FROM api_keys WHERE key_hash = ?1");
        Ok(self.query_keys(&sql, params![hash])?.into_iter().next())
    }

    fn api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let sql = format!("SELECT {KEY_COLS} FROM api_keys WHERE user_id = ?1 ORDER BY created_at DESC");
        self.query_keys(&sql, params![user_id])
    }

    fn delete_api_key(&self, id: &str) -> Result<bool> {
        Ok(self.execute("DELETE FROM api_keys WHERE id = ?1", params![id])? > 0)
    }

    fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![ts(at), id],
        )?;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "DELETE FROM events;
                 DELETE FROM annotations;
                 DELETE FROM sessions;
                 DELETE FROM api_keys;
                 DELETE FROM users;
                 DELETE FROM organizations;",
            )
            .map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pm_domain::model::NewAnnotation;

    fn open() -> (tempfile::TempDir, SqliteBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("store.db")).unwrap();
        (dir, backend)
    }

    #[test]
    fn session_roundtrip_preserves_fields() {
        let (_dir, backend) = open();
        let mut session = Session::new("http://localhost:3000/page", Some("proj".into()));
        session.metadata = Some(serde_json::json!({"viewport": [1280, 720]}));
        backend.insert_session(&session).unwrap();

        let loaded = backend.session(&session.id).unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(backend.session("missing").unwrap().is_none());
    }

    #[test]
    fn annotation_body_survives_updates() {
        let (_dir, backend) = open();
        let session = Session::new("http://localhost", None);
        backend.insert_session(&session).unwrap();
        let mut a = Annotation::create(
            &session.id,
            NewAnnotation {
                comment: "button misaligned".into(),
                element_path: "main > button".into(),
                timestamp: 10,
                ..NewAnnotation::default()
            },
        );
        backend.insert_annotation(&a).unwrap();
        a.push_message(pm_domain::model::Actor::Human, "see screenshot");
        backend.update_annotation(&a).unwrap();

        assert_eq!(backend.annotation(&a.id).unwrap().unwrap(), a);
        assert_eq!(backend.session_annotations(&session.id, true).unwrap().len(), 1);
        assert!(backend.delete_annotation(&a.id).unwrap());
        assert!(!backend.delete_annotation(&a.id).unwrap());
    }

    #[test]
    fn events_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let session = Session::new("http://localhost", None);
        {
            let backend = SqliteBackend::open(&path).unwrap();
            for seq in [4, 5, 9] {
                let event = Event {
                    kind: EventKind::SessionUpdated,
                    timestamp: Utc::now(),
                    session_id: session.id.clone(),
                    sequence: seq,
                    payload: session.clone().into(),
                };
                backend.append_event(&event, None).unwrap();
            }
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.max_sequence().unwrap(), 9);
        let seqs: Vec<u64> = backend
            .events_since(&session.id, 4)
            .unwrap()
            .into_iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![5, 9]);
    }

    #[test]
    fn events_after_filters_by_owner_across_sessions() {
        let (_dir, backend) = open();
        let first = Session::new("http://localhost:3000", None);
        let second = Session::new("https://example.com", None);
        for (seq, session, owner) in [
            (1, &first, None),
            (2, &second, None),
            (3, &first, Some("user_a")),
            (4, &second, None),
        ] {
            let event = Event {
                kind: EventKind::SessionUpdated,
                timestamp: Utc::now(),
                session_id: session.id.clone(),
                sequence: seq,
                payload: session.clone().into(),
            };
            backend.append_event(&event, owner).unwrap();
        }

        let seqs = |events: Vec<Event>| events.into_iter().map(|e| e.sequence).collect::<Vec<_>>();
        assert_eq!(seqs(backend.events_after(1, None).unwrap()), vec![2, 4]);
        assert_eq!(seqs(backend.events_after(0, Some("user_a")).unwrap()), vec![3]);
        assert!(backend.events_after(3, Some("user_a")).unwrap().is_empty());
    }

    #[test]
    fn duplicate_sequence_is_a_conflict() {
        let (_dir, backend) = open();
        let session = Session::new("http://localhost", None);
        let event = Event {
            kind: EventKind::SessionCreated,
            timestamp: Utc::now(),
            session_id: session.id.clone(),
            sequence: 1,
            payload: session.into(),
        };
        backend.append_event(&event, None).unwrap();
        assert!(matches!(
            backend.append_event(&event, None),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn prune_uses_chronological_cutoff() {
        let (_dir, backend) = open();
        let session = Session::new("http://localhost", None);
        let now = Utc::now();
        for (seq, age) in [(1, 30), (2, 8), (3, 0)] {
            let event = Event {
                kind: EventKind::SessionUpdated,
                timestamp: now - Duration::days(age),
                session_id: session.id.clone(),
                sequence: seq,
                payload: session.clone().into(),
            };
            backend.append_event(&event, None).unwrap();
        }
        assert_eq!(backend.prune_events(now - Duration::days(7)).unwrap(), 2);
        assert_eq!(backend.max_sequence().unwrap(), 3);
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let (_dir, backend) = open();
        let org = Organization {
            id: "org_1".into(),
            name: "Acme".into(),
            created_at: Utc::now(),
            updated_at: None,
        };
        backend.insert_organization(&org).unwrap();
        let user = User {
            id: "user_1".into(),
            email: "dev@acme.test".into(),
            org_id: org.id.clone(),
            role: UserRole::Owner,
            created_at: Utc::now(),
            updated_at: None,
        };
        backend.insert_user(&user).unwrap();
        let dup = User {
            id: "user_2".into(),
            ..user.clone()
        };
        assert!(matches!(backend.insert_user(&dup), Err(Error::Conflict(_))));
        assert_eq!(backend.user_by_email("dev@acme.test").unwrap().unwrap(), user);
        assert_eq!(backend.organization("org_1").unwrap().unwrap(), org);
    }
}

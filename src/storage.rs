use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::measure::Severity;
use crate::record::{DetectionRecord, DetectionStatus, NewDetection};
use crate::{now_ms, open_db_connection};

/// Durable collection of detection records.
///
/// `create` assigns identity and timestamp atomically: concurrent callers
/// always receive distinct, increasing identities. Failures are returned to
/// the caller, never retried here.
pub trait DetectionStore: Send + Sync {
    fn create(&self, detection: NewDetection) -> Result<DetectionRecord>;

    /// All records, newest timestamp first (ties broken by identity, newest first).
    fn list_all(&self) -> Result<Vec<DetectionRecord>>;

    fn get(&self, id: i64) -> Result<Option<DetectionRecord>>;
}

const SELECT_COLUMNS: &str = "id, latitude, longitude, severity, area, depth_meters, image_path, confidence, created_at_ms, status";

struct SqliteState {
    conn: Connection,
    last_timestamp_ms: i64,
}

pub struct SqliteDetectionStore {
    state: Mutex<SqliteState>,
}

impl SqliteDetectionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open detection database {}", db_path))?;
        ensure_schema(&conn)?;
        let last_timestamp_ms: i64 = conn
            .query_row("SELECT COALESCE(MAX(created_at_ms), 0) FROM potholes", [], |row| {
                row.get(0)
            })
            .context("read latest detection timestamp")?;
        Ok(Self {
            state: Mutex::new(SqliteState {
                conn,
                last_timestamp_ms,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("detection store lock poisoned"))
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS potholes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          latitude REAL,
          longitude REAL,
          severity TEXT NOT NULL,
          area REAL NOT NULL,
          depth_meters REAL NOT NULL,
          image_path TEXT NOT NULL,
          confidence REAL NOT NULL,
          created_at_ms INTEGER NOT NULL,
          status TEXT NOT NULL DEFAULT 'reported'
        );

        CREATE INDEX IF NOT EXISTS idx_potholes_created ON potholes(created_at_ms);
        "#,
    )
    .context("create detection schema")?;
    Ok(())
}

struct RawRow {
    id: i64,
    latitude: Option<f64>,
    longitude: Option<f64>,
    severity: String,
    area: f64,
    depth_meters: f64,
    image_path: String,
    confidence: f64,
    timestamp_ms: i64,
    status: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        severity: row.get(3)?,
        area: row.get(4)?,
        depth_meters: row.get(5)?,
        image_path: row.get(6)?,
        confidence: row.get(7)?,
        timestamp_ms: row.get(8)?,
        status: row.get(9)?,
    })
}

impl TryFrom<RawRow> for DetectionRecord {
    type Error = anyhow::Error;

    fn try_from(raw: RawRow) -> Result<Self> {
        let severity = Severity::parse(&raw.severity)
            .ok_or_else(|| anyhow!("corrupt detection {}: severity '{}'", raw.id, raw.severity))?;
        let status = DetectionStatus::parse(&raw.status)
            .ok_or_else(|| anyhow!("corrupt detection {}: status '{}'", raw.id, raw.status))?;
        Ok(DetectionRecord {
            id: raw.id,
            latitude: raw.latitude,
            longitude: raw.longitude,
            severity,
            area: raw.area,
            depth_meters: raw.depth_meters,
            image_path: raw.image_path,
            confidence: raw.confidence as f32,
            timestamp_ms: raw.timestamp_ms,
            status,
        })
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn create(&self, detection: NewDetection) -> Result<DetectionRecord> {
        let mut state = self.lock()?;
        let timestamp_ms = now_ms()?.max(state.last_timestamp_ms);

        let id = {
            let tx = state.conn.transaction().context("begin detection insert")?;
            tx.execute(
                r#"
                INSERT INTO potholes(latitude, longitude, severity, area, depth_meters, image_path, confidence, created_at_ms, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    detection.location.map(|p| p.latitude),
                    detection.location.map(|p| p.longitude),
                    detection.severity.as_str(),
                    detection.area_m2,
                    detection.depth_meters,
                    detection.image_path,
                    f64::from(detection.confidence),
                    timestamp_ms,
                    DetectionStatus::default().as_str(),
                ],
            )
            .context("insert detection")?;
            let id = tx.last_insert_rowid();
            tx.commit().context("commit detection insert")?;
            id
        };
        state.last_timestamp_ms = timestamp_ms;

        Ok(DetectionRecord::from_new(detection, id, timestamp_ms))
    }

    fn list_all(&self) -> Result<Vec<DetectionRecord>> {
        let state = self.lock()?;
        let mut stmt = state.conn.prepare(&format!(
            "SELECT {} FROM potholes ORDER BY created_at_ms DESC, id DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list detections")?;
        rows.into_iter().map(DetectionRecord::try_from).collect()
    }

    fn get(&self, id: i64) -> Result<Option<DetectionRecord>> {
        let state = self.lock()?;
        let raw = state
            .conn
            .query_row(
                &format!("SELECT {} FROM potholes WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                read_row,
            )
            .optional()
            .with_context(|| format!("read detection {}", id))?;
        raw.map(DetectionRecord::try_from).transpose()
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    last_id: i64,
    last_timestamp_ms: i64,
    records: Vec<DetectionRecord>,
}

/// Non-durable store with the same ordering and identity guarantees.
#[derive(Debug, Default)]
pub struct InMemoryDetectionStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("detection store lock poisoned"))
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn create(&self, detection: NewDetection) -> Result<DetectionRecord> {
        let mut state = self.lock()?;
        let timestamp_ms = now_ms()?.max(state.last_timestamp_ms);
        state.last_id += 1;
        state.last_timestamp_ms = timestamp_ms;
        let record = DetectionRecord::from_new(detection, state.last_id, timestamp_ms);
        state.records.push(record.clone());
        Ok(record)
    }

    fn list_all(&self) -> Result<Vec<DetectionRecord>> {
        let state = self.lock()?;
        let mut records = state.records.clone();
        records.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(records)
    }

    fn get(&self, id: i64) -> Result<Option<DetectionRecord>> {
        let state = self.lock()?;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }
}

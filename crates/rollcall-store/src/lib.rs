//! rollcall-store — SQLite roster of enrolled students and attendance marks.
//!
//! The store is the durable copy of every enrolled embedding. Recognition
//! sessions read it once at startup through [`RosterStore::stored_embeddings`]
//! and write back new enrollments and attendance marks.

use chrono::{DateTime, Utc};
use rollcall_core::codec;
use rollcall_core::{StoredEmbedding, StoredVector};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id             TEXT PRIMARY KEY,
    student_id     TEXT NOT NULL,
    name           TEXT NOT NULL,
    face_embedding TEXT NOT NULL,
    is_active      INTEGER NOT NULL DEFAULT 1,
    enrolled_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS students_student_id ON students(student_id);

CREATE TABLE IF NOT EXISTS attendance (
    lecture    TEXT NOT NULL,
    student    TEXT NOT NULL REFERENCES students(id),
    status     TEXT NOT NULL,
    distance   REAL,
    marked_at  TEXT NOT NULL,
    PRIMARY KEY (lecture, student)
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no student with key {0}")]
    NotFound(String),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An enrolled student. `id` is the store key; `student_id` is the
/// organization's own identifier and need not be unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: String,
    pub student_id: String,
    pub name: String,
    pub is_active: bool,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One student's mark for one lecture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendanceMark<'a> {
    pub student: &'a str,
    pub status: AttendanceStatus,
    /// Match distance when the mark came from recognition.
    pub distance: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub lecture: String,
    pub student: String,
    pub student_id: String,
    pub name: String,
    pub status: AttendanceStatus,
    pub distance: Option<f32>,
    pub marked_at: DateTime<Utc>,
}

/// Attendance counts for one lecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LectureStats {
    pub lecture: String,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    /// Active students at the time of the query.
    pub enrolled: usize,
}

impl LectureStats {
    pub fn marked(&self) -> usize {
        self.present + self.late + self.absent
    }

    /// Share of the active roster marked present or late, in [0, 1].
    pub fn attendance_rate(&self) -> f32 {
        if self.enrolled == 0 {
            return 0.0;
        }
        (self.present + self.late) as f32 / self.enrolled as f32
    }
}

pub struct RosterStore {
    conn: Connection,
}

impl RosterStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "roster store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Persist a new enrollment and return the created row.
    pub fn enroll_student(
        &self,
        student_id: &str,
        name: &str,
        embedding: &[f32],
    ) -> Result<Student, StoreError> {
        let student = Student {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            name: name.to_string(),
            is_active: true,
            enrolled_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO students (id, student_id, name, face_embedding, is_active, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                student.id,
                student.student_id,
                student.name,
                codec::encode_embedding(embedding),
                student.enrolled_at.to_rfc3339(),
            ],
        )?;

        tracing::info!(key = %student.id, student_id, dimension = embedding.len(), "student enrolled");
        Ok(student)
    }

    pub fn get_student(&self, key: &str) -> Result<Option<Student>, StoreError> {
        let student = self
            .conn
            .query_row(
                "SELECT id, student_id, name, is_active, enrolled_at FROM students WHERE id = ?1",
                params![key],
                student_from_row,
            )
            .optional()?;
        Ok(student)
    }

    /// Students in enrollment order.
    pub fn list_students(&self, active_only: bool) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, name, is_active, enrolled_at FROM students
             WHERE is_active = 1 OR ?1 = 0
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![active_only], student_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark a student inactive. Returns false if no such student exists.
    pub fn deactivate_student(&self, key: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("UPDATE students SET is_active = 0 WHERE id = ?1", params![key])?;
        if changed > 0 {
            tracing::info!(key, "student deactivated");
        }
        Ok(changed > 0)
    }

    /// Raw embeddings of active students, in enrollment order.
    ///
    /// Decoding is left to the caller so a bad row cannot fail the whole read.
    /// Text and BLOB columns are both accepted; any other storage class is
    /// skipped here with a warning.
    pub fn stored_embeddings(&self) -> Result<Vec<StoredEmbedding>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, face_embedding FROM students WHERE is_active = 1 ORDER BY rowid",
        )?;
        let mut rows = stmt.query([])?;

        let mut stored = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let name: String = row.get(1)?;
            let vector = match row.get_ref(2)? {
                ValueRef::Text(text) => StoredVector::Text(String::from_utf8_lossy(text).into_owned()),
                ValueRef::Blob(bytes) => StoredVector::Bytes(bytes.to_vec()),
                other => {
                    tracing::warn!(
                        key = %key,
                        column_type = %other.data_type(),
                        "skipping stored embedding with unexpected column type"
                    );
                    continue;
                }
            };
            stored.push(StoredEmbedding { key, name, vector });
        }
        Ok(stored)
    }

    /// Record (or overwrite) one student's mark for `lecture`.
    pub fn mark_attendance(
        &self,
        lecture: &str,
        mark: AttendanceMark<'_>,
    ) -> Result<AttendanceRecord, StoreError> {
        let student = self
            .get_student(mark.student)?
            .ok_or_else(|| StoreError::NotFound(mark.student.to_string()))?;
        let marked_at = Utc::now();

        self.conn.execute(
            "INSERT INTO attendance (lecture, student, status, distance, marked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (lecture, student) DO UPDATE SET
                 status = excluded.status,
                 distance = excluded.distance,
                 marked_at = excluded.marked_at",
            params![
                lecture,
                student.id,
                mark.status.as_str(),
                mark.distance,
                marked_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(lecture, key = %student.id, status = mark.status.as_str(), "attendance marked");
        Ok(AttendanceRecord {
            lecture: lecture.to_string(),
            student: student.id,
            student_id: student.student_id,
            name: student.name,
            status: mark.status,
            distance: mark.distance,
            marked_at,
        })
    }

    /// Record several marks atomically: an unknown student rolls back all of them.
    pub fn mark_bulk_attendance(
        &self,
        lecture: &str,
        marks: &[AttendanceMark<'_>],
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let records = marks
            .iter()
            .map(|mark| self.mark_attendance(lecture, *mark))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;
        tracing::info!(lecture, marked = records.len(), "bulk attendance recorded");
        Ok(records)
    }

    /// All marks for `lecture`, ordered by student name.
    pub fn lecture_attendance(&self, lecture: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.lecture, a.student, s.student_id, s.name, a.status, a.distance, a.marked_at
             FROM attendance a JOIN students s ON s.id = a.student
             WHERE a.lecture = ?1
             ORDER BY s.name, s.rowid",
        )?;
        let rows = stmt.query_map(params![lecture], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-status counts for `lecture`, against the current active roster.
    pub fn lecture_stats(&self, lecture: &str) -> Result<LectureStats, StoreError> {
        let (present, late, absent): (i64, i64, i64) = self.conn.query_row(
            "SELECT
                 COALESCE(SUM(status = 'present'), 0),
                 COALESCE(SUM(status = 'late'), 0),
                 COALESCE(SUM(status = 'absent'), 0)
             FROM attendance WHERE lecture = ?1",
            params![lecture],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(LectureStats {
            lecture: lecture.to_string(),
            present: present as usize,
            late: late as usize,
            absent: absent as usize,
            enrolled: self.active_count()?,
        })
    }

    /// Every mark recorded for one student, newest first.
    pub fn student_history(&self, key: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        if self.get_student(key)?.is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let mut stmt = self.conn.prepare(
            "SELECT a.lecture, a.student, s.student_id, s.name, a.status, a.distance, a.marked_at
             FROM attendance a JOIN students s ON s.id = a.student
             WHERE a.student = ?1
             ORDER BY a.marked_at DESC, a.rowid DESC",
        )?;
        let rows = stmt.query_map(params![key], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of active students.
    pub fn active_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students WHERE is_active = 1", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        student_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get(3)?,
        enrolled_at: timestamp_column(row, 4)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status: String = row.get(4)?;
    let status = AttendanceStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown attendance status {status:?}").into(),
        )
    })?;
    Ok(AttendanceRecord {
        lecture: row.get(0)?,
        student: row.get(1)?,
        student_id: row.get(2)?,
        name: row.get(3)?,
        status,
        distance: row.get(5)?,
        marked_at: timestamp_column(row, 6)?,
    })
}

/// Timestamps are stored as RFC 3339 text.
fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Gallery, MatchPolicy};

    fn store() -> RosterStore {
        RosterStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_enroll_and_get_student() {
        let store = store();
        let s = store.enroll_student("S-001", "Alice", &[1.0, 0.0]).unwrap();
        let fetched = store.get_student(&s.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Alice");
        assert_eq!(fetched.student_id, "S-001");
        assert!(fetched.is_active);
        assert!(store.get_student("missing").unwrap().is_none());
    }

    #[test]
    fn test_stored_embeddings_decode() {
        let store = store();
        store.enroll_student("S-001", "Alice", &[0.5, -0.25, 1.0]).unwrap();
        let rows = store.stored_embeddings().unwrap();
        assert_eq!(rows.len(), 1);
        let values = codec::decode_embedding(&rows[0].vector, 3).unwrap();
        assert_eq!(values, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_deactivated_students_are_not_rehydrated() {
        let store = store();
        let alice = store.enroll_student("S-001", "Alice", &[1.0, 0.0]).unwrap();
        store.enroll_student("S-002", "Bob", &[0.0, 1.0]).unwrap();

        assert!(store.deactivate_student(&alice.id).unwrap());
        assert!(!store.deactivate_student("missing").unwrap());

        assert_eq!(store.active_count().unwrap(), 1);
        assert_eq!(store.list_students(true).unwrap().len(), 1);
        assert_eq!(store.list_students(false).unwrap().len(), 2);

        let mut gallery = Gallery::new(2, MatchPolicy::default()).unwrap();
        let report = gallery.rehydrate(store.stored_embeddings().unwrap());
        assert_eq!(report.loaded, 1);
        assert_eq!(gallery.identities().next().unwrap().name, "Bob");
    }

    #[test]
    fn test_mark_attendance_upserts() {
        let store = store();
        let bob = store.enroll_student("S-002", "Bob", &[0.0, 1.0]).unwrap();

        store
            .mark_attendance(
                "CS101-2026-10-19",
                AttendanceMark { student: &bob.id, status: AttendanceStatus::Absent, distance: None },
            )
            .unwrap();
        store
            .mark_attendance(
                "CS101-2026-10-19",
                AttendanceMark { student: &bob.id, status: AttendanceStatus::Present, distance: Some(0.31) },
            )
            .unwrap();

        let records = store.lecture_attendance("CS101-2026-10-19").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Present);
        assert_eq!(records[0].distance, Some(0.31));
        assert_eq!(records[0].name, "Bob");
        assert!(store.lecture_attendance("other").unwrap().is_empty());
    }

    #[test]
    fn test_bulk_attendance_rolls_back_on_unknown_student() {
        let store = store();
        let alice = store.enroll_student("S-001", "Alice", &[1.0, 0.0]).unwrap();

        let err = store
            .mark_bulk_attendance(
                "L1",
                &[
                    AttendanceMark { student: &alice.id, status: AttendanceStatus::Present, distance: Some(0.1) },
                    AttendanceMark { student: "ghost", status: AttendanceStatus::Present, distance: None },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref k) if k == "ghost"));
        assert!(store.lecture_attendance("L1").unwrap().is_empty());

        let records = store
            .mark_bulk_attendance(
                "L1",
                &[AttendanceMark { student: &alice.id, status: AttendanceStatus::Late, distance: None }],
            )
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(store.lecture_attendance("L1").unwrap()[0].status, AttendanceStatus::Late);
    }

    #[test]
    fn test_blob_embeddings_are_read_as_bytes() {
        let store = store();
        store.enroll_student("S-001", "Alice", &[1.0, 0.0]).unwrap();
        let blob: Vec<u8> = [0.0f32, 1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        for (key, name, bytes) in [("blob-ok", "Bob", blob), ("blob-bad", "Truncated", vec![1, 2, 3])] {
            store
                .conn
                .execute(
                    "INSERT INTO students (id, student_id, name, face_embedding, is_active, enrolled_at)
                     VALUES (?1, ?1, ?2, ?3, 1, ?4)",
                    params![key, name, bytes, Utc::now().to_rfc3339()],
                )
                .unwrap();
        }

        let rows = store.stored_embeddings().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0].vector, StoredVector::Text(_)));
        assert!(matches!(rows[1].vector, StoredVector::Bytes(ref b) if b.len() == 8));

        let mut gallery = Gallery::new(2, MatchPolicy::default()).unwrap();
        let report = gallery.rehydrate(rows);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 1);
        let names: Vec<&str> = gallery.identities().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[test]
    fn test_lecture_stats_counts_statuses() {
        let store = store();
        let alice = store.enroll_student("S-001", "Alice", &[1.0, 0.0]).unwrap();
        let bob = store.enroll_student("S-002", "Bob", &[0.0, 1.0]).unwrap();
        let carol = store.enroll_student("S-003", "Carol", &[1.0, 1.0]).unwrap();
        store.enroll_student("S-004", "Dan", &[0.5, 0.5]).unwrap();

        store
            .mark_bulk_attendance(
                "L1",
                &[
                    AttendanceMark { student: &alice.id, status: AttendanceStatus::Present, distance: Some(0.1) },
                    AttendanceMark { student: &bob.id, status: AttendanceStatus::Late, distance: None },
                    AttendanceMark { student: &carol.id, status: AttendanceStatus::Absent, distance: None },
                ],
            )
            .unwrap();

        let stats = store.lecture_stats("L1").unwrap();
        assert_eq!((stats.present, stats.late, stats.absent), (1, 1, 1));
        assert_eq!(stats.marked(), 3);
        assert_eq!(stats.enrolled, 4);
        assert!((stats.attendance_rate() - 0.5).abs() < 1e-6);

        let empty = store.lecture_stats("nothing-yet").unwrap();
        assert_eq!(empty.marked(), 0);
        assert_eq!(empty.attendance_rate(), 0.0);
    }

    #[test]
    fn test_student_history_newest_first() {
        let store = store();
        let alice = store.enroll_student("S-001", "Alice", &[1.0, 0.0]).unwrap();
        let bob = store.enroll_student("S-002", "Bob", &[0.0, 1.0]).unwrap();

        for lecture in ["L1", "L2", "L3"] {
            store
                .mark_attendance(
                    lecture,
                    AttendanceMark { student: &alice.id, status: AttendanceStatus::Present, distance: None },
                )
                .unwrap();
        }
        store
            .mark_attendance(
                "L2",
                AttendanceMark { student: &bob.id, status: AttendanceStatus::Late, distance: None },
            )
            .unwrap();

        let lectures: Vec<String> = store
            .student_history(&alice.id)
            .unwrap()
            .into_iter()
            .map(|r| r.lecture)
            .collect();
        assert_eq!(lectures, ["L3", "L2", "L1"]);
        assert_eq!(store.student_history(&bob.id).unwrap().len(), 1);
        assert!(matches!(store.student_history("ghost"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_status_roundtrip_names() {
        for status in [AttendanceStatus::Present, AttendanceStatus::Late, AttendanceStatus::Absent] {
            assert_eq!(AttendanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttendanceStatus::parse("excused"), None);
    }
}

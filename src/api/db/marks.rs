use std::collections::HashSet;

use log::{info, warn};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{require_student, table::GroupedMarkRow, AppState};
use crate::api::{
    err::{is_unique_violation, CustomError},
    mark::{
        check_scores, check_subjects, validate_marks, MarkEntry, MarkGroup, MarkView, RawMark,
        StudentMarks, Subject, SubjectScore,
    },
    page::{PageMeta, PageRequest},
    student::UNKNOWN_NAME,
};

impl AppState {
    /// Record a batch of new marks for one student.
    ///
    /// Fails with `Conflict` when any subject already has a mark; that check runs
    /// before the score range check. The transaction takes the write lock up
    /// front (`BEGIN IMMEDIATE`), so a concurrent create for the same student
    /// waits for this one to commit and then sees its rows.
    pub async fn create_marks(
        &self,
        parent_id: i64,
        raw: &[RawMark],
    ) -> Result<StudentMarks, CustomError> {
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;
        let name = require_student(&mut *tx, parent_id).await?;
        let subjects = check_subjects(raw)?;

        let existing = existing_subjects(&mut tx, parent_id).await?;
        let duplicates: Vec<&str> = subjects
            .iter()
            .filter(|(subject, _)| existing.contains(subject))
            .map(|(_, label)| label.as_str())
            .collect();
        if !duplicates.is_empty() {
            return Err(CustomError::Conflict(format!(
                "Marks already exist for subjects: {}",
                duplicates.join(", ")
            )));
        }

        let entries = check_scores(raw, subjects)?;

        let marks = insert_marks(&mut tx, parent_id, &entries).await?;
        tx.commit().await?;

        info!("Created {} mark(s) for parentId: {}", marks.len(), parent_id);
        Ok(StudentMarks {
            parent_id,
            name,
            marks,
        })
    }

    /// Replace the marks of the subjects named in `raw`; other subjects are kept.
    pub async fn replace_marks(
        &self,
        parent_id: i64,
        raw: &[RawMark],
    ) -> Result<StudentMarks, CustomError> {
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;
        let name = require_student(&mut *tx, parent_id).await?;
        let entries = validate_marks(raw)?;

        for entry in &entries {
            sqlx::query(r"DELETE FROM marks WHERE parent_id = ?1 AND lower(subject) = ?2")
                .bind(parent_id)
                .bind(entry.subject.key())
                .execute(&mut *tx)
                .await?;
        }
        let marks = insert_marks(&mut tx, parent_id, &entries).await?;
        tx.commit().await?;

        info!("Replaced {} mark(s) for parentId: {}", marks.len(), parent_id);
        Ok(StudentMarks {
            parent_id,
            name,
            marks,
        })
    }

    /// Remove every mark of one student, returns how many were removed.
    pub async fn delete_marks(&self, parent_id: i64) -> Result<u64, CustomError> {
        require_student(&self.db, parent_id).await?;

        let deleted = sqlx::query(r"DELETE FROM marks WHERE parent_id = ?1")
            .bind(parent_id)
            .execute(&self.db)
            .await?
            .rows_affected();

        info!("Deleted {} marks for parentId: {}", deleted, parent_id);
        if deleted == 0 {
            return Err(CustomError::NotFound(
                "No marks found for this student".to_string(),
            ));
        }
        Ok(deleted)
    }

    /// All marks of one student. The name is looked up separately and falls
    /// back to a placeholder; only missing marks are an error.
    pub async fn get_marks(&self, parent_id: i64) -> Result<StudentMarks, CustomError> {
        let marks: Vec<MarkView> = sqlx::query_as(
            r"SELECT id, subject, score FROM marks WHERE parent_id = ?1 ORDER BY id ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.db)
        .await?;

        if marks.is_empty() {
            info!("No marks found for parentId: {}", parent_id);
            return Err(CustomError::NotFound(
                "No marks found for this student".to_string(),
            ));
        }

        let name = self.student_name(parent_id).await;
        Ok(StudentMarks {
            parent_id,
            name,
            marks,
        })
    }

    /// One page of students that have marks, ordered by parent id.
    /// The window counts students, not mark rows.
    pub async fn list_marks(
        &self,
        page: PageRequest,
    ) -> Result<(Vec<MarkGroup>, PageMeta), CustomError> {
        let total: i64 = sqlx::query_scalar(r"SELECT COUNT(DISTINCT parent_id) FROM marks")
            .fetch_one(&self.db)
            .await?;

        let parent_ids: Vec<i64> = sqlx::query_scalar(
            r"SELECT DISTINCT parent_id FROM marks
                ORDER BY parent_id ASC
                LIMIT ?1 OFFSET ?2",
        )
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.db)
        .await?;

        if parent_ids.is_empty() {
            info!("No marks found for page {} (limit {})", page.page, page.limit);
            return Err(CustomError::NotFound("No marks found".to_string()));
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            r"SELECT m.parent_id, s.name, m.subject, m.score
                FROM marks AS m
                LEFT JOIN students s ON s.parent_id = m.parent_id
                WHERE m.parent_id IN (",
        );
        let mut ids = query.separated(", ");
        for parent_id in &parent_ids {
            ids.push_bind(*parent_id);
        }
        ids.push_unseparated(") ORDER BY m.parent_id ASC, m.id ASC");

        let rows: Vec<GroupedMarkRow> = query.build_query_as().fetch_all(&self.db).await?;
        if rows.is_empty() {
            warn!("Marks vanished for parentIds {:?} while listing", parent_ids);
            return Err(CustomError::NotFound("No marks found".to_string()));
        }

        Ok((group_by_student(rows), page.meta(total)))
    }
}

/// rows must already be ordered by parent id
fn group_by_student(rows: Vec<GroupedMarkRow>) -> Vec<MarkGroup> {
    let mut groups: Vec<MarkGroup> = Vec::new();
    for row in rows {
        let mark = SubjectScore {
            subject: row.subject,
            score: row.score,
        };
        match groups.last_mut() {
            Some(group) if group.parent_id == row.parent_id => group.marks.push(mark),
            _ => groups.push(MarkGroup {
                parent_id: row.parent_id,
                name: row.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
                marks: vec![mark],
            }),
        }
    }
    groups
}

async fn existing_subjects(
    conn: &mut SqliteConnection,
    parent_id: i64,
) -> Result<HashSet<Subject>, CustomError> {
    let subjects: Vec<String> = sqlx::query_scalar(r"SELECT subject FROM marks WHERE parent_id = ?1")
        .bind(parent_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(subjects
        .iter()
        .filter_map(|subject| subject.parse().ok())
        .collect())
}

/// insert validated marks, should be called inside a transaction
async fn insert_marks(
    conn: &mut SqliteConnection,
    parent_id: i64,
    entries: &[MarkEntry],
) -> Result<Vec<MarkView>, CustomError> {
    let mut created = Vec::with_capacity(entries.len());
    for entry in entries {
        let mark: MarkView = sqlx::query_as(
            r"INSERT INTO marks (subject, score, parent_id)
                VALUES (?1, ?2, ?3)
                RETURNING id, subject, score",
        )
        .bind(entry.label.as_str())
        .bind(entry.score)
        .bind(parent_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                CustomError::Conflict(format!(
                    "Marks already exist for subjects: {}",
                    entry.label
                ))
            } else {
                CustomError::Database(err)
            }
        })?;
        created.push(mark);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::super::testing::{build_app_state, seed_student};
    use super::*;

    fn raw(subject: &str, score: i64) -> RawMark {
        RawMark {
            subject: Some(Value::String(subject.to_string())),
            score: Some(json!(score)),
        }
    }

    fn scores(marks: &StudentMarks) -> Vec<(String, i64)> {
        marks
            .marks
            .iter()
            .map(|m| (m.subject.clone(), m.score))
            .collect()
    }

    #[tokio::test]
    async fn test_create_marks() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;

        let created = state
            .create_marks(7, &[raw("Maths", 80), raw(" physics ", 70)])
            .await
            .unwrap();

        assert_eq!(created.parent_id, 7);
        assert_eq!(created.name, "Ada");
        assert_eq!(
            scores(&created),
            vec![("Maths".to_string(), 80), ("physics".to_string(), 70)]
        );
        assert_ne!(created.marks[0].id, created.marks[1].id);
    }

    #[tokio::test]
    async fn test_create_marks_requires_student() {
        let (_dir, state) = build_app_state().await;
        let result = state.create_marks(99, &[raw("Maths", 80)]).await;
        assert!(matches!(result, Err(CustomError::NotFound(msg)) if msg == "Student not found"));
    }

    #[tokio::test]
    async fn test_create_marks_conflict_is_case_insensitive() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        state.create_marks(7, &[raw("Maths", 80)]).await.unwrap();

        let result = state
            .create_marks(7, &[raw("English", 60), raw("MATHS", 90)])
            .await;
        match result {
            Err(CustomError::Conflict(msg)) => {
                assert_eq!(msg, "Marks already exist for subjects: MATHS")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // nothing from the rejected batch was stored
        let stored = state.get_marks(7).await.unwrap();
        assert_eq!(scores(&stored), vec![("Maths".to_string(), 80)]);
    }

    #[tokio::test]
    async fn test_conflict_lists_every_existing_subject() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        state
            .create_marks(7, &[raw("Maths", 80), raw("Physics", 70)])
            .await
            .unwrap();

        let result = state
            .create_marks(7, &[raw("Maths", 1), raw("Physics", 2), raw("English", 3)])
            .await;
        match result {
            Err(CustomError::Conflict(msg)) => {
                assert_eq!(msg, "Marks already exist for subjects: Maths, Physics")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_existing_subject_reported_before_bad_score() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        state.create_marks(7, &[raw("Maths", 80)]).await.unwrap();

        let result = state
            .create_marks(7, &[raw("Maths", 90), raw("Physics", 150)])
            .await;
        match result {
            Err(CustomError::Conflict(msg)) => {
                assert_eq!(msg, "Marks already exist for subjects: Maths")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // without an existing subject the score is what gets reported
        let result = state.create_marks(7, &[raw("Physics", 150)]).await;
        assert!(matches!(
            result,
            Err(CustomError::InvalidArgument(msg)) if msg == "Score for Physics must be between 0 and 100"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_for_one_student() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;

        for round in 0..5 {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let state = state.clone();
                    tokio::spawn(async move { state.create_marks(7, &[raw("Maths", 50)]).await })
                })
                .collect();

            let mut created = 0;
            let mut conflicts = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => created += 1,
                    Err(CustomError::Conflict(_)) => conflicts += 1,
                    Err(other) => panic!("round {}: unexpected error: {:?}", round, other),
                }
            }
            assert_eq!((created, conflicts), (1, 3), "round {}", round);
            assert_eq!(state.get_marks(7).await.unwrap().marks.len(), 1);

            state.delete_marks(7).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_validation_stores_nothing() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;

        let result = state
            .create_marks(7, &[raw("Maths", 80), raw("Physics", 120)])
            .await;
        assert!(matches!(result, Err(CustomError::InvalidArgument(_))));
        assert!(matches!(
            state.get_marks(7).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_marks_keeps_other_subjects() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        state
            .create_marks(7, &[raw("Maths", 80), raw("Physics", 70)])
            .await
            .unwrap();

        let replaced = state.replace_marks(7, &[raw("maths", 95)]).await.unwrap();
        assert_eq!(scores(&replaced), vec![("maths".to_string(), 95)]);

        let stored = state.get_marks(7).await.unwrap();
        let mut stored = scores(&stored);
        stored.sort();
        assert_eq!(
            stored,
            vec![("Physics".to_string(), 70), ("maths".to_string(), 95)]
        );
    }

    #[tokio::test]
    async fn test_replace_marks_is_repeatable() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;

        let first = state.replace_marks(7, &[raw("Biology", 55)]).await.unwrap();
        let second = state.replace_marks(7, &[raw("Biology", 55)]).await.unwrap();

        assert_eq!(scores(&first), scores(&second));
        assert_ne!(first.marks[0].id, second.marks[0].id);
        assert_eq!(state.get_marks(7).await.unwrap().marks.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_marks_requires_student() {
        let (_dir, state) = build_app_state().await;
        let result = state.replace_marks(1, &[raw("Maths", 1)]).await;
        assert!(matches!(result, Err(CustomError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_marks() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        state
            .create_marks(7, &[raw("Maths", 80), raw("Physics", 70), raw("English", 60)])
            .await
            .unwrap();

        assert_eq!(state.delete_marks(7).await.unwrap(), 3);
        assert!(matches!(
            state.get_marks(7).await,
            Err(CustomError::NotFound(_))
        ));

        // the student is still there, but has nothing left to delete
        match state.delete_marks(7).await {
            Err(CustomError::NotFound(msg)) => assert_eq!(msg, "No marks found for this student"),
            other => panic!("unexpected result: {:?}", other),
        }
        match state.delete_marks(8).await {
            Err(CustomError::NotFound(msg)) => assert_eq!(msg, "Student not found"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_marks_without_marks() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        assert!(matches!(
            state.get_marks(7).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_marks_pages_over_students() {
        let (_dir, state) = build_app_state().await;
        for parent_id in 1..=12 {
            seed_student(&state, parent_id, &format!("Student {}", parent_id)).await;
            let marks: Vec<RawMark> = Subject::ALL
                .iter()
                .take((parent_id % 5 + 1) as usize)
                .map(|subject| raw(subject.as_str(), 50))
                .collect();
            state.create_marks(parent_id, &marks).await.unwrap();
        }
        // a student without marks is not part of the listing
        seed_student(&state, 13, "No Marks").await;

        let (groups, meta) = state.list_marks(PageRequest::new(1, 5).unwrap()).await.unwrap();
        assert_eq!(groups.len(), 5);
        assert_eq!(
            meta,
            PageMeta {
                total: 12,
                page: 1,
                limit: 5,
                total_pages: 3
            }
        );
        let ids: Vec<i64> = groups.iter().map(|g| g.parent_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(groups[0].name, "Student 1");
        assert_eq!(groups[0].marks.len(), 2);
        assert_eq!(groups[3].marks.len(), 5);

        let (last, _) = state.list_marks(PageRequest::new(3, 5).unwrap()).await.unwrap();
        let ids: Vec<i64> = last.iter().map(|g| g.parent_id).collect();
        assert_eq!(ids, vec![11, 12]);

        assert!(matches!(
            state.list_marks(PageRequest::new(4, 5).unwrap()).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_marks_empty() {
        let (_dir, state) = build_app_state().await;
        assert!(matches!(
            state.list_marks(PageRequest::default()).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[test]
    fn test_group_by_student_uses_placeholder_name() {
        let rows = vec![
            GroupedMarkRow {
                parent_id: 1,
                name: None,
                subject: "Maths".to_string(),
                score: 10,
            },
            GroupedMarkRow {
                parent_id: 1,
                name: None,
                subject: "English".to_string(),
                score: 20,
            },
            GroupedMarkRow {
                parent_id: 2,
                name: Some("Bo".to_string()),
                subject: "Maths".to_string(),
                score: 30,
            },
        ];
        let groups = group_by_student(rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, UNKNOWN_NAME);
        assert_eq!(groups[0].marks.len(), 2);
        assert_eq!(groups[1].name, "Bo");
    }
}

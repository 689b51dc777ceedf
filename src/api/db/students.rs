use log::{info, warn};

use super::{find_student_name, AppState};
use crate::api::{
    err::{is_unique_violation, CustomError},
    page::{PageMeta, PageRequest},
    student::{Student, UNKNOWN_NAME},
};

fn duplicate_student(err: sqlx::Error) -> CustomError {
    if is_unique_violation(&err) {
        CustomError::Conflict("A student with this parent ID or email already exists".to_string())
    } else {
        CustomError::Database(err)
    }
}

fn student_not_found() -> CustomError {
    CustomError::NotFound("Student not found".to_string())
}

impl AppState {
    pub async fn add_student(&self, student: &Student) -> Result<Student, CustomError> {
        let created = sqlx::query_as(
            r"INSERT INTO students (parent_id, name, email, age)
                VALUES (?1, ?2, ?3, ?4)
                RETURNING parent_id, name, email, age",
        )
        .bind(student.parent_id)
        .bind(student.name.as_str())
        .bind(student.email.as_str())
        .bind(student.age)
        .fetch_one(&self.db)
        .await
        .map_err(duplicate_student)?;

        info!("Created student with parentId: {}", student.parent_id);
        Ok(created)
    }

    pub async fn get_student(&self, parent_id: i64) -> Result<Student, CustomError> {
        sqlx::query_as(r"SELECT parent_id, name, email, age FROM students WHERE parent_id = ?1")
            .bind(parent_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(student_not_found)
    }

    /// overwrite name, email and age; the parent id never changes
    pub async fn update_student(&self, student: &Student) -> Result<Student, CustomError> {
        let updated: Option<Student> = sqlx::query_as(
            r"UPDATE students
                SET name = ?1, email = ?2, age = ?3, updated_at = CURRENT_TIMESTAMP
                WHERE parent_id = ?4
                RETURNING parent_id, name, email, age",
        )
        .bind(student.name.as_str())
        .bind(student.email.as_str())
        .bind(student.age)
        .bind(student.parent_id)
        .fetch_optional(&self.db)
        .await
        .map_err(duplicate_student)?;

        updated.ok_or_else(student_not_found)
    }

    /// removes the student together with all of its marks
    pub async fn delete_student(&self, parent_id: i64) -> Result<(), CustomError> {
        let deleted = sqlx::query(r"DELETE FROM students WHERE parent_id = ?1")
            .bind(parent_id)
            .execute(&self.db)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(student_not_found());
        }
        info!("Deleted student with parentId: {}", parent_id);
        Ok(())
    }

    pub async fn list_students(
        &self,
        page: PageRequest,
    ) -> Result<(Vec<Student>, PageMeta), CustomError> {
        let total: i64 = sqlx::query_scalar(r"SELECT COUNT(*) FROM students")
            .fetch_one(&self.db)
            .await?;

        let students = sqlx::query_as(
            r"SELECT parent_id, name, email, age FROM students
                ORDER BY parent_id ASC
                LIMIT ?1 OFFSET ?2",
        )
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.db)
        .await?;

        Ok((students, page.meta(total)))
    }

    /// Display name for `parent_id`. Never fails: a missing student or a
    /// failed lookup both give the placeholder name.
    pub async fn student_name(&self, parent_id: i64) -> String {
        match find_student_name(&self.db, parent_id).await {
            Ok(Some(name)) => name,
            Ok(None) => UNKNOWN_NAME.to_string(),
            Err(err) => {
                warn!("Name lookup failed for parentId {}: {}", parent_id, err);
                UNKNOWN_NAME.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::{build_app_state, seed_student};
    use super::*;
    use crate::api::mark::RawMark;

    fn student(parent_id: i64, email: &str) -> Student {
        Student {
            parent_id,
            name: "Ada".to_string(),
            email: email.to_string(),
            age: 17,
        }
    }

    #[tokio::test]
    async fn test_add_and_get_student() {
        let (_dir, state) = build_app_state().await;
        let created = state.add_student(&student(7, "ada@example.com")).await.unwrap();
        assert_eq!(created, student(7, "ada@example.com"));
        assert_eq!(state.get_student(7).await.unwrap(), created);
        assert!(matches!(
            state.get_student(8).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_student() {
        let (_dir, state) = build_app_state().await;
        state.add_student(&student(7, "ada@example.com")).await.unwrap();

        let same_id = state.add_student(&student(7, "other@example.com")).await;
        assert!(matches!(same_id, Err(CustomError::Conflict(_))));
        let same_email = state.add_student(&student(8, "ada@example.com")).await;
        assert!(matches!(same_email, Err(CustomError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_student() {
        let (_dir, state) = build_app_state().await;
        state.add_student(&student(7, "ada@example.com")).await.unwrap();

        let mut changed = student(7, "lovelace@example.com");
        changed.name = "Ada Lovelace".to_string();
        changed.age = 18;
        assert_eq!(state.update_student(&changed).await.unwrap(), changed);
        assert_eq!(state.student_name(7).await, "Ada Lovelace");

        assert!(matches!(
            state.update_student(&student(9, "x@example.com")).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_student_removes_marks() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 7, "Ada").await;
        let marks = vec![RawMark {
            subject: Some(json!("Maths")),
            score: Some(json!(80)),
        }];
        state.create_marks(7, &marks).await.unwrap();

        state.delete_student(7).await.unwrap();
        assert!(matches!(
            state.get_marks(7).await,
            Err(CustomError::NotFound(_))
        ));
        assert!(matches!(
            state.delete_student(7).await,
            Err(CustomError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_students() {
        let (_dir, state) = build_app_state().await;
        let (students, meta) = state.list_students(PageRequest::default()).await.unwrap();
        assert!(students.is_empty());
        assert_eq!(meta.total, 0);

        for parent_id in [5, 3, 9, 1] {
            seed_student(&state, parent_id, "S").await;
        }
        let (students, meta) = state
            .list_students(PageRequest::new(2, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].parent_id, 9);
        assert_eq!(meta.total_pages, 2);
    }

    #[tokio::test]
    async fn test_student_name_falls_back() {
        let (_dir, state) = build_app_state().await;
        seed_student(&state, 1, "Grace").await;
        assert_eq!(state.student_name(1).await, "Grace");
        assert_eq!(state.student_name(2).await, UNKNOWN_NAME);
    }
}

mod marks;
mod students;
mod table;

use std::{path::Path, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, Pool, Sqlite,
};

use super::err::CustomError;

/// Shared by every request. Holds the one connection pool of the process.
#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
}

impl AppState {
    /// open (or create) the database file at `path` and bring the schema up to date
    pub async fn build(path: &Path) -> Result<Self, CustomError> {
        // create the data directory if it doesn't exist
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            // writers queue on the lock instead of failing right away
            .busy_timeout(Duration::from_secs(5));

        // connect the database
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        // use the migration feature of sqlx to create the table
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database ready at {}", path.display());
        Ok(AppState { db: pool })
    }
}

/// display name of the student with `parent_id`, if there is one
async fn find_student_name<'e, E>(executor: E, parent_id: i64) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(r"SELECT name FROM students WHERE parent_id = ?1")
        .bind(parent_id)
        .fetch_optional(executor)
        .await
}

/// like [`find_student_name`] but a missing student is an error
async fn require_student<'e, E>(executor: E, parent_id: i64) -> Result<String, CustomError>
where
    E: Executor<'e, Database = Sqlite>,
{
    match find_student_name(executor, parent_id).await? {
        Some(name) => Ok(name),
        None => {
            info!("Student not found for parentId: {}", parent_id);
            Err(CustomError::NotFound("Student not found".to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tempfile::TempDir;

    use super::*;
    use crate::api::student::Student;

    /// a fresh database in a temporary directory; keep the `TempDir` alive
    pub async fn build_app_state() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::build(&dir.path().join("marks.db")).await.unwrap();
        (dir, state)
    }

    pub async fn seed_student(state: &AppState, parent_id: i64, name: &str) -> Student {
        let student = Student {
            parent_id,
            name: name.to_string(),
            email: format!("student{}@example.com", parent_id),
            age: 16,
        };
        state.add_student(&student).await.unwrap()
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::err::CustomError;

/// placeholder shown when a student's name cannot be looked up
pub const UNKNOWN_NAME: &str = "N/A";

#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub parent_id: i64,
    pub name: String,
    pub email: String,
    pub age: i64,
}

/// student fields as posted by the client, before validation
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudentPayload {
    #[serde(default)]
    pub parent_id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub age: Option<Value>,
}

impl StudentPayload {
    pub fn parse(body: &[u8]) -> Result<Self, CustomError> {
        serde_json::from_slice(body)
            .map_err(|e| CustomError::InvalidArgument(format!("Malformed student payload: {}", e)))
    }

    /// Validate a new student. `parentId` must be in the body.
    pub fn into_new_student(self) -> Result<Student, CustomError> {
        let parent_id = match &self.parent_id {
            Some(value) => positive_int(value)
                .ok_or_else(|| invalid("Parent ID must be a positive integer"))?,
            None => return Err(invalid("Parent ID is required")),
        };
        self.into_student(parent_id)
    }

    /// Validate an update for the student at `parent_id`.
    /// A `parentId` in the body is allowed only if it matches.
    pub fn into_update(self, parent_id: i64) -> Result<Student, CustomError> {
        if let Some(value) = &self.parent_id {
            if positive_int(value) != Some(parent_id) {
                return Err(invalid("Parent ID cannot be changed"));
            }
        }
        self.into_student(parent_id)
    }

    fn into_student(self, parent_id: i64) -> Result<Student, CustomError> {
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(invalid("Name is required"));
        }

        let email = self.email.as_deref().map(str::trim).unwrap_or_default();
        if !is_plausible_email(email) {
            return Err(invalid("A valid email is required"));
        }

        let age = self
            .age
            .as_ref()
            .and_then(positive_int)
            .filter(|age| *age <= 150)
            .ok_or_else(|| invalid("Age must be an integer between 1 and 150"))?;

        Ok(Student {
            parent_id,
            name: name.to_string(),
            email: email.to_string(),
            age,
        })
    }
}

fn invalid(msg: &str) -> CustomError {
    CustomError::InvalidArgument(msg.to_string())
}

/// accepts `7` and `"7"`, the UI sends both
fn positive_int(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (n > 0).then_some(n)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// parse the `{parentId}` path segment
pub fn parse_parent_id(raw: &str) -> Result<i64, CustomError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid("Parent ID is required"));
    }
    positive_int(&Value::String(raw.to_string()))
        .ok_or_else(|| CustomError::InvalidArgument(format!("Invalid parent ID: {}", raw)))
}

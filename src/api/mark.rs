use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::err::CustomError;

/// a single request may carry at most one mark per subject
pub const MAX_MARKS_PER_REQUEST: usize = 5;

const MARK_COUNT_MESSAGE: &str =
    "At least 1 and at most 5 marks are required for Maths, Physics, Chemistry, English, and Biology";

/// The closed set of subjects a mark can be recorded for.
/// The same list is enforced by the CHECK constraint on `marks.subject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Maths,
    Physics,
    Chemistry,
    English,
    Biology,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::Maths,
        Subject::Physics,
        Subject::Chemistry,
        Subject::English,
        Subject::Biology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Maths => "Maths",
            Subject::Physics => "Physics",
            Subject::Chemistry => "Chemistry",
            Subject::English => "English",
            Subject::Biology => "Biology",
        }
    }

    /// lower-cased form, matches `lower(subject)` in sql
    pub fn key(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Subject::ALL
            .into_iter()
            .find(|subject| subject.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// one `{subject, score}` entry exactly as the client sent it
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RawMark {
    #[serde(default)]
    pub subject: Option<Value>,
    #[serde(default)]
    pub score: Option<Value>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawMarks {
    Many(Vec<RawMark>),
    One(RawMark),
}

/// Request bodies come as `{marks: [...]}`, `{marks: {...}}`, a bare array or a
/// single mark object. All of them end up as one list.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum MarksPayload {
    Bare(Vec<RawMark>),
    Wrapped { marks: RawMarks },
    Single(RawMark),
}

impl RawMarks {
    fn into_vec(self) -> Vec<RawMark> {
        match self {
            RawMarks::Many(marks) => marks,
            RawMarks::One(mark) => vec![mark],
        }
    }
}

/// normalize a request body into the list of submitted marks
pub fn parse_marks_body(body: &[u8]) -> Result<Vec<RawMark>, CustomError> {
    let payload: MarksPayload = serde_json::from_slice(body)
        .map_err(|e| CustomError::InvalidArgument(format!("Malformed marks payload: {}", e)))?;

    Ok(match payload {
        MarksPayload::Bare(marks) => marks,
        MarksPayload::Wrapped { marks } => marks.into_vec(),
        MarksPayload::Single(mark) => vec![mark],
    })
}

/// a mark that passed validation and is ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub subject: Subject,
    /// trimmed subject text as sent, this is what gets stored
    pub label: String,
    pub score: i64,
}

/// Validate a batch of submitted marks.
///
/// Runs [`check_subjects`] and then [`check_scores`]. Nothing here touches the database.
pub fn validate_marks(raw: &[RawMark]) -> Result<Vec<MarkEntry>, CustomError> {
    let subjects = check_subjects(raw)?;
    check_scores(raw, subjects)
}

/// Count, subject names (all offenders are reported) and duplicates inside the
/// request. Returns the parsed subject and its trimmed label, in request order.
pub fn check_subjects(raw: &[RawMark]) -> Result<Vec<(Subject, String)>, CustomError> {
    if raw.is_empty() || raw.len() > MAX_MARKS_PER_REQUEST {
        return Err(CustomError::InvalidArgument(MARK_COUNT_MESSAGE.to_string()));
    }

    let labels: Vec<String> = raw.iter().map(subject_label).collect();

    let mut subjects = Vec::with_capacity(labels.len());
    let mut invalid = Vec::new();
    for label in &labels {
        match label.parse::<Subject>() {
            Ok(subject) => subjects.push(subject),
            Err(_) => invalid.push(label.as_str()),
        }
    }
    if !invalid.is_empty() {
        return Err(CustomError::InvalidArgument(format!(
            "Invalid subjects: {}. Only Maths, Physics, Chemistry, English, and Biology are allowed",
            invalid.join(", ")
        )));
    }

    let unique: HashSet<Subject> = subjects.iter().copied().collect();
    if unique.len() != subjects.len() {
        return Err(CustomError::InvalidArgument(
            "Duplicate subjects are not allowed in the same request".to_string(),
        ));
    }

    Ok(subjects.into_iter().zip(labels).collect())
}

/// Score range, reported for the first offending subject.
/// `subjects` is the output of [`check_subjects`] for the same `raw`.
pub fn check_scores(
    raw: &[RawMark],
    subjects: Vec<(Subject, String)>,
) -> Result<Vec<MarkEntry>, CustomError> {
    raw.iter()
        .zip(subjects)
        .map(|(mark, (subject, label))| {
            let score = parse_score(mark.score.as_ref()).ok_or_else(|| {
                CustomError::InvalidArgument(format!(
                    "Score for {} must be between 0 and 100",
                    label
                ))
            })?;
            Ok(MarkEntry {
                subject,
                label,
                score,
            })
        })
        .collect()
}

fn subject_label(mark: &RawMark) -> String {
    match &mark.subject {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// any json number in [0, 100]; fractional scores are truncated
fn parse_score(score: Option<&Value>) -> Option<i64> {
    let value = score?.as_f64()?;
    if !(0.0..=100.0).contains(&value) {
        return None;
    }
    Some(value.trunc() as i64)
}

/// a stored mark as returned to the client
#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkView {
    pub id: i64,
    pub subject: String,
    pub score: i64,
}

/// a mark inside a grouped listing, ids are not exposed there
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject: String,
    pub score: i64,
}

/// all marks of one student, with the student's display name attached
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentMarks {
    pub parent_id: i64,
    pub name: String,
    pub marks: Vec<MarkView>,
}

/// one group of the paginated listing
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkGroup {
    pub parent_id: i64,
    pub name: String,
    pub marks: Vec<SubjectScore>,
}

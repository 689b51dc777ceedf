use std::{collections::HashMap, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use log::info;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use super::{
    db::AppState,
    err::CustomError,
    mark::{parse_marks_body, MarkView, StudentMarks},
    page::PageRequest,
    student::{parse_parent_id, StudentPayload},
};

type ApiResult = Result<(StatusCode, Json<Value>), CustomError>;

/// every route lives under `/api`
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let api = Router::new()
        .route("/students/add", post(add_student))
        .route("/students/view/{parent_id}", get(view_student))
        .route("/students/viewall", get(view_all_students))
        .route("/students/update/{parent_id}", put(update_student))
        .route("/students/delete/{parent_id}", delete(delete_student))
        .route("/students/mark/add/{parent_id}", post(create_marks))
        .route("/students/mark/view/{parent_id}", get(view_marks))
        .route("/students/mark/update/{parent_id}", put(update_marks))
        .route("/students/mark/delete/{parent_id}", delete(delete_marks))
        .route("/students/mark/viewallwithmarks", get(view_all_with_marks));

    Router::new().nest("/api", api).layer(cors).with_state(state)
}

/// first element of a mark response: who the marks belong to
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentHeader {
    parent_id: i64,
    name: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum DataEntry {
    Header(StudentHeader),
    Mark(MarkView),
}

/// `[{parentId, name}, mark, mark, ...]`
fn marks_data(marks: StudentMarks) -> Vec<DataEntry> {
    let header = DataEntry::Header(StudentHeader {
        parent_id: marks.parent_id,
        name: marks.name,
    });
    std::iter::once(header)
        .chain(marks.marks.into_iter().map(DataEntry::Mark))
        .collect()
}

pub async fn create_marks(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    info!(
        "createMarks - Received parentId: {}, payload: {}",
        parent_id,
        String::from_utf8_lossy(&body)
    );
    let parent_id = parse_parent_id(&parent_id)?;
    let marks = parse_marks_body(&body)?;

    let created = state
        .create_marks(parent_id, &marks)
        .await
        .map_err(|e| e.during("create marks"))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Marks created successfully",
            "data": marks_data(created),
        })),
    ))
}

pub async fn view_marks(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult {
    info!("getMarksByParentId - Received parentId: {}", parent_id);
    let parent_id = parse_parent_id(&parent_id)?;

    let marks = state
        .get_marks(parent_id)
        .await
        .map_err(|e| e.during("retrieve marks"))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Marks retrieved successfully",
            "data": marks_data(marks),
        })),
    ))
}

pub async fn update_marks(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    info!(
        "updateMarks - Received parentId: {}, payload: {}",
        parent_id,
        String::from_utf8_lossy(&body)
    );
    let parent_id = parse_parent_id(&parent_id)?;
    let marks = parse_marks_body(&body)?;

    let updated = state
        .replace_marks(parent_id, &marks)
        .await
        .map_err(|e| e.during("update marks"))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Marks updated successfully",
            "data": marks_data(updated),
        })),
    ))
}

pub async fn delete_marks(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult {
    info!("deleteMarks - Received parentId: {}", parent_id);
    let parent_id = parse_parent_id(&parent_id)?;

    let deleted = state
        .delete_marks(parent_id)
        .await
        .map_err(|e| e.during("delete marks"))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": format!("Successfully deleted {} mark(s)", deleted) })),
    ))
}

pub async fn view_all_with_marks(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let page = PageRequest::from_query(&params)?;

    let (groups, meta) = state
        .list_marks(page)
        .await
        .map_err(|e| e.during("retrieve marks"))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "All marks retrieved successfully",
            "data": groups,
            "meta": meta,
        })),
    ))
}

pub async fn add_student(State(state): State<AppState>, body: Bytes) -> ApiResult {
    info!("addStudent - Payload: {}", String::from_utf8_lossy(&body));
    let student = StudentPayload::parse(&body)?.into_new_student()?;

    let created = state
        .add_student(&student)
        .await
        .map_err(|e| e.during("create student"))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Student created successfully", "data": created })),
    ))
}

/// answers with the bare student object
pub async fn view_student(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult {
    let parent_id = parse_parent_id(&parent_id)?;

    let student = state
        .get_student(parent_id)
        .await
        .map_err(|e| e.during("retrieve student"))?;

    Ok((StatusCode::OK, Json(json!(student))))
}

pub async fn view_all_students(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let page = PageRequest::from_query(&params)?;

    let (students, meta) = state
        .list_students(page)
        .await
        .map_err(|e| e.during("retrieve students"))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Students retrieved successfully",
            "data": students,
            "meta": meta,
        })),
    ))
}

pub async fn update_student(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    info!(
        "updateStudent - Received parentId: {}, payload: {}",
        parent_id,
        String::from_utf8_lossy(&body)
    );
    let parent_id = parse_parent_id(&parent_id)?;
    let student = StudentPayload::parse(&body)?.into_update(parent_id)?;

    let updated = state
        .update_student(&student)
        .await
        .map_err(|e| e.during("update student"))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Student updated successfully", "data": updated })),
    ))
}

pub async fn delete_student(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult {
    info!("deleteStudent - Received parentId: {}", parent_id);
    let parent_id = parse_parent_id(&parent_id)?;

    state
        .delete_student(parent_id)
        .await
        .map_err(|e| e.during("delete student"))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Student deleted successfully" })),
    ))
}

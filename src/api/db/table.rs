/// one mark joined with its (optional) student, used by the grouped listing
#[derive(sqlx::FromRow, Debug)]
pub struct GroupedMarkRow {
    pub parent_id: i64,
    pub name: Option<String>,
    pub subject: String,
    pub score: i64,
}

use std::collections::HashMap;

use serde::Serialize;

use super::err::CustomError;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 5;

/// `?page=&limit=` window, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Result<Self, CustomError> {
        if page < 1 || limit < 1 {
            return Err(CustomError::InvalidArgument(
                "page and limit must be positive integers".to_string(),
            ));
        }
        Ok(Self { page, limit })
    }

    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, CustomError> {
        let page = read_param(params, "page", DEFAULT_PAGE)?;
        let limit = read_param(params, "limit", DEFAULT_LIMIT)?;
        Self::new(page, limit)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn meta(&self, total: i64) -> PageMeta {
        PageMeta {
            total,
            page: self.page,
            limit: self.limit,
            total_pages: total / self.limit + i64::from(total % self.limit != 0),
        }
    }
}

fn read_param(params: &HashMap<String, String>, key: &str, default: i64) -> Result<i64, CustomError> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| CustomError::InvalidArgument(format!("Invalid {}: {}", key, raw))),
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

use crate::error::{DbError, DbResult};
use crate::models::JsonRow;
use crate::repository::Entity;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub name_native: Option<String>,
    pub season: i64,
    pub number: i64,
    /// ISO 8601 date
    #[serde(default)]
    pub air_date: Option<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
}

impl Entity for Episode {
    const TABLE: &'static str = "episodes";
    const NAME: &'static str = "Episode";
    const CREATE_FIELDS: &'static [&'static str] = &[
        "name",
        "name_native",
        "season",
        "number",
        "air_date",
        "synopsis",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "season", "number"];
    const UPDATE_FIELDS: &'static [&'static str] =
        &["name", "name_native", "air_date", "synopsis"];
    const SEARCH_FIELDS: &'static [&'static str] = &["name", "name_native", "synopsis"];
    const FILTER_FIELDS: &'static [&'static str] = &["season"];
    const SORT_COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("id", "id"),
        ("name", "name"),
        ("season", "season"),
        ("number", "number"),
        ("airDate", "air_date"),
        ("air_date", "air_date"),
    ];
    const DEFAULT_SORT: &'static str = "season";

    fn from_row(mut row: JsonRow) -> DbResult<Self> {
        // DATETIME columns carry a time part; keep the day
        if let Some(JsonValue::String(date)) = row.get_mut("air_date") {
            if date.len() > 10 && date.is_char_boundary(10) {
                date.truncate(10);
            }
        }
        serde_json::from_value(JsonValue::Object(row))
            .map_err(|e| DbError::internal(format!("Failed to map {} row: {}", Self::TABLE, e)))
    }
}

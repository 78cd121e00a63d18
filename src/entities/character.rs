use crate::repository::Entity;
use serde::{Deserialize, Serialize};

/// A named character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub name_native: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub affiliation: Option<String>,
    /// Episode the character first appears in
    #[serde(default)]
    pub first_episode_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Entity for Character {
    const TABLE: &'static str = "characters";
    const NAME: &'static str = "Character";
    const CREATE_FIELDS: &'static [&'static str] = &[
        "name",
        "name_native",
        "title",
        "affiliation",
        "first_episode_id",
        "description",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name"];
    const UPDATE_FIELDS: &'static [&'static str] = &[
        "name",
        "name_native",
        "title",
        "affiliation",
        "first_episode_id",
        "description",
    ];
    const SEARCH_FIELDS: &'static [&'static str] = &["name", "name_native", "title"];
    const FILTER_FIELDS: &'static [&'static str] = &["affiliation", "first_episode_id"];
    const SORT_COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("id", "id"),
        ("name", "name"),
        ("nameNative", "name_native"),
        ("name_native", "name_native"),
        ("affiliation", "affiliation"),
    ];
}

use crate::repository::Entity;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Equipment, consumables and key items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub name_native: Option<String>,
    pub category: String,
    /// 1 (common) to 5 (legendary)
    #[serde(default)]
    pub rarity: Option<i64>,
    /// Exact amount; read from DECIMAL text or a floating-point column
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Entity for Item {
    const TABLE: &'static str = "items";
    const NAME: &'static str = "Item";
    const CREATE_FIELDS: &'static [&'static str] = &[
        "name",
        "name_native",
        "category",
        "rarity",
        "price",
        "description",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "category"];
    const UPDATE_FIELDS: &'static [&'static str] = &[
        "name",
        "name_native",
        "category",
        "rarity",
        "price",
        "description",
    ];
    const SEARCH_FIELDS: &'static [&'static str] =
        &["name", "name_native", "category", "description"];
    const FILTER_FIELDS: &'static [&'static str] = &["category", "rarity"];
    const SORT_COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("id", "id"),
        ("name", "name"),
        ("nameNative", "name_native"),
        ("name_native", "name_native"),
        ("category", "category"),
        ("rarity", "rarity"),
        ("price", "price"),
    ];
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Centrally owned category, referenced by name from tickets and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Display name per language code, e.g. `"sl" => "Koncerti"`.
    #[serde(default)]
    pub variants: BTreeMap<String, String>,
    #[serde(default)]
    pub sort_priority: i32,
}

impl Category {
    pub fn display_name(&self, language: &str) -> &str {
        self.variants
            .get(language)
            .map(String::as_str)
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct CategoryRow {
    pub name: String,
    pub variants: Option<Json<BTreeMap<String, String>>>,
    pub sort_priority: Option<i32>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            name: row.name,
            variants: row.variants.map(|v| v.0).unwrap_or_default(),
            sort_priority: row.sort_priority.unwrap_or_default(),
        }
    }
}

/// Sort by priority, then name, for display.
pub fn sort_categories(categories: &mut [Category]) {
    categories.sort_by(|a, b| {
        a.sort_priority
            .cmp(&b.sort_priority)
            .then_with(|| a.name.cmp(&b.name))
    });
}

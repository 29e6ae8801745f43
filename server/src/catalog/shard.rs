//! Category to shard routing.
//!
//! Tickets live in nine parallel tables. A ticket's table is chosen from its
//! category when it is created and never changes afterwards. Category names
//! reach us from URLs and UI controls in several languages, so lookup is done
//! on a folded key (lowercase, diacritics stripped, separators collapsed) and
//! anything unrecognised lands in [`ShardId::Other`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardId {
    Concerts,
    Sports,
    Theater,
    Festivals,
    Comedy,
    Exhibitions,
    Cinema,
    Conferences,
    Other,
}

/// Probe order used by every scan. Must stay stable.
const ALL_SHARDS: [ShardId; 9] = [
    ShardId::Concerts,
    ShardId::Sports,
    ShardId::Theater,
    ShardId::Festivals,
    ShardId::Comedy,
    ShardId::Exhibitions,
    ShardId::Cinema,
    ShardId::Conferences,
    ShardId::Other,
];

impl ShardId {
    pub fn all() -> &'static [ShardId] {
        &ALL_SHARDS
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Concerts => "tickets_concerts",
            Self::Sports => "tickets_sports",
            Self::Theater => "tickets_theater",
            Self::Festivals => "tickets_festivals",
            Self::Comedy => "tickets_comedy",
            Self::Exhibitions => "tickets_exhibitions",
            Self::Cinema => "tickets_cinema",
            Self::Conferences => "tickets_conferences",
            Self::Other => "tickets_other",
        }
    }

    /// Canonical category name stored on tickets written to this shard.
    pub fn canonical_category(&self) -> &'static str {
        match self {
            Self::Concerts => "Concerts",
            Self::Sports => "Sports",
            Self::Theater => "Theater",
            Self::Festivals => "Festivals",
            Self::Comedy => "Comedy",
            Self::Exhibitions => "Exhibitions",
            Self::Cinema => "Cinema",
            Self::Conferences => "Conferences",
            Self::Other => "Other",
        }
    }

    fn builtin_synonyms(&self) -> &'static [&'static str] {
        match self {
            Self::Concerts => &[
                "concerts", "concert", "music", "koncerti", "koncert", "glasba", "konzerte",
                "konzert", "musik",
            ],
            Self::Sports => &[
                "sports", "sport", "sporting events", "šport", "športni dogodki",
                "sportveranstaltungen",
            ],
            Self::Theater => &[
                "theater", "theatre", "gledališče", "predstave", "predstava", "theaterstücke",
            ],
            Self::Festivals => &["festivals", "festival", "festivali", "feste"],
            Self::Comedy => &[
                "comedy", "stand-up", "standup", "komedija", "komedije", "komödie",
            ],
            Self::Exhibitions => &[
                "exhibitions", "exhibition", "museum", "razstave", "razstava", "muzej",
                "ausstellungen", "ausstellung",
            ],
            Self::Cinema => &["cinema", "movies", "movie", "film", "filmi", "kino"],
            Self::Conferences => &[
                "conferences", "conference", "workshops", "konference", "konferenca",
                "seminarji", "konferenzen", "konferenz",
            ],
            Self::Other => &["other", "ostalo", "drugo", "sonstiges"],
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Outcome of routing a category string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardMatch {
    pub shard: ShardId,
    /// `false` when the category was not recognised and fell back to `Other`.
    pub known: bool,
}

#[derive(Debug, Clone)]
pub struct ShardMap {
    synonyms: HashMap<String, ShardId>,
}

impl Default for ShardMap {
    fn default() -> Self {
        let mut synonyms = HashMap::new();
        for shard in ShardId::all() {
            synonyms.insert(fold_category(shard.canonical_category()), *shard);
            for synonym in shard.builtin_synonyms() {
                synonyms.insert(fold_category(synonym), *shard);
            }
        }
        Self { synonyms }
    }
}

impl ShardMap {
    /// Built-in table extended with the display variants of the live
    /// category list. A category is routed by its canonical name first, and
    /// its variants then follow it to the same shard.
    pub fn with_categories(categories: &[Category]) -> Self {
        let mut map = Self::default();
        for category in categories {
            let shard = map.shard_for(&category.name);
            for variant in category.variants.values() {
                let key = fold_category(variant);
                if key.is_empty() {
                    continue;
                }
                if let Some(existing) = map.synonyms.get(&key) {
                    if *existing != shard {
                        tracing::warn!(
                            variant = %variant,
                            category = %category.name,
                            existing = %existing,
                            "Category variant collides with another shard, keeping existing route"
                        );
                    }
                    continue;
                }
                map.synonyms.insert(key, shard);
            }
        }
        map
    }

    pub fn resolve(&self, category: &str) -> ShardMatch {
        match self.synonyms.get(&fold_category(category)) {
            Some(shard) => ShardMatch {
                shard: *shard,
                known: true,
            },
            None => ShardMatch {
                shard: ShardId::Other,
                known: false,
            },
        }
    }

    pub fn shard_for(&self, category: &str) -> ShardId {
        self.resolve(category).shard
    }

    pub fn all_shards(&self) -> &'static [ShardId] {
        ShardId::all()
    }
}

/// Folds a category name into its lookup key.
pub fn fold_category(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        match ch {
            'č' | 'ć' => folded.push('c'),
            'š' => folded.push('s'),
            'ž' => folded.push('z'),
            'đ' => folded.push('d'),
            'ä' => folded.push('a'),
            'ö' => folded.push('o'),
            'ü' => folded.push('u'),
            'é' | 'è' => folded.push('e'),
            'ß' => folded.push_str("ss"),
            '-' | '_' => folded.push(' '),
            c => folded.push(c),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Name transformation rules: logical names to column names, type names to
//! table names.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use convert_case::{Case, Casing};
use regex::Regex;

/// Memoized `to_db_name` results.
///
/// Conversions run for every field of every described type and for every
/// column lookup by logical name, so results are kept for the process
/// lifetime.
struct NameCache {
    cache: RwLock<HashMap<String, String>>,
}

impl NameCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_convert(&self, name: &str) -> String {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(name) {
                return hit.clone();
            }
        }

        let converted = name.to_case(Case::Snake);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(name.to_string(), converted.clone());
        converted
    }
}

fn name_cache() -> &'static NameCache {
    static CACHE: OnceLock<NameCache> = OnceLock::new();
    CACHE.get_or_init(NameCache::new)
}

/// Convert a logical name into its database form (`UserID` → `user_id`).
///
/// Names that are already snake_case come back unchanged.
pub fn to_db_name(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    name_cache().get_or_convert(name)
}

const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "jeans",
    "police",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("child", "children"),
    ("sex", "sexes"),
    ("move", "moves"),
];

/// Suffix rules, most specific last. Matching walks the list backwards.
const PLURAL_RULES: &[(&str, &str)] = &[
    ("([a-z])$", "${1}s"),
    ("s$", "s"),
    ("^(ax|test)is$", "${1}es"),
    ("(octop|vir)us$", "${1}i"),
    ("(octop|vir)i$", "${1}i"),
    ("(alias|status|campus)$", "${1}es"),
    ("(bu)s$", "${1}ses"),
    ("(buffal|tomat)o$", "${1}oes"),
    ("([ti])um$", "${1}a"),
    ("([ti])a$", "${1}a"),
    ("sis$", "ses"),
    ("(?:([^f])fe|([lr])f)$", "${1}${2}ves"),
    ("(hive)$", "${1}s"),
    ("([^aeiouy]|qu)y$", "${1}ies"),
    ("(x|ch|ss|sh)$", "${1}es"),
    ("(matr|vert|ind)(?:ix|ex)$", "${1}ices"),
    ("^(m|l)ouse$", "${1}ice"),
    ("^(m|l)ice$", "${1}ice"),
    ("^(ox)$", "${1}en"),
    ("^(oxen)$", "${1}"),
    ("(quiz)$", "${1}zes"),
];

fn plural_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        PLURAL_RULES
            .iter()
            .rev()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect()
    })
}

/// Pluralize the last `_`-separated word of a snake_case name.
pub fn pluralize(name: &str) -> String {
    let (head, word) = match name.rfind('_') {
        Some(i) => name.split_at(i + 1),
        None => ("", name),
    };
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return name.to_string();
    }
    for (singular, plural) in IRREGULAR {
        if word == *singular || word == *plural {
            return format!("{head}{plural}");
        }
    }
    for (re, replacement) in plural_rules() {
        if re.is_match(word) {
            return format!("{head}{}", re.replace(word, *replacement));
        }
    }
    name.to_string()
}

/// Default table name for a type name.
pub fn table_name_for(type_name: &str, singular: bool) -> String {
    let base = to_db_name(type_name);
    if singular { base } else { pluralize(&base) }
}

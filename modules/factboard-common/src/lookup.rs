//! Name-to-code tables built once per run from the administrative
//! dictionaries. Pure data; no I/O.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CHINA_ISO3: &str = "CHN";

/// Free-form strings a model uses for China.
const CHINA_ALIASES: &[&str] = &["chn", "cn", "china", "prc", "中国", "中华人民共和国"];

/// Administrative suffixes, longest first so 维吾尔自治区 wins over 自治区.
const PROVINCE_SUFFIXES: &[&str] = &[
    "特别行政区",
    "维吾尔自治区",
    "壮族自治区",
    "回族自治区",
    "自治区",
    "省",
    "市",
];

pub fn is_china_alias(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    CHINA_ALIASES.contains(&lower.as_str())
}

/// Strip one administrative suffix, if present.
pub fn strip_province_suffix(name: &str) -> &str {
    let name = name.trim();
    PROVINCE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvinceEntry {
    pub name_zh: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryEntry {
    pub iso3: String,
    pub name_en: String,
    pub name_zh: Option<String>,
}

// --- ProvinceTable ---

#[derive(Debug, Clone)]
pub struct ProvinceTable {
    /// Longest name first; prefix matching walks this order.
    entries: Vec<ProvinceEntry>,
    by_name: HashMap<String, String>,
    by_short: HashMap<String, String>,
    /// Alternation over full and short names, longest first.
    title_pattern: Option<Regex>,
}

impl ProvinceTable {
    pub fn new(entries: impl IntoIterator<Item = ProvinceEntry>) -> Self {
        let mut entries: Vec<ProvinceEntry> = entries
            .into_iter()
            .filter(|e| !e.name_zh.trim().is_empty() && !e.code.trim().is_empty())
            .map(|e| ProvinceEntry {
                name_zh: e.name_zh.trim().to_string(),
                code: e.code.trim().to_string(),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.name_zh
                .chars()
                .count()
                .cmp(&a.name_zh.chars().count())
                .then_with(|| a.name_zh.cmp(&b.name_zh))
        });

        let mut by_name = HashMap::new();
        let mut by_short = HashMap::new();
        for entry in &entries {
            by_name.insert(entry.name_zh.clone(), entry.code.clone());
            let short = strip_province_suffix(&entry.name_zh);
            // Single characters (e.g. 京) are too ambiguous to scan for.
            if short != entry.name_zh && short.chars().count() >= 2 {
                by_short
                    .entry(short.to_string())
                    .or_insert_with(|| entry.code.clone());
            }
        }

        let title_pattern = build_title_pattern(by_name.keys().chain(by_short.keys()));

        Self {
            entries,
            by_name,
            by_short,
            title_pattern,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ProvinceEntry] {
        &self.entries
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    /// Province code for a free-form name: exact match first, then the
    /// suffix-stripped name as a prefix in either direction.
    pub fn code_of(&self, raw: &str) -> Option<&str> {
        let name = raw.trim();
        if name.is_empty() {
            return None;
        }
        if let Some(code) = self.by_name.get(name) {
            return Some(code);
        }
        if self.contains_code(name) {
            return self
                .entries
                .iter()
                .find(|e| e.code == name)
                .map(|e| e.code.as_str());
        }

        let simp = strip_province_suffix(name);
        if simp.chars().count() < 2 {
            return None;
        }
        if let Some(code) = self.by_short.get(simp) {
            return Some(code);
        }
        self.entries
            .iter()
            .find(|e| e.name_zh.starts_with(simp) || name.starts_with(e.name_zh.as_str()))
            .map(|e| e.code.as_str())
    }

    /// First province name literally present in `text`, full or
    /// suffix-stripped, preferring the longest name at a given position.
    pub fn find_in_text(&self, text: &str) -> Option<&str> {
        let pattern = self.title_pattern.as_ref()?;
        let found = pattern.find(text)?;
        let matched = found.as_str();
        self.by_name
            .get(matched)
            .or_else(|| self.by_short.get(matched))
            .map(String::as_str)
    }
}

fn build_title_pattern<'a>(names: impl Iterator<Item = &'a String>) -> Option<Regex> {
    let mut names: Vec<&str> = names.map(String::as_str).collect();
    if names.is_empty() {
        return None;
    }
    names.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
    names.dedup();
    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&alternation) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "Province title pattern failed to compile; title inference disabled");
            None
        }
    }
}

// --- CountryTable ---

#[derive(Debug, Clone, Default)]
pub struct CountryTable {
    by_iso3: HashMap<String, String>,
    by_name_en: HashMap<String, String>,
    by_name_zh: HashMap<String, String>,
}

impl CountryTable {
    pub fn new(entries: impl IntoIterator<Item = CountryEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            let iso3 = entry.iso3.trim().to_uppercase();
            if iso3.is_empty() {
                continue;
            }
            let name_en = entry.name_en.trim().to_lowercase();
            if !name_en.is_empty() {
                table.by_name_en.insert(name_en, iso3.clone());
            }
            if let Some(zh) = entry.name_zh.as_deref().map(str::trim) {
                if !zh.is_empty() {
                    table.by_name_zh.insert(zh.to_string(), iso3.clone());
                }
            }
            table.by_iso3.insert(iso3.clone(), iso3);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.by_iso3.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_iso3.is_empty()
    }

    pub fn contains(&self, iso3: &str) -> bool {
        self.by_iso3.contains_key(iso3)
    }

    /// ISO3 code for an ISO3 code, English name (case-insensitive) or Chinese
    /// name. China aliases resolve even when the dictionary spells it
    /// differently.
    pub fn iso3_of(&self, raw: &str) -> Option<&str> {
        let name = raw.trim();
        if name.is_empty() {
            return None;
        }
        self.by_iso3
            .get(&name.to_uppercase())
            .or_else(|| self.by_name_en.get(&name.to_lowercase()))
            .or_else(|| self.by_name_zh.get(name))
            .map(String::as_str)
            .or_else(|| is_china_alias(name).then_some(CHINA_ISO3))
    }
}

/// Both dictionaries, loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct GeoLookups {
    pub provinces: ProvinceTable,
    pub countries: CountryTable,
}

impl GeoLookups {
    pub fn new(provinces: ProvinceTable, countries: CountryTable) -> Self {
        Self {
            provinces,
            countries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provinces() -> ProvinceTable {
        ProvinceTable::new(
            [
                ("北京市", "110000"),
                ("浙江省", "330000"),
                ("广东省", "440000"),
                ("广西壮族自治区", "450000"),
                ("新疆维吾尔自治区", "650000"),
                ("香港特别行政区", "810000"),
            ]
            .into_iter()
            .map(|(n, c)| ProvinceEntry {
                name_zh: n.into(),
                code: c.into(),
            }),
        )
    }

    fn countries() -> CountryTable {
        CountryTable::new([
            CountryEntry {
                iso3: "CHN".into(),
                name_en: "China".into(),
                name_zh: Some("中国".into()),
            },
            CountryEntry {
                iso3: "USA".into(),
                name_en: "United States".into(),
                name_zh: Some("美国".into()),
            },
        ])
    }

    #[test]
    fn suffix_stripping_prefers_longest_suffix() {
        assert_eq!(strip_province_suffix("新疆维吾尔自治区"), "新疆");
        assert_eq!(strip_province_suffix("广西壮族自治区"), "广西");
        assert_eq!(strip_province_suffix("香港特别行政区"), "香港");
        assert_eq!(strip_province_suffix("浙江省"), "浙江");
        assert_eq!(strip_province_suffix("北京市"), "北京");
        assert_eq!(strip_province_suffix("台湾"), "台湾");
    }

    #[test]
    fn province_lookup_exact_and_stripped() {
        let t = provinces();
        assert_eq!(t.code_of("浙江省"), Some("330000"));
        assert_eq!(t.code_of("浙江"), Some("330000"));
        assert_eq!(t.code_of("广西"), Some("450000"));
        assert_eq!(t.code_of(" 北京 "), Some("110000"));
        assert_eq!(t.code_of("广东省深圳市"), Some("440000"));
        assert_eq!(t.code_of("440000"), Some("440000"));
    }

    #[test]
    fn province_lookup_rejects_noise() {
        let t = provinces();
        assert_eq!(t.code_of(""), None);
        assert_eq!(t.code_of("省"), None);
        assert_eq!(t.code_of("广"), None);
        assert_eq!(t.code_of("California"), None);
    }

    #[test]
    fn title_scan_prefers_longest_name() {
        let t = provinces();
        assert_eq!(t.find_in_text("关于印发浙江省数字经济发展规划的通知"), Some("330000"));
        assert_eq!(t.find_in_text("新疆维吾尔自治区人民政府办公厅"), Some("650000"));
        assert_eq!(t.find_in_text("广西加快推进算力基础设施"), Some("450000"));
        assert_eq!(t.find_in_text("国务院关于数据要素的意见"), None);
    }

    #[test]
    fn country_lookup_by_code_and_names() {
        let c = countries();
        assert_eq!(c.iso3_of("chn"), Some("CHN"));
        assert_eq!(c.iso3_of("united states"), Some("USA"));
        assert_eq!(c.iso3_of("美国"), Some("USA"));
        assert_eq!(c.iso3_of("中华人民共和国"), Some("CHN"));
        assert_eq!(c.iso3_of("Atlantis"), None);
        assert_eq!(c.iso3_of("  "), None);
    }

    #[test]
    fn china_aliases() {
        assert!(is_china_alias(" China "));
        assert!(is_china_alias("中国"));
        assert!(!is_china_alias("Taiwan"));
    }
}

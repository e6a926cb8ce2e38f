//! Geocode resolver: a pure decision function from model hints, URL, title,
//! record type and upstream geography to a final country/province pair.
//!
//! Stage order:
//!   0. seed with the view's own country/province
//!   1. model hints (when enabled) override the seed where they resolve
//!   2. ccTLD, only while the country is unresolved
//!   3. province-implies-China backfill, only on explicit China evidence
//!   4. document-class URL then title inference, plus CHN backfill
//!   5. a province still lacking a confirmed CHN is moved to the audit bag
//!
//! A later stage never overrides a field an earlier stage resolved.

use factboard_common::{
    is_china_alias, GeoLookups, GeoResolution, GeoSource, RecordType, CHINA_ISO3,
};

use super::geo_rules::{country_from_cctld, province_from_title, province_from_url};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoInputs<'a> {
    pub record_type: Option<RecordType>,
    /// Raw URL; IDN hosts must keep their original characters.
    pub url: &'a str,
    pub title: &'a str,
    pub upstream_country: Option<&'a str>,
    pub upstream_province: Option<&'a str>,
    pub llm_country: Option<&'a str>,
    pub llm_province: Option<&'a str>,
    pub geo_by_llm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoOutcome {
    pub resolution: GeoResolution,
    /// Province the chain found but could not pair with a confirmed China.
    pub province_unconfirmed: Option<String>,
}

#[derive(Debug, Clone)]
struct Field {
    value: String,
    source: GeoSource,
}

fn field(value: impl Into<String>, source: GeoSource) -> Option<Field> {
    Some(Field {
        value: value.into(),
        source,
    })
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

pub fn resolve(inputs: &GeoInputs<'_>, lookups: &GeoLookups) -> GeoOutcome {
    // 0) upstream seed
    let mut country = non_blank(inputs.upstream_country)
        .and_then(|c| field(c.to_uppercase(), GeoSource::Upstream));
    let mut province =
        non_blank(inputs.upstream_province).and_then(|p| field(p, GeoSource::Upstream));

    let llm_country = if inputs.geo_by_llm {
        non_blank(inputs.llm_country)
    } else {
        None
    };
    let llm_province = if inputs.geo_by_llm {
        non_blank(inputs.llm_province)
    } else {
        None
    };

    // 1) model hints
    if let Some(code) = llm_province.and_then(|p| lookups.provinces.code_of(p)) {
        province = field(code, GeoSource::Llm);
    }
    if let Some(iso3) = llm_country.and_then(|c| lookups.countries.iso3_of(c)) {
        country = field(iso3, GeoSource::Llm);
    }
    if country.as_ref().is_some_and(|c| c.value != CHINA_ISO3) {
        province = None;
    }

    // 2) ccTLD
    let tld_country = country_from_cctld(inputs.url);
    if country.is_none() {
        if let Some(iso3) = tld_country {
            country = field(iso3, GeoSource::UrlCctld);
        }
    }

    // 3) province implies China only on explicit evidence
    if country.is_none() {
        if let Some(p) = &province {
            let llm_says_china = llm_country.is_some_and(is_china_alias);
            if llm_says_china || tld_country == Some(CHINA_ISO3) {
                country = field(CHINA_ISO3, p.source);
            }
        }
    }

    // 4) document-class inference
    let document_class = inputs.record_type.is_some_and(|t| t.is_document_class());
    let country_open = country.as_ref().map_or(true, |c| c.value == CHINA_ISO3);
    if document_class && province.is_none() && country_open {
        province = province_from_url(inputs.url, &lookups.provinces)
            .and_then(|(_, code)| field(code, GeoSource::UrlInference))
            .or_else(|| {
                province_from_title(inputs.title, &lookups.provinces)
                    .and_then(|code| field(code, GeoSource::TitleInference))
            });
        if country.is_none() {
            if let Some(p) = &province {
                country = field(CHINA_ISO3, p.source);
            }
        }
    }

    // 5) invariant enforcement
    let mut province_unconfirmed = None;
    if province.is_some() && !country.as_ref().is_some_and(|c| c.value == CHINA_ISO3) {
        province_unconfirmed = province.take().map(|p| p.value);
    }

    let geo_source = province
        .as_ref()
        .or(country.as_ref())
        .map(|f| f.source)
        .unwrap_or(GeoSource::None);

    GeoOutcome {
        resolution: GeoResolution {
            country_iso3: country.map(|c| c.value),
            province_code: province.map(|p| p.value),
            geo_source,
        },
        province_unconfirmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factboard_common::{CountryEntry, CountryTable, ProvinceEntry, ProvinceTable};

    fn lookups() -> GeoLookups {
        let provinces = ProvinceTable::new(
            [
                ("北京市", "110000"),
                ("浙江省", "330000"),
                ("广东省", "440000"),
                ("湖北省", "420000"),
            ]
            .into_iter()
            .map(|(n, c)| ProvinceEntry {
                name_zh: n.into(),
                code: c.into(),
            }),
        );
        let countries = CountryTable::new(
            [("CHN", "China", "中国"), ("USA", "United States", "美国"), ("GBR", "United Kingdom", "英国")]
                .into_iter()
                .map(|(iso3, en, zh)| CountryEntry {
                    iso3: iso3.into(),
                    name_en: en.into(),
                    name_zh: Some(zh.into()),
                }),
        );
        GeoLookups::new(provinces, countries)
    }

    fn paper<'a>(url: &'a str, title: &'a str) -> GeoInputs<'a> {
        GeoInputs {
            record_type: Some(RecordType::Paper),
            url,
            title,
            geo_by_llm: true,
            ..Default::default()
        }
    }

    #[test]
    fn llm_hints_win_over_heuristics() {
        let inputs = GeoInputs {
            llm_country: Some("中国"),
            llm_province: Some("广东"),
            ..paper("https://www.zj.gov.cn/a", "浙江省通知")
        };
        let out = resolve(&inputs, &lookups());
        assert_eq!(out.resolution.country_iso3.as_deref(), Some("CHN"));
        assert_eq!(out.resolution.province_code.as_deref(), Some("440000"));
        assert_eq!(out.resolution.geo_source, GeoSource::Llm);
    }

    #[test]
    fn foreign_llm_country_clears_province() {
        let inputs = GeoInputs {
            record_type: Some(RecordType::News),
            url: "https://example.com/a",
            llm_country: Some("USA"),
            llm_province: Some("浙江省"),
            upstream_province: Some("330000"),
            geo_by_llm: true,
            ..Default::default()
        };
        let out = resolve(&inputs, &lookups());
        assert_eq!(out.resolution.country_iso3.as_deref(), Some("USA"));
        assert_eq!(out.resolution.province_code, None);
        assert_eq!(out.province_unconfirmed, None);
        assert_eq!(out.resolution.geo_source, GeoSource::Llm);
    }

    #[test]
    fn url_inference_with_cctld_country() {
        let out = resolve(&paper("https://www.zj.gov.cn/art/1.html", "关于印发规划的通知"), &lookups());
        assert_eq!(out.resolution.country_iso3.as_deref(), Some("CHN"));
        assert_eq!(out.resolution.province_code.as_deref(), Some("330000"));
        assert_eq!(out.resolution.geo_source, GeoSource::UrlInference);
    }

    #[test]
    fn title_inference_backfills_china() {
        let out = resolve(&paper("https://example.com/doc/9", "北京市人工智能行动方案"), &lookups());
        assert_eq!(out.resolution.country_iso3.as_deref(), Some("CHN"));
        assert_eq!(out.resolution.province_code.as_deref(), Some("110000"));
        assert_eq!(out.resolution.geo_source, GeoSource::TitleInference);
    }

    #[test]
    fn foreign_cctld_blocks_title_province() {
        let out = resolve(&paper("https://www.gov.uk/report", "浙江省与英国合作"), &lookups());
        assert_eq!(out.resolution.country_iso3.as_deref(), Some("GBR"));
        assert_eq!(out.resolution.province_code, None);
        assert_eq!(out.resolution.geo_source, GeoSource::UrlCctld);
    }

    #[test]
    fn non_document_types_skip_inference() {
        let inputs = GeoInputs {
            record_type: Some(RecordType::News),
            ..paper("https://example.com/x", "浙江省发布")
        };
        let out = resolve(&inputs, &lookups());
        assert_eq!(out.resolution, GeoResolution::unresolved());
    }

    #[test]
    fn llm_province_without_country_evidence_is_unconfirmed() {
        let inputs = GeoInputs {
            record_type: Some(RecordType::News),
            url: "https://example.com/x",
            llm_province: Some("湖北"),
            geo_by_llm: true,
            ..Default::default()
        };
        let out = resolve(&inputs, &lookups());
        assert_eq!(out.resolution.province_code, None);
        assert_eq!(out.resolution.country_iso3, None);
        assert_eq!(out.province_unconfirmed.as_deref(), Some("420000"));
        assert_eq!(out.resolution.geo_source, GeoSource::None);
        assert!(out.resolution.satisfies_invariants());
    }

    #[test]
    fn disabled_llm_geo_ignores_hints() {
        let inputs = GeoInputs {
            record_type: Some(RecordType::News),
            url: "https://example.com/x",
            llm_country: Some("USA"),
            llm_province: Some("浙江"),
            geo_by_llm: false,
            ..Default::default()
        };
        let out = resolve(&inputs, &lookups());
        assert_eq!(out.resolution, GeoResolution::unresolved());
        assert_eq!(out.province_unconfirmed, None);
    }

    #[test]
    fn upstream_values_are_kept_and_tagged() {
        let inputs = GeoInputs {
            record_type: Some(RecordType::News),
            url: "https://example.com/x",
            upstream_country: Some("chn"),
            upstream_province: Some("330000"),
            geo_by_llm: true,
            ..Default::default()
        };
        let out = resolve(&inputs, &lookups());
        assert_eq!(out.resolution.country_iso3.as_deref(), Some("CHN"));
        assert_eq!(out.resolution.province_code.as_deref(), Some("330000"));
        assert_eq!(out.resolution.geo_source, GeoSource::Upstream);
    }
}

use factboard_common::{preview, FactEvent, FactPayload, RawRecord};

use super::enrichment::Enriched;
use super::geocode::GeoOutcome;

/// Merge the raw row, the model output and the geography into one fact. The
/// payload keeps the model's pre-normalization strings so a resolution can
/// be audited later without another call.
pub fn assemble(
    record: &RawRecord,
    enriched: &Enriched,
    geo: GeoOutcome,
    summary_chars: usize,
) -> FactEvent {
    let output = &enriched.output;

    let payload = FactPayload {
        lang_hint: record.lang_hint.clone(),
        geo_source: geo.resolution.geo_source,
        llm_country: output.llm_country.clone(),
        llm_province: output.llm_province.clone(),
        summary_preview: Some(preview(&output.summary, summary_chars)),
        keywords: output.keywords.clone(),
        language_corrected: enriched.language_corrected,
        language_uncorrectable: enriched.language_uncorrectable,
        province_unconfirmed: geo.province_unconfirmed,
    };

    FactEvent {
        record_type: record.record_type.clone(),
        title: record.title.clone(),
        url: record.identity_url(),
        source: record.source.clone(),
        published_at: record.published_at,
        summary: output.summary.clone(),
        keywords: output.keywords.clone(),
        geo: geo.resolution,
        row_hash: record.row_hash.clone(),
        src_table: record.src_table.clone(),
        src_id: record.src_id.clone(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factboard_common::{EnrichmentOutput, GeoResolution, GeoSource};

    #[test]
    fn payload_keeps_raw_model_strings_and_provenance() {
        let record = RawRecord {
            title: "浙江省数据条例".into(),
            content: None,
            url: "https://www.zj.gov.cn/a#frag".into(),
            url_norm: None,
            source: Some("zj".into()),
            record_type: "paper".into(),
            published_at: None,
            src_table: "papers".into(),
            src_id: "42".into(),
            row_hash: "abc".into(),
            country_iso3: None,
            province_code: None,
            lang_hint: Some("zh".into()),
        };
        let enriched = Enriched {
            output: EnrichmentOutput {
                summary: "浙江省出台数据要素条例，明确数据权属与流通规则。".into(),
                keywords: vec!["数据要素".into()],
                llm_country: Some("中国".into()),
                llm_province: Some("浙江".into()),
            },
            language_corrected: false,
            language_uncorrectable: false,
        };
        let geo = GeoOutcome {
            resolution: GeoResolution {
                country_iso3: Some("CHN".into()),
                province_code: Some("330000".into()),
                geo_source: GeoSource::Llm,
            },
            province_unconfirmed: None,
        };

        let fact = assemble(&record, &enriched, geo, 6);
        assert_eq!(fact.url, "https://www.zj.gov.cn/a");
        assert_eq!(fact.src_id, "42");
        assert_eq!(fact.payload.llm_country.as_deref(), Some("中国"));
        assert_eq!(fact.payload.llm_province.as_deref(), Some("浙江"));
        assert_eq!(fact.payload.geo_source, GeoSource::Llm);
        assert_eq!(fact.payload.summary_preview.as_deref(), Some("浙江省出台数…"));
        assert_eq!(fact.payload.lang_hint.as_deref(), Some("zh"));
    }
}

//! Static rule tables for URL and title geography heuristics.
//!
//! Everything here is ordered data plus small matchers over it. The resolver
//! decides when a rule may run; these functions only answer "what does this
//! host or title say".

use factboard_common::{url_host, ProvinceTable};

/// Country-code TLD to ISO3. Only unambiguous national TLDs; generic and
/// vanity TLDs (`.io`, `.tv`, `.co`) are deliberately absent.
pub const CCTLD_TABLE: &[(&str, &str)] = &[
    ("cn", "CHN"),
    ("us", "USA"),
    ("uk", "GBR"),
    ("gb", "GBR"),
    ("de", "DEU"),
    ("fr", "FRA"),
    ("jp", "JPN"),
    ("kr", "KOR"),
    ("ca", "CAN"),
    ("au", "AUS"),
    ("ru", "RUS"),
    ("in", "IND"),
    ("br", "BRA"),
    ("it", "ITA"),
    ("es", "ESP"),
    ("nl", "NLD"),
    ("se", "SWE"),
    ("ch", "CHE"),
    ("at", "AUT"),
    ("il", "ISR"),
    ("sg", "SGP"),
    ("tw", "TWN"),
    ("hk", "HKG"),
];

/// Province tokens seen in Chinese hostnames.
pub struct ProvinceToken {
    pub name_zh: &'static str,
    /// Full pinyin spellings, matched as a label prefix (`zhejiangnews`).
    pub pinyin: &'static [&'static str],
    /// Short forms, matched only as a whole label (`zj.gov.cn`).
    pub abbreviations: &'static [&'static str],
}

pub const PROVINCE_TOKENS: &[ProvinceToken] = &[
    ProvinceToken { name_zh: "北京市", pinyin: &["beijing"], abbreviations: &["bj"] },
    ProvinceToken { name_zh: "天津市", pinyin: &["tianjin"], abbreviations: &["tj"] },
    ProvinceToken { name_zh: "河北省", pinyin: &["hebei"], abbreviations: &["heb"] },
    ProvinceToken { name_zh: "山西省", pinyin: &["shanxi"], abbreviations: &["sx"] },
    ProvinceToken { name_zh: "内蒙古自治区", pinyin: &["neimenggu", "neimeng"], abbreviations: &["nmg"] },
    ProvinceToken { name_zh: "辽宁省", pinyin: &["liaoning"], abbreviations: &["ln"] },
    ProvinceToken { name_zh: "吉林省", pinyin: &["jilin"], abbreviations: &["jl"] },
    ProvinceToken { name_zh: "黑龙江省", pinyin: &["heilongjiang"], abbreviations: &["hlj"] },
    ProvinceToken { name_zh: "上海市", pinyin: &["shanghai"], abbreviations: &["sh"] },
    ProvinceToken { name_zh: "江苏省", pinyin: &["jiangsu"], abbreviations: &["js"] },
    ProvinceToken { name_zh: "浙江省", pinyin: &["zhejiang"], abbreviations: &["zj"] },
    ProvinceToken { name_zh: "安徽省", pinyin: &["anhui"], abbreviations: &["ah"] },
    ProvinceToken { name_zh: "福建省", pinyin: &["fujian"], abbreviations: &["fj"] },
    ProvinceToken { name_zh: "江西省", pinyin: &["jiangxi"], abbreviations: &["jx"] },
    ProvinceToken { name_zh: "山东省", pinyin: &["shandong"], abbreviations: &["sd"] },
    ProvinceToken { name_zh: "河南省", pinyin: &["henan"], abbreviations: &["ha"] },
    ProvinceToken { name_zh: "湖北省", pinyin: &["hubei"], abbreviations: &["hb"] },
    ProvinceToken { name_zh: "湖南省", pinyin: &["hunan"], abbreviations: &["hn"] },
    ProvinceToken { name_zh: "广东省", pinyin: &["guangdong"], abbreviations: &["gd"] },
    ProvinceToken { name_zh: "广西壮族自治区", pinyin: &["guangxi"], abbreviations: &["gx", "gxzf"] },
    ProvinceToken { name_zh: "海南省", pinyin: &["hainan"], abbreviations: &["hi", "hain"] },
    ProvinceToken { name_zh: "重庆市", pinyin: &["chongqing"], abbreviations: &["cq"] },
    ProvinceToken { name_zh: "四川省", pinyin: &["sichuan"], abbreviations: &["sc"] },
    ProvinceToken { name_zh: "贵州省", pinyin: &["guizhou"], abbreviations: &["gz"] },
    ProvinceToken { name_zh: "云南省", pinyin: &["yunnan"], abbreviations: &["yn"] },
    ProvinceToken { name_zh: "西藏自治区", pinyin: &["xizang"], abbreviations: &["xz"] },
    ProvinceToken { name_zh: "陕西省", pinyin: &["shaanxi"], abbreviations: &["sn", "shx"] },
    ProvinceToken { name_zh: "甘肃省", pinyin: &["gansu"], abbreviations: &["gs"] },
    ProvinceToken { name_zh: "青海省", pinyin: &["qinghai"], abbreviations: &["qh"] },
    ProvinceToken { name_zh: "宁夏回族自治区", pinyin: &["ningxia"], abbreviations: &["nx"] },
    ProvinceToken { name_zh: "新疆维吾尔自治区", pinyin: &["xinjiang"], abbreviations: &["xj"] },
    ProvinceToken { name_zh: "香港特别行政区", pinyin: &["hongkong"], abbreviations: &[] },
    ProvinceToken { name_zh: "澳门特别行政区", pinyin: &["macau", "macao"], abbreviations: &[] },
];

/// Labels that carry no geographic signal.
const NEUTRAL_LABELS: &[&str] = &["www", "gov", "com", "edu", "org", "net", "ac", "m", "wap"];

/// URL rules, tried in this order; the first hit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRule {
    /// Host contains a Chinese province name (IDN hosts).
    HanziName,
    /// `<token>.gov.<tld>`: the label directly left of `gov`.
    GovSubdomain,
    /// A label starting with a full pinyin spelling, longest spelling first.
    PinyinLabel,
    /// A whole label equal to a short form; `.cn` hosts only.
    AbbreviationLabel,
}

pub const URL_RULES: [UrlRule; 4] = [
    UrlRule::HanziName,
    UrlRule::GovSubdomain,
    UrlRule::PinyinLabel,
    UrlRule::AbbreviationLabel,
];

/// ISO3 for the host's country-code TLD.
pub fn country_from_cctld(url: &str) -> Option<&'static str> {
    let host = url_host(url)?;
    let tld = host.rsplit('.').next()?;
    CCTLD_TABLE
        .iter()
        .find(|(code, _)| *code == tld)
        .map(|(_, iso3)| *iso3)
}

fn token_for_label(label: &str) -> Option<&'static ProvinceToken> {
    PROVINCE_TOKENS
        .iter()
        .find(|t| t.pinyin.contains(&label) || t.abbreviations.contains(&label))
}

fn token_for_pinyin_prefix(label: &str) -> Option<&'static ProvinceToken> {
    PROVINCE_TOKENS
        .iter()
        .flat_map(|t| t.pinyin.iter().map(move |p| (*p, t)))
        .filter(|(p, _)| label.starts_with(p))
        .max_by_key(|(p, _)| p.len())
        .map(|(_, t)| t)
}

fn apply_rule(
    rule: UrlRule,
    host: &str,
    labels: &[&str],
    provinces: &ProvinceTable,
) -> Option<String> {
    let token = match rule {
        UrlRule::HanziName => return provinces.find_in_text(host).map(str::to_string),
        UrlRule::GovSubdomain => labels
            .iter()
            .position(|l| *l == "gov")
            .filter(|&i| i > 0)
            .and_then(|i| token_for_label(labels[i - 1])),
        UrlRule::PinyinLabel => labels
            .iter()
            .filter(|l| !NEUTRAL_LABELS.contains(*l))
            .find_map(|l| token_for_pinyin_prefix(l)),
        UrlRule::AbbreviationLabel => {
            if !host.ends_with(".cn") {
                return None;
            }
            labels
                .iter()
                .filter(|l| !NEUTRAL_LABELS.contains(*l))
                .find_map(|l| {
                    PROVINCE_TOKENS
                        .iter()
                        .find(|t| t.abbreviations.contains(l))
                })
        }
    }?;
    provinces.code_of(token.name_zh).map(str::to_string)
}

/// Province code inferred from a URL's host, with the rule that matched.
pub fn province_from_url(url: &str, provinces: &ProvinceTable) -> Option<(UrlRule, String)> {
    let host = url_host(url)?;
    let mut labels: Vec<&str> = host.split('.').collect();
    // The TLD itself never names a province.
    labels.pop();
    URL_RULES
        .iter()
        .find_map(|rule| apply_rule(*rule, &host, &labels, provinces).map(|code| (*rule, code)))
}

/// Province code for the first province name found in a title.
pub fn province_from_title(title: &str, provinces: &ProvinceTable) -> Option<String> {
    provinces.find_in_text(title).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use factboard_common::ProvinceEntry;

    fn provinces() -> ProvinceTable {
        ProvinceTable::new(PROVINCE_TOKENS.iter().enumerate().map(|(i, t)| ProvinceEntry {
            name_zh: t.name_zh.to_string(),
            code: format!("{:02}0000", i + 11),
        }))
    }

    fn code(name: &str) -> String {
        provinces().code_of(name).unwrap().to_string()
    }

    #[test]
    fn cctld_lookup() {
        assert_eq!(country_from_cctld("https://www.gov.cn/zhengce"), Some("CHN"));
        assert_eq!(country_from_cctld("https://www.gov.uk/guidance"), Some("GBR"));
        assert_eq!(country_from_cctld("http://example.co.jp/a"), Some("JPN"));
        assert_eq!(country_from_cctld("https://arxiv.org/abs/1"), None);
        assert_eq!(country_from_cctld("not a url"), None);
    }

    #[test]
    fn gov_subdomain_rule() {
        let t = provinces();
        assert_eq!(
            province_from_url("https://www.zj.gov.cn/art/2024/1/1.html", &t),
            Some((UrlRule::GovSubdomain, code("浙江省")))
        );
        assert_eq!(
            province_from_url("http://hubei.gov.cn/zfwj/", &t),
            Some((UrlRule::GovSubdomain, code("湖北省")))
        );
        assert_eq!(
            province_from_url("http://www.gxzf.gov.cn/", &t),
            Some((UrlRule::GovSubdomain, code("广西壮族自治区")))
        );
    }

    #[test]
    fn pinyin_prefers_longest_spelling() {
        let t = provinces();
        assert_eq!(
            province_from_url("https://shaanxinews.com/a", &t),
            Some((UrlRule::PinyinLabel, code("陕西省")))
        );
        assert_eq!(
            province_from_url("https://news.shanxi.com.cn/a", &t),
            Some((UrlRule::PinyinLabel, code("山西省")))
        );
    }

    #[test]
    fn abbreviation_needs_whole_label_on_cn_host() {
        let t = provinces();
        assert_eq!(
            province_from_url("https://fgw.sd.cn/x", &t),
            Some((UrlRule::AbbreviationLabel, code("山东省")))
        );
        // Not under .cn: a `js` label is far more likely a CDN.
        assert_eq!(province_from_url("https://js.example.com/x", &t), None);
        // Substrings never match.
        assert_eq!(province_from_url("https://shop.example.cn/x", &t), None);
    }

    #[test]
    fn hanzi_host_wins() {
        let t = provinces();
        assert_eq!(
            province_from_url("http://广东政务.cn/notice", &t),
            Some((UrlRule::HanziName, code("广东省")))
        );
    }

    #[test]
    fn national_hosts_do_not_infer() {
        let t = provinces();
        assert_eq!(province_from_url("https://www.gov.cn/zhengce/1.htm", &t), None);
        assert_eq!(province_from_url("https://www.miit.gov.cn/", &t), None);
    }

    #[test]
    fn title_scan() {
        let t = provinces();
        assert_eq!(
            province_from_title("关于印发《浙江省数字经济促进条例》的通知", &t),
            Some(code("浙江省"))
        );
        assert_eq!(province_from_title("Data elements white paper", &t), None);
    }
}

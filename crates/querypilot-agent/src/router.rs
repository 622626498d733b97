//! Query type router.
//!
//! Phase 1 scores keywords and always runs. Phase 2 asks the model, and only
//! when phase 1 is unsure and a model is available. The model's answer
//! replaces phase 1 only if it is more confident.
//!
//! Keyword matching is longest-first: once "按月" (monthly) claims a span of
//! the input, the shorter "按" (by) inside it no longer counts. Latin
//! keywords must sit on word boundaries; CJK keywords match as substrings.

use std::collections::BTreeSet;

use querypilot_llm::{parse_llm_json_object, ChatMessage, ChatProvider, ChatRequest};
use querypilot_sql::QueryArchetype;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::RouterThresholds;
use crate::error::SkillError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Keyword,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTypeClassification {
    pub query_type: QueryArchetype,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub method: ClassificationMethod,
}

impl QueryTypeClassification {
    fn unknown() -> Self {
        Self {
            query_type: QueryArchetype::Unknown,
            confidence: 0.0,
            matched_keywords: Vec::new(),
            method: ClassificationMethod::Keyword,
        }
    }
}

// ============================================================================
// Keyword tables
// ============================================================================

struct KeywordSet {
    archetype: QueryArchetype,
    primary: &'static [&'static str],
    secondary: &'static [&'static str],
}

const PRIMARY_WEIGHT: u32 = 2;
const SECONDARY_WEIGHT: u32 = 1;

/// In tie-break order.
const KEYWORDS: &[KeywordSet] = &[
    KeywordSet {
        archetype: QueryArchetype::KpiSingle,
        primary: &[
            "总数", "总计", "总额", "合计", "一共", "总共", "多少", "total", "how many", "count",
            "sum", "overall",
        ],
        secondary: &["统计", "数量", "number of"],
    },
    KeywordSet {
        archetype: QueryArchetype::KpiGrouped,
        primary: &["按", "每个", "各", "分组", "分别", "by", "per", "each", "breakdown"],
        secondary: &["维度", "across", "split", "group"],
    },
    KeywordSet {
        archetype: QueryArchetype::TrendTime,
        primary: &[
            "趋势", "走势", "变化", "每天", "每日", "每周", "每月", "按天", "按日", "按周", "按月",
            "逐日", "逐月", "trend", "over time", "daily", "weekly", "monthly", "per day",
            "per week", "per month", "by day", "by week", "by month",
        ],
        secondary: &["时间", "日期", "增长", "最近", "growth", "timeline", "history"],
    },
    KeywordSet {
        archetype: QueryArchetype::Distribution,
        primary: &[
            "分布", "分位", "中位数", "方差", "标准差", "distribution", "median", "percentile",
            "histogram", "spread", "variance",
        ],
        secondary: &["平均", "均值", "区间", "average", "mean", "range"],
    },
    KeywordSet {
        archetype: QueryArchetype::TopN,
        primary: &[
            "前十", "前10", "前5", "前五", "前三", "排名", "排行", "最高", "最多", "最大", "top",
            "highest", "largest", "biggest", "rank", "ranking", "best",
        ],
        secondary: &["最", "most", "leading", "bottom"],
    },
    KeywordSet {
        archetype: QueryArchetype::Comparison,
        primary: &[
            "对比", "比较", "相比", "同比", "环比", "vs", "versus", "compare", "comparison",
            "difference between",
        ],
        secondary: &["差异", "区别", "差别", "than"],
    },
];

/// Business nouns. A primary keyword plus one of these is the strongest
/// phase-1 signal.
const DOMAIN_TERMS: &[&str] = &[
    "订单", "用户", "客户", "销售", "销售额", "金额", "收入", "商品", "gmv", "revenue", "sales",
    "order", "orders", "user", "users", "customer", "customers", "product", "products", "amount",
];

// ============================================================================
// Phase 1
// ============================================================================

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte spans of `keyword` in `haystack` (both lowercase).
fn occurrences(haystack: &str, keyword: &str) -> Vec<(usize, usize)> {
    let needs_left = keyword.chars().next().is_some_and(is_word_char);
    let needs_right = keyword.chars().last().is_some_and(is_word_char);
    haystack
        .match_indices(keyword)
        .map(|(start, m)| (start, start + m.len()))
        .filter(|&(start, end)| {
            let left_ok = !needs_left || !haystack[..start].chars().last().is_some_and(is_word_char);
            let right_ok = !needs_right || !haystack[end..].chars().next().is_some_and(is_word_char);
            left_ok && right_ok
        })
        .collect()
}

struct Hit {
    start: usize,
    end: usize,
    set: usize,
    keyword: &'static str,
    weight: u32,
}

pub fn classify_keywords(input: &str, thresholds: &RouterThresholds) -> QueryTypeClassification {
    let haystack = input.to_lowercase();

    let mut hits = Vec::new();
    for (set_idx, set) in KEYWORDS.iter().enumerate() {
        let weighted = set
            .primary
            .iter()
            .map(|k| (*k, PRIMARY_WEIGHT))
            .chain(set.secondary.iter().map(|k| (*k, SECONDARY_WEIGHT)));
        for (keyword, weight) in weighted {
            for (start, end) in occurrences(&haystack, keyword) {
                hits.push(Hit {
                    start,
                    end,
                    set: set_idx,
                    keyword,
                    weight,
                });
            }
        }
    }

    // Longest first; earlier position breaks ties.
    hits.sort_by(|a, b| (b.end - b.start).cmp(&(a.end - a.start)).then(a.start.cmp(&b.start)));
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut accepted: Vec<&Hit> = Vec::new();
    for hit in &hits {
        if claimed.iter().any(|&(s, e)| hit.start < e && s < hit.end) {
            continue;
        }
        claimed.push((hit.start, hit.end));
        accepted.push(hit);
    }

    let mut best: Option<(usize, u32)> = None;
    for set_idx in 0..KEYWORDS.len() {
        let distinct: BTreeSet<(&str, u32)> = accepted
            .iter()
            .filter(|h| h.set == set_idx)
            .map(|h| (h.keyword, h.weight))
            .collect();
        let score: u32 = distinct.iter().map(|(_, w)| w).sum();
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((set_idx, score));
        }
    }

    let Some((set_idx, score)) = best else {
        return QueryTypeClassification::unknown();
    };

    let mut matched: Vec<String> = Vec::new();
    let mut has_primary = false;
    for hit in accepted.iter().filter(|h| h.set == set_idx) {
        has_primary |= hit.weight == PRIMARY_WEIGHT;
        if !matched.iter().any(|m| m == hit.keyword) {
            matched.push(hit.keyword.to_string());
        }
    }
    let has_domain = DOMAIN_TERMS
        .iter()
        .any(|term| !occurrences(&haystack, term).is_empty());

    let confidence = if has_primary && has_domain {
        thresholds.keyword_and_domain
    } else if score >= thresholds.strong_score && matched.len() >= 2 {
        thresholds.strong_multi
    } else if matched.len() >= 2 {
        thresholds.multiple_weak
    } else {
        thresholds.single_keyword
    };

    QueryTypeClassification {
        query_type: KEYWORDS[set_idx].archetype,
        confidence,
        matched_keywords: matched,
        method: ClassificationMethod::Keyword,
    }
}

// ============================================================================
// Phase 2
// ============================================================================

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify analytical questions about tabular data.\n\
Choose exactly one queryType from: kpi_single, kpi_grouped, trend_time, distribution, topn, comparison, unknown.\n\
- kpi_single: one number for the whole table (count, total, average)\n\
- kpi_grouped: one number per category\n\
- trend_time: values over time buckets\n\
- distribution: spread of a numeric column (median, percentiles, stddev)\n\
- topn: the highest/lowest rows or categories\n\
- comparison: two periods or groups side by side\n\
Return ONLY a JSON object: {\"queryType\": \"...\", \"confidence\": 0.0-1.0}";

fn parse_llm_classification(text: &str) -> Option<(QueryArchetype, f64)> {
    let value: Value = parse_llm_json_object(text).ok()?;
    let query_type = value
        .get("queryType")
        .or_else(|| value.get("query_type"))
        .and_then(Value::as_str)
        .and_then(QueryArchetype::parse)?;
    let confidence = value.get("confidence").and_then(Value::as_f64)?;
    confidence
        .is_finite()
        .then(|| (query_type, confidence.clamp(0.0, 1.0)))
}

/// Keyword phase, then (below the fallback threshold) one model call.
pub async fn classify(
    input: &str,
    provider: Option<&dyn ChatProvider>,
    schema_digest: Option<&str>,
    thresholds: &RouterThresholds,
    cancel: &CancellationToken,
) -> Result<QueryTypeClassification, SkillError> {
    let phase1 = classify_keywords(input, thresholds);
    let Some(provider) = provider else {
        return Ok(phase1);
    };
    if phase1.confidence >= thresholds.llm_fallback_below {
        return Ok(phase1);
    }

    let mut user = format!("Question: {input}");
    if let Some(digest) = schema_digest.filter(|d| !d.trim().is_empty()) {
        user.push_str("\n\nSchema:\n");
        user.push_str(digest);
    }
    let request = ChatRequest::new(vec![
        ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ])
    .json_mode()
    .with_temperature(0.0);

    let reply = match provider.chat(request, cancel).await {
        Ok(reply) => reply,
        Err(e) if e.is_cancelled() => return Err(SkillError::Cancelled),
        Err(e) => {
            tracing::warn!(error = %e, "model classification failed; keeping keyword result");
            return Ok(phase1);
        }
    };

    match parse_llm_classification(reply.content_str()) {
        Some((query_type, confidence)) if confidence > phase1.confidence => {
            Ok(QueryTypeClassification {
                query_type,
                confidence,
                matched_keywords: Vec::new(),
                method: ClassificationMethod::Llm,
            })
        }
        Some(_) => Ok(phase1),
        None => {
            tracing::warn!("model classification was not parseable; keeping keyword result");
            Ok(phase1)
        }
    }
}

//! Tiered matching: descending similarity thresholds first, keyword overlap
//! as a guarded fallback, then one representative per step group.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use memory_center::{ScoredRecord, SharedRecordStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::keywords::keyword_hits;
use super::reference::ReferenceEntry;
use crate::errors::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    /// Similarity thresholds tried in order; the first with any hit wins.
    pub thresholds: Vec<f32>,
    /// Minimum similarity for keyword-fallback candidates.
    pub keyword_floor: f32,
    /// Candidates fetched from the store per query.
    pub candidate_pool: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![0.35, 0.25, 0.15],
            keyword_floor: 0.12,
            candidate_pool: 20,
        }
    }
}

/// How the winning candidate qualified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum MatchTier {
    Similarity { threshold: f32 },
    Keyword { hits: usize },
}

/// A group representative in final rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub record: ScoredRecord,
    pub group_id: String,
    pub keyword_hits: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl RankedCandidate {
    fn new(record: &ScoredRecord, keywords: &[String]) -> Self {
        let group_id = record
            .metadata_str("step_group_id")
            .filter(|id| !id.is_empty())
            .unwrap_or(&record.id)
            .to_string();
        let haystack = ["goal_description", "workflow_name", "description", "name"]
            .iter()
            .filter_map(|key| record.metadata_str(key))
            .collect::<Vec<_>>()
            .join(" ");
        let indexed_at = record
            .metadata_str("indexed_at")
            .and_then(parse_timestamp);
        Self {
            keyword_hits: keyword_hits(keywords, &haystack),
            record: record.clone(),
            group_id,
            indexed_at,
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .ok()
}

/// Higher similarity first, then the more recently indexed record.
fn by_similarity(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.record
        .score
        .partial_cmp(&a.record.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.indexed_at.cmp(&a.indexed_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

fn by_keywords(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.keyword_hits
        .cmp(&a.keyword_hits)
        .then_with(|| by_similarity(a, b))
}

/// Keep the best member of each step group, then rank the survivors.
fn best_per_group(
    candidates: Vec<RankedCandidate>,
    order: fn(&RankedCandidate, &RankedCandidate) -> Ordering,
) -> Vec<RankedCandidate> {
    let mut groups: HashMap<String, RankedCandidate> = HashMap::new();
    for candidate in candidates {
        match groups.get(&candidate.group_id) {
            Some(current) if order(&candidate, current) != Ordering::Less => {}
            _ => {
                groups.insert(candidate.group_id.clone(), candidate);
            }
        }
    }
    let mut ranked: Vec<RankedCandidate> = groups.into_values().collect();
    ranked.sort_by(order);
    ranked
}

/// Rank store hits for a goal. `None` means nothing qualified at any tier.
pub fn rank_candidates(
    candidates: &[ScoredRecord],
    keywords: &[String],
    config: &MatcherConfig,
) -> Option<(MatchTier, Vec<RankedCandidate>)> {
    for &threshold in &config.thresholds {
        let qualified: Vec<RankedCandidate> = candidates
            .iter()
            .filter(|record| record.score >= threshold)
            .map(|record| RankedCandidate::new(record, keywords))
            .collect();
        if !qualified.is_empty() {
            debug!(threshold, count = qualified.len(), "similarity tier matched");
            return Some((
                MatchTier::Similarity { threshold },
                best_per_group(qualified, by_similarity),
            ));
        }
    }

    if keywords.is_empty() {
        return None;
    }
    let keyword_matches: Vec<RankedCandidate> = candidates
        .iter()
        .filter(|record| record.score >= config.keyword_floor)
        .map(|record| RankedCandidate::new(record, keywords))
        .filter(|candidate| candidate.keyword_hits > 0)
        .collect();
    if keyword_matches.is_empty() {
        return None;
    }
    let ranked = best_per_group(keyword_matches, by_keywords);
    let hits = ranked.first().map(|c| c.keyword_hits).unwrap_or(0);
    debug!(hits, count = ranked.len(), "keyword fallback matched");
    Some((MatchTier::Keyword { hits }, ranked))
}

/// Retrieval front end over a [`memory_center::RecordStore`].
#[derive(Clone)]
pub struct TieredMatcher {
    store: SharedRecordStore,
    config: MatcherConfig,
}

impl TieredMatcher {
    pub fn new(store: SharedRecordStore, config: MatcherConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Best reference for a goal, or `None` when no candidate is trustworthy.
    ///
    /// Candidates that fail to decode are skipped in rank order.
    pub async fn best_match(
        &self,
        goal_embedding: &[f32],
        keywords: &[String],
        namespace: &str,
    ) -> Result<Option<ReferenceEntry>, AgentError> {
        let candidates = self
            .store
            .query(goal_embedding, self.config.candidate_pool, namespace, None)
            .await?;
        let Some((tier, ranked)) = rank_candidates(&candidates, keywords, &self.config) else {
            info!(
                namespace,
                candidates = candidates.len(),
                "no reference matched; running without guidance"
            );
            return Ok(None);
        };
        for candidate in ranked {
            match ReferenceEntry::from_scored(&candidate.record) {
                Ok(entry) => {
                    info!(
                        id = %entry.id,
                        score = entry.score,
                        ?tier,
                        "reference workflow selected"
                    );
                    return Ok(Some(entry.with_tier(tier)));
                }
                Err(err) => {
                    warn!(id = %candidate.record.id, error = %err, "skipping undecodable reference");
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(id: &str, score: f32, metadata: Value) -> ScoredRecord {
        ScoredRecord {
            id: id.to_string(),
            score,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn first_qualifying_threshold_wins() {
        let candidates = vec![
            record("a", 0.30, json!({})),
            record("b", 0.20, json!({})),
        ];
        let (tier, ranked) =
            rank_candidates(&candidates, &[], &MatcherConfig::default()).unwrap();
        assert_eq!(tier, MatchTier::Similarity { threshold: 0.25 });
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.id, "a");
    }

    #[test]
    fn groups_keep_best_member_and_break_ties_by_recency() {
        let candidates = vec![
            record(
                "g1_old",
                0.5,
                json!({"step_group_id": "g1", "indexed_at": "2024-01-01T00:00:00"}),
            ),
            record(
                "g1_new",
                0.5,
                json!({"step_group_id": "g1", "indexed_at": "2025-01-01T00:00:00"}),
            ),
            record("g2", 0.45, json!({"step_group_id": "g2"})),
        ];
        let (_, ranked) = rank_candidates(&candidates, &[], &MatcherConfig::default()).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|c| c.record.id.as_str()).collect();
        assert_eq!(ids, vec!["g1_new", "g2"]);
    }

    #[test]
    fn lowering_the_threshold_never_loses_a_group() {
        let candidates = vec![
            record("a1", 0.42, json!({"step_group_id": "a"})),
            record("a2", 0.18, json!({"step_group_id": "a"})),
            record("b1", 0.31, json!({"step_group_id": "b"})),
            record("c1", 0.22, json!({"step_group_id": "c"})),
            record("d1", 0.16, json!({})),
            record("e1", 0.09, json!({})),
        ];
        let grid = [0.5, 0.45, 0.4, 0.35, 0.3, 0.25, 0.2, 0.15, 0.1, 0.05];
        let found_at = |threshold: f32| {
            let config = MatcherConfig {
                thresholds: vec![threshold],
                ..MatcherConfig::default()
            };
            rank_candidates(&candidates, &[], &config)
                .map(|(_, ranked)| ranked)
                .unwrap_or_default()
        };

        for (i, &high) in grid.iter().enumerate() {
            let at_high = found_at(high);
            for &low in &grid[i..] {
                let at_low = found_at(low);
                for candidate in &at_high {
                    assert!(
                        at_low.iter().any(|c| c.group_id == candidate.group_id),
                        "group {} found at {high} but not at {low}",
                        candidate.group_id
                    );
                }
                if let Some(best) = at_high.first() {
                    assert!(at_low[0].record.score >= best.record.score);
                }
            }
        }

        let full = MatcherConfig::default();
        let lowered = MatcherConfig {
            thresholds: vec![0.25, 0.15, 0.05],
            ..MatcherConfig::default()
        };
        let (_, default_ranked) = rank_candidates(&candidates, &[], &full).unwrap();
        let (_, lowered_ranked) = rank_candidates(&candidates, &[], &lowered).unwrap();
        assert_eq!(default_ranked[0].record.id, "a1");
        assert_eq!(lowered_ranked[0].record.id, "a1");
    }

    #[test]
    fn keyword_fallback_respects_floor() {
        let keywords = vec!["login".to_string()];
        let candidates = vec![
            record("noise", 0.05, json!({"goal_description": "login portal"})),
            record("weak", 0.13, json!({"workflow_name": "Login flow"})),
            record("other", 0.14, json!({"goal_description": "invoice"})),
        ];
        let (tier, ranked) =
            rank_candidates(&candidates, &keywords, &MatcherConfig::default()).unwrap();
        assert_eq!(tier, MatchTier::Keyword { hits: 1 });
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.id, "weak");
    }

    #[test]
    fn keyword_count_outranks_similarity() {
        let keywords = vec!["create".to_string(), "supplier".to_string()];
        let candidates = vec![
            record("one", 0.14, json!({"goal_description": "create invoice"})),
            record("two", 0.13, json!({"goal_description": "create supplier"})),
        ];
        let (tier, ranked) =
            rank_candidates(&candidates, &keywords, &MatcherConfig::default()).unwrap();
        assert_eq!(tier, MatchTier::Keyword { hits: 2 });
        assert_eq!(ranked[0].record.id, "two");
    }

    #[test]
    fn nothing_qualifies_without_keywords() {
        let candidates = vec![record("a", 0.1, json!({"goal_description": "login"}))];
        assert!(rank_candidates(&candidates, &[], &MatcherConfig::default()).is_none());
        assert!(rank_candidates(&[], &["login".into()], &MatcherConfig::default()).is_none());
    }
}

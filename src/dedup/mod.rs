//! Indicator deduplication and merge
//!
//! Collapses the candidate set in two passes: exact-match groups keyed by
//! indicator id, then range containment among `ip`/`cidr` entries computed on
//! numeric address bounds. Confidence is recombined with a noisy-OR over the
//! per-source baselines, so the whole pass is idempotent:
//! `deduplicate(deduplicate(S)) == deduplicate(S)`.

pub mod range;

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::{Ioc, IocType};
use range::{AddrRange, Family};

/// A range-typed indicator whose value no longer parses reached the
/// deduplicator. The normalizer is required to reject these upstream, so
/// this is an internal error, not a per-record skip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("indicator {id} of type {ioc_type} carries unparseable value {value:?}")]
pub struct ContractViolation {
    pub id: String,
    pub ioc_type: IocType,
    pub value: String,
}

/// Independent corroboration combiner: `1 - Π(1 - cᵢ)`. Never exceeds 1,
/// equals the single value when only one source contributes.
pub fn noisy_or(confidences: impl IntoIterator<Item = f64>) -> f64 {
    let miss = confidences
        .into_iter()
        .fold(1.0, |acc, c| acc * (1.0 - c.clamp(0.0, 1.0)));
    (1.0 - miss).clamp(0.0, 1.0)
}

#[derive(Debug, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    /// Collapse equivalence and containment classes into single survivors.
    ///
    /// Output is sorted by `(type, value)` so identical input sets produce
    /// identical output; callers must not depend on the particular order.
    pub fn deduplicate(&self, candidates: Vec<Ioc>) -> Result<Vec<Ioc>, ContractViolation> {
        let before = candidates.len();

        // Pass 1: exact-match groups share an id, i.e. identical (type, value).
        let mut groups: BTreeMap<String, Vec<Ioc>> = BTreeMap::new();
        for ioc in candidates {
            groups.entry(ioc.id.clone()).or_default().push(ioc);
        }
        let merged: Vec<Ioc> = groups.into_values().map(merge_group).collect();

        // Pass 2: containment among range-typed survivors.
        let mut slots: Vec<Option<Ioc>> = merged.into_iter().map(Some).collect();
        let mut ranged: Vec<(AddrRange, u8, usize)> = Vec::new();
        for (idx, slot) in slots.iter().enumerate() {
            let ioc = slot.as_ref().expect("slot filled");
            if ioc.ioc_type == IocType::Url {
                continue;
            }
            let range = AddrRange::of_ioc(ioc).ok_or_else(|| ContractViolation {
                id: ioc.id.clone(),
                ioc_type: ioc.ioc_type,
                value: ioc.value.clone(),
            })?;
            // On identical bounds the cidr form survives, so it must sort first.
            let rank = match ioc.ioc_type {
                IocType::Cidr => 0,
                _ => 1,
            };
            ranged.push((range, rank, idx));
        }
        // A containing range sorts before everything it contains.
        ranged.sort_by_key(|(range, rank, _)| {
            (range.family(), range.start(), Reverse(range.end()), *rank)
        });

        let mut open: Vec<usize> = Vec::new();
        let mut family: Option<Family> = None;
        for i in 0..ranged.len() {
            let (range, _, idx) = ranged[i];
            if family != Some(range.family()) {
                open.clear();
                family = Some(range.family());
            }
            while let Some(&top) = open.last() {
                if ranged[top].0.end() < range.start() {
                    open.pop();
                } else {
                    break;
                }
            }
            if let Some(&top) = open.last() {
                let (container, _, container_idx) = ranged[top];
                if container.contains(&range) {
                    if container == range {
                        // Mutual containment: an address and its /32 (or /128)
                        // range form. Treated as exact-match equality.
                        tracing::debug!(
                            survivor = %slots[container_idx].as_ref().expect("slot filled").value,
                            "equal-bounds containment merged as exact match"
                        );
                    }
                    let absorbed = slots[idx].take().expect("slot filled");
                    let survivor = slots[container_idx].as_mut().expect("slot filled");
                    tracing::trace!(
                        survivor = %survivor.value,
                        absorbed = %absorbed.value,
                        "range containment collapse"
                    );
                    merge_into(survivor, absorbed);
                    continue;
                }
                // Partial overlap without containment: both retained unmodified.
            }
            open.push(i);
        }

        let mut survivors: Vec<Ioc> = slots.into_iter().flatten().collect();
        for ioc in &mut survivors {
            finalize_confidence(ioc);
        }
        survivors.sort_by(|a, b| {
            a.ioc_type
                .cmp(&b.ioc_type)
                .then_with(|| a.value.cmp(&b.value))
        });

        tracing::debug!(
            candidates = before,
            survivors = survivors.len(),
            "deduplication complete"
        );
        Ok(survivors)
    }
}

/// Merge an exact-match group into one indicator.
fn merge_group(mut members: Vec<Ioc>) -> Ioc {
    members.sort_by(|a, b| {
        a.last_updated.cmp(&b.last_updated).then_with(|| {
            let a_name = a.sources.first().map(|s| s.name.as_str());
            let b_name = b.sources.first().map(|s| s.name.as_str());
            a_name.cmp(&b_name)
        })
    });
    let mut iter = members.into_iter();
    let mut merged = iter.next().expect("group is never empty");
    for member in iter {
        merge_into(&mut merged, member);
    }
    merged
}

/// Fold `src` into `dst`: union sources, widen timestamps, resolve category,
/// union metadata. Confidence is left for `finalize_confidence`.
fn merge_into(dst: &mut Ioc, src: Ioc) {
    dst.category = resolve_category(dst, &src);

    // Shallow union; the most recently updated member wins key collisions.
    if src.last_updated >= dst.last_updated {
        dst.metadata.extend(src.metadata);
    } else {
        for (key, value) in src.metadata {
            dst.metadata.entry(key).or_insert(value);
        }
    }

    for source in src.sources {
        match dst.sources.iter_mut().find(|s| s.name == source.name) {
            Some(existing) => {
                existing.first_seen = existing.first_seen.min(source.first_seen);
                existing.last_updated = existing.last_updated.max(source.last_updated);
                existing.confidence = existing.confidence.max(source.confidence);
                if existing.url.is_none() {
                    existing.url = source.url;
                }
            }
            None => dst.sources.push(source),
        }
    }
    dst.sources.sort_by(|a, b| a.name.cmp(&b.name));

    dst.first_seen = dst.first_seen.min(src.first_seen);
    dst.last_updated = dst.last_updated.max(src.last_updated);
}

/// Category precedence: the side whose strongest source carries the higher
/// confidence wins; ties go to the more recently updated side, and a full tie
/// picks the lexically smaller tag so merges stay deterministic.
fn resolve_category(a: &Ioc, b: &Ioc) -> Option<String> {
    match (&a.category, &b.category) {
        (None, None) => None,
        (Some(c), None) | (None, Some(c)) => Some(c.clone()),
        (Some(ca), Some(cb)) => {
            let key_a = (a.peak_confidence(), a.last_updated);
            let key_b = (b.peak_confidence(), b.last_updated);
            let winner = match key_a.partial_cmp(&key_b).unwrap_or(Ordering::Equal) {
                Ordering::Greater => ca,
                Ordering::Less => cb,
                Ordering::Equal => ca.min(cb),
            };
            Some(winner.clone())
        }
    }
}

/// Recompute confidence from scratch: noisy-OR over per-source baselines plus
/// any non-negative deltas recommended by enrichment steps. Pure in
/// `(sources, metadata)`, which is what keeps repeated passes stable.
fn finalize_confidence(ioc: &mut Ioc) {
    let base = noisy_or(ioc.sources.iter().map(|s| s.confidence));
    let delta: f64 = ioc
        .metadata
        .values()
        .filter_map(|v| v.get("confidence_delta").and_then(serde_json::Value::as_f64))
        .filter(|d| *d > 0.0)
        .sum();
    ioc.confidence = (base + delta).clamp(0.0, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ioc_id, SourceRef};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn ioc(
        ioc_type: IocType,
        value: &str,
        source: &str,
        confidence: f64,
        seen: DateTime<Utc>,
    ) -> Ioc {
        Ioc {
            id: ioc_id(ioc_type, value),
            value: value.to_string(),
            ioc_type,
            category: None,
            sources: vec![SourceRef {
                name: source.to_string(),
                url: None,
                first_seen: seen,
                last_updated: seen,
                confidence,
            }],
            first_seen: seen,
            last_updated: seen,
            confidence,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn exact_duplicates_merge_with_noisy_or() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Ip, "192.168.1.1", "spamhaus", 0.95, at(1)),
                ioc(IocType::Ip, "192.168.1.1", "blocklist_de", 0.90, at(2)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sources.len(), 2);
        assert!((out[0].confidence - 0.995).abs() < 1e-9);
        assert_eq!(out[0].first_seen, at(1));
        assert_eq!(out[0].last_updated, at(2));
    }

    #[test]
    fn merged_confidence_bounds_every_contributor() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Ip, "1.2.3.4", "a", 0.6, at(1)),
                ioc(IocType::Ip, "1.2.3.4", "b", 0.7, at(2)),
                ioc(IocType::Ip, "1.2.3.4", "c", 0.8, at(3)),
            ])
            .unwrap();
        let merged = out[0].confidence;
        assert!(merged >= 0.8 && merged <= 1.0);
    }

    #[test]
    fn ip_collapses_into_containing_cidr() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Ip, "10.0.0.5", "blocklist_de", 0.90, at(1)),
                ioc(IocType::Cidr, "10.0.0.0/24", "spamhaus", 0.95, at(2)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ioc_type, IocType::Cidr);
        assert_eq!(out[0].value, "10.0.0.0/24");
        assert_eq!(out[0].sources.len(), 2);
        assert!(out[0].has_source("blocklist_de"));
        assert!(out[0].has_source("spamhaus"));
        assert!((out[0].confidence - noisy_or([0.95, 0.90])).abs() < 1e-9);
    }

    #[test]
    fn narrower_cidr_collapses_into_wider() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Cidr, "10.0.1.0/24", "blocklist_de", 0.90, at(1)),
                ioc(IocType::Cidr, "10.0.0.0/23", "spamhaus", 0.95, at(2)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, "10.0.0.0/23");
    }

    #[test]
    fn disjoint_siblings_both_survive() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Cidr, "10.0.0.0/24", "spamhaus", 0.95, at(1)),
                ioc(IocType::Cidr, "10.0.1.0/24", "spamhaus", 0.95, at(1)),
            ])
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn absorption_picks_the_enclosing_sibling() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Cidr, "10.0.0.0/23", "spamhaus", 0.95, at(1)),
                ioc(IocType::Cidr, "10.0.2.0/23", "spamhaus", 0.95, at(1)),
                ioc(IocType::Ip, "10.0.2.7", "blocklist_de", 0.90, at(2)),
            ])
            .unwrap();
        assert_eq!(out.len(), 2);
        let absorbed_into = out.iter().find(|i| i.value == "10.0.2.0/23").unwrap();
        assert!(absorbed_into.has_source("blocklist_de"));
    }

    #[test]
    fn nested_chain_collapses_to_outermost() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Ip, "10.0.0.7", "a", 0.5, at(1)),
                ioc(IocType::Cidr, "10.0.0.0/24", "b", 0.6, at(2)),
                ioc(IocType::Cidr, "10.0.0.0/16", "c", 0.7, at(3)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, "10.0.0.0/16");
        assert_eq!(out[0].sources.len(), 3);
    }

    #[test]
    fn equal_bounds_merge_keeps_range_form() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Ip, "10.0.0.5", "blocklist_de", 0.90, at(1)),
                ioc(IocType::Cidr, "10.0.0.5/32", "spamhaus", 0.95, at(2)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ioc_type, IocType::Cidr);
        assert_eq!(out[0].sources.len(), 2);
    }

    #[test]
    fn urls_merge_only_on_exact_canonical_value() {
        let dedup = Deduplicator::new();
        let out = dedup
            .deduplicate(vec![
                ioc(IocType::Url, "http://evil.example/a", "digitalside", 0.80, at(1)),
                ioc(IocType::Url, "http://evil.example/a", "digitalside", 0.80, at(2)),
                ioc(IocType::Url, "http://evil.example/b", "digitalside", 0.80, at(1)),
            ])
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn category_precedence_highest_confidence_wins() {
        let dedup = Deduplicator::new();
        let mut low = ioc(IocType::Ip, "1.1.1.1", "digitalside", 0.80, at(5));
        low.category = Some("scanner".to_string());
        let mut high = ioc(IocType::Ip, "1.1.1.1", "spamhaus", 0.95, at(1));
        high.category = Some("botnet_range".to_string());
        let out = dedup.deduplicate(vec![low, high]).unwrap();
        assert_eq!(out[0].category.as_deref(), Some("botnet_range"));
    }

    #[test]
    fn category_tie_broken_by_recency() {
        let dedup = Deduplicator::new();
        let mut older = ioc(IocType::Ip, "1.1.1.1", "a", 0.9, at(1));
        older.category = Some("stale_tag".to_string());
        let mut newer = ioc(IocType::Ip, "1.1.1.1", "b", 0.9, at(4));
        newer.category = Some("fresh_tag".to_string());
        let out = dedup.deduplicate(vec![older, newer]).unwrap();
        assert_eq!(out[0].category.as_deref(), Some("fresh_tag"));
    }

    #[test]
    fn metadata_collision_favors_most_recent() {
        let dedup = Deduplicator::new();
        let mut older = ioc(IocType::Ip, "1.1.1.1", "a", 0.9, at(1));
        older
            .metadata
            .insert("geolocation".into(), serde_json::json!({"country": "AA"}));
        older.metadata.insert("only_old".into(), serde_json::json!(1));
        let mut newer = ioc(IocType::Ip, "1.1.1.1", "b", 0.9, at(2));
        newer
            .metadata
            .insert("geolocation".into(), serde_json::json!({"country": "BB"}));
        let out = dedup.deduplicate(vec![older, newer]).unwrap();
        assert_eq!(out[0].metadata["geolocation"]["country"], "BB");
        assert_eq!(out[0].metadata["only_old"], 1);
    }

    #[test]
    fn confidence_deltas_from_metadata_are_applied_once() {
        let dedup = Deduplicator::new();
        let mut suspicious = ioc(IocType::Url, "http://evil.example/x.exe", "digitalside", 0.80, at(1));
        suspicious.metadata.insert(
            "url_suspicion".into(),
            serde_json::json!({"score": 0.7, "confidence_delta": 0.1}),
        );
        let out = dedup.deduplicate(vec![suspicious]).unwrap();
        assert!((out[0].confidence - 0.9).abs() < 1e-9);
        // A second pass must not re-apply the delta.
        let again = dedup.deduplicate(out.clone()).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn deduplicate_is_idempotent() {
        let dedup = Deduplicator::new();
        let input = vec![
            ioc(IocType::Ip, "10.0.0.5", "blocklist_de", 0.90, at(1)),
            ioc(IocType::Cidr, "10.0.0.0/24", "spamhaus", 0.95, at(2)),
            ioc(IocType::Cidr, "10.0.1.0/24", "spamhaus", 0.95, at(2)),
            ioc(IocType::Url, "http://evil.example/a", "digitalside", 0.80, at(3)),
            ioc(IocType::Url, "http://evil.example/a", "spamhaus", 0.95, at(4)),
        ];
        let once = dedup.deduplicate(input).unwrap();
        let twice = dedup.deduplicate(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn output_order_is_deterministic() {
        let dedup = Deduplicator::new();
        let a = vec![
            ioc(IocType::Url, "http://evil.example/a", "digitalside", 0.80, at(1)),
            ioc(IocType::Ip, "9.9.9.9", "blocklist_de", 0.90, at(1)),
            ioc(IocType::Cidr, "10.0.0.0/24", "spamhaus", 0.95, at(1)),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(dedup.deduplicate(a).unwrap(), dedup.deduplicate(b).unwrap());
    }

    #[test]
    fn unparseable_range_value_is_a_contract_violation() {
        let dedup = Deduplicator::new();
        let mut broken = ioc(IocType::Cidr, "10.0.0.0/24", "spamhaus", 0.95, at(1));
        broken.value = "not-a-range".to_string();
        let err = dedup.deduplicate(vec![broken]).unwrap_err();
        assert_eq!(err.ioc_type, IocType::Cidr);
    }

    #[test]
    fn noisy_or_single_source_is_identity() {
        assert!((noisy_or([0.8]) - 0.8).abs() < 1e-12);
        assert_eq!(noisy_or([]), 0.0);
        assert!(noisy_or([1.0, 0.5]) <= 1.0);
    }
}

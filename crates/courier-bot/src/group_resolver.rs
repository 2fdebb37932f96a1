//! Signal group-recipient resolution.
//!
//! A Signal group surfaces under several identifier encodings:
//! `group.<base64(internal_id)>`, a url-safe/padding-stripped legacy form,
//! the raw internal id, and occasionally the bare base64.  Sends require the
//! canonical `group.<std-base64>` form; a wrong candidate earns HTTP 400.
//!
//! The resolver keeps an alias→canonical map refreshed from the bridge's
//! group listing (rate-limited by a TTL) and, when everything misses,
//! derives a best-effort candidate list from the input alone.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

/// Candidate recipient ids for one send attempt, in try-order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroupRecipients {
    pub recipients: Vec<String>,
    pub cache_refreshed: bool,
}

/// Alias cache + bridge refresh driver.
pub struct GroupResolver {
    base_url: String,
    sender_number: String,
    http: reqwest::Client,
    refresh_ttl: Duration,
    alias_to_canonical: DashMap<String, String>,
    last_refresh: Mutex<Option<Instant>>,
}

impl GroupResolver {
    pub fn new(
        base_url: &str,
        sender_number: &str,
        http: reqwest::Client,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            sender_number: sender_number.to_owned(),
            http,
            refresh_ttl,
            alias_to_canonical: DashMap::new(),
            last_refresh: Mutex::new(None),
        }
    }

    /// Resolve a raw group id into an ordered candidate list.
    pub async fn resolve(&self, group_id: &str) -> ResolvedGroupRecipients {
        if let Some(canonical) = self.lookup(group_id) {
            return ResolvedGroupRecipients {
                recipients: merge_candidates(&canonical, &compat_group_recipients(group_id)),
                cache_refreshed: false,
            };
        }

        let refreshed = self.refresh_alias_cache().await;
        if refreshed && let Some(canonical) = self.lookup(group_id) {
            return ResolvedGroupRecipients {
                recipients: merge_candidates(&canonical, &compat_group_recipients(group_id)),
                cache_refreshed: true,
            };
        }

        ResolvedGroupRecipients {
            recipients: compat_group_recipients(group_id),
            cache_refreshed: refreshed,
        }
    }

    fn lookup(&self, group_id: &str) -> Option<String> {
        for alias in alias_variants(group_id) {
            if let Some(canonical) = self.alias_to_canonical.get(&alias) {
                return Some(canonical.clone());
            }
        }
        None
    }

    /// Refresh the alias map from the bridge, at most once per TTL window.
    /// Cache misses inside a fresh window do not force a refetch, so newly
    /// created aliases may take up to the TTL to appear.
    async fn refresh_alias_cache(&self) -> bool {
        {
            let last = self
                .last_refresh
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(at) = *last
                && at.elapsed() < self.refresh_ttl
            {
                return false;
            }
        }

        let (groups, fetched) = self.fetch_groups().await;
        if fetched {
            let mut updated: Vec<(String, String)> = Vec::new();
            for group in &groups {
                let Some(canonical) = canonical_recipient_from_group(group) else {
                    continue;
                };
                for alias in group_aliases(group) {
                    updated.push((alias, canonical.clone()));
                }
            }
            if !updated.is_empty() {
                self.alias_to_canonical.clear();
                for (alias, canonical) in updated {
                    self.alias_to_canonical.insert(alias, canonical);
                }
            }
            debug!(aliases = self.alias_to_canonical.len(), "group alias cache refreshed");
        }

        *self
            .last_refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
        fetched
    }

    async fn fetch_groups(&self) -> (Vec<Value>, bool) {
        let encoded_sender: String =
            url::form_urlencoded::byte_serialize(self.sender_number.as_bytes()).collect();
        let urls = [
            format!("{}/v1/groups/{}", self.base_url, encoded_sender),
            format!("{}/v1/groups", self.base_url),
        ];

        for request_url in urls {
            let response = match self
                .http
                .get(&request_url)
                .timeout(Duration::from_secs(30))
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(url = %request_url, error = %err, "group list fetch failed");
                    continue;
                }
            };

            if response.status().as_u16() >= 400 {
                continue;
            }

            let Ok(payload) = response.json::<Value>().await else {
                continue;
            };
            return (extract_group_records(&payload), true);
        }

        (Vec::new(), false)
    }
}

// ---------------------------------------------------------------------------
// Bridge payload handling
// ---------------------------------------------------------------------------

fn extract_group_records(payload: &Value) -> Vec<Value> {
    if let Some(items) = payload.as_array() {
        return items.iter().filter(|v| v.is_object()).cloned().collect();
    }

    let Some(object) = payload.as_object() else {
        return Vec::new();
    };

    for key in ["groups", "data", "results"] {
        if let Some(Value::Array(items)) = object.get(key) {
            return items.iter().filter(|v| v.is_object()).cloned().collect();
        }
    }

    // A single bare record.
    let id_keys = ["id", "groupId", "groupIdHex", "internal_id", "internalId"];
    if id_keys
        .iter()
        .any(|key| matches!(object.get(*key), Some(Value::String(_))))
    {
        return vec![payload.clone()];
    }

    Vec::new()
}

fn canonical_recipient_from_group(group: &Value) -> Option<String> {
    let object = group.as_object()?;

    for key in ["id", "groupId", "groupIdHex"] {
        if let Some(Value::String(s)) = object.get(key) {
            let normalized = s.trim();
            if normalized.is_empty() {
                continue;
            }
            if normalized.starts_with("group.") {
                return Some(normalized.to_owned());
            }
            return Some(group_id_from_internal(normalized));
        }
    }

    for key in ["internal_id", "internalId"] {
        if let Some(Value::String(s)) = object.get(key) {
            let normalized = s.trim();
            if !normalized.is_empty() {
                return Some(group_id_from_internal(normalized));
            }
        }
    }

    None
}

fn group_aliases(group: &Value) -> BTreeSet<String> {
    let mut aliases = BTreeSet::new();
    let Some(object) = group.as_object() else {
        return aliases;
    };
    for key in ["id", "groupId", "groupIdHex", "internal_id", "internalId"] {
        if let Some(Value::String(s)) = object.get(key)
            && !s.trim().is_empty()
        {
            aliases.extend(alias_variants(s));
        }
    }
    aliases
}

// ---------------------------------------------------------------------------
// Alias codecs
// ---------------------------------------------------------------------------

/// All lookup-tolerant spellings of a group identifier.
pub(crate) fn alias_variants(value: &str) -> BTreeSet<String> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return BTreeSet::new();
    }

    let mut variants = BTreeSet::new();
    variants.insert(normalized.to_owned());

    if let Some(suffix) = normalized.strip_prefix("group.") {
        variants.insert(suffix.to_owned());
        if let Some(decoded) = decode_group_suffix(suffix) {
            variants.insert(decoded.clone());
            variants.insert(format!("group.{decoded}"));
        }
    } else {
        variants.insert(format!("group.{normalized}"));
        let encoded = encode_internal_id(normalized);
        variants.insert(encoded.clone());
        variants.insert(format!("group.{encoded}"));
    }

    // Tolerate legacy url-safe / padding-stripped spellings on lookup, but
    // never emit them as canonical send ids.
    let mut tolerant = BTreeSet::new();
    for candidate in &variants {
        tolerant.extend(lookup_tolerant_forms(candidate));
    }
    tolerant
}

/// Best-effort candidate list derived from the input alone.
pub(crate) fn compat_group_recipients(group_id: &str) -> Vec<String> {
    let normalized = group_id.trim();
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut deduped: Vec<String> = Vec::new();
    let mut push = |candidate: Option<String>| {
        if let Some(candidate) = candidate
            && !candidate.is_empty()
            && !deduped.contains(&candidate)
        {
            deduped.push(candidate);
        }
    };

    if let Some(suffix) = normalized.strip_prefix("group.") {
        let decoded = decode_group_suffix(suffix);
        push(Some(normalized.to_owned()));
        push(Some(suffix.to_owned()));
        push(decoded.as_ref().map(|d| format!("group.{d}")));
        push(decoded);
        return deduped;
    }

    push(Some(group_id_from_internal(normalized)));
    push(Some(format!("group.{normalized}")));
    push(Some(normalized.to_owned()));
    push(Some(legacy_group_id_from_internal(normalized)));
    deduped
}

fn group_id_from_internal(internal_id: &str) -> String {
    let normalized = internal_id.trim();
    if normalized.starts_with("group.") {
        return normalized.to_owned();
    }
    format!("group.{}", encode_internal_id(normalized))
}

fn legacy_group_id_from_internal(internal_id: &str) -> String {
    let normalized = internal_id.trim();
    if normalized.is_empty() {
        return String::new();
    }
    let suffix = encode_internal_id(normalized)
        .replace('+', "-")
        .replace('/', "_");
    format!("group.{}", suffix.trim_end_matches('='))
}

fn encode_internal_id(internal_id: &str) -> String {
    BASE64.encode(internal_id.as_bytes())
}

/// Decode a (possibly url-safe, possibly unpadded) base64 group suffix back
/// to its internal id.  Returns `None` for anything that is not valid UTF-8.
pub(crate) fn decode_group_suffix(group_suffix: &str) -> Option<String> {
    let normalized = group_suffix.trim().replace('-', "+").replace('_', "/");
    if normalized.is_empty() {
        return None;
    }

    let padding = "=".repeat((4 - normalized.len() % 4) % 4);
    let padded = format!("{normalized}{padding}");
    let decoded = BASE64.decode(padded.as_bytes()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn lookup_tolerant_forms(value: &str) -> BTreeSet<String> {
    let value = value.trim();
    if value.is_empty() {
        return BTreeSet::new();
    }

    let core = value.strip_prefix("group.").unwrap_or(value);
    let urlsafe = core.replace('+', "-").replace('/', "_");
    let forms: BTreeSet<String> = [
        core.to_owned(),
        urlsafe.clone(),
        core.trim_end_matches('=').to_owned(),
        urlsafe.trim_end_matches('=').to_owned(),
    ]
    .into_iter()
    .filter(|form| !form.is_empty())
    .collect();

    let mut all = forms.clone();
    for form in forms {
        all.insert(format!("group.{form}"));
    }
    all
}

fn merge_candidates(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut deduped = vec![primary.to_owned()];
    for candidate in fallbacks {
        if !candidate.is_empty() && !deduped.contains(candidate) {
            deduped.push(candidate.clone());
        }
    }
    deduped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const INTERNAL: &str = "team-chat-42";

    fn canonical() -> String {
        format!("group.{}", BASE64.encode(INTERNAL.as_bytes()))
    }

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = encode_internal_id(INTERNAL);
        assert_eq!(decode_group_suffix(&encoded).as_deref(), Some(INTERNAL));

        // Url-safe and unpadded forms decode too.
        let urlsafe = encoded.replace('+', "-").replace('/', "_");
        assert_eq!(decode_group_suffix(&urlsafe).as_deref(), Some(INTERNAL));
        assert_eq!(
            decode_group_suffix(encoded.trim_end_matches('=')).as_deref(),
            Some(INTERNAL)
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_group_suffix(""), None);
        assert_eq!(decode_group_suffix("!!!not base64!!!"), None);
    }

    #[test]
    fn alias_variants_connect_all_encodings() {
        // Any spelling of the same group shares at least the canonical form.
        let from_internal = alias_variants(INTERNAL);
        let from_canonical = alias_variants(&canonical());
        assert!(from_internal.contains(&canonical()));
        assert!(from_canonical.contains(INTERNAL));
        assert!(from_canonical.contains(&canonical()));
    }

    #[test]
    fn compat_candidates_start_with_canonical_for_internal_ids() {
        let candidates = compat_group_recipients(INTERNAL);
        assert_eq!(candidates[0], canonical());
        assert!(candidates.contains(&INTERNAL.to_owned()));
        assert!(candidates.contains(&format!("group.{INTERNAL}")));
    }

    #[test]
    fn compat_candidates_for_prefixed_ids_keep_input_first() {
        let input = canonical();
        let candidates = compat_group_recipients(&input);
        assert_eq!(candidates[0], input);
        assert!(candidates.contains(&INTERNAL.to_owned()));
    }

    #[test]
    fn compat_candidates_empty_for_blank_input() {
        assert!(compat_group_recipients("   ").is_empty());
    }

    #[test]
    fn merge_candidates_dedupes_in_order() {
        let merged = merge_candidates(
            "group.AAA",
            &["group.AAA".to_owned(), "raw".to_owned(), "raw".to_owned()],
        );
        assert_eq!(merged, vec!["group.AAA", "raw"]);
    }

    #[test]
    fn group_records_extract_from_all_shapes() {
        let list = serde_json::json!([{"id": "group.x"}, "noise"]);
        assert_eq!(extract_group_records(&list).len(), 1);

        let wrapped = serde_json::json!({"groups": [{"id": "group.x"}, {"id": "group.y"}]});
        assert_eq!(extract_group_records(&wrapped).len(), 2);

        let single = serde_json::json!({"internal_id": "abc"});
        assert_eq!(extract_group_records(&single).len(), 1);

        assert!(extract_group_records(&serde_json::json!({"other": 1})).is_empty());
    }

    #[test]
    fn canonical_recipient_prefers_explicit_ids() {
        let group = serde_json::json!({"id": "group.ZZZ", "internal_id": INTERNAL});
        assert_eq!(
            canonical_recipient_from_group(&group).as_deref(),
            Some("group.ZZZ")
        );

        let implicit = serde_json::json!({"internal_id": INTERNAL});
        assert_eq!(
            canonical_recipient_from_group(&implicit).as_deref(),
            Some(canonical().as_str())
        );

        let hexish = serde_json::json!({"groupIdHex": "deadbeef"});
        assert_eq!(
            canonical_recipient_from_group(&hexish).as_deref(),
            Some(format!("group.{}", BASE64.encode(b"deadbeef")).as_str())
        );
    }

    #[tokio::test]
    async fn unresolved_groups_fall_back_to_compat_candidates() {
        // A resolver pointed at an unreachable bridge: the fetch fails, so
        // resolve() returns input-derived candidates only.
        let resolver = GroupResolver::new(
            "http://127.0.0.1:1",
            "+15550001111",
            reqwest::Client::new(),
            Duration::from_secs(300),
        );
        let resolved = resolver.resolve(INTERNAL).await;
        assert!(!resolved.cache_refreshed);
        assert_eq!(resolved.recipients[0], canonical());
        assert!(resolved.recipients.contains(&INTERNAL.to_owned()));
    }

    #[tokio::test]
    async fn cached_aliases_resolve_without_refresh() {
        let resolver = GroupResolver::new(
            "http://127.0.0.1:1",
            "+15550001111",
            reqwest::Client::new(),
            Duration::from_secs(300),
        );
        for alias in alias_variants(INTERNAL) {
            resolver.alias_to_canonical.insert(alias, canonical());
        }

        // Every encoding hits the cache.
        for input in [
            INTERNAL.to_owned(),
            canonical(),
            encode_internal_id(INTERNAL),
            legacy_group_id_from_internal(INTERNAL),
        ] {
            let resolved = resolver.resolve(&input).await;
            assert!(!resolved.cache_refreshed, "refresh for {input}");
            assert_eq!(resolved.recipients[0], canonical(), "canonical for {input}");
            assert!(resolved.recipients.contains(&input), "input kept for {input}");
        }
    }

    #[tokio::test]
    async fn refresh_is_rate_limited_by_ttl() {
        let resolver = GroupResolver::new(
            "http://127.0.0.1:1",
            "+15550001111",
            reqwest::Client::new(),
            Duration::from_secs(300),
        );
        // First miss attempts a refresh (which fails: unreachable bridge).
        let _ = resolver.resolve("unknown-group").await;
        // Second miss inside the TTL must not hit the network path again;
        // refresh_alias_cache returns false immediately.
        assert!(!resolver.refresh_alias_cache().await);
    }
}

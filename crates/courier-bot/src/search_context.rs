//! Per-conversation search memory and pending-state slots.
//!
//! Remembers recent search results as [`SourceRecord`]s for later `/source`
//! lookups, and holds the three at-most-one-per-conversation pending slots
//! (follow-up clarification, video selection, jmail selection).  All purging
//! is lazy and TTL-driven, like the chat context store.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::search_client::{SearchMode, SearchResult};

const CLAIM_KEY_CHARS: usize = 160;

/// A remembered search hit, used to answer future `/source` queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// First ~160 chars of the snippet (or title when the snippet is empty).
    pub claim_key: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub mode: SearchMode,
    pub created_at: Instant,
}

/// Unresolved follow-up clarification state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFollowupState {
    pub original_prompt: String,
    /// Original prompt with the first pronoun span replaced by `{subject}`.
    pub template_prompt: String,
    pub reason: String,
    pub created_at: Instant,
    pub attempts: u32,
}

/// A numbered list awaiting a numeric reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelectionState {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub created_at: Instant,
}

/// Conversation-keyed search memory.
pub struct SearchContextStore {
    ttl: Duration,
    max_records_per_conversation: usize,
    records: DashMap<String, Vec<SourceRecord>>,
    pending_followups: DashMap<String, PendingFollowupState>,
    pending_video_selections: DashMap<String, PendingSelectionState>,
    pending_jmail_selections: DashMap<String, PendingSelectionState>,
}

impl SearchContextStore {
    pub fn new(ttl: Duration, max_records_per_conversation: usize) -> Self {
        Self {
            ttl: ttl.max(Duration::from_secs(1)),
            max_records_per_conversation: max_records_per_conversation.max(1),
            records: DashMap::new(),
            pending_followups: DashMap::new(),
            pending_video_selections: DashMap::new(),
            pending_jmail_selections: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Source records
    // -----------------------------------------------------------------------

    /// Append records for fresh search results, dropping the oldest beyond
    /// the per-conversation bound.
    pub fn remember_results(&self, conversation_key: &str, mode: SearchMode, results: &[SearchResult]) {
        self.remember_results_at(conversation_key, mode, results, Instant::now());
    }

    fn remember_results_at(
        &self,
        conversation_key: &str,
        mode: SearchMode,
        results: &[SearchResult],
        now: Instant,
    ) {
        self.purge(now);
        if results.is_empty() {
            return;
        }

        let mut bucket = self
            .records
            .entry(conversation_key.to_owned())
            .or_default();
        for result in results {
            bucket.push(SourceRecord {
                claim_key: claim_key(result),
                title: result.title.clone(),
                url: result.url.clone(),
                snippet: result.snippet.clone(),
                mode,
                created_at: now,
            });
        }

        let len = bucket.len();
        if len > self.max_records_per_conversation {
            bucket.drain(..len - self.max_records_per_conversation);
        }
    }

    /// Find records matching a claim.  An empty claim returns the newest
    /// records, URL-deduped.  Otherwise records are scored by substring
    /// containment (+100) plus word overlap, and only positive scores
    /// survive.
    pub fn find_sources(&self, conversation_key: &str, claim: &str, limit: usize) -> Vec<SourceRecord> {
        self.find_sources_at(conversation_key, claim, limit, Instant::now())
    }

    fn find_sources_at(
        &self,
        conversation_key: &str,
        claim: &str,
        limit: usize,
        now: Instant,
    ) -> Vec<SourceRecord> {
        self.purge(now);

        let Some(records) = self.records.get(conversation_key) else {
            return Vec::new();
        };

        let normalized_claim = normalize(claim);
        if normalized_claim.is_empty() {
            return dedupe_urls(records.iter().rev(), limit);
        }

        let claim_tokens: std::collections::HashSet<&str> =
            normalized_claim.split(' ').collect();
        let mut scored: Vec<(i64, &SourceRecord)> = Vec::new();
        for record in records.iter() {
            let text = normalize(&format!(
                "{} {} {}",
                record.title, record.snippet, record.claim_key
            ));
            let mut score = 0i64;
            if text.contains(&normalized_claim) {
                score += 100;
            }
            let overlap = text
                .split(' ')
                .collect::<std::collections::HashSet<&str>>()
                .intersection(&claim_tokens)
                .count();
            score += overlap as i64;
            if score > 0 {
                scored.push((score, record));
            }
        }

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        dedupe_urls(scored.into_iter().map(|(_, record)| record), limit)
    }

    /// Newest-first records, pre-dedupe, up to `limit`.
    pub fn recent_records(&self, conversation_key: &str, limit: usize) -> Vec<SourceRecord> {
        self.recent_records_at(conversation_key, limit, Instant::now())
    }

    fn recent_records_at(
        &self,
        conversation_key: &str,
        limit: usize,
        now: Instant,
    ) -> Vec<SourceRecord> {
        self.purge(now);
        let Some(records) = self.records.get(conversation_key) else {
            return Vec::new();
        };
        records
            .iter()
            .rev()
            .take(limit.max(1))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Pending follow-up slot
    // -----------------------------------------------------------------------

    pub fn set_pending_followup(
        &self,
        conversation_key: &str,
        original_prompt: &str,
        template_prompt: &str,
        reason: &str,
    ) {
        let now = Instant::now();
        self.purge(now);
        self.pending_followups.insert(
            conversation_key.to_owned(),
            PendingFollowupState {
                original_prompt: original_prompt.to_owned(),
                template_prompt: template_prompt.to_owned(),
                reason: reason.to_owned(),
                created_at: now,
                attempts: 0,
            },
        );
    }

    pub fn get_pending_followup(&self, conversation_key: &str) -> Option<PendingFollowupState> {
        self.purge(Instant::now());
        self.pending_followups
            .get(conversation_key)
            .map(|state| state.clone())
    }

    pub fn clear_pending_followup(&self, conversation_key: &str) {
        self.pending_followups.remove(conversation_key);
    }

    /// Increment the attempt counter, returning the new count (0 when no
    /// pending state exists).
    pub fn bump_pending_attempt(&self, conversation_key: &str) -> u32 {
        self.purge(Instant::now());
        match self.pending_followups.get_mut(conversation_key) {
            Some(mut state) => {
                state.attempts += 1;
                state.attempts
            }
            None => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Pending selection slots
    // -----------------------------------------------------------------------

    pub fn set_pending_video_selection(
        &self,
        conversation_key: &str,
        query: &str,
        results: Vec<SearchResult>,
    ) {
        let now = Instant::now();
        self.purge(now);
        self.pending_video_selections.insert(
            conversation_key.to_owned(),
            PendingSelectionState {
                query: query.to_owned(),
                results,
                created_at: now,
            },
        );
    }

    pub fn get_pending_video_selection(
        &self,
        conversation_key: &str,
    ) -> Option<PendingSelectionState> {
        self.purge(Instant::now());
        self.pending_video_selections
            .get(conversation_key)
            .map(|state| state.clone())
    }

    pub fn clear_pending_video_selection(&self, conversation_key: &str) {
        self.pending_video_selections.remove(conversation_key);
    }

    pub fn set_pending_jmail_selection(
        &self,
        conversation_key: &str,
        query: &str,
        results: Vec<SearchResult>,
    ) {
        let now = Instant::now();
        self.purge(now);
        self.pending_jmail_selections.insert(
            conversation_key.to_owned(),
            PendingSelectionState {
                query: query.to_owned(),
                results,
                created_at: now,
            },
        );
    }

    pub fn get_pending_jmail_selection(
        &self,
        conversation_key: &str,
    ) -> Option<PendingSelectionState> {
        self.purge(Instant::now());
        self.pending_jmail_selections
            .get(conversation_key)
            .map(|state| state.clone())
    }

    pub fn clear_pending_jmail_selection(&self, conversation_key: &str) {
        self.pending_jmail_selections.remove(conversation_key);
    }

    // -----------------------------------------------------------------------
    // Purge
    // -----------------------------------------------------------------------

    fn purge(&self, now: Instant) {
        let ttl = self.ttl;
        self.records.retain(|_, records| {
            records.retain(|record| record.created_at + ttl > now);
            !records.is_empty()
        });
        self.pending_followups
            .retain(|_, state| state.created_at + ttl > now);
        self.pending_video_selections
            .retain(|_, state| state.created_at + ttl > now);
        self.pending_jmail_selections
            .retain(|_, state| state.created_at + ttl > now);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn claim_key(result: &SearchResult) -> String {
    let snippet = result.snippet.trim();
    let base = if snippet.is_empty() {
        &result.title
    } else {
        snippet
    };
    base.chars().take(CLAIM_KEY_CHARS).collect()
}

/// Lowercase, strip non-alphanumeric to spaces, collapse whitespace.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_lowercase().next().unwrap_or(ch)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedupe_urls<'a>(
    records: impl Iterator<Item = &'a SourceRecord>,
    limit: usize,
) -> Vec<SourceRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for record in records {
        if !seen.insert(record.url.clone()) {
            continue;
        }
        out.push(record.clone());
        if out.len() >= limit {
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Combines synthetic entries with authoritative list content.
//!
//! The engine only ever touches additions. It abstains (passes the message
//! through untouched) when the message is already large, when most of its
//! entries look like something else has rewritten the stream, or when there
//! is nothing to add. Synthetic entries go right before the first entry that
//! looks like mod diagnostics (TPS/MSPT style lines), or at the end.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use crate::config::TabConfig;
use crate::identity::IdentityGenerator;
use crate::models::{ListAction, ListEntry, ListUpdate, SyntheticEntry};

/// Longest name a Minecraft profile can carry.
const MAX_PROFILE_NAME: usize = 16;
const MAX_DISPLAY_CHARS: usize = 256;
const MAX_LATENCY_MS: i32 = 30_000;
const MAX_GAME_MODE: i32 = 3;

/// Decides whether an authoritative entry was put there by a mod or plugin.
///
/// Best effort: a missed mod entry only means synthetic entries end up after
/// it instead of before.
pub trait ModEntryDetector: Send + Sync {
    fn is_mod_entry(&self, entry: &ListEntry) -> bool;
}

/// Keyword and sentinel-id matching, as used by carpet-style diagnostics.
#[derive(Debug, Clone)]
pub struct KeywordDetector {
    name_keywords: Vec<String>,
    display_keywords: Vec<String>,
}

impl KeywordDetector {
    pub fn new(name_keywords: &[&str], display_keywords: &[&str]) -> Self {
        Self {
            name_keywords: name_keywords.iter().map(|k| k.to_lowercase()).collect(),
            display_keywords: display_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn sentinel_id(id: &Uuid) -> bool {
        let text = id.hyphenated().to_string();
        text.starts_with("00000000-") || text.ends_with("-0000-0000-000000000000")
    }
}

impl Default for KeywordDetector {
    fn default() -> Self {
        Self::new(
            &["tps", "mspt", "carpet", "entity", "tile"],
            &[
                "tps", "mspt", "carpet", "entity", "tile", "chunk", "mob", "redstone",
            ],
        )
    }
}

impl ModEntryDetector for KeywordDetector {
    fn is_mod_entry(&self, entry: &ListEntry) -> bool {
        let contains_any = |text: &str, keywords: &[String]| {
            let text = text.to_lowercase();
            keywords.iter().any(|k| text.contains(k.as_str()))
        };

        if let Some(name) = entry.name.as_deref()
            && contains_any(name, &self.name_keywords)
        {
            return true;
        }
        if let Some(display) = entry.display_name.as_deref()
            && contains_any(display, &self.display_keywords)
        {
            return true;
        }
        entry.id.as_ref().is_some_and(Self::sentinel_id)
    }
}

/// Entry shape a vanilla backend would never send.
pub fn is_anomalous(entry: &ListEntry) -> bool {
    entry.id.is_none()
        || entry
            .name
            .as_deref()
            .is_some_and(|n| n.chars().count() > MAX_PROFILE_NAME)
        || entry
            .display_name
            .as_deref()
            .is_some_and(|d| d.chars().count() > MAX_DISPLAY_CHARS)
        || !(0..=MAX_LATENCY_MS).contains(&entry.latency)
        || !(0..=MAX_GAME_MODE).contains(&entry.game_mode)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub enabled: bool,
    pub enable_incremental: bool,
    pub max_list_size: usize,
    pub preserve_mod_entries: bool,
}

impl From<&TabConfig> for MergePolicy {
    fn from(config: &TabConfig) -> Self {
        Self {
            enabled: config.cross_server_enabled,
            enable_incremental: config.enable_incremental,
            max_list_size: config.max_list_size,
            preserve_mod_entries: config.preserve_mod_entries,
        }
    }
}

/// Synthetic ids one viewer's client is believed to display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerSyntheticState {
    known: HashSet<Uuid>,
    /// Display text last delivered per known id
    shown: HashMap<Uuid, String>,
    contacted: bool,
}

impl ViewerSyntheticState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known(&self) -> &HashSet<Uuid> {
        &self.known
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// No synthetic content has been delivered yet.
    pub fn is_first_contact(&self) -> bool {
        !self.contacted
    }

    /// Forget everything, returning what was known in a stable order.
    pub fn take_known(&mut self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.known.drain().collect();
        self.shown.clear();
        ids.sort_unstable();
        ids
    }

    fn commit<'a>(
        &mut self,
        generated: &HashSet<Uuid>,
        delivered: impl IntoIterator<Item = &'a SyntheticEntry>,
    ) {
        self.known.retain(|id| generated.contains(id));
        self.shown.retain(|id, _| generated.contains(id));
        for entry in delivered {
            self.known.insert(entry.id());
            self.shown.insert(entry.id(), entry.display.clone());
        }
        self.contacted = true;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticDelta {
    pub to_add: Vec<SyntheticEntry>,
    pub to_remove: Vec<Uuid>,
    /// Known ids whose display text changed since it was delivered
    pub to_refresh: Vec<SyntheticEntry>,
}

impl SyntheticDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_refresh.is_empty()
    }
}

/// Why a message went through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abstain {
    Disabled,
    NotAnAddition(ListAction),
    TooLarge { entries: usize, limit: usize },
    Anomalous { anomalous: usize, total: usize },
    NothingGenerated,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutput {
    /// Final entries of the outgoing message (authoritative plus inserted)
    pub entries: Vec<ListEntry>,
    /// Synthetic entries that made it into `entries`
    pub inserted: Vec<SyntheticEntry>,
    /// Synthetic ids the client should drop
    pub removals: Vec<Uuid>,
    /// Already displayed entries whose text must be replaced. Only filled
    /// when there is no authoritative message to merge into.
    pub refreshed: Vec<SyntheticEntry>,
    pub truncated: usize,
    pub abstained: Option<Abstain>,
}

impl MergeOutput {
    fn pass_through(authoritative: Option<&ListUpdate>, reason: Abstain) -> Self {
        Self {
            entries: authoritative.map(|u| u.entries.clone()).unwrap_or_default(),
            abstained: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.abstained.is_some()
            || (self.inserted.is_empty() && self.removals.is_empty() && self.refreshed.is_empty())
    }
}

pub struct MergeEngine {
    policy: MergePolicy,
    detector: Arc<dyn ModEntryDetector>,
    identities: Arc<IdentityGenerator>,
}

impl MergeEngine {
    pub fn new(
        policy: MergePolicy,
        detector: Arc<dyn ModEntryDetector>,
        identities: Arc<IdentityGenerator>,
    ) -> Self {
        Self {
            policy,
            detector,
            identities,
        }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Add/remove delta between what the viewer has and what was generated.
    /// In full mode every generated entry is (re)sent. Otherwise known ids
    /// whose text changed (a header count, an overflow remainder) are listed
    /// in `to_refresh`.
    pub fn diff(
        &self,
        generated: &[SyntheticEntry],
        state: &ViewerSyntheticState,
        full: bool,
    ) -> SyntheticDelta {
        let generated_ids: HashSet<Uuid> = generated.iter().map(SyntheticEntry::id).collect();
        let (to_add, known): (Vec<_>, Vec<_>) = generated
            .iter()
            .cloned()
            .partition(|e| full || !state.known.contains(&e.id()));
        let to_refresh = known
            .into_iter()
            .filter(|e| {
                state
                    .shown
                    .get(&e.id())
                    .is_some_and(|shown| *shown != e.display)
            })
            .collect();
        let mut to_remove: Vec<Uuid> = state
            .known
            .iter()
            .filter(|id| !generated_ids.contains(id))
            .copied()
            .collect();
        to_remove.sort_unstable();
        SyntheticDelta {
            to_add,
            to_remove,
            to_refresh,
        }
    }

    /// Merge `generated` into `authoritative` (or, without one, produce the
    /// synthetic delta on its own). `state` is only updated when the merge
    /// completes; any failure passes the authoritative entries through.
    pub fn merge(
        &self,
        authoritative: Option<&ListUpdate>,
        generated: &[SyntheticEntry],
        state: &mut ViewerSyntheticState,
        force_full: bool,
    ) -> MergeOutput {
        let mut next = state.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.merge_into(authoritative, generated, &mut next, force_full)
        }));
        match result {
            Ok(output) => {
                *state = next;
                output
            }
            Err(_) => {
                error!("list merge failed, forwarding authoritative entries unchanged");
                MergeOutput::pass_through(authoritative, Abstain::Failed)
            }
        }
    }

    fn merge_into(
        &self,
        authoritative: Option<&ListUpdate>,
        generated: &[SyntheticEntry],
        state: &mut ViewerSyntheticState,
        force_full: bool,
    ) -> MergeOutput {
        let full = force_full || !self.policy.enable_incremental || state.is_first_contact();
        let generated_ids: HashSet<Uuid> = generated.iter().map(SyntheticEntry::id).collect();
        let max = self.policy.max_list_size;

        let Some(update) = authoritative else {
            let delta = self.diff(generated, state, full);
            let mut inserted = delta.to_add;
            let truncated = inserted.len().saturating_sub(max);
            if truncated > 0 {
                warn!(truncated, limit = max, "synthetic set exceeds list size, truncating");
                inserted.truncate(max);
            }
            state.commit(&generated_ids, inserted.iter().chain(&delta.to_refresh));
            return MergeOutput {
                entries: inserted
                    .iter()
                    .chain(&delta.to_refresh)
                    .map(SyntheticEntry::to_list_entry)
                    .collect(),
                inserted,
                removals: delta.to_remove,
                refreshed: delta.to_refresh,
                truncated,
                abstained: None,
            };
        };

        if let Some(reason) = self.gate(update, generated) {
            return MergeOutput::pass_through(Some(update), reason);
        }

        let delta = self.diff(generated, state, full);
        let mut entries = update.entries.clone();
        let anchor = self.anchor(&entries);
        entries.splice(
            anchor..anchor,
            delta.to_add.iter().map(SyntheticEntry::to_list_entry),
        );

        let truncated = entries.len().saturating_sub(max);
        if truncated > 0 {
            warn!(
                total = entries.len(),
                limit = max,
                "merged list exceeds maximum size, truncating"
            );
            entries.truncate(max);
        }

        let kept = delta.to_add.len().min(max.saturating_sub(anchor));
        let mut inserted = delta.to_add;
        inserted.truncate(kept);
        state.commit(&generated_ids, &inserted);

        MergeOutput {
            entries,
            inserted,
            removals: delta.to_remove,
            refreshed: Vec::new(),
            truncated,
            abstained: None,
        }
    }

    fn gate(&self, update: &ListUpdate, generated: &[SyntheticEntry]) -> Option<Abstain> {
        if !self.policy.enabled {
            return Some(Abstain::Disabled);
        }
        if update.action != ListAction::AddPlayer {
            return Some(Abstain::NotAnAddition(update.action));
        }

        let limit = self.policy.max_list_size / 2;
        if update.entries.len() > limit {
            return Some(Abstain::TooLarge {
                entries: update.entries.len(),
                limit,
            });
        }

        let authentic: Vec<&ListEntry> = update
            .entries
            .iter()
            .filter(|e| !self.is_ours(e))
            .collect();
        let anomalous = authentic.iter().filter(|e| is_anomalous(e)).count();
        if anomalous * 2 > authentic.len() {
            return Some(Abstain::Anomalous {
                anomalous,
                total: authentic.len(),
            });
        }

        if generated.is_empty() {
            return Some(Abstain::NothingGenerated);
        }
        None
    }

    fn anchor(&self, entries: &[ListEntry]) -> usize {
        if !self.policy.preserve_mod_entries {
            return entries.len();
        }
        entries
            .iter()
            .position(|e| !self.is_ours(e) && self.detector.is_mod_entry(e))
            .unwrap_or(entries.len())
    }

    fn is_ours(&self, entry: &ListEntry) -> bool {
        entry.id.as_ref().is_some_and(|id| self.identities.is_virtual(id))
    }
}

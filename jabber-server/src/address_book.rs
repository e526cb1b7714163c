//! Persistent alias → JID address book
//!
//! Aliases are stored in canonical lower-case form and must match
//! `[a-z0-9][a-z0-9._-]*` (1–50 chars); JIDs must look like
//! `localpart@domain[/resource]` (≤ 200 chars). One JID may be reached
//! through several aliases, but aliases are unique. Roster-sync never
//! overwrites a manually saved alias.
//!
//! Persistence is a single JSON file written atomically (temp + rename).
//! Mutations signal a background saver; at most one save runs at a time and
//! triggers arriving mid-write coalesce into one trailing re-save.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Weak};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use jabber_protocol::RosterEntry;
use jabber_utils::{BridgeError, Result};

const MAX_ALIAS_LEN: usize = 50;
const MAX_JID_LEN: usize = 200;
const DEFAULT_QUERY_LIMIT: usize = 10;
/// Candidates scoring within this many points of the best are ambiguous
const AMBIGUITY_WINDOW: u8 = 5;

static ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("alias regex"));
static JID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@/\s]+@[^@/\s]+(?:/\S+)?$").expect("jid regex"));

/// How an entry got into the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    #[default]
    Manual,
    RosterAuto,
}

#[derive(Debug, Clone)]
struct Entry {
    jid: String,
    origin: Origin,
    /// Unknown persisted fields, carried through rewrites
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Persisted file shape: `{"version": 1, "entries": [...]}`
#[derive(Debug, Serialize, Deserialize)]
struct BookFile {
    version: u32,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    alias: String,
    jid: String,
    #[serde(default)]
    origin: Origin,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

const FILE_VERSION: u32 = 1;

/// Outcome of a save operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Updated,
    Unchanged,
}

/// A ranked query match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMatch {
    pub alias: String,
    pub jid: String,
    pub score: u8,
}

/// Alias resolution failure
#[derive(Debug, Clone)]
pub enum ResolveError {
    NotFound,
    Ambiguous(Vec<QueryMatch>),
}

/// Roster sync statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub added: usize,
    pub skipped: usize,
    pub removed: usize,
    pub errors: usize,
}

/// Persistent alias → JID map with fuzzy lookup and roster sync
pub struct AddressBook {
    entries: RwLock<HashMap<String, Entry>>,
    path: PathBuf,
    save_tx: mpsc::UnboundedSender<()>,
}

impl AddressBook {
    /// Create the book and its background saver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(path: PathBuf) -> Arc<Self> {
        let (save_tx, save_rx) = mpsc::unbounded_channel();
        let book = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            path,
            save_tx,
        });
        tokio::spawn(saver_loop(Arc::downgrade(&book), save_rx));
        book
    }

    /// Load entries from disk. A missing or corrupt file starts the book
    /// empty; persistence failures never block callers.
    pub async fn load(&self) {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "address book file absent, starting empty");
                return;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read address book");
                return;
            }
        };

        let file: BookFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt address book, starting empty");
                return;
            }
        };

        if file.version != FILE_VERSION {
            warn!(version = file.version, "unexpected address book version");
        }

        let mut entries = self.entries.write().await;
        let mut loaded = 0usize;
        for stored in file.entries {
            let alias = stored.alias.trim().to_lowercase();
            let jid = stored.jid.trim().to_lowercase();
            if !validate_alias(&alias) || !validate_jid(&jid) {
                warn!(alias = %stored.alias, jid = %stored.jid, "skipping invalid entry");
                continue;
            }
            entries.insert(
                alias,
                Entry {
                    jid,
                    origin: stored.origin,
                    extra: stored.extra,
                },
            );
            loaded += 1;
        }
        info!(count = loaded, path = %self.path.display(), "address book loaded");
    }

    /// Store an alias → JID mapping as a manual entry.
    pub async fn save_alias(&self, alias: &str, jid: &str) -> Result<SaveOutcome> {
        let alias = canonical_alias(alias);
        let jid = canonical_jid(jid);

        if !validate_alias(&alias) {
            return Err(BridgeError::InvalidAlias(alias));
        }
        if !validate_jid(&jid) {
            return Err(BridgeError::InvalidJid(jid));
        }

        let outcome = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&alias) {
                Some(entry) if entry.jid == jid && entry.origin == Origin::Manual => {
                    SaveOutcome::Unchanged
                }
                Some(entry) => {
                    entry.jid = jid.clone();
                    entry.origin = Origin::Manual;
                    SaveOutcome::Updated
                }
                None => {
                    entries.insert(
                        alias.clone(),
                        Entry {
                            jid: jid.clone(),
                            origin: Origin::Manual,
                            extra: serde_json::Map::new(),
                        },
                    );
                    SaveOutcome::Updated
                }
            }
        };

        if outcome == SaveOutcome::Updated {
            info!(alias = %alias, jid = %jid, "saved alias");
            self.schedule_save();
        }
        Ok(outcome)
    }

    /// Remove an alias. Returns true when it existed.
    pub async fn remove(&self, alias: &str) -> bool {
        let alias = canonical_alias(alias);
        let removed = self.entries.write().await.remove(&alias).is_some();
        if removed {
            info!(alias = %alias, "removed alias");
            self.schedule_save();
        }
        removed
    }

    /// Exact-match lookup.
    pub async fn get_exact(&self, alias: &str) -> Option<String> {
        let alias = canonical_alias(alias);
        self.entries.read().await.get(&alias).map(|e| e.jid.clone())
    }

    /// Fuzzy query against aliases and JIDs.
    ///
    /// Scoring: 100 for an exact alias match, 75 when the alias contains the
    /// term, 50 when the JID contains it. Results are ranked by score, ties
    /// broken alphabetically by alias.
    pub async fn query(&self, term: &str, limit: Option<usize>) -> Vec<QueryMatch> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }

        let entries = self.entries.read().await;
        let mut matches: Vec<QueryMatch> = entries
            .iter()
            .filter_map(|(alias, entry)| {
                let score = if *alias == term {
                    100
                } else if alias.contains(&term) {
                    75
                } else if entry.jid.contains(&term) {
                    50
                } else {
                    return None;
                };
                Some(QueryMatch {
                    alias: alias.clone(),
                    jid: entry.jid.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.alias.cmp(&b.alias)));
        matches.truncate(limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1));
        matches
    }

    /// Resolve an alias to a JID: exact match first, then best fuzzy match.
    ///
    /// Two or more candidates within [`AMBIGUITY_WINDOW`] points of the top
    /// score are reported back for disambiguation.
    pub async fn resolve(&self, alias: &str) -> std::result::Result<String, ResolveError> {
        if let Some(jid) = self.get_exact(alias).await {
            return Ok(jid);
        }

        let matches = self.query(alias, Some(DEFAULT_QUERY_LIMIT)).await;
        let Some(best) = matches.first() else {
            return Err(ResolveError::NotFound);
        };

        let contenders: Vec<QueryMatch> = matches
            .iter()
            .filter(|m| best.score - m.score <= AMBIGUITY_WINDOW)
            .cloned()
            .collect();

        if contenders.len() >= 2 {
            return Err(ResolveError::Ambiguous(contenders));
        }
        Ok(best.jid.clone())
    }

    /// Synchronize roster entries into the book.
    ///
    /// Candidate aliases come from the slugified display name, else the
    /// sanitized JID localpart. A collision with a manual alias retries once
    /// with `<candidate>-<first domain label>`; roster-auto entries may be
    /// overwritten.
    pub async fn sync_roster(&self, roster: &[RosterEntry]) -> SyncStats {
        let mut stats = SyncStats::default();
        debug!(count = roster.len(), "starting roster sync");

        for entry in roster {
            let jid = canonical_jid(&entry.jid);
            if !validate_jid(&jid) {
                warn!(jid = %entry.jid, "invalid roster JID, skipping");
                stats.errors += 1;
                continue;
            }

            let candidate = match entry.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => {
                    let slug = slugify(name);
                    if slug.is_empty() {
                        alias_from_jid(&jid)
                    } else {
                        slug
                    }
                }
                _ => alias_from_jid(&jid),
            };

            match self.place_roster_alias(&candidate, &jid).await {
                RosterPlacement::Added => stats.added += 1,
                RosterPlacement::Skipped => stats.skipped += 1,
                RosterPlacement::Invalid => stats.errors += 1,
            }
        }

        if stats.added > 0 {
            self.schedule_save();
        }
        info!(
            added = stats.added,
            skipped = stats.skipped,
            errors = stats.errors,
            "roster sync complete"
        );
        stats
    }

    /// Apply an incremental roster update: new entries are synced, removed
    /// JIDs lose every alias that points at them.
    pub async fn sync_roster_incremental(
        &self,
        added: &[RosterEntry],
        removed: &[String],
    ) -> SyncStats {
        let mut stats = self.sync_roster(added).await;

        let mut dropped_any = false;
        {
            let mut entries = self.entries.write().await;
            for jid in removed {
                let jid = canonical_jid(jid);
                let aliases: Vec<String> = entries
                    .iter()
                    .filter(|(_, e)| e.jid == jid)
                    .map(|(a, _)| a.clone())
                    .collect();
                for alias in aliases {
                    entries.remove(&alias);
                    debug!(alias = %alias, jid = %jid, "removed roster alias");
                    stats.removed += 1;
                    dropped_any = true;
                }
            }
        }

        if dropped_any {
            self.schedule_save();
        }
        stats
    }

    async fn place_roster_alias(&self, candidate: &str, jid: &str) -> RosterPlacement {
        let candidate = canonical_alias(candidate);
        if !validate_alias(&candidate) {
            warn!(alias = %candidate, jid = %jid, "generated alias fails validation");
            return RosterPlacement::Invalid;
        }

        let mut entries = self.entries.write().await;

        // The JID may already be reachable under some alias
        if entries.values().any(|e| e.jid == jid) {
            return RosterPlacement::Skipped;
        }

        let target = match entries.get(&candidate) {
            None => candidate,
            Some(existing) if existing.origin == Origin::RosterAuto => candidate,
            Some(_) => {
                // Manual alias wins; retry once with a domain-qualified name
                let fallback = format!("{}-{}", candidate, first_domain_label(jid));
                if !validate_alias(&fallback) {
                    return RosterPlacement::Invalid;
                }
                match entries.get(&fallback) {
                    None => fallback,
                    Some(existing) if existing.origin == Origin::RosterAuto => fallback,
                    Some(_) => {
                        debug!(alias = %fallback, jid = %jid, "both candidate aliases taken");
                        return RosterPlacement::Skipped;
                    }
                }
            }
        };

        entries.insert(
            target.clone(),
            Entry {
                jid: jid.to_string(),
                origin: Origin::RosterAuto,
                extra: serde_json::Map::new(),
            },
        );
        debug!(alias = %target, jid = %jid, "added roster alias");
        RosterPlacement::Added
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Write the book to disk now (temp file + atomic rename).
    pub async fn persist_now(&self) -> Result<()> {
        let mut stored: Vec<StoredEntry> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(alias, entry)| StoredEntry {
                    alias: alias.clone(),
                    jid: entry.jid.clone(),
                    origin: entry.origin,
                    extra: entry.extra.clone(),
                })
                .collect()
        };
        stored.sort_by(|a, b| a.alias.cmp(&b.alias));

        let file = BookFile {
            version: FILE_VERSION,
            entries: stored,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| BridgeError::persistence(format!("serialize address book: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BridgeError::persistence(format!("create data dir: {}", e)))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| BridgeError::persistence(format!("write temp file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| BridgeError::persistence(format!("rename into place: {}", e)))?;

        debug!(path = %self.path.display(), "address book persisted");
        Ok(())
    }

    /// Signal the saver task. Never blocks the caller.
    fn schedule_save(&self) {
        let _ = self.save_tx.send(());
    }
}

/// Background saver: one save at a time, triggers arriving during a write
/// coalesce into a single trailing re-save.
async fn saver_loop(book: Weak<AddressBook>, mut rx: mpsc::UnboundedReceiver<()>) {
    while rx.recv().await.is_some() {
        while rx.try_recv().is_ok() {}
        let Some(book) = book.upgrade() else { break };
        if let Err(e) = book.persist_now().await {
            warn!(error = %e, "address book save failed, continuing in memory");
        }
    }
}

enum RosterPlacement {
    Added,
    Skipped,
    Invalid,
}

fn canonical_alias(alias: &str) -> String {
    alias.trim().to_lowercase()
}

fn canonical_jid(jid: &str) -> String {
    jid.trim().to_lowercase()
}

fn validate_alias(alias: &str) -> bool {
    let len = alias.chars().count();
    len >= 1 && len <= MAX_ALIAS_LEN && ALIAS_RE.is_match(alias)
}

fn validate_jid(jid: &str) -> bool {
    !jid.is_empty() && jid.chars().count() <= MAX_JID_LEN && JID_RE.is_match(jid)
}

/// Public JID shape check used by the dispatcher before enqueueing.
pub fn is_valid_jid(jid: &str) -> bool {
    validate_jid(&canonical_jid(jid))
}

/// Lower-case a display string into an alias: non-identifier runs become
/// single hyphens, leading/trailing hyphens are trimmed.
fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out.trim_matches(|c| c == '-' || c == '.' || c == '_')
        .to_string()
}

/// Derive an alias from the JID localpart.
///
/// Phone-number localparts (`+…`) become `phone<digits>`; a localpart with
/// no usable characters falls back to `contact-<hash>`.
fn alias_from_jid(jid: &str) -> String {
    let localpart = jid.split('@').next().unwrap_or_default().to_lowercase();

    if let Some(number) = localpart.strip_prefix('+') {
        let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return format!("phone{}", digits);
        }
    }

    let mut sanitized = String::with_capacity(localpart.len());
    for ch in localpart.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            sanitized.push(ch);
        } else {
            sanitized.push('-');
        }
    }
    let collapsed = collapse_dashes(&sanitized);
    let trimmed = collapsed.trim_matches('-');

    if trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
        trimmed.to_string()
    } else {
        let digest = Sha256::digest(jid.as_bytes());
        let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        format!("contact-{}", hex)
    }
}

fn first_domain_label(jid: &str) -> String {
    jid.split('@')
        .nth(1)
        .unwrap_or_default()
        .split('/')
        .next()
        .unwrap_or_default()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

fn collapse_dashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for ch in s.chars() {
        if ch == '-' {
            if !prev_dash {
                out.push('-');
            }
            prev_dash = true;
        } else {
            out.push(ch);
            prev_dash = false;
        }
    }
    out
}

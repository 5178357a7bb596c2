//! Track liveness, naming, song assignment and selection.

use crate::types::{SongRef, TrackId};
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub track_id: TrackId,
    pub last_seen_at_ms: u64,
    pub display_name: Option<String>,
    pub assigned_song: Option<SongRef>,
}

/// Registry of currently visible tracks.
///
/// Eviction drops the whole record, so a name or song assignment can never
/// outlive the track, and a stale track can never stay selected.
#[derive(Debug, Clone)]
pub struct TrackRegistry {
    tracks: BTreeMap<TrackId, TrackState>,
    selected: Option<TrackId>,
    stale_after_ms: u64,
}

impl TrackRegistry {
    pub fn new(stale_after_ms: u64) -> Self {
        Self {
            tracks: BTreeMap::new(),
            selected: None,
            stale_after_ms,
        }
    }

    /// Create-or-update the track's last-seen time.
    pub fn touch(&mut self, track_id: TrackId, now_ms: u64) {
        self.tracks
            .entry(track_id)
            .and_modify(|t| t.last_seen_at_ms = t.last_seen_at_ms.max(now_ms))
            .or_insert_with(|| TrackState {
                track_id,
                last_seen_at_ms: now_ms,
                display_name: None,
                assigned_song: None,
            });
    }

    /// Evict every track unseen for longer than the staleness window.
    /// Returns the evicted ids.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<TrackId> {
        let stale_after = self.stale_after_ms;
        let evicted: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| now_ms.saturating_sub(t.last_seen_at_ms) > stale_after)
            .map(|t| t.track_id)
            .collect();

        for id in &evicted {
            self.tracks.remove(id);
        }
        if let Some(sel) = self.selected {
            if !self.tracks.contains_key(&sel) {
                self.selected = None;
            }
        }
        if !evicted.is_empty() {
            debug!("Evicted stale tracks: {:?}", evicted);
        }
        evicted
    }

    /// Trimmed name; empty input removes the name. Returns false for
    /// unknown tracks.
    pub fn set_name(&mut self, track_id: TrackId, text: &str) -> bool {
        let Some(track) = self.tracks.get_mut(&track_id) else {
            return false;
        };
        let trimmed = text.trim();
        track.display_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        true
    }

    pub fn assign_song(&mut self, track_id: TrackId, song: SongRef) -> bool {
        match self.tracks.get_mut(&track_id) {
            Some(track) => {
                track.assigned_song = Some(song);
                true
            }
            None => false,
        }
    }

    /// Clears the assignment if the track holds one; otherwise a no-op.
    pub fn clear_song(&mut self, track_id: TrackId) -> bool {
        self.tracks
            .get_mut(&track_id)
            .and_then(|t| t.assigned_song.take())
            .is_some()
    }

    /// Selects a visible track. Unknown ids clear the selection.
    pub fn select(&mut self, track_id: Option<TrackId>) {
        self.selected = track_id.filter(|id| self.tracks.contains_key(id));
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<TrackId> {
        self.selected
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn display_name(&self, track_id: TrackId) -> Option<&str> {
        self.tracks
            .get(&track_id)
            .and_then(|t| t.display_name.as_deref())
    }

    pub fn label(&self, track_id: TrackId) -> String {
        match self.display_name(track_id) {
            Some(name) => name.to_string(),
            None => format!("#{}", track_id),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackState> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

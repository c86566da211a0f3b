//! Turns a presence snapshot into the ordered synthetic entries a viewer sees.

use std::sync::Arc;

use tracing::error;

use crate::config::TabConfig;
use crate::error::Result;
use crate::identity::IdentityGenerator;
use crate::models::{EntryKind, PresenceSnapshot, ServerRoster, SyntheticEntry};
use crate::template::{Arg, render};

const SPECTATOR: i32 = 3;

pub struct EntryGenerator {
    config: Arc<TabConfig>,
    identities: Arc<IdentityGenerator>,
}

impl EntryGenerator {
    pub fn new(config: Arc<TabConfig>, identities: Arc<IdentityGenerator>) -> Self {
        Self { config, identities }
    }

    pub fn identities(&self) -> &IdentityGenerator {
        &self.identities
    }

    /// Entries for every server except `viewer_server`. Never partial: any
    /// failure is logged and yields an empty sequence.
    pub fn generate(
        &self,
        viewer_server: Option<&str>,
        snapshot: &PresenceSnapshot,
        max_per_server: usize,
    ) -> Vec<SyntheticEntry> {
        match self.try_generate(viewer_server, snapshot, max_per_server) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to generate cross-server entries");
                Vec::new()
            }
        }
    }

    /// Same as [`generate`](Self::generate) but hands the failure back so
    /// callers can tell "nothing to show" from "could not build".
    pub fn try_generate(
        &self,
        viewer_server: Option<&str>,
        snapshot: &PresenceSnapshot,
        max_per_server: usize,
    ) -> Result<Vec<SyntheticEntry>> {
        let mut entries = Vec::new();

        if !self.config.separator_text.trim().is_empty() {
            let text = render(&self.config.separator_text, &[])?;
            entries.push(self.marker(EntryKind::Separator, "separator_start", text));
        }

        for roster in &snapshot.servers {
            if Some(roster.descriptor.name.as_str()) == viewer_server {
                continue;
            }
            self.push_server(&mut entries, roster, max_per_server)?;
        }

        if !self.config.end_marker_text.trim().is_empty() {
            let text = render(&self.config.end_marker_text, &[])?;
            entries.push(self.marker(EntryKind::Separator, "separator_end", text));
        }

        Ok(entries)
    }

    fn push_server(
        &self,
        entries: &mut Vec<SyntheticEntry>,
        roster: &ServerRoster,
        max_per_server: usize,
    ) -> Result<()> {
        let server = roster.descriptor.name.as_str();
        let count = roster.players.len();

        let header = render(
            &self.config.server_header_format,
            &[Arg::Text(server), Arg::Int(count as i64)],
        )?;
        entries.push(SyntheticEntry {
            kind: EntryKind::ServerHeader,
            identity: self.identities.header_identity(server),
            profile_name: String::new(),
            display: header,
            latency: 0,
            game_mode: SPECTATOR,
        });

        if self.config.show_server_status && !roster.online {
            let text = render(&self.config.status_format, &[Arg::Text("offline")])?;
            entries.push(self.marker(EntryKind::Status, &format!("status_{server}"), text));
        }

        if roster.players.is_empty() {
            let text = render(&self.config.empty_server_text, &[])?;
            entries.push(self.marker(
                EntryKind::EmptyServerMarker,
                &format!("empty_server_{server}"),
                text,
            ));
            return Ok(());
        }

        for player in roster.players.iter().take(max_per_server) {
            let display = render(
                &self.config.player_format,
                &[Arg::Text(player.name.as_str()), Arg::Text(server)],
            )?;
            entries.push(SyntheticEntry {
                kind: EntryKind::CrossServerPlayer,
                identity: self.identities.player_identity(&player.id, server),
                profile_name: player.name.to_string(),
                display,
                latency: player.latency,
                game_mode: player.game_mode,
            });
        }

        if count > max_per_server {
            let remaining = (count - max_per_server) as i64;
            let text = render(&self.config.more_players_format, &[Arg::Int(remaining)])?;
            entries.push(self.marker(
                EntryKind::OverflowMarker,
                &format!("more_players_{server}"),
                text,
            ));
        }

        Ok(())
    }

    fn marker(&self, kind: EntryKind, identifier: &str, display: String) -> SyntheticEntry {
        SyntheticEntry {
            kind,
            identity: self.identities.identity_for(identifier),
            profile_name: String::new(),
            display,
            latency: 0,
            game_mode: SPECTATOR,
        }
    }
}

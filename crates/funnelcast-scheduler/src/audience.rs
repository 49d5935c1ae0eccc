//! Audience resolution.

use std::collections::HashSet;

use funnelcast_core::error::Result;
use funnelcast_core::types::AudienceRule;
use funnelcast_db::{BotDb, Broadcast};

/// Resolve the current recipient set for a broadcast. A rule that matches
/// nobody is an empty `Ok`, meaning "nothing to send", not a failure.
/// Errors only surface when the store itself fails.
pub fn resolve(db: &BotDb, broadcast: &Broadcast) -> Result<Vec<i64>> {
    match &broadcast.audience {
        AudienceRule::All => db.all_user_ids(),
        AudienceRule::ByStages(stages) => {
            // Per-stage lookups concatenated, deduped by id, first
            // occurrence wins
            let mut seen = HashSet::new();
            let mut recipients = Vec::new();
            for stage in stages {
                for id in db.user_ids_by_stage(stage)? {
                    if seen.insert(id) {
                        recipients.push(id);
                    }
                }
            }
            Ok(recipients)
        }
    }
}

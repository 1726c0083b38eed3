//! Team Directory
//!
//! Maps source-local team identifiers (full names, site-specific short codes) onto the
//! canonical `TeamKey` enumeration. The directory is configuration: the built-in table
//! below covers the names and codes the upstream sites publish, and per-source aliases
//! from the config file take precedence over it.

use crate::consolidation::keys::{SourceKind, TeamKey, TeamRef};
use std::collections::HashMap;

/// Built-in aliases: franchise names and the short codes used in site URLs.
const BUILTIN_ALIASES: &[(&str, TeamKey)] = &[
    ("atlanta hawks", TeamKey::Atl),
    ("brooklyn nets", TeamKey::Bkn),
    ("brk", TeamKey::Bkn),
    ("boston celtics", TeamKey::Bos),
    ("charlotte hornets", TeamKey::Cha),
    ("cho", TeamKey::Cha),
    ("chicago bulls", TeamKey::Chi),
    ("cleveland cavaliers", TeamKey::Cle),
    ("dallas mavericks", TeamKey::Dal),
    ("denver nuggets", TeamKey::Den),
    ("detroit pistons", TeamKey::Det),
    ("golden state warriors", TeamKey::Gsw),
    ("gs", TeamKey::Gsw),
    ("houston rockets", TeamKey::Hou),
    ("indiana pacers", TeamKey::Ind),
    ("los angeles clippers", TeamKey::Lac),
    ("la clippers", TeamKey::Lac),
    ("los angeles lakers", TeamKey::Lal),
    ("memphis grizzlies", TeamKey::Mem),
    ("miami heat", TeamKey::Mia),
    ("milwaukee bucks", TeamKey::Mil),
    ("minnesota timberwolves", TeamKey::Min),
    ("new orleans pelicans", TeamKey::Nop),
    ("no", TeamKey::Nop),
    ("nor", TeamKey::Nop),
    ("new york knicks", TeamKey::Nyk),
    ("ny", TeamKey::Nyk),
    ("oklahoma city thunder", TeamKey::Okc),
    ("orlando magic", TeamKey::Orl),
    ("philadelphia 76ers", TeamKey::Phi),
    ("phoenix suns", TeamKey::Phx),
    ("pho", TeamKey::Phx),
    ("portland trail blazers", TeamKey::Por),
    ("sacramento kings", TeamKey::Sac),
    ("san antonio spurs", TeamKey::Sas),
    ("sa", TeamKey::Sas),
    ("toronto raptors", TeamKey::Tor),
    ("utah jazz", TeamKey::Uta),
    ("utah", TeamKey::Uta),
    ("washington wizards", TeamKey::Was),
    ("wsh", TeamKey::Was),
];

/// Resolves raw team identifiers to canonical keys.
#[derive(Debug, Clone)]
pub struct TeamDirectory {
    builtin: HashMap<String, TeamKey>,
    per_source: HashMap<SourceKind, HashMap<String, TeamKey>>,
}

impl Default for TeamDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl TeamDirectory {
    pub fn new() -> Self {
        let builtin = BUILTIN_ALIASES
            .iter()
            .map(|(alias, team)| (alias.to_string(), *team))
            .collect();
        Self {
            builtin,
            per_source: HashMap::new(),
        }
    }

    /// Register a source-specific alias. Aliases are matched case-insensitively.
    pub fn add_alias(&mut self, source: SourceKind, alias: &str, team: TeamKey) {
        self.per_source
            .entry(source)
            .or_default()
            .insert(fold(alias), team);
    }

    /// Lookup order: source aliases, canonical code, built-in aliases.
    pub fn resolve(&self, source: SourceKind, raw: &str) -> Option<TeamKey> {
        let folded = fold(raw);
        if folded.is_empty() {
            return None;
        }
        if let Some(team) = self
            .per_source
            .get(&source)
            .and_then(|aliases| aliases.get(&folded))
        {
            return Some(*team);
        }
        TeamKey::from_code(&folded).or_else(|| self.builtin.get(&folded).copied())
    }

    /// Resolve, keeping the raw text when resolution fails.
    pub fn reference(&self, source: SourceKind, raw: &str) -> TeamRef {
        match self.resolve(source, raw) {
            Some(team) => TeamRef::Known(team),
            None => TeamRef::Unresolved(raw.trim().to_string()),
        }
    }
}

fn fold(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_codes_names_and_site_codes() {
        let dir = TeamDirectory::new();
        assert_eq!(dir.resolve(SourceKind::Odds, "BOS"), Some(TeamKey::Bos));
        assert_eq!(
            dir.resolve(SourceKind::Odds, "Golden  State Warriors"),
            Some(TeamKey::Gsw)
        );
        assert_eq!(dir.resolve(SourceKind::Schedule, "wsh"), Some(TeamKey::Was));
        assert_eq!(dir.resolve(SourceKind::Schedule, "Seattle SuperSonics"), None);
        assert_eq!(dir.resolve(SourceKind::Schedule, "   "), None);
    }

    #[test]
    fn test_source_alias_takes_precedence() {
        let mut dir = TeamDirectory::new();
        dir.add_alias(SourceKind::Standings, "LA", TeamKey::Lal);
        assert_eq!(dir.resolve(SourceKind::Standings, "la"), Some(TeamKey::Lal));
        assert_eq!(dir.resolve(SourceKind::Odds, "la"), None);
        assert_eq!(
            dir.reference(SourceKind::Odds, " XYZ "),
            TeamRef::Unresolved("XYZ".to_string())
        );
    }
}

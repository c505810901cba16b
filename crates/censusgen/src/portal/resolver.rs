//! Maps free-text company names onto canonical portal ids.
//!
//! Lookup order, first hit wins:
//! 1. exact key in the alias table
//! 2. upper-cased key in the alias table
//! 3. fuzzy: strip legal-form noise, then test an ordered list of
//!    distinctive substrings

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::Config;
use crate::portal::registry::PortalRegistry;

static RE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-_]+").unwrap());

/// Tokens removed before fuzzy matching. `COMPANY` goes before `CO` so the
/// longer word is not left as `MPANY`.
const NOISE_TOKENS: &[&str] = &["COMPANY", "INSURANCE", "PJSC", "CO", "."];

/// Ordered (substring, canonical id) pairs for the fuzzy step. Multi-word
/// substrings use single spaces, matching the collapsed separators of the input.
const FUZZY_KEYS: &[(&str, &str)] = &[
    ("ADNIC", "ADNIC"),
    ("ABU DHABI NATIONAL", "ADNIC"),
    ("DAMAN", "DAMAN"),
    ("SAGR", "ALSAGR"),
    ("ITTIHAD", "ALITTHIHAD"),
    ("WATANIA", "WATANIATAKAFUL"),
    ("TAKAFUL", "TAKAFUL"),
    ("GIG", "GIG"),
    ("GULF GROUP", "GIG"),
    ("SUKOON", "SUKOON"),
    ("NLG", "NLG"),
    ("NATIONAL LIFE", "NLG"),
    ("AURA", "AURA"),
    ("MAXHEALTH", "MAXHEALTH"),
    ("MAX HEALTH", "MAXHEALTH"),
    ("DUBAI", "DUBAIINSURANCE"),
    ("ISON", "ISON"),
    ("IQ2", "IQ"),
    ("ALLIANZ", "ALLIANZ"),
    ("BUPA", "BUPA"),
    ("CIGNA", "CIGNA"),
    ("HANSE", "HANSE_MERKUR"),
    ("NOWHEALTH", "NOW_HEALTH"),
    ("NOW HEALTH", "NOW_HEALTH"),
    ("APRIL", "APRIL_INTERNATIONAL"),
    ("QATAR", "QATAR_INSURANCE"),
    ("ORIENT", "ORIENT"),
    ("MEDGULF", "MEDGULF"),
    ("UNION", "UNION"),
    ("RAK", "RAK"),
];

/// Built-in raw-name → canonical-id entries.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("Abu Dhabi National Insurance Company", "ADNIC"),
    ("Abu Dhabi National Insurance Co. PJSC", "ADNIC"),
    ("National Health Insurance Company - Daman", "DAMAN"),
    ("Daman Health", "DAMAN"),
    ("Gulf Insurance Group", "GIG"),
    ("GIG Gulf", "GIG"),
    ("Sukoon Insurance", "SUKOON"),
    ("Oman Insurance Company", "SUKOON"),
    ("National Life & General Insurance", "NLG"),
    ("IQ2 Health", "IQ"),
    ("IQ2Health", "IQ"),
    ("Aura Insurance", "AURA"),
    ("Max Health", "MAXHEALTH"),
    ("Dubai Insurance Company", "DUBAIINSURANCE"),
    ("Dubai Insurance", "DUBAIINSURANCE"),
    ("Ison", "ISON"),
    ("Allianz Care", "ALLIANZ"),
    ("Bupa Global", "BUPA"),
    ("Cigna Global", "CIGNA"),
    ("Hanse Merkur", "HANSE_MERKUR"),
    ("HanseMerkur", "HANSE_MERKUR"),
    ("Now Health International", "NOW_HEALTH"),
    ("Now Health", "NOW_HEALTH"),
    ("April International", "APRIL_INTERNATIONAL"),
    ("Qatar Insurance Company", "QATAR_INSURANCE"),
    ("Al Sagr National Insurance Company", "ALSAGR"),
    ("Al Ittihad Al Watani", "ALITTHIHAD"),
    ("Watania Takaful", "WATANIATAKAFUL"),
    ("Takaful Emarat", "TAKAFUL"),
    ("Union Insurance", "UNION"),
    ("Medgulf", "MEDGULF"),
    ("National General Insurance", "NGI"),
    ("Orient Insurance", "ORIENT"),
    ("RAK Insurance", "RAK"),
    ("Dubai National Insurance", "DNI"),
    ("Fidelity United", "FIDELITY"),
];

/// Raw-name → canonical-id lookup table.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    exact: HashMap<String, String>,
    upper: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table of known company names.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (raw, canonical) in BUILTIN_ALIASES {
            table.insert(raw, canonical);
        }
        table
    }

    /// Adds or replaces an entry. Later entries win.
    pub fn insert(&mut self, raw: &str, canonical: &str) {
        let raw = raw.trim();
        let canonical = canonical.trim().to_uppercase();
        self.upper.insert(raw.to_uppercase(), canonical.clone());
        self.exact.insert(raw.to_string(), canonical);
    }

    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (raw, canonical) in entries {
            self.insert(raw.as_ref(), canonical.as_ref());
        }
    }

    /// Runs the three lookup steps on an already-trimmed, non-empty name.
    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(id) = self.exact.get(name) {
            return Some(id.clone());
        }
        if let Some(id) = self.upper.get(&name.to_uppercase()) {
            return Some(id.clone());
        }
        fuzzy_match(name).map(str::to_string)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

fn fuzzy_match(name: &str) -> Option<&'static str> {
    let mut normalized = name.to_uppercase();
    for token in NOISE_TOKENS {
        normalized = normalized.replace(token, "");
    }
    let collapsed = RE_SEPARATORS.replace_all(&normalized, " ");
    let collapsed = collapsed.trim();
    if collapsed.is_empty() {
        return None;
    }

    FUZZY_KEYS
        .iter()
        .find(|(key, _)| collapsed.contains(key))
        .map(|(_, canonical)| *canonical)
}

/// How a requested portal name was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved to a canonical id that is not on the unimplemented list.
    /// It may still lack a registry entry.
    Canonical(String),
    /// Recognized insurer with no mapper.
    Unimplemented(String),
    /// Nothing matched, or the name was blank.
    Unknown,
}

/// Resolves requested names against an alias table and the registry's ids.
#[derive(Debug, Clone)]
pub struct PortalResolver {
    aliases: AliasTable,
    registered: HashSet<String>,
    unimplemented: HashSet<String>,
}

impl PortalResolver {
    /// Every registered and unimplemented id is also added as an alias of itself.
    pub fn new<R, U>(mut aliases: AliasTable, registered: R, unimplemented: U) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        U: IntoIterator,
        U::Item: AsRef<str>,
    {
        let registered: HashSet<String> = registered
            .into_iter()
            .map(|id| id.as_ref().trim().to_uppercase())
            .collect();
        let unimplemented: HashSet<String> = unimplemented
            .into_iter()
            .map(|id| id.as_ref().trim().to_uppercase())
            .collect();

        for id in registered.iter().chain(unimplemented.iter()) {
            aliases.insert(id, id);
        }

        Self {
            aliases,
            registered,
            unimplemented,
        }
    }

    /// Built-in aliases, overridden by config, over the registry's ids.
    pub fn from_config(config: &Config, registry: &PortalRegistry) -> Self {
        let mut aliases = AliasTable::builtin();
        aliases.extend(&config.aliases);
        Self::new(aliases, registry.known_ids(), &config.unimplemented)
    }

    pub fn classify(&self, raw: Option<&str>) -> Resolution {
        let name = match raw.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Resolution::Unknown,
        };

        match self.aliases.lookup(name) {
            Some(id) if !self.registered.contains(&id) && self.unimplemented.contains(&id) => {
                Resolution::Unimplemented(id)
            }
            Some(id) => Resolution::Canonical(id),
            None => Resolution::Unknown,
        }
    }

    /// Returns the canonical id, or `None` for unknown and unimplemented names.
    pub fn resolve(&self, raw: Option<&str>) -> Option<String> {
        match self.classify(raw) {
            Resolution::Canonical(id) => Some(id),
            Resolution::Unimplemented(id) => {
                log::warn!(
                    "Portal '{}' resolved to {}, but no mapper is implemented for it",
                    raw.unwrap_or_default(),
                    id
                );
                None
            }
            Resolution::Unknown => {
                log::warn!("Portal '{}' not recognized", raw.unwrap_or_default());
                None
            }
        }
    }

    pub fn is_registered(&self, canonical: &str) -> bool {
        self.registered.contains(canonical)
    }
}

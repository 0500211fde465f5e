//! Named download presets
//!
//! A preset is a flat set of downloader options, `format` being the one
//! the workers use. Presets come from `[preset:NAME]` sections of an INI
//! file or `[presets.NAME]` tables in TOML/YAML/JSON. Names are
//! case-insensitive.
//!
//! ```ini
//! [preset:DEFAULT]
//! format = bestvideo+bestaudio/best
//!
//! [preset:AUDIO]
//! format = bestaudio
//!
//! [preset:PODCAST]
//! _preset = AUDIO
//! ```
//!
//! Expansion:
//! 1. `_preset = OTHER` pulls in every option of OTHER the preset does not
//!    set itself, repeatedly, until no `_preset` is left
//! 2. The `default` preset then fills whatever is still missing
//!
//! A preset that references itself, directly or through others, is an error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Option naming another preset to inherit from
pub const BASE_KEY: &str = "_preset";

/// Preset applied when a request names none, and merged into every other
pub const DEFAULT_PRESET: &str = "default";

const SECTION_PREFIX: &str = "preset:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresetError {
    #[error("Preset '{preset}' extends unknown preset '{base}'")]
    UnknownBase { preset: String, base: String },

    #[error("Preset '{0}' extends itself")]
    Cycle(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Preset {
    options: BTreeMap<String, String>,
}

impl Preset {
    pub fn format(&self) -> Option<&str> {
        self.get("format")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Preset {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// `preset:audio` -> `audio`, for INI section names
pub fn section_name(section: &str) -> Option<String> {
    let (prefix, name) = section.split_at_checked(SECTION_PREFIX.len())?;
    (prefix.eq_ignore_ascii_case(SECTION_PREFIX) && !name.is_empty())
        .then(|| name.to_ascii_lowercase())
}

/// Resolve `_preset` references and merge the default preset into every
/// preset. Preset names and option keys of the result are lowercase.
pub fn expand(raw: BTreeMap<String, Preset>) -> Result<BTreeMap<String, Preset>, PresetError> {
    let raw: BTreeMap<String, Preset> = raw
        .into_iter()
        .map(|(name, preset)| {
            let options = preset
                .options
                .into_iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), value));
            (name.to_ascii_lowercase(), options.collect())
        })
        .collect();

    raw.keys()
        .map(|name| expand_one(&raw, name).map(|preset| (name.clone(), preset)))
        .collect()
}

fn expand_one(raw: &BTreeMap<String, Preset>, name: &str) -> Result<Preset, PresetError> {
    let mut options = raw.get(name).map(|p| p.options.clone()).unwrap_or_default();
    let mut seen = BTreeSet::from([name.to_string()]);

    inherit(raw, name, &mut options, &mut seen)?;

    if name != DEFAULT_PRESET {
        if let Some(default) = raw.get(DEFAULT_PRESET) {
            merge_missing(&mut options, &default.options);
            // A fresh chain: the default may extend a preset already inherited
            let mut seen = BTreeSet::from([name.to_string(), DEFAULT_PRESET.to_string()]);
            inherit(raw, name, &mut options, &mut seen)?;
        }
    }

    Ok(Preset { options })
}

fn inherit(
    raw: &BTreeMap<String, Preset>,
    name: &str,
    options: &mut BTreeMap<String, String>,
    seen: &mut BTreeSet<String>,
) -> Result<(), PresetError> {
    while let Some(base) = options.remove(BASE_KEY) {
        let base = base.trim().to_ascii_lowercase();
        let Some(parent) = raw.get(&base) else {
            return Err(PresetError::UnknownBase {
                preset: name.to_string(),
                base,
            });
        };
        if !seen.insert(base) {
            return Err(PresetError::Cycle(name.to_string()));
        }
        merge_missing(options, &parent.options);
    }
    Ok(())
}

fn merge_missing(options: &mut BTreeMap<String, String>, from: &BTreeMap<String, String>) {
    for (key, value) in from {
        options.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

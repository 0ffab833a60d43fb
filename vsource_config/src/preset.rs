//! Preset catalog with `base` inheritance.
//!
//! A catalog holds named harvester and source presets as raw TOML tables.
//! Resolving a preset walks its `base` chain with a visited set, overlays
//! child keys over base keys and stops at the `neutral` root.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use eyre::WrapErr;
use toml::{Table, Value};

use crate::error::ConfigError;
use crate::harvester::HarvesterConfig;
use crate::source::VirtualSourceConfig;

/// Root preset every chain ends at.
pub const NEUTRAL: &str = "neutral";

const BUILTIN_CATALOG: &str = include_str!("../presets/builtin.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetKind {
    Harvester,
    Source,
}

impl PresetKind {
    /// Top-level TOML table holding presets of this kind.
    pub const fn section(self) -> &'static str {
        match self {
            Self::Harvester => "harvesters",
            Self::Source => "sources",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Harvester => "harvester",
            Self::Source => "source",
        }
    }
}

/// A flattened preset: all inherited keys merged, `base` removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub name: String,
    /// Preset names from the requested one down to `neutral`.
    pub chain: Vec<String>,
    pub values: Table,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    harvesters: BTreeMap<String, Table>,
    sources: BTreeMap<String, Table>,
}

impl Catalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> eyre::Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG).wrap_err("builtin preset catalog")
    }

    /// Parse a catalog document with `[harvesters.<name>]` / `[sources.<name>]` tables.
    pub fn from_toml_str(text: &str) -> eyre::Result<Self> {
        let root: Table = toml::from_str(text).wrap_err("parse preset catalog")?;
        let mut catalog = Self::default();
        for kind in [PresetKind::Harvester, PresetKind::Source] {
            let Some(section) = root.get(kind.section()) else {
                continue;
            };
            let Value::Table(entries) = section else {
                return Err(eyre::Report::new(ConfigError::Invalid {
                    kind: kind.label(),
                    name: kind.section().to_owned(),
                    reason: "expected a table of presets".to_owned(),
                }));
            };
            for (name, preset) in entries {
                let Value::Table(table) = preset else {
                    return Err(eyre::Report::new(ConfigError::Invalid {
                        kind: kind.label(),
                        name: name.clone(),
                        reason: "preset must be a table".to_owned(),
                    }));
                };
                catalog.map_mut(kind).insert(name.clone(), table.clone());
            }
        }
        Ok(catalog)
    }

    /// Builtin catalog with the presets of `path` layered on top.
    pub fn load_file(path: &Path) -> eyre::Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("read preset catalog {}", path.display()))?;
        let user = Self::from_toml_str(&text)
            .wrap_err_with(|| format!("preset catalog {}", path.display()))?;
        let mut catalog = Self::builtin()?;
        catalog.merge(user);
        Ok(catalog)
    }

    /// Add or replace presets from `other`.
    pub fn merge(&mut self, other: Self) {
        self.harvesters.extend(other.harvesters);
        self.sources.extend(other.sources);
    }

    pub fn names(&self, kind: PresetKind) -> impl Iterator<Item = &str> {
        self.map(kind).keys().map(String::as_str)
    }

    pub fn get(&self, kind: PresetKind, name: &str) -> Option<&Table> {
        self.map(kind).get(name)
    }

    /// Resolve a named preset of the catalog.
    pub fn resolve(&self, kind: PresetKind, name: &str) -> eyre::Result<Resolved> {
        let setting = self.get(kind, name).ok_or_else(|| {
            eyre::Report::new(ConfigError::UnknownPreset {
                kind: kind.label(),
                name: name.to_owned(),
            })
        })?;
        self.resolve_table(kind, name, setting)
    }

    /// Resolve an ad-hoc preset table (labelled `origin`) against this catalog.
    pub fn resolve_table(
        &self,
        kind: PresetKind,
        origin: &str,
        setting: &Table,
    ) -> eyre::Result<Resolved> {
        let mut chain = vec![origin.to_owned()];
        let mut visited: HashSet<String> = HashSet::from([origin.to_owned()]);
        let mut layers = vec![setting];
        let mut current = setting;
        let mut current_name = origin;

        while current_name != NEUTRAL {
            let base = match current.get("base") {
                None => NEUTRAL,
                Some(Value::String(base)) => base.as_str(),
                Some(_) => {
                    return Err(eyre::Report::new(ConfigError::InvalidBase {
                        preset: current_name.to_owned(),
                    }));
                }
            };
            if !visited.insert(base.to_owned()) {
                return Err(eyre::Report::new(ConfigError::InheritanceCycle {
                    name: base.to_owned(),
                    chain: chain.join(" -> "),
                }));
            }
            let table = self.get(kind, base).ok_or_else(|| {
                eyre::Report::new(ConfigError::UnknownPreset {
                    kind: kind.label(),
                    name: base.to_owned(),
                })
            })?;
            chain.push(base.to_owned());
            layers.push(table);
            current = table;
            current_name = base;
        }

        let mut values = Table::new();
        for layer in layers.iter().rev() {
            for (key, value) in layer.iter() {
                if key != "base" {
                    values.insert(key.clone(), value.clone());
                }
            }
        }
        tracing::debug!(
            kind = kind.label(),
            preset = origin,
            chain = %chain.join(" -> "),
            "preset resolved"
        );
        Ok(Resolved {
            name: origin.to_owned(),
            chain,
            values,
        })
    }

    /// Resolve and validate a harvester preset.
    pub fn harvester(&self, name: &str) -> eyre::Result<HarvesterConfig> {
        HarvesterConfig::from_resolved(&self.resolve(PresetKind::Harvester, name)?)
    }

    /// Resolve and validate a virtual source preset.
    pub fn source(&self, name: &str) -> eyre::Result<VirtualSourceConfig> {
        VirtualSourceConfig::from_resolved(&self.resolve(PresetKind::Source, name)?)
    }

    fn map(&self, kind: PresetKind) -> &BTreeMap<String, Table> {
        match kind {
            PresetKind::Harvester => &self.harvesters,
            PresetKind::Source => &self.sources,
        }
    }

    fn map_mut(&mut self, kind: PresetKind) -> &mut BTreeMap<String, Table> {
        match kind {
            PresetKind::Harvester => &mut self.harvesters,
            PresetKind::Source => &mut self.sources,
        }
    }
}

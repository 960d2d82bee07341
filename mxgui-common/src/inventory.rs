//! Mixer inventory
//!
//! The inventory is a YAML document listing every mixer the bootstrapper
//! should try to reach:
//!
//! ```yaml
//! Mixers:
//!   - name: "Studio A"
//!     main: "10.0.0.10"
//!     backup: "10.0.0.11"
//!     type: "MC2_96"
//! ```
//!
//! It is loaded once at startup and never mutated. Any problem reading or
//! parsing it is fatal for the run.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Console model of a mixer
///
/// Determines which configuration fragment the mixer is registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "MC2_96")]
    Mc96,
    #[serde(rename = "MC2_56_MKii")]
    Mc56Mk2,
    #[serde(rename = "MC2_36")]
    Mc36,
}

impl ModelType {
    /// Every model, in the order fragments are emitted
    pub const ALL: [ModelType; 3] = [ModelType::Mc96, ModelType::Mc56Mk2, ModelType::Mc36];

    /// Value used for this model in the inventory file
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Mc96 => "MC2_96",
            ModelType::Mc56Mk2 => "MC2_56_MKii",
            ModelType::Mc36 => "MC2_36",
        }
    }

    /// Directory of this model inside an appliance config share
    pub fn config_dir(self) -> &'static str {
        match self {
            ModelType::Mc96 => "mc96",
            ModelType::Mc56Mk2 => "mc56_mk2",
            ModelType::Mc36 => "mc36_40",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured console endpoint
///
/// Identity is `name`. Field names on disk follow the inventory format
/// (`main`, `backup`, `type`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mixer {
    pub name: String,
    #[serde(rename = "main")]
    pub primary_address: String,
    #[serde(rename = "backup", default)]
    pub backup_address: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
}

/// Characters with meaning inside a double-quoted Tcl word
const TCL_SPECIAL: [char; 7] = ['"', '[', ']', '$', '\\', '{', '}'];

impl Mixer {
    pub fn new(
        name: impl Into<String>,
        primary_address: impl Into<String>,
        backup_address: impl Into<String>,
        model_type: ModelType,
    ) -> Self {
        Self {
            name: name.into(),
            primary_address: primary_address.into(),
            backup_address: backup_address.into(),
            model_type,
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::InventoryMalformed(format!(
                "mixer #{} has an empty name",
                index + 1
            )));
        }
        // The name becomes a directory under the user share and is quoted
        // inside the gui_hosts.tcl fragment.
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::InventoryMalformed(format!(
                "mixer name {:?} is not usable as a folder name",
                self.name
            )));
        }
        for (field, value) in [
            ("name", &self.name),
            ("main", &self.primary_address),
            ("backup", &self.backup_address),
        ] {
            if let Some(c) = value.chars().find(|c| TCL_SPECIAL.contains(c) || c.is_control()) {
                return Err(Error::InventoryMalformed(format!(
                    "mixer {:?}: field `{}` contains {:?}",
                    self.name, field, c
                )));
            }
        }
        if self.primary_address.trim().is_empty() {
            return Err(Error::InventoryMalformed(format!(
                "mixer {:?} has no primary (main) address",
                self.name
            )));
        }
        if self.backup_address.trim().is_empty() {
            warn!("Mixer {} has no backup address", self.name);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(rename = "Mixers", default)]
    mixers: Option<Vec<Mixer>>,
}

/// Ordered, read-only list of mixers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    mixers: Vec<Mixer>,
}

impl Inventory {
    /// Build an inventory from already-parsed records, validating each one
    ///
    /// Duplicate names are reported but kept: the live-set aggregation
    /// deduplicates by name, so a duplicated record can never be registered
    /// twice.
    pub fn from_mixers(mixers: Vec<Mixer>) -> Result<Self> {
        for (index, mixer) in mixers.iter().enumerate() {
            mixer.validate(index)?;
        }

        let inventory = Self { mixers };
        for name in inventory.duplicate_names() {
            warn!("Inventory lists mixer {} more than once", name);
        }
        Ok(inventory)
    }

    /// Parse an inventory from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(Error::InventoryMalformed("inventory file is empty".to_string()));
        }
        let file: InventoryFile = serde_yaml::from_str(content)
            .map_err(|e| Error::InventoryMalformed(e.to_string()))?;
        Self::from_mixers(file.mixers.unwrap_or_default())
    }

    /// Read and parse the inventory file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading inventory {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| Error::InventoryUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let inventory = Self::from_yaml_str(&content)?;
        info!(
            mixers = inventory.len(),
            "Successfully read inventory {}",
            path.display()
        );
        Ok(inventory)
    }

    pub fn mixers(&self) -> &[Mixer] {
        &self.mixers
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mixer> {
        self.mixers.iter()
    }

    pub fn len(&self) -> usize {
        self.mixers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mixers.is_empty()
    }

    /// Mixers of one model, in inventory order
    pub fn by_model(&self, model: ModelType) -> impl Iterator<Item = &Mixer> {
        self.mixers.iter().filter(move |m| m.model_type == model)
    }

    /// First mixer with the given name
    pub fn get(&self, name: &str) -> Option<&Mixer> {
        self.mixers.iter().find(|m| m.name == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names that occur more than once, each reported once
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();
        for mixer in &self.mixers {
            if !seen.insert(mixer.name.as_str()) && reported.insert(mixer.name.as_str()) {
                duplicates.push(mixer.name.as_str());
            }
        }
        duplicates
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a Mixer;
    type IntoIter = std::slice::Iter<'a, Mixer>;

    fn into_iter(self) -> Self::IntoIter {
        self.mixers.iter()
    }
}

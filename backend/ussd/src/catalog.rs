//! Donation campaigns offered on the USSD menu.
//!
//! The catalog is read-only for the lifetime of the process. It is either
//! loaded from a JSON file (`CATALOG_PATH`) or falls back to the built-in
//! campaign list.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{GatewayError, Result};
use crate::locale::Locale;

/// Text keyed by locale code, e.g. `{"en": "Clean water", "sw": "Maji safi"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(code, text)| (code.to_string(), text.to_string()))
                .collect(),
        )
    }

    /// Text for `locale`, else English, else whichever entry exists.
    /// Blank entries are skipped.
    pub fn get(&self, locale: Locale) -> &str {
        let usable = |code: &str| self.0.get(code).filter(|text| !text.trim().is_empty());
        usable(locale.code())
            .or_else(|| usable(Locale::En.code()))
            .or_else(|| self.0.values().find(|text| !text.trim().is_empty()))
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn is_blank(&self) -> bool {
        self.0.values().all(|text| text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// On-chain project identifier.
    pub id: u64,
    pub name: LocalizedText,
    pub description: LocalizedText,
    pub location: LocalizedText,
    /// Target funding amount.
    pub goal: u64,
    /// Amount raised so far.
    pub raised: u64,
}

impl Project {
    /// Whole-percent progress towards the goal. A zero goal reports 0.
    pub fn funding_percent(&self) -> u64 {
        if self.goal == 0 {
            return 0;
        }
        self.raised.saturating_mul(100) / self.goal
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    projects: Vec<Project>,
}

impl Catalog {
    pub fn new(projects: Vec<Project>) -> Result<Self> {
        for (i, project) in projects.iter().enumerate() {
            for (field, text) in [
                ("name", &project.name),
                ("description", &project.description),
                ("location", &project.location),
            ] {
                if text.is_blank() {
                    return Err(GatewayError::Catalog(format!(
                        "project {} has no {field}",
                        project.id
                    )));
                }
            }
            if projects[..i].iter().any(|p| p.id == project.id) {
                return Err(GatewayError::Catalog(format!(
                    "duplicate project id {}",
                    project.id
                )));
            }
        }
        Ok(Self { projects })
    }

    /// Load a catalog from a JSON array of projects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&raw)?;
        info!(
            "Loaded {} projects from {}",
            catalog.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let projects: Vec<Project> = serde_json::from_str(raw)?;
        Self::new(projects)
    }

    /// The campaigns shipped with the gateway.
    pub fn builtin() -> Self {
        Self {
            projects: vec![
                Project {
                    id: 1,
                    name: LocalizedText::new(&[
                        ("en", "Clean Water Well"),
                        ("fr", "Puits d'eau potable"),
                        ("sw", "Kisima cha Maji Safi"),
                    ]),
                    description: LocalizedText::new(&[
                        ("en", "A borehole serving 400 households."),
                        ("fr", "Un forage pour 400 foyers."),
                        ("sw", "Kisima kwa kaya 400."),
                    ]),
                    location: LocalizedText::new(&[("en", "Kisumu")]),
                    goal: 500_000,
                    raised: 315_000,
                },
                Project {
                    id: 2,
                    name: LocalizedText::new(&[
                        ("en", "School Solar Lights"),
                        ("fr", "Lampes solaires scolaires"),
                        ("sw", "Taa za Sola Shuleni"),
                    ]),
                    description: LocalizedText::new(&[
                        ("en", "Solar lamps so pupils can study after dark."),
                        ("fr", "Des lampes solaires pour étudier le soir."),
                        ("sw", "Taa za sola kwa wanafunzi kusoma usiku."),
                    ]),
                    location: LocalizedText::new(&[("en", "Nakuru")]),
                    goal: 200_000,
                    raised: 48_000,
                },
                Project {
                    id: 3,
                    name: LocalizedText::new(&[
                        ("en", "Mangrove Replanting"),
                        ("fr", "Replantation de mangroves"),
                        ("sw", "Upandaji wa Mikoko"),
                    ]),
                    description: LocalizedText::new(&[
                        ("en", "10,000 seedlings along the coast."),
                        ("fr", "10 000 plants le long de la côte."),
                        ("sw", "Miche 10,000 pwani."),
                    ]),
                    location: LocalizedText::new(&[("en", "Mombasa")]),
                    goal: 300_000,
                    raised: 0,
                },
            ],
        }
    }

    /// Zero-based lookup.
    pub fn get(&self, index: usize) -> Option<&Project> {
        self.projects.get(index)
    }

    pub fn find(&self, id: u64) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

//! Canonical hazard categories and the tables that map raw codes onto them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::HazardValue;

pub const UNCLASSIFIED: &str = "unclassified";

/// A `#RRGGBB` display color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    pub fn hex(hex: &str) -> Self {
        Color(hex.to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw key a category is matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum CategoryCode {
    Grid(i64),
    Level(String),
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySpec {
    pub code: CategoryCode,
    pub canonical_label: String,
    pub display_label: String,
    pub color: Color,
    /// Legend and plot order, ascending severity.
    pub rank: u32,
}

impl CategorySpec {
    fn new(code: CategoryCode, canonical_label: &str, display_label: &str, color: &str, rank: u32) -> Self {
        Self {
            code,
            canonical_label: canonical_label.to_string(),
            display_label: display_label.to_string(),
            color: Color::hex(color),
            rank,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.code == CategoryCode::Unclassified
    }
}

/// Number of levels in a drought table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroughtTiers {
    /// Faible / Moyen / Fort.
    Three,
    /// Nul / Faible / Moyen / Fort.
    Four,
}

#[derive(Debug, Clone)]
pub struct MappingTable {
    name: String,
    entries: Vec<CategorySpec>,
    unclassified: CategorySpec,
}

impl MappingTable {
    /// Builds a table, rejecting duplicate codes, labels, colors or ranks.
    pub fn new(name: &str, entries: Vec<CategorySpec>) -> Result<Self> {
        let invalid = |reason: String| PipelineError::InvalidMapping {
            table: name.to_string(),
            reason,
        };

        let mut codes = HashSet::new();
        let mut labels = HashSet::new();
        let mut colors = HashSet::new();
        let mut ranks = HashSet::new();
        for entry in &entries {
            if entry.is_unclassified() || entry.canonical_label == UNCLASSIFIED {
                return Err(invalid("the unclassified category is implicit".to_string()));
            }
            if !codes.insert(entry.code.clone()) {
                return Err(invalid(format!("duplicate code {:?}", entry.code)));
            }
            if !labels.insert(entry.canonical_label.as_str()) {
                return Err(invalid(format!("duplicate label '{}'", entry.canonical_label)));
            }
            if !colors.insert(entry.color.clone()) {
                return Err(invalid(format!("duplicate color {}", entry.color)));
            }
            if !ranks.insert(entry.rank) {
                return Err(invalid(format!("duplicate rank {}", entry.rank)));
            }
        }

        Ok(Self::builtin(name, entries))
    }

    fn builtin(name: &str, mut entries: Vec<CategorySpec>) -> Self {
        entries.sort_by_key(|e| e.rank);
        let next_rank = entries.last().map(|e| e.rank + 1).unwrap_or(0);
        Self {
            name: name.to_string(),
            entries,
            unclassified: CategorySpec::new(
                CategoryCode::Unclassified,
                UNCLASSIFIED,
                "Non classé",
                "#BDBDBD",
                next_rank,
            ),
        }
    }

    /// Groundwater grid codes 0/1/2.
    pub fn flood_grid() -> Self {
        Self::builtin(
            "flood_grid",
            vec![
                CategorySpec::new(CategoryCode::Grid(0), "no-risk", "Pas de risque (Nappe/Cave)", "#4CAF50", 0),
                CategorySpec::new(CategoryCode::Grid(1), "groundwater-rise", "Aléa Débordement de Nappe", "#FFC107", 1),
                CategorySpec::new(CategoryCode::Grid(2), "cellar-flood", "Aléa Inondation de Cave", "#2196F3", 2),
            ],
        )
    }

    /// Drought `ALEA` levels.
    pub fn drought_levels(tiers: DroughtTiers) -> Self {
        let level = |s: &str| CategoryCode::Level(s.to_string());
        let mut entries = Vec::with_capacity(4);
        let offset = match tiers {
            DroughtTiers::Four => {
                entries.push(CategorySpec::new(level("Nul"), "none", "Pas de risque (Nul)", "#E8F5E9", 0));
                1
            }
            DroughtTiers::Three => 0,
        };
        entries.push(CategorySpec::new(level("Faible"), "low", "Risque faible", "#4CAF50", offset));
        entries.push(CategorySpec::new(level("Moyen"), "medium", "Risque moyen", "#FFC107", offset + 1));
        entries.push(CategorySpec::new(level("Fort"), "high", "Risque fort", "#F44336", offset + 2));

        let name = match tiers {
            DroughtTiers::Three => "drought_levels_3",
            DroughtTiers::Four => "drought_levels_4",
        };
        Self::builtin(name, entries)
    }

    /// `zone_niveau` of pre-joined drought transactions, 0 (very low) to 3 (very high).
    pub fn drought_zones() -> Self {
        Self::builtin(
            "drought_zones",
            vec![
                CategorySpec::new(CategoryCode::Grid(0), "very-low", "Très faible", "#4CAF50", 0),
                CategorySpec::new(CategoryCode::Grid(1), "low", "Faible", "#FFC107", 1),
                CategorySpec::new(CategoryCode::Grid(2), "high", "Fort", "#F44336", 2),
                CategorySpec::new(CategoryCode::Grid(3), "very-high", "Très fort", "#B71C1C", 3),
            ],
        )
    }

    /// Continuous share datasets carry no discrete categories.
    pub fn share() -> Self {
        Self::builtin("hazard_share", Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table categories in rank order, without the unclassified bucket.
    pub fn categories(&self) -> &[CategorySpec] {
        &self.entries
    }

    pub fn unclassified(&self) -> &CategorySpec {
        &self.unclassified
    }

    /// Categories followed by the unclassified bucket.
    pub fn all(&self) -> impl Iterator<Item = &CategorySpec> {
        self.entries.iter().chain(std::iter::once(&self.unclassified))
    }

    pub fn classify(&self, value: &HazardValue) -> CategorySpec {
        let found = match value {
            HazardValue::Code(code) => self
                .entries
                .iter()
                .find(|e| e.code == CategoryCode::Grid(*code)),
            HazardValue::Level(level) => {
                let level = level.trim();
                self.entries.iter().find(|e| match &e.code {
                    CategoryCode::Level(l) => l.eq_ignore_ascii_case(level),
                    _ => false,
                })
            }
            HazardValue::Share(_) | HazardValue::Unparsed => None,
        };
        found.unwrap_or(&self.unclassified).clone()
    }
}

/// Maps a raw cell onto the table's canonical category.
///
/// Integer-looking text is tried as a grid code first, anything else as a
/// level. Values outside the table land in the unclassified bucket.
pub fn normalize(raw: &str, table: &MappingTable) -> CategorySpec {
    let raw = raw.trim();
    if let Some(code) = parse_grid_code(raw) {
        let category = table.classify(&HazardValue::Code(code));
        if !category.is_unclassified() {
            return category;
        }
    }
    table.classify(&HazardValue::Level(raw.to_string()))
}

/// Accepts `2` as well as `2.0`, which is how float-typed exports write codes.
pub fn parse_grid_code(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(code) = raw.parse::<i64>() {
        return Some(code);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
        _ => None,
    }
}

/// Join keys of pre-joined flood transaction tables (`Risque_innond`).
///
/// Older exports carry the long zone descriptions, newer ones the short labels.
pub fn flood_label_keys() -> HashMap<String, CategorySpec> {
    let table = MappingTable::flood_grid();
    [
        ("Pas de débordement de nappe ni d'inondation de cave", 0),
        ("Zones potentiellement sujettes aux débordements de nappe", 1),
        ("Zones potentiellement sujettes aux inondations de cave", 2),
        ("Pas de risques", 0),
        ("Débordements de nappe", 1),
        ("Inondations de cave", 2),
    ]
    .into_iter()
    .map(|(label, code)| (label.to_string(), table.classify(&HazardValue::Code(code))))
    .collect()
}

/// Join keys of pre-joined drought transaction tables (`zone_niveau` 0 to 3).
pub fn drought_zone_keys() -> HashMap<String, CategorySpec> {
    MappingTable::drought_zones()
        .categories()
        .iter()
        .filter_map(|c| match c.code {
            CategoryCode::Grid(code) => Some((code.to_string(), c.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_codes_map_to_ordered_categories() {
        let table = MappingTable::flood_grid();
        let labels: Vec<(String, u32)> = (0..3)
            .map(|code| {
                let c = table.classify(&HazardValue::Code(code));
                (c.canonical_label, c.rank)
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                ("no-risk".to_string(), 0),
                ("groundwater-rise".to_string(), 1),
                ("cellar-flood".to_string(), 2)
            ]
        );
    }

    #[test]
    fn out_of_domain_code_is_unclassified() {
        let table = MappingTable::flood_grid();
        let category = normalize("7", &table);
        assert!(category.is_unclassified());
        assert_eq!(category.canonical_label, UNCLASSIFIED);
        assert_eq!(category.rank, 3);
    }

    #[test]
    fn float_text_codes_are_accepted() {
        let table = MappingTable::flood_grid();
        assert_eq!(normalize("2.0", &table).canonical_label, "cellar-flood");
        assert_eq!(parse_grid_code(" 1 "), Some(1));
        assert_eq!(parse_grid_code("1.5"), None);
        assert_eq!(parse_grid_code("abc"), None);
    }

    #[test]
    fn drought_levels_match_loosely() {
        let table = MappingTable::drought_levels(DroughtTiers::Four);
        assert_eq!(normalize(" fort ", &table).canonical_label, "high");
        assert_eq!(normalize("Nul", &table).rank, 0);
        assert!(normalize("Extrême", &table).is_unclassified());
    }

    #[test]
    fn three_tier_table_has_no_null_level() {
        let table = MappingTable::drought_levels(DroughtTiers::Three);
        let labels: Vec<&str> = table.categories().iter().map(|c| c.canonical_label.as_str()).collect();
        assert_eq!(labels, vec!["low", "medium", "high"]);
        assert!(normalize("Nul", &table).is_unclassified());
        assert_eq!(table.unclassified().rank, 3);
    }

    #[test]
    fn builtin_tables_satisfy_invariants() {
        for table in [
            MappingTable::flood_grid(),
            MappingTable::drought_levels(DroughtTiers::Three),
            MappingTable::drought_levels(DroughtTiers::Four),
            MappingTable::drought_zones(),
        ] {
            let rebuilt = MappingTable::new(table.name(), table.categories().to_vec());
            assert!(rebuilt.is_ok(), "{} failed validation", table.name());
        }
    }

    #[test]
    fn duplicate_ranks_are_rejected() {
        let mut entries = MappingTable::flood_grid().categories().to_vec();
        entries[1].rank = 0;
        let err = MappingTable::new("broken", entries).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMapping { .. }));
    }

    #[test]
    fn duplicate_colors_are_rejected() {
        let mut entries = MappingTable::flood_grid().categories().to_vec();
        entries[2].color = Color::hex("#4caf50");
        assert!(MappingTable::new("broken", entries).is_err());
    }

    #[test]
    fn colors_are_uppercased() {
        assert_eq!(Color::hex("#2196f3").as_str(), "#2196F3");
    }

    #[test]
    fn transaction_join_tables() {
        let flood = flood_label_keys();
        assert_eq!(
            flood["Zones potentiellement sujettes aux inondations de cave"].canonical_label,
            "cellar-flood"
        );
        assert_eq!(flood["Inondations de cave"], flood["Zones potentiellement sujettes aux inondations de cave"]);
        assert_eq!(flood["Débordements de nappe"].rank, 1);
        assert_eq!(flood["Pas de risques"].canonical_label, "no-risk");

        let drought = drought_zone_keys();
        assert_eq!(drought.len(), 4);
        assert_eq!(drought["0"].canonical_label, "very-low");
        assert_eq!(drought["0"].color, Color::hex("#4CAF50"));
        assert_eq!(drought["3"].canonical_label, "very-high");
    }
}

//! Kinds of game content whose size counts against a world's quota

use serde::{Deserialize, Serialize};

/// The type half of a stored entity's key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EntityType {
    Aspect,
    Caste,
    Character,
    Comment,
    Customization,
    Education,
    Item,
    Language,
    Lineage,
    Nature,
    Party,
    Personality,
    Talent,
    World,
}

impl EntityType {
    pub const ALL: [EntityType; 14] = [
        EntityType::Aspect,
        EntityType::Caste,
        EntityType::Character,
        EntityType::Comment,
        EntityType::Customization,
        EntityType::Education,
        EntityType::Item,
        EntityType::Language,
        EntityType::Lineage,
        EntityType::Nature,
        EntityType::Party,
        EntityType::Personality,
        EntityType::Talent,
        EntityType::World,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Aspect => "Aspect",
            EntityType::Caste => "Caste",
            EntityType::Character => "Character",
            EntityType::Comment => "Comment",
            EntityType::Customization => "Customization",
            EntityType::Education => "Education",
            EntityType::Item => "Item",
            EntityType::Language => "Language",
            EntityType::Lineage => "Lineage",
            EntityType::Nature => "Nature",
            EntityType::Party => "Party",
            EntityType::Personality => "Personality",
            EntityType::Talent => "Talent",
            EntityType::World => "World",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    /// Case-insensitive, so `comment` and `Comment` both parse
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

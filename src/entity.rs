//! Administrative hierarchy and reporting periods
//!
//! Schools roll up into circuits, circuits into districts, districts into
//! regions. Statistics are requested for one entity at one of those levels
//! over an optional year / term / week.

use crate::error::StatsError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Level of the school hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    School,
    Circuit,
    District,
    Region,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::School,
        EntityType::Circuit,
        EntityType::District,
        EntityType::Region,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Circuit => "circuit",
            Self::District => "district",
            Self::Region => "region",
        }
    }

    /// The level directly above this one, if any
    pub fn parent(&self) -> Option<EntityType> {
        match self {
            Self::School => Some(Self::Circuit),
            Self::Circuit => Some(Self::District),
            Self::District => Some(Self::Region),
            Self::Region => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "school" | "schools" => Ok(Self::School),
            "circuit" | "circuits" => Ok(Self::Circuit),
            "district" | "districts" => Ok(Self::District),
            "region" | "regions" => Ok(Self::Region),
            _ => Err(StatsError::InvalidEntity(s.to_string())),
        }
    }
}

/// One entity in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityScope {
    pub entity_type: EntityType,
    pub id: i64,
}

impl EntityScope {
    pub fn new(entity_type: EntityType, id: i64) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for EntityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.id)
    }
}

/// Reporting period filter. `None` means every value.
///
/// Query strings send unset filters as empty values (`?year=&term=`), so an
/// empty or blank field also means every value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub term: Option<u8>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub week: Option<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(i64),
    Text(String),
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64> + FromStr,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => T::try_from(n)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("{} is out of range", n))),
        Some(NumberOrText::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<T>()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("'{}' is not a valid number", s)))
        }
    }
}

impl Period {
    pub fn for_year(year: i32) -> Self {
        Self {
            year: Some(year),
            ..Self::default()
        }
    }

    pub fn with_term(mut self, term: u8) -> Self {
        self.term = Some(term);
        self
    }

    pub fn with_week(mut self, week: u8) -> Self {
        self.week = Some(week);
        self
    }
}

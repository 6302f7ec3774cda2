//! The popular-subject catalog.
//!
//! Subjects in the catalog are generated once a day by the warm pass and served to everyone
//! from the public cache; anything else is a custom subject, generated per identity.

use serde::Deserialize;
use std::collections::HashSet;

/// One category and its subjects, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub name: String,
    pub subjects: Vec<String>,
}

/// Ordered mapping of category → ordered subject names. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    categories: Vec<Category>,
    members: HashSet<String>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>) -> Self {
        let members = categories.iter().flat_map(|c| c.subjects.iter().cloned()).collect();
        Self { categories, members }
    }

    /// Build from `(category, subjects)` pairs.
    pub fn from_pairs<'a, I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, S)>,
        S: IntoIterator<Item = &'a str>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, subjects)| Category {
                    name: name.to_string(),
                    subjects: subjects.into_iter().map(str::to_string).collect(),
                })
                .collect(),
        )
    }

    /// The built-in catalog.
    pub fn popular() -> Self {
        Self::from_pairs([
            ("kpop", vec!["BTS", "BlackPink", "NewJeans", "Stray Kids", "TWICE", "Seventeen"]),
            (
                "anime",
                vec!["One Piece", "Naruto", "Attack on Titan", "Demon Slayer", "Jujutsu Kaisen"],
            ),
            ("sports", vec!["Lionel Messi", "Cristiano Ronaldo", "LeBron James", "Tom Brady"]),
            ("entertainment", vec!["Taylor Swift", "Marvel", "Star Wars", "The Weeknd"]),
            ("gaming", vec!["League of Legends", "Valorant", "Genshin Impact", "Minecraft"]),
        ])
    }

    pub fn is_popular(&self, subject: &str) -> bool {
        self.members.contains(subject)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Every subject, category by category, in catalog order.
    pub fn subjects(&self) -> Vec<String> {
        self.categories.iter().flat_map(|c| c.subjects.iter().cloned()).collect()
    }

    /// Number of subject entries (the warm pass generates each one).
    pub fn len(&self) -> usize {
        self.categories.iter().map(|c| c.subjects.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::popular()
    }
}

impl<'de> Deserialize<'de> for Catalog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Vec::<Category>::deserialize(deserializer).map(Catalog::new)
    }
}

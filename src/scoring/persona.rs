//! Persona archetypes and the per-run score vector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A behavioral archetype.
///
/// Seven personas accumulate points; [`Persona::NewVisitor`] is only ever the
/// fallback for insufficient data or a score below threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    HealthConscious,
    PriceSensitive,
    PremiumSeeker,
    ConvenienceSeeker,
    TechSavvy,
    Researcher,
    UrgentBuyer,
    NewVisitor,
}

impl Persona {
    /// Personas that can receive points, in tie-break order.
    pub const SCORED: [Persona; 7] = [
        Persona::HealthConscious,
        Persona::PriceSensitive,
        Persona::PremiumSeeker,
        Persona::ConvenienceSeeker,
        Persona::TechSavvy,
        Persona::Researcher,
        Persona::UrgentBuyer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::HealthConscious => "health_conscious",
            Persona::PriceSensitive => "price_sensitive",
            Persona::PremiumSeeker => "premium_seeker",
            Persona::ConvenienceSeeker => "convenience_seeker",
            Persona::TechSavvy => "tech_savvy",
            Persona::Researcher => "researcher",
            Persona::UrgentBuyer => "urgent_buyer",
            Persona::NewVisitor => "new_visitor",
        }
    }

    fn index(&self) -> Option<usize> {
        Self::SCORED.iter().position(|p| p == self)
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPersona(pub String);

impl fmt::Display for UnknownPersona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown persona '{}'", self.0)
    }
}

impl std::error::Error for UnknownPersona {}

impl FromStr for Persona {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::SCORED
            .iter()
            .chain(std::iter::once(&Persona::NewVisitor))
            .find(|p| p.as_str() == trimmed)
            .copied()
            .ok_or_else(|| UnknownPersona(trimmed.to_string()))
    }
}

/// Accumulated score per scored persona.
///
/// Zero-initialized for every inference run and never persisted between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaScores {
    pub health_conscious: f64,
    pub price_sensitive: f64,
    pub premium_seeker: f64,
    pub convenience_seeker: f64,
    pub tech_savvy: f64,
    pub researcher: f64,
    pub urgent_buyer: f64,
}

impl PersonaScores {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, persona: Persona) -> Option<&mut f64> {
        match persona {
            Persona::HealthConscious => Some(&mut self.health_conscious),
            Persona::PriceSensitive => Some(&mut self.price_sensitive),
            Persona::PremiumSeeker => Some(&mut self.premium_seeker),
            Persona::ConvenienceSeeker => Some(&mut self.convenience_seeker),
            Persona::TechSavvy => Some(&mut self.tech_savvy),
            Persona::Researcher => Some(&mut self.researcher),
            Persona::UrgentBuyer => Some(&mut self.urgent_buyer),
            Persona::NewVisitor => None,
        }
    }

    pub fn get(&self, persona: Persona) -> f64 {
        match persona {
            Persona::HealthConscious => self.health_conscious,
            Persona::PriceSensitive => self.price_sensitive,
            Persona::PremiumSeeker => self.premium_seeker,
            Persona::ConvenienceSeeker => self.convenience_seeker,
            Persona::TechSavvy => self.tech_savvy,
            Persona::Researcher => self.researcher,
            Persona::UrgentBuyer => self.urgent_buyer,
            Persona::NewVisitor => 0.0,
        }
    }

    /// Add points to a persona. Accumulators never go below zero, and
    /// `NewVisitor` cannot be credited.
    pub fn add(&mut self, persona: Persona, points: f64) {
        if let Some(slot) = self.slot(persona) {
            *slot = (*slot + points).max(0.0);
        }
    }

    /// Scores in tie-break order.
    pub fn iter(&self) -> impl Iterator<Item = (Persona, f64)> + '_ {
        Persona::SCORED.iter().map(move |&p| (p, self.get(p)))
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, s)| s).sum()
    }

    /// Nonzero scores, highest first. Ties keep tie-break order.
    pub fn ranked(&self) -> Vec<(Persona, f64)> {
        let mut ranked: Vec<(Persona, f64)> = self.iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.index().cmp(&b.0.index()))
        });
        ranked
    }

    /// The highest scoring persona and the top two scores.
    ///
    /// Ties resolve to the persona listed first in [`Persona::SCORED`].
    pub fn leader(&self) -> (Persona, f64, f64) {
        let mut top = (Persona::SCORED[0], self.get(Persona::SCORED[0]));
        let mut second = f64::NEG_INFINITY;

        for (persona, score) in self.iter().skip(1) {
            if score > top.1 {
                second = top.1;
                top = (persona, score);
            } else if score > second {
                second = score;
            }
        }

        (top.0, top.1, second.max(0.0))
    }
}

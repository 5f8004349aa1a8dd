//! Persona archetypes and the declarative rules that credit them.

pub mod persona;
pub mod rules;
pub mod table;

pub use persona::{Persona, PersonaScores, UnknownPersona};
pub use rules::{
    EventScoringRules, RuleEvaluation, RuleFailure, RuleMatch, RuleTable, ScoringRule,
};
pub use table::STANDARD_RULES;

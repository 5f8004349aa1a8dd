//! Declarative scoring rules.
//!
//! A rule is a predicate over one event payload type plus the points it
//! grants. Rules are grouped per event name together with a weight that
//! reflects how strongly that interaction implies intent.

use crate::error::RuleError;
use crate::events::types::*;
use crate::scoring::persona::Persona;
use std::fmt;

/// Predicate over a payload. An `Err` means the payload could not be judged.
pub type Condition<P> = fn(&P) -> Result<bool, RuleError>;

pub struct ScoringRule<P: 'static> {
    /// Stable identifier used in logs
    pub label: &'static str,
    pub condition: Condition<P>,
    pub points: &'static [(Persona, f64)],
}

impl<P: 'static> Clone for ScoringRule<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: 'static> Copy for ScoringRule<P> {}

impl<P: 'static> fmt::Debug for ScoringRule<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringRule")
            .field("label", &self.label)
            .field("points", &self.points)
            .finish()
    }
}

/// All rules for one event name.
pub struct EventScoringRules<P: 'static> {
    pub rules: &'static [ScoringRule<P>],
    pub weight: f64,
}

impl<P: 'static> Clone for EventScoringRules<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: 'static> Copy for EventScoringRules<P> {}

impl<P: 'static> fmt::Debug for EventScoringRules<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventScoringRules")
            .field("rules", &self.rules)
            .field("weight", &self.weight)
            .finish()
    }
}

impl<P: 'static> EventScoringRules<P> {
    /// A rule set that never scores.
    pub const fn empty() -> Self {
        Self {
            rules: &[],
            weight: 1.0,
        }
    }

    /// Run every rule against `payload`. A failing rule is recorded and
    /// skipped; the remaining rules still run.
    pub fn evaluate(&self, payload: &P) -> RuleEvaluation {
        let mut evaluation = RuleEvaluation {
            weight: self.weight,
            matched: Vec::new(),
            failures: Vec::new(),
        };

        for rule in self.rules {
            match (rule.condition)(payload) {
                Ok(true) => evaluation.matched.push(RuleMatch {
                    label: rule.label,
                    points: rule.points,
                }),
                Ok(false) => {}
                Err(error) => evaluation.failures.push(RuleFailure {
                    label: rule.label,
                    error,
                }),
            }
        }

        evaluation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub label: &'static str,
    pub points: &'static [(Persona, f64)],
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleFailure {
    pub label: &'static str,
    pub error: RuleError,
}

/// Outcome of scoring one event against its rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    /// Event-type weight multiplier
    pub weight: f64,
    pub matched: Vec<RuleMatch>,
    pub failures: Vec<RuleFailure>,
}

/// Rule sets for every event name.
#[derive(Debug, Clone, Copy)]
pub struct RuleTable {
    pub page_view: EventScoringRules<PageView>,
    pub category_visit: EventScoringRules<CategoryVisit>,
    pub product_view: EventScoringRules<ProductView>,
    pub search_query: EventScoringRules<SearchQuery>,
    pub add_to_cart: EventScoringRules<AddToCart>,
    pub form_interaction: EventScoringRules<FormInteraction>,
    pub consultation_interest: EventScoringRules<ConsultationInterest>,
    pub scroll_depth: EventScoringRules<ScrollDepth>,
    pub video_play: EventScoringRules<VideoPlay>,
    pub plan_comparison: EventScoringRules<PlanComparison>,
    pub checkout_start: EventScoringRules<CheckoutStart>,
    pub payment_method_select: EventScoringRules<PaymentMethodSelect>,
    pub prescription_upload: EventScoringRules<PrescriptionUpload>,
    pub whatsapp_click: EventScoringRules<WhatsappClick>,
    pub chat_open: EventScoringRules<ChatOpen>,
    pub link_click: EventScoringRules<LinkClick>,
}

impl RuleTable {
    /// Score one payload against the rule set for its event name.
    pub fn evaluate(&self, data: &EventData) -> RuleEvaluation {
        match data {
            EventData::PageView(p) => self.page_view.evaluate(p),
            EventData::CategoryVisit(p) => self.category_visit.evaluate(p),
            EventData::ProductView(p) => self.product_view.evaluate(p),
            EventData::SearchQuery(p) => self.search_query.evaluate(p),
            EventData::AddToCart(p) => self.add_to_cart.evaluate(p),
            EventData::FormInteraction(p) => self.form_interaction.evaluate(p),
            EventData::ConsultationInterest(p) => self.consultation_interest.evaluate(p),
            EventData::ScrollDepth(p) => self.scroll_depth.evaluate(p),
            EventData::VideoPlay(p) => self.video_play.evaluate(p),
            EventData::PlanComparison(p) => self.plan_comparison.evaluate(p),
            EventData::CheckoutStart(p) => self.checkout_start.evaluate(p),
            EventData::PaymentMethodSelect(p) => self.payment_method_select.evaluate(p),
            EventData::PrescriptionUpload(p) => self.prescription_upload.evaluate(p),
            EventData::WhatsappClick(p) => self.whatsapp_click.evaluate(p),
            EventData::ChatOpen(p) => self.chat_open.evaluate(p),
            EventData::LinkClick(p) => self.link_click.evaluate(p),
        }
    }

    /// Weight multiplier for an event name.
    pub fn weight(&self, name: EventName) -> f64 {
        match name {
            EventName::PageView => self.page_view.weight,
            EventName::CategoryVisit => self.category_visit.weight,
            EventName::ProductView => self.product_view.weight,
            EventName::SearchQuery => self.search_query.weight,
            EventName::AddToCart => self.add_to_cart.weight,
            EventName::FormInteraction => self.form_interaction.weight,
            EventName::ConsultationInterest => self.consultation_interest.weight,
            EventName::ScrollDepth => self.scroll_depth.weight,
            EventName::VideoPlay => self.video_play.weight,
            EventName::PlanComparison => self.plan_comparison.weight,
            EventName::CheckoutStart => self.checkout_start.weight,
            EventName::PaymentMethodSelect => self.payment_method_select.weight,
            EventName::PrescriptionUpload => self.prescription_upload.weight,
            EventName::WhatsappClick => self.whatsapp_click.weight,
            EventName::ChatOpen => self.chat_open.weight,
            EventName::LinkClick => self.link_click.weight,
        }
    }

    /// Number of rules registered for an event name.
    pub fn rule_count(&self, name: EventName) -> usize {
        match name {
            EventName::PageView => self.page_view.rules.len(),
            EventName::CategoryVisit => self.category_visit.rules.len(),
            EventName::ProductView => self.product_view.rules.len(),
            EventName::SearchQuery => self.search_query.rules.len(),
            EventName::AddToCart => self.add_to_cart.rules.len(),
            EventName::FormInteraction => self.form_interaction.rules.len(),
            EventName::ConsultationInterest => self.consultation_interest.rules.len(),
            EventName::ScrollDepth => self.scroll_depth.rules.len(),
            EventName::VideoPlay => self.video_play.rules.len(),
            EventName::PlanComparison => self.plan_comparison.rules.len(),
            EventName::CheckoutStart => self.checkout_start.rules.len(),
            EventName::PaymentMethodSelect => self.payment_method_select.rules.len(),
            EventName::PrescriptionUpload => self.prescription_upload.rules.len(),
            EventName::WhatsappClick => self.whatsapp_click.rules.len(),
            EventName::ChatOpen => self.chat_open.rules.len(),
            EventName::LinkClick => self.link_click.rules.len(),
        }
    }

    /// All personas any rule can credit, with duplicates.
    pub fn credited_personas(&self) -> Vec<Persona> {
        fn collect<P: 'static>(set: &EventScoringRules<P>, out: &mut Vec<Persona>) {
            for rule in set.rules {
                out.extend(rule.points.iter().map(|(p, _)| *p));
            }
        }

        let mut out = Vec::new();
        collect(&self.page_view, &mut out);
        collect(&self.category_visit, &mut out);
        collect(&self.product_view, &mut out);
        collect(&self.search_query, &mut out);
        collect(&self.add_to_cart, &mut out);
        collect(&self.form_interaction, &mut out);
        collect(&self.consultation_interest, &mut out);
        collect(&self.scroll_depth, &mut out);
        collect(&self.video_play, &mut out);
        collect(&self.plan_comparison, &mut out);
        collect(&self.checkout_start, &mut out);
        collect(&self.payment_method_select, &mut out);
        collect(&self.prescription_upload, &mut out);
        collect(&self.whatsapp_click, &mut out);
        collect(&self.chat_open, &mut out);
        collect(&self.link_click, &mut out);
        out
    }
}

/// Reject non-finite numbers so they cannot poison the score vector.
pub fn finite(field: &'static str, value: f64) -> Result<f64, RuleError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RuleError::NonFinite(field))
    }
}

/// Like [`finite`] for optional fields; a missing value is `Ok(None)`.
pub fn finite_opt(field: &'static str, value: Option<f64>) -> Result<Option<f64>, RuleError> {
    value.map(|v| finite(field, v)).transpose()
}

/// Case-insensitive substring match against any needle.
pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(n))
}

/// Whether any word in `text` starts with one of `stems`.
pub fn mentions(text: &str, stems: &[&str]) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|word| stems.iter().any(|stem| word.starts_with(stem)))
}

#[cfg(test)]
mod tests {
    use super::*;

    static FLAKY: [ScoringRule<ScrollDepth>; 2] = [
        ScoringRule {
            label: "test.always_fails",
            condition: |_| Err(RuleError::NonFinite("depth")),
            points: &[(Persona::Researcher, 100.0)],
        },
        ScoringRule {
            label: "test.deep",
            condition: |s| Ok(s.depth > 50),
            points: &[(Persona::Researcher, 2.0), (Persona::TechSavvy, 1.0)],
        },
    ];

    #[test]
    fn test_failing_rule_does_not_abort_others() {
        let set = EventScoringRules {
            rules: &FLAKY,
            weight: 2.0,
        };
        let evaluation = set.evaluate(&ScrollDepth {
            depth: 80,
            page: None,
        });

        assert_eq!(evaluation.weight, 2.0);
        assert_eq!(evaluation.failures.len(), 1);
        assert_eq!(evaluation.failures[0].label, "test.always_fails");
        assert_eq!(evaluation.matched.len(), 1);
        assert_eq!(evaluation.matched[0].label, "test.deep");
        assert_eq!(evaluation.matched[0].points.len(), 2);
    }

    #[test]
    fn test_empty_set() {
        let set: EventScoringRules<ScrollDepth> = EventScoringRules::empty();
        let evaluation = set.evaluate(&ScrollDepth {
            depth: 99,
            page: None,
        });
        assert!(evaluation.matched.is_empty());
        assert!(evaluation.failures.is_empty());
    }

    #[test]
    fn test_finite_helpers() {
        assert_eq!(finite("x", 1.5), Ok(1.5));
        assert_eq!(finite("x", f64::NAN), Err(RuleError::NonFinite("x")));
        assert_eq!(finite_opt("x", None), Ok(None));
        assert!(finite_opt("x", Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_text_matching() {
        assert!(contains_any("/Pricing/annual", &["/pricing"]));
        assert!(!contains_any("/about", &["/pricing"]));

        assert!(mentions("Vitamina D3 natural", &["vitamin"]));
        assert!(mentions("entrega hoje", &["hoje"]));
        // Stems match word starts only
        assert!(!mentions("known brands", &["now"]));
    }
}

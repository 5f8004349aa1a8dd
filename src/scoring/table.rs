//! The standard rule table.
//!
//! Weights run from 1 for low-signal interactions (page views, scrolling,
//! plain link clicks) to 5 for high-intent ones (consultation interest,
//! prescription upload).

use crate::error::RuleError;
use crate::events::types::*;
use crate::scoring::persona::Persona::*;
use crate::scoring::rules::{
    contains_any, finite_opt, mentions, EventScoringRules, RuleTable, ScoringRule,
};

const PRICING_PATHS: &[&str] = &["/pricing", "/planos", "/precos", "/compare"];
const CONTENT_PATHS: &[&str] = &["/blog", "/artigos", "/saude", "/health"];
const PREMIUM_PATHS: &[&str] = &["/premium", "/vip"];

const WELLNESS_TERMS: &[&str] = &[
    "vitamin", "supplement", "suplement", "natural", "organic", "organico", "fitness", "wellness",
    "nutri", "saude", "health",
];
const PREMIUM_TERMS: &[&str] = &["dermo", "premium", "luxury", "importad", "imported"];
const DEAL_TERMS: &[&str] = &[
    "promo", "offer", "oferta", "deal", "outlet", "discount", "desconto", "generic", "generico",
    "cheap", "barat",
];
const DEVICE_TERMS: &[&str] = &["device", "monitor", "digital", "smart", "gadget", "aparelho"];
const URGENCY_TERMS: &[&str] = &[
    "urgent", "urgente", "today", "hoje", "24h", "now", "agora", "express", "delivery", "entrega",
];
const COMPARISON_TERMS: &[&str] = &["vs", "versus", "compar", "best", "melhor", "review", "avalia"];
const PREMIUM_PLANS: &[&str] = &["premium", "gold", "annual", "anual", "plus", "vip"];
const BASIC_PLANS: &[&str] = &["basic", "basico", "monthly", "mensal", "economy", "essencial"];
const REMOTE_CONSULTATION: &[&str] = &["online", "video", "tele"];
const URGENT_CONSULTATION: &[&str] = &["urgent", "same_day", "emergency", "today"];

const PAGE_VIEW: EventScoringRules<PageView> = EventScoringRules {
    weight: 1.0,
    rules: &[
        ScoringRule {
            label: "page_view.pricing_page",
            condition: |p| Ok(contains_any(&p.path, PRICING_PATHS)),
            points: &[(Researcher, 3.0)],
        },
        ScoringRule {
            label: "page_view.long_visit",
            condition: |p| Ok(finite_opt("duration", p.duration)?.is_some_and(|d| d > 120.0)),
            points: &[(Researcher, 5.0)],
        },
        ScoringRule {
            label: "page_view.quick_visit",
            condition: |p| Ok(finite_opt("duration", p.duration)?.is_some_and(|d| d < 15.0)),
            points: &[(UrgentBuyer, 2.0), (ConvenienceSeeker, 1.0)],
        },
        ScoringRule {
            label: "page_view.health_content",
            condition: |p| Ok(contains_any(&p.path, CONTENT_PATHS)),
            points: &[(HealthConscious, 3.0), (Researcher, 1.0)],
        },
        ScoringRule {
            label: "page_view.premium_page",
            condition: |p| Ok(contains_any(&p.path, PREMIUM_PATHS)),
            points: &[(PremiumSeeker, 4.0)],
        },
    ],
};

const CATEGORY_VISIT: EventScoringRules<CategoryVisit> = EventScoringRules {
    weight: 2.0,
    rules: &[
        ScoringRule {
            label: "category_visit.wellness",
            condition: |c| Ok(mentions(&c.category, WELLNESS_TERMS)),
            points: &[(HealthConscious, 5.0)],
        },
        ScoringRule {
            label: "category_visit.premium",
            condition: |c| Ok(mentions(&c.category, PREMIUM_TERMS)),
            points: &[(PremiumSeeker, 5.0)],
        },
        ScoringRule {
            label: "category_visit.deals",
            condition: |c| Ok(mentions(&c.category, DEAL_TERMS)),
            points: &[(PriceSensitive, 6.0)],
        },
        ScoringRule {
            label: "category_visit.devices",
            condition: |c| Ok(mentions(&c.category, DEVICE_TERMS)),
            points: &[(TechSavvy, 4.0)],
        },
    ],
};

const PRODUCT_VIEW: EventScoringRules<ProductView> = EventScoringRules {
    weight: 2.0,
    rules: &[
        ScoringRule {
            label: "product_view.high_price",
            condition: |p| Ok(finite_opt("price", p.price)?.is_some_and(|v| v > 200.0)),
            points: &[(PremiumSeeker, 5.0)],
        },
        ScoringRule {
            label: "product_view.discounted",
            condition: |p| Ok(p.has_discount),
            points: &[(PriceSensitive, 4.0)],
        },
        ScoringRule {
            label: "product_view.long_look",
            condition: |p| {
                let duration = finite_opt("view_duration", p.view_duration)?;
                Ok(duration.is_some_and(|d| d > 60.0))
            },
            points: &[(Researcher, 4.0)],
        },
        ScoringRule {
            label: "product_view.quick_look",
            condition: |p| {
                let duration = finite_opt("view_duration", p.view_duration)?;
                Ok(duration.is_some_and(|d| d < 10.0))
            },
            points: &[(UrgentBuyer, 2.0)],
        },
        ScoringRule {
            label: "product_view.wellness_product",
            condition: |p| {
                Ok(p.category
                    .as_deref()
                    .is_some_and(|c| mentions(c, WELLNESS_TERMS)))
            },
            points: &[(HealthConscious, 3.0)],
        },
    ],
};

const SEARCH_QUERY: EventScoringRules<SearchQuery> = EventScoringRules {
    weight: 3.0,
    rules: &[
        ScoringRule {
            label: "search_query.price_terms",
            condition: |s| Ok(mentions(&s.query, DEAL_TERMS)),
            points: &[(PriceSensitive, 6.0)],
        },
        ScoringRule {
            label: "search_query.health_terms",
            condition: |s| Ok(mentions(&s.query, WELLNESS_TERMS)),
            points: &[(HealthConscious, 5.0)],
        },
        ScoringRule {
            label: "search_query.urgency_terms",
            condition: |s| Ok(mentions(&s.query, URGENCY_TERMS)),
            points: &[(UrgentBuyer, 6.0), (ConvenienceSeeker, 2.0)],
        },
        ScoringRule {
            label: "search_query.detailed",
            condition: |s| Ok(s.query.split_whitespace().count() >= 4),
            points: &[(Researcher, 4.0)],
        },
        ScoringRule {
            label: "search_query.comparison",
            condition: |s| Ok(mentions(&s.query, COMPARISON_TERMS)),
            points: &[(Researcher, 5.0)],
        },
    ],
};

const ADD_TO_CART: EventScoringRules<AddToCart> = EventScoringRules {
    weight: 4.0,
    rules: &[
        ScoringRule {
            label: "add_to_cart.high_price",
            condition: |c| Ok(finite_opt("price", c.price)?.is_some_and(|v| v > 200.0)),
            points: &[(PremiumSeeker, 6.0)],
        },
        ScoringRule {
            label: "add_to_cart.discounted",
            condition: |c| Ok(c.has_discount),
            points: &[(PriceSensitive, 5.0)],
        },
        ScoringRule {
            label: "add_to_cart.bulk",
            condition: |c| Ok(c.quantity >= 3),
            points: &[(ConvenienceSeeker, 4.0), (PriceSensitive, 2.0)],
        },
    ],
};

const FORM_INTERACTION: EventScoringRules<FormInteraction> = EventScoringRules {
    weight: 2.0,
    rules: &[
        ScoringRule {
            label: "form_interaction.health_form",
            condition: |f| Ok(mentions(&f.form_name, &["consult", "health", "saude", "anamnes"])),
            points: &[(HealthConscious, 4.0)],
        },
        ScoringRule {
            label: "form_interaction.quote_completed",
            condition: |f| {
                Ok(f.action == FormAction::Complete
                    && mentions(&f.form_name, &["quote", "orcamento"]))
            },
            points: &[(Researcher, 4.0)],
        },
        ScoringRule {
            label: "form_interaction.abandoned",
            condition: |f| Ok(f.action == FormAction::Abandon),
            points: &[(PriceSensitive, 2.0), (Researcher, 1.0)],
        },
        ScoringRule {
            label: "form_interaction.newsletter",
            condition: |f| Ok(mentions(&f.form_name, &["newsletter"])),
            points: &[(Researcher, 3.0), (HealthConscious, 1.0)],
        },
        ScoringRule {
            label: "form_interaction.coupon_field",
            condition: |f| {
                Ok(f.field
                    .as_deref()
                    .is_some_and(|field| mentions(field, &["coupon", "cupom", "voucher"])))
            },
            points: &[(PriceSensitive, 5.0)],
        },
    ],
};

const CONSULTATION_INTEREST: EventScoringRules<ConsultationInterest> = EventScoringRules {
    weight: 5.0,
    rules: &[
        ScoringRule {
            label: "consultation_interest.any",
            condition: |_| Ok(true),
            points: &[(HealthConscious, 15.0)],
        },
        ScoringRule {
            label: "consultation_interest.remote",
            condition: |c| {
                Ok(c.consultation_type
                    .as_deref()
                    .is_some_and(|t| contains_any(t, REMOTE_CONSULTATION)))
            },
            points: &[(TechSavvy, 4.0), (ConvenienceSeeker, 3.0)],
        },
        ScoringRule {
            label: "consultation_interest.urgent",
            condition: |c| {
                Ok(c.consultation_type
                    .as_deref()
                    .is_some_and(|t| contains_any(t, URGENT_CONSULTATION)))
            },
            points: &[(UrgentBuyer, 8.0)],
        },
    ],
};

fn checked_depth(s: &ScrollDepth) -> Result<u8, RuleError> {
    if s.depth > 100 {
        return Err(RuleError::Malformed {
            field: "depth",
            reason: format!("{} is not a percentage", s.depth),
        });
    }
    Ok(s.depth)
}

const SCROLL_DEPTH: EventScoringRules<ScrollDepth> = EventScoringRules {
    weight: 1.0,
    rules: &[
        ScoringRule {
            label: "scroll_depth.deep",
            condition: |s| Ok(checked_depth(s)? >= 75),
            points: &[(Researcher, 3.0)],
        },
        ScoringRule {
            label: "scroll_depth.complete",
            condition: |s| Ok(checked_depth(s)? >= 90),
            points: &[(Researcher, 2.0)],
        },
        ScoringRule {
            label: "scroll_depth.shallow",
            condition: |s| Ok(checked_depth(s)? < 25),
            points: &[(UrgentBuyer, 1.0)],
        },
    ],
};

fn watched_ratio(v: &VideoPlay) -> Result<Option<f64>, RuleError> {
    let watched = finite_opt("watched_seconds", v.watched_seconds)?;
    let total = finite_opt("total_seconds", v.total_seconds)?;
    Ok(match (watched, total) {
        (Some(w), Some(t)) if t > 0.0 => Some((w / t).clamp(0.0, 1.0)),
        _ => None,
    })
}

const VIDEO_PLAY: EventScoringRules<VideoPlay> = EventScoringRules {
    weight: 2.0,
    rules: &[
        ScoringRule {
            label: "video_play.watched_most",
            condition: |v| Ok(watched_ratio(v)?.is_some_and(|r| r >= 0.75)),
            points: &[(Researcher, 4.0), (HealthConscious, 2.0)],
        },
        ScoringRule {
            label: "video_play.skimmed",
            condition: |v| Ok(watched_ratio(v)?.is_some_and(|r| r < 0.25)),
            points: &[(UrgentBuyer, 2.0)],
        },
        ScoringRule {
            label: "video_play.tutorial",
            condition: |v| Ok(mentions(&v.video_id, &["tutorial", "how", "como"])),
            points: &[(TechSavvy, 3.0)],
        },
    ],
};

const PLAN_COMPARISON: EventScoringRules<PlanComparison> = EventScoringRules {
    weight: 4.0,
    rules: &[
        ScoringRule {
            label: "plan_comparison.multiple_plans",
            condition: |p| Ok(p.plans.len() >= 2),
            points: &[(Researcher, 6.0), (PriceSensitive, 3.0)],
        },
        ScoringRule {
            label: "plan_comparison.premium_selected",
            condition: |p| Ok(p.selected.as_deref().is_some_and(|s| mentions(s, PREMIUM_PLANS))),
            points: &[(PremiumSeeker, 8.0)],
        },
        ScoringRule {
            label: "plan_comparison.basic_selected",
            condition: |p| Ok(p.selected.as_deref().is_some_and(|s| mentions(s, BASIC_PLANS))),
            points: &[(PriceSensitive, 6.0)],
        },
    ],
};

const CHECKOUT_START: EventScoringRules<CheckoutStart> = EventScoringRules {
    weight: 4.0,
    rules: &[
        ScoringRule {
            label: "checkout_start.any",
            condition: |_| Ok(true),
            points: &[(UrgentBuyer, 3.0)],
        },
        ScoringRule {
            label: "checkout_start.large_order",
            condition: |c| Ok(finite_opt("total", c.total)?.is_some_and(|t| t > 300.0)),
            points: &[(PremiumSeeker, 6.0)],
        },
        ScoringRule {
            label: "checkout_start.small_order",
            condition: |c| Ok(finite_opt("total", c.total)?.is_some_and(|t| t < 50.0)),
            points: &[(PriceSensitive, 3.0)],
        },
        ScoringRule {
            label: "checkout_start.many_items",
            condition: |c| Ok(c.items >= 3),
            points: &[(ConvenienceSeeker, 3.0)],
        },
    ],
};

const PAYMENT_METHOD_SELECT: EventScoringRules<PaymentMethodSelect> = EventScoringRules {
    weight: 3.0,
    rules: &[
        ScoringRule {
            label: "payment_method_select.pix",
            condition: |p| Ok(p.method == PaymentMethod::Pix),
            points: &[(TechSavvy, 4.0), (UrgentBuyer, 3.0)],
        },
        ScoringRule {
            label: "payment_method_select.boleto",
            condition: |p| Ok(p.method == PaymentMethod::Boleto),
            points: &[(PriceSensitive, 4.0)],
        },
        ScoringRule {
            label: "payment_method_select.installments",
            condition: |p| {
                Ok(p.method == PaymentMethod::CreditCard && p.installments.unwrap_or(1) >= 3)
            },
            points: &[(PriceSensitive, 5.0)],
        },
        ScoringRule {
            label: "payment_method_select.single_charge",
            condition: |p| {
                Ok(p.method == PaymentMethod::CreditCard && p.installments.unwrap_or(1) <= 1)
            },
            points: &[(PremiumSeeker, 3.0), (ConvenienceSeeker, 2.0)],
        },
    ],
};

const PRESCRIPTION_UPLOAD: EventScoringRules<PrescriptionUpload> = EventScoringRules {
    weight: 5.0,
    rules: &[
        ScoringRule {
            label: "prescription_upload.any",
            condition: |_| Ok(true),
            points: &[(HealthConscious, 8.0), (ConvenienceSeeker, 4.0)],
        },
        ScoringRule {
            label: "prescription_upload.camera",
            condition: |p| Ok(p.method == UploadMethod::Camera),
            points: &[(TechSavvy, 4.0), (UrgentBuyer, 3.0)],
        },
        ScoringRule {
            label: "prescription_upload.whatsapp",
            condition: |p| Ok(p.method == UploadMethod::Whatsapp),
            points: &[(ConvenienceSeeker, 4.0)],
        },
    ],
};

const WHATSAPP_CLICK: EventScoringRules<WhatsappClick> = EventScoringRules {
    weight: 3.0,
    rules: &[
        ScoringRule {
            label: "whatsapp_click.any",
            condition: |_| Ok(true),
            points: &[(ConvenienceSeeker, 6.0)],
        },
        ScoringRule {
            label: "whatsapp_click.urgent_context",
            condition: |w| Ok(w.context.as_deref().is_some_and(|c| mentions(c, URGENCY_TERMS))),
            points: &[(UrgentBuyer, 6.0)],
        },
        ScoringRule {
            label: "whatsapp_click.question",
            condition: |w| {
                Ok(w.context
                    .as_deref()
                    .is_some_and(|c| mentions(c, &["question", "duvida", "help", "ajuda"])))
            },
            points: &[(Researcher, 3.0)],
        },
    ],
};

const CHAT_OPEN: EventScoringRules<ChatOpen> = EventScoringRules {
    weight: 2.0,
    rules: &[
        ScoringRule {
            label: "chat_open.manual",
            condition: |c| Ok(c.trigger == ChatTrigger::Manual),
            points: &[(ConvenienceSeeker, 4.0), (Researcher, 2.0)],
        },
        ScoringRule {
            label: "chat_open.at_checkout",
            condition: |c| {
                Ok(c.page
                    .as_deref()
                    .is_some_and(|p| contains_any(p, &["checkout", "cart", "carrinho"])))
            },
            points: &[(UrgentBuyer, 3.0)],
        },
        ScoringRule {
            label: "chat_open.on_pricing",
            condition: |c| Ok(c.page.as_deref().is_some_and(|p| contains_any(p, PRICING_PATHS))),
            points: &[(PriceSensitive, 3.0)],
        },
    ],
};

const LINK_CLICK: EventScoringRules<LinkClick> = EventScoringRules {
    weight: 1.0,
    rules: &[
        ScoringRule {
            label: "link_click.reviews",
            condition: |l| Ok(contains_any(&l.href, &["compar", "review", "avalia"])),
            points: &[(Researcher, 3.0)],
        },
        ScoringRule {
            label: "link_click.external",
            condition: |l| Ok(l.external),
            points: &[(Researcher, 1.0)],
        },
        ScoringRule {
            label: "link_click.deals",
            condition: |l| Ok(contains_any(&l.href, &["promo", "cupom", "coupon", "desconto"])),
            points: &[(PriceSensitive, 3.0)],
        },
        ScoringRule {
            label: "link_click.app",
            condition: |l| {
                Ok(contains_any(
                    &l.href,
                    &["/app", "download", "play.google", "apps.apple"],
                ))
            },
            points: &[(TechSavvy, 4.0)],
        },
        ScoringRule {
            label: "link_click.whatsapp",
            condition: |l| Ok(contains_any(&l.href, &["wa.me", "whatsapp"])),
            points: &[(ConvenienceSeeker, 3.0)],
        },
    ],
};

/// Rules shipped with the engine.
pub const STANDARD_RULES: RuleTable = RuleTable {
    page_view: PAGE_VIEW,
    category_visit: CATEGORY_VISIT,
    product_view: PRODUCT_VIEW,
    search_query: SEARCH_QUERY,
    add_to_cart: ADD_TO_CART,
    form_interaction: FORM_INTERACTION,
    consultation_interest: CONSULTATION_INTEREST,
    scroll_depth: SCROLL_DEPTH,
    video_play: VIDEO_PLAY,
    plan_comparison: PLAN_COMPARISON,
    checkout_start: CHECKOUT_START,
    payment_method_select: PAYMENT_METHOD_SELECT,
    prescription_upload: PRESCRIPTION_UPLOAD,
    whatsapp_click: WHATSAPP_CLICK,
    chat_open: CHAT_OPEN,
    link_click: LINK_CLICK,
};

impl Default for RuleTable {
    fn default() -> Self {
        STANDARD_RULES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::persona::Persona;
    use crate::scoring::rules::RuleEvaluation;

    fn points_for(evaluation: &RuleEvaluation, persona: Persona) -> f64 {
        evaluation
            .matched
            .iter()
            .flat_map(|m| m.points.iter())
            .filter(|(p, _)| *p == persona)
            .map(|(_, pts)| pts)
            .sum()
    }

    #[test]
    fn test_every_event_has_one_to_five_rules() {
        for name in EventName::ALL {
            let count = STANDARD_RULES.rule_count(name);
            assert!((1..=5).contains(&count), "{name} has {count} rules");
        }
    }

    #[test]
    fn test_weights_range() {
        for name in EventName::ALL {
            let weight = STANDARD_RULES.weight(name);
            assert!((1.0..=5.0).contains(&weight), "{name} weight {weight}");
        }
        assert_eq!(STANDARD_RULES.weight(EventName::PageView), 1.0);
        assert_eq!(STANDARD_RULES.weight(EventName::ConsultationInterest), 5.0);
        assert_eq!(STANDARD_RULES.weight(EventName::PrescriptionUpload), 5.0);
    }

    #[test]
    fn test_new_visitor_never_credited() {
        assert!(!STANDARD_RULES
            .credited_personas()
            .contains(&Persona::NewVisitor));
    }

    #[test]
    fn test_pricing_page_view_scores_researcher() {
        let evaluation = STANDARD_RULES.evaluate(&EventData::PageView(PageView {
            path: "/pricing".to_string(),
            duration: Some(150.0),
            title: None,
        }));
        assert_eq!(evaluation.weight, 1.0);
        assert_eq!(points_for(&evaluation, Persona::Researcher), 8.0);
        assert_eq!(evaluation.matched.len(), 2);
    }

    #[test]
    fn test_consultation_interest_scores_health() {
        let evaluation = STANDARD_RULES.evaluate(&EventData::ConsultationInterest(
            ConsultationInterest {
                consultation_type: Some("nutrition".to_string()),
                source: None,
            },
        ));
        assert_eq!(evaluation.weight, 5.0);
        assert_eq!(points_for(&evaluation, Persona::HealthConscious), 15.0);
        assert_eq!(evaluation.matched.len(), 1);
    }

    #[test]
    fn test_mid_scroll_matches_nothing() {
        let evaluation = STANDARD_RULES.evaluate(&EventData::ScrollDepth(ScrollDepth {
            depth: 50,
            page: None,
        }));
        assert!(evaluation.matched.is_empty());
        assert!(evaluation.failures.is_empty());
    }

    #[test]
    fn test_malformed_payload_fails_only_its_rules() {
        let evaluation = STANDARD_RULES.evaluate(&EventData::PageView(PageView {
            path: "/pricing".to_string(),
            duration: Some(f64::NAN),
            title: None,
        }));
        // Both duration rules fail, the path rule still matches
        assert_eq!(evaluation.failures.len(), 2);
        assert_eq!(points_for(&evaluation, Persona::Researcher), 3.0);

        let evaluation = STANDARD_RULES.evaluate(&EventData::ScrollDepth(ScrollDepth {
            depth: 180,
            page: None,
        }));
        assert_eq!(evaluation.failures.len(), 3);
        assert!(evaluation.matched.is_empty());
    }

    #[test]
    fn test_search_query_terms() {
        let evaluation = STANDARD_RULES.evaluate(&EventData::SearchQuery(SearchQuery {
            query: "vitamina d generico barato entrega hoje".to_string(),
            results_count: Some(12),
        }));
        assert_eq!(points_for(&evaluation, Persona::PriceSensitive), 6.0);
        assert_eq!(points_for(&evaluation, Persona::HealthConscious), 5.0);
        assert_eq!(points_for(&evaluation, Persona::UrgentBuyer), 6.0);
        assert_eq!(points_for(&evaluation, Persona::Researcher), 4.0);
    }

    #[test]
    fn test_payment_methods() {
        let pix = STANDARD_RULES.evaluate(&EventData::PaymentMethodSelect(PaymentMethodSelect {
            method: PaymentMethod::Pix,
            installments: None,
        }));
        assert_eq!(points_for(&pix, Persona::TechSavvy), 4.0);

        let split = STANDARD_RULES.evaluate(&EventData::PaymentMethodSelect(PaymentMethodSelect {
            method: PaymentMethod::CreditCard,
            installments: Some(6),
        }));
        assert_eq!(points_for(&split, Persona::PriceSensitive), 5.0);
        assert_eq!(points_for(&split, Persona::PremiumSeeker), 0.0);
    }

    #[test]
    fn test_video_ratio_needs_total() {
        let evaluation = STANDARD_RULES.evaluate(&EventData::VideoPlay(VideoPlay {
            video_id: "intro".to_string(),
            watched_seconds: Some(50.0),
            total_seconds: Some(0.0),
        }));
        assert!(evaluation.matched.is_empty());
    }
}

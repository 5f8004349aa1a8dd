//! Interaction event types.
//!
//! Each of the sixteen event names carries its own payload struct. The
//! persisted and wire form keeps the flat `{timestamp, eventName, eventData,
//! url, referrer, sessionId}` shape.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    PageView,
    CategoryVisit,
    ProductView,
    SearchQuery,
    AddToCart,
    FormInteraction,
    ConsultationInterest,
    ScrollDepth,
    VideoPlay,
    PlanComparison,
    CheckoutStart,
    PaymentMethodSelect,
    PrescriptionUpload,
    WhatsappClick,
    ChatOpen,
    LinkClick,
}

impl EventName {
    pub const ALL: [EventName; 16] = [
        EventName::PageView,
        EventName::CategoryVisit,
        EventName::ProductView,
        EventName::SearchQuery,
        EventName::AddToCart,
        EventName::FormInteraction,
        EventName::ConsultationInterest,
        EventName::ScrollDepth,
        EventName::VideoPlay,
        EventName::PlanComparison,
        EventName::CheckoutStart,
        EventName::PaymentMethodSelect,
        EventName::PrescriptionUpload,
        EventName::WhatsappClick,
        EventName::ChatOpen,
        EventName::LinkClick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PageView => "page_view",
            EventName::CategoryVisit => "category_visit",
            EventName::ProductView => "product_view",
            EventName::SearchQuery => "search_query",
            EventName::AddToCart => "add_to_cart",
            EventName::FormInteraction => "form_interaction",
            EventName::ConsultationInterest => "consultation_interest",
            EventName::ScrollDepth => "scroll_depth",
            EventName::VideoPlay => "video_play",
            EventName::PlanComparison => "plan_comparison",
            EventName::CheckoutStart => "checkout_start",
            EventName::PaymentMethodSelect => "payment_method_select",
            EventName::PrescriptionUpload => "prescription_upload",
            EventName::WhatsappClick => "whatsapp_click",
            EventName::ChatOpen => "chat_open",
            EventName::LinkClick => "link_click",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .find(|n| n.as_str() == trimmed)
            .copied()
            .ok_or_else(|| format!("unknown event name '{trimmed}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub path: String,
    /// Seconds spent on the page
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryVisit {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductView {
    pub product_id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    /// Seconds spent on the product page
    #[serde(default)]
    pub view_duration: Option<f64>,
    #[serde(default)]
    pub has_discount: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub results_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddToCart {
    pub product_id: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub has_discount: bool,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormAction {
    Focus,
    Complete,
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormInteraction {
    pub form_name: String,
    #[serde(default)]
    pub field: Option<String>,
    pub action: FormAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsultationInterest {
    #[serde(default)]
    pub consultation_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollDepth {
    /// Percentage of the page scrolled (0-100)
    pub depth: u8,
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPlay {
    pub video_id: String,
    #[serde(default)]
    pub watched_seconds: Option<f64>,
    #[serde(default)]
    pub total_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanComparison {
    #[serde(default)]
    pub plans: Vec<String>,
    #[serde(default)]
    pub selected: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStart {
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub items: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    CreditCard,
    DebitCard,
    Boleto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodSelect {
    pub method: PaymentMethod,
    #[serde(default)]
    pub installments: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    Camera,
    File,
    Whatsapp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionUpload {
    #[serde(default)]
    pub file_type: Option<String>,
    pub method: UploadMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhatsappClick {
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTrigger {
    Manual,
    Proactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOpen {
    pub trigger: ChatTrigger,
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkClick {
    pub href: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub external: bool,
}

/// An event name together with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventName", content = "eventData", rename_all = "snake_case")]
pub enum EventData {
    PageView(PageView),
    CategoryVisit(CategoryVisit),
    ProductView(ProductView),
    SearchQuery(SearchQuery),
    AddToCart(AddToCart),
    FormInteraction(FormInteraction),
    ConsultationInterest(ConsultationInterest),
    ScrollDepth(ScrollDepth),
    VideoPlay(VideoPlay),
    PlanComparison(PlanComparison),
    CheckoutStart(CheckoutStart),
    PaymentMethodSelect(PaymentMethodSelect),
    PrescriptionUpload(PrescriptionUpload),
    WhatsappClick(WhatsappClick),
    ChatOpen(ChatOpen),
    LinkClick(LinkClick),
}

impl EventData {
    pub fn name(&self) -> EventName {
        match self {
            EventData::PageView(_) => EventName::PageView,
            EventData::CategoryVisit(_) => EventName::CategoryVisit,
            EventData::ProductView(_) => EventName::ProductView,
            EventData::SearchQuery(_) => EventName::SearchQuery,
            EventData::AddToCart(_) => EventName::AddToCart,
            EventData::FormInteraction(_) => EventName::FormInteraction,
            EventData::ConsultationInterest(_) => EventName::ConsultationInterest,
            EventData::ScrollDepth(_) => EventName::ScrollDepth,
            EventData::VideoPlay(_) => EventName::VideoPlay,
            EventData::PlanComparison(_) => EventName::PlanComparison,
            EventData::CheckoutStart(_) => EventName::CheckoutStart,
            EventData::PaymentMethodSelect(_) => EventName::PaymentMethodSelect,
            EventData::PrescriptionUpload(_) => EventName::PrescriptionUpload,
            EventData::WhatsappClick(_) => EventName::WhatsappClick,
            EventData::ChatOpen(_) => EventName::ChatOpen,
            EventData::LinkClick(_) => EventName::LinkClick,
        }
    }

    /// Build a payload from an event name and its JSON data.
    pub fn from_parts(name: EventName, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        // Payloads whose fields are all optional may arrive as null
        let data = if data.is_null() {
            serde_json::json!({})
        } else {
            data
        };
        serde_json::from_value(serde_json::json!({
            "eventName": name,
            "eventData": data,
        }))
    }

    /// Split into the event name and its JSON data.
    fn into_parts(self) -> (EventName, serde_json::Value) {
        let name = self.name();
        let data = serde_json::to_value(&self)
            .ok()
            .and_then(|mut v| v.get_mut("eventData").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        (name, data)
    }
}

/// A captured interaction. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct TrackingEvent {
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
    pub url: String,
    pub referrer: String,
    pub session_id: String,
}

impl TrackingEvent {
    pub fn name(&self) -> EventName {
        self.data.name()
    }

    /// Age relative to `now` in fractional minutes. Future events have age zero.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.timestamp).num_milliseconds().max(0);
        millis as f64 / 60_000.0
    }
}

/// Persisted and wire representation, timestamps in epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    timestamp: i64,
    event_name: EventName,
    #[serde(default)]
    event_data: serde_json::Value,
    #[serde(default)]
    url: String,
    #[serde(default)]
    referrer: String,
    #[serde(default)]
    session_id: String,
}

impl TryFrom<WireEvent> for TrackingEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let timestamp = Utc
            .timestamp_millis_opt(wire.timestamp)
            .single()
            .ok_or_else(|| format!("invalid timestamp {}", wire.timestamp))?;
        let data = EventData::from_parts(wire.event_name, wire.event_data)
            .map_err(|e| format!("invalid {} payload: {e}", wire.event_name))?;

        Ok(Self {
            timestamp,
            data,
            url: wire.url,
            referrer: wire.referrer,
            session_id: wire.session_id,
        })
    }
}

impl From<TrackingEvent> for WireEvent {
    fn from(event: TrackingEvent) -> Self {
        let (event_name, event_data) = event.data.into_parts();
        Self {
            timestamp: event.timestamp.timestamp_millis(),
            event_name,
            event_data,
            url: event.url,
            referrer: event.referrer,
            session_id: event.session_id,
        }
    }
}

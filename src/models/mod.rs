//! Data models for retailers, offers and discovery sessions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How a page delivers its offer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentMode {
    /// Offer data is present in the initial document.
    Static,
    /// Offer data only materialises after script execution.
    Rendered,
    /// Not classified yet.
    Unknown,
}

impl std::fmt::Display for ContentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Static => "static",
            Self::Rendered => "rendered",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// The closed set of publication shapes an adapter exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetailerKind {
    IndividualOffers,
    Catalog,
    ImageGallery,
}

/// A retailer enumerated from the platform listing, before extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerStub {
    pub name: String,
    pub business_id: String,
    pub url: String,
    pub logo_url: Option<String>,
    pub brand_color: Option<String>,
    pub category: Option<String>,
    /// Raw retailer-type tag read from the listing.
    pub tag: String,
    pub kind: RetailerKind,
    pub publication_id: Option<String>,
}

/// A retailer recorded for one city. Re-discovery for another city yields a
/// separate instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retailer {
    pub name: String,
    pub business_id: String,
    pub url: String,
    pub logo_url: Option<String>,
    pub brand_color: Option<String>,
    pub category: Option<String>,
    pub country: Option<String>,
    pub city: String,
    pub kind: RetailerKind,
    pub content_mode: ContentMode,
}

impl Retailer {
    pub fn from_stub(stub: &RetailerStub, context: &LocationContext, mode: ContentMode) -> Self {
        Self {
            name: stub.name.clone(),
            business_id: stub.business_id.clone(),
            url: stub.url.clone(),
            logo_url: stub.logo_url.clone(),
            brand_color: stub.brand_color.clone(),
            category: stub.category.clone(),
            country: context.country.clone(),
            city: context.city.clone(),
            kind: stub.kind,
            content_mode: mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

/// Offer validity, always with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawValidityWindow")]
pub struct ValidityWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawValidityWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawValidityWindow> for ValidityWindow {
    type Error = EngineError;

    fn try_from(raw: RawValidityWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl ValidityWindow {
    /// # Errors
    ///
    /// Returns [`EngineError::Parse`] when `start` is not strictly before `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::parse(
                "validity window",
                format!("start {start} is not before end {end}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// A normalised offer. Holds the owning retailer's business id, never the
/// retailer itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub business_id: String,
    pub publication_id: Option<String>,
    pub name: String,
    pub price: Option<Money>,
    pub original_price: Option<Decimal>,
    pub validity: Option<ValidityWindow>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl Offer {
    /// Stable de-duplication key: business id, normalised name and validity.
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.business_id, &self.name, self.validity.as_ref())
    }
}

fn dedup_key(business_id: &str, name: &str, validity: Option<&ValidityWindow>) -> String {
    let name = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let (start, end) = validity.map_or((String::new(), String::new()), |window| {
        (window.start.to_rfc3339(), window.end.to_rfc3339())
    });
    format!("{business_id}|{name}|{start}|{end}")
}

/// Loosely-typed offer fields as scraped, validated by [`OfferDraft::build`].
#[derive(Debug, Clone, Default)]
pub struct OfferDraft {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub original_price: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
}

impl OfferDraft {
    /// Validates the draft into an [`Offer`] owned by `business_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Parse`] when the name is missing, a price has
    /// no currency (or vice versa), the original price is below the current
    /// price, or the validity window is inverted.
    pub fn build(
        self,
        business_id: &str,
        publication_id: Option<&str>,
    ) -> Result<Offer, EngineError> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| EngineError::parse("offer", "missing name"))?;

        let price = match (self.price, self.currency) {
            (Some(amount), Some(currency)) => Some(Money { amount, currency }),
            (None, None) => None,
            (Some(amount), None) => {
                return Err(EngineError::parse(
                    format!("offer \"{name}\""),
                    format!("price {amount} has no currency"),
                ));
            }
            (None, Some(currency)) => {
                return Err(EngineError::parse(
                    format!("offer \"{name}\""),
                    format!("currency {currency} has no price"),
                ));
            }
        };

        let original_price = match (&price, self.original_price) {
            (Some(current), Some(original)) if original < current.amount => {
                return Err(EngineError::parse(
                    format!("offer \"{name}\""),
                    format!("original price {original} is below price {}", current.amount),
                ));
            }
            (None, Some(original)) => {
                return Err(EngineError::parse(
                    format!("offer \"{name}\""),
                    format!("original price {original} without a current price"),
                ));
            }
            (_, original) => original,
        };

        let validity = match (self.valid_from, self.valid_until) {
            (Some(start), Some(end)) => Some(ValidityWindow::new(start, end)?),
            _ => None,
        };

        let id = format!(
            "{:x}",
            md5::compute(dedup_key(business_id, &name, validity.as_ref()))
        );

        Ok(Offer {
            id,
            business_id: business_id.to_string(),
            publication_id: publication_id.map(str::to_string),
            name,
            price,
            original_price,
            validity,
            description: self.description.filter(|d| !d.trim().is_empty()),
            image_url: self.image_url,
            source_url: self.source_url,
            discovered_at: Utc::now(),
        })
    }
}

/// Declared outcomes that are neither offers nor errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Diagnostic {
    ExtractionUnsupported,
}

/// Result of extracting one retailer. Offers keep source document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extraction {
    pub offers: Vec<Offer>,
    pub diagnostic: Option<Diagnostic>,
}

impl Extraction {
    pub fn with_offers(offers: Vec<Offer>) -> Self {
        Self {
            offers,
            diagnostic: None,
        }
    }

    pub fn unsupported() -> Self {
        Self {
            offers: Vec::new(),
            diagnostic: Some(Diagnostic::ExtractionUnsupported),
        }
    }
}

/// Which location strategy produced a verified bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindStrategy {
    InputField,
    Dropdown,
    UrlRewrite,
}

impl std::fmt::Display for BindStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InputField => "input_field",
            Self::Dropdown => "dropdown",
            Self::UrlRewrite => "url_rewrite",
        };
        f.write_str(label)
    }
}

/// A verified city binding. Read-only after creation and scoped to a single
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationContext {
    pub requested_city: String,
    /// City as displayed by the platform after the bind.
    pub city: String,
    pub country: Option<String>,
    /// Page the platform showed once the city was bound; the retailer
    /// listing is read from here.
    pub landing_url: String,
    /// Session cookies to replay on static fetches.
    pub cookie_header: Option<String>,
    pub strategy: BindStrategy,
    pub bound_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerFailure {
    pub retailer: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerDiagnostic {
    pub retailer: String,
    pub marker: Diagnostic,
}

/// One orchestration run for one city.
#[derive(Debug)]
pub struct DiscoverySession {
    pub city: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub attempted: Vec<String>,
    pub retailers: Vec<Retailer>,
    pub offers: Vec<Offer>,
    pub failures: Vec<RetailerFailure>,
    pub diagnostics: Vec<RetailerDiagnostic>,
}

impl DiscoverySession {
    pub fn start(city: &str) -> Self {
        Self {
            city: city.to_string(),
            started_at: Utc::now(),
            status: SessionStatus::Running,
            attempted: Vec::new(),
            retailers: Vec::new(),
            offers: Vec::new(),
            failures: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, retailer: &str, reason: impl Into<String>) {
        self.failures.push(RetailerFailure {
            retailer: retailer.to_string(),
            reason: reason.into(),
        });
    }

    /// Closes a session whose location bind failed: nothing downstream is
    /// trustworthy, so retailers and offers are discarded.
    pub fn fail(mut self, error: &EngineError) -> SessionReport {
        self.retailers.clear();
        self.offers.clear();
        self.record_failure("location", error.to_string());
        self.status = SessionStatus::Failed;
        self.into_report()
    }

    pub fn finish(mut self) -> SessionReport {
        self.status = if self.failures.is_empty() {
            SessionStatus::Complete
        } else {
            SessionStatus::Partial
        };
        self.into_report()
    }

    fn into_report(self) -> SessionReport {
        SessionReport {
            city: self.city,
            started_at: self.started_at,
            finished_at: Utc::now(),
            status: self.status,
            attempted: self.attempted,
            retailers: self.retailers,
            offers: self.offers,
            failures: self.failures,
            diagnostics: self.diagnostics,
        }
    }
}

/// Finalised session, handed to storage/notification collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub city: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub attempted: Vec<String>,
    pub retailers: Vec<Retailer>,
    pub offers: Vec<Offer>,
    pub failures: Vec<RetailerFailure>,
    pub diagnostics: Vec<RetailerDiagnostic>,
}

use std::fmt;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, VariantArray};
use url::Url;

use crate::error::ScrapeError;
use crate::http::Transport;

static BUILD_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://assets-new\.ecomm\.ui\.com/_next/static/([A-Za-z0-9_-]+)/_ssgManifest\.js")
        .expect("build id pattern is valid")
});

#[derive(Display, Debug, VariantArray, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    #[strum(to_string = "all-switching")]
    Switching,
    #[strum(to_string = "all-unifi-cloud-gateways")]
    CloudGateways,
    #[strum(to_string = "all-wifi")]
    Wifi,
    #[strum(to_string = "all-cameras-nvrs")]
    CamerasNvrs,
    #[strum(to_string = "all-door-access")]
    DoorAccess,
    #[strum(to_string = "all-cloud-keys-gateways")]
    CloudKeysGateways,
    #[strum(to_string = "all-power-tech")]
    PowerTech,
    #[strum(to_string = "all-integrations")]
    Integrations,
    #[strum(to_string = "accessories-cables-dacs")]
    CablesDacs,
}

pub type ProductId = String;

/// Missing and `null` both decode to the type's default.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub short_description: String,
    #[serde(default, deserialize_with = "null_default")]
    pub slug: String,
    #[serde(default, deserialize_with = "null_default")]
    pub thumbnail: Thumbnail,
    #[serde(default, deserialize_with = "null_default")]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_price: Option<Price>,
}

/// Amount in minor units (cents) plus ISO currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default, deserialize_with = "null_default")]
    pub amount: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub currency: String,
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let cents = self.amount.unsigned_abs();
        write!(f, "{sign}${}.{:02}", cents / 100, cents % 100)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Listing {
    page_props: PageProps,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageProps {
    sub_categories: Vec<SubCategory>,
}

#[derive(Deserialize)]
struct SubCategory {
    #[serde(default, deserialize_with = "null_default")]
    products: Vec<serde_json::Value>,
}

/// Versioned data endpoint for one storefront deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    pub fn from_build_id(store_url: &Url, build_id: &str) -> Result<Self, url::ParseError> {
        store_url
            .join(&format!("/_next/data/{build_id}/us/en.json"))
            .map(Self)
    }

    pub fn category_url(&self, category: Category) -> Url {
        let mut url = self.0.clone();
        url.query_pairs_mut()
            .append_pair("category", &category.to_string())
            .append_pair("store", "us")
            .append_pair("language", "en");
        url
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

pub fn home_url(store_url: &Url) -> Result<Url, url::ParseError> {
    store_url.join("/us/en")
}

pub fn product_url(store_url: &Url, slug: &str) -> Result<Url, url::ParseError> {
    store_url.join(&format!("/us/en/products/{slug}"))
}

pub fn extract_build_id(html: &str) -> Option<&str> {
    BUILD_ID
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Reads the storefront home page and derives the current data endpoint.
pub fn resolve_endpoint(client: &dyn Transport, store_url: &Url) -> Result<Endpoint, ScrapeError> {
    let home = home_url(store_url).map_err(|_| ScrapeError::Parse(store_url.clone()))?;
    let res = client.get(&home)?.require_ok(&home)?;
    let build_id = extract_build_id(&res.body).ok_or_else(|| ScrapeError::Parse(home.clone()))?;
    info!("Extracted build id {build_id}");
    Endpoint::from_build_id(store_url, build_id).map_err(|_| ScrapeError::Parse(home))
}

/// Decodes products one at a time; an entry that cannot be read (no `id`,
/// wrong types) is logged and dropped without failing its neighbours.
pub fn decode_products(records: Vec<serde_json::Value>) -> Vec<Product> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<Product>(record) {
            Ok(product) => Some(product),
            Err(e) => {
                warn!("Skipping unreadable product: {e}");
                None
            }
        })
        .collect()
}

/// Flattens every subcategory of a listing, keeping listing order.
pub fn parse_listing(body: &str) -> serde_json::Result<Vec<Product>> {
    let listing: Listing = serde_json::from_str(body)?;
    Ok(decode_products(
        listing
            .page_props
            .sub_categories
            .into_iter()
            .flat_map(|s| s.products)
            .collect(),
    ))
}

pub fn fetch_category(
    client: &dyn Transport,
    endpoint: &Endpoint,
    category: Category,
) -> Result<Vec<Product>, ScrapeError> {
    let url = endpoint.category_url(category);
    let res = client.get(&url)?.require_ok(&url)?;
    let products =
        parse_listing(&res.body).map_err(|source| ScrapeError::Decode { category, source })?;
    debug!("Fetched {} products for {category}", products.len());
    Ok(products)
}

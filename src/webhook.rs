use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use crate::config::Config;
use crate::error::NotifyError;
use crate::http::Transport;
use crate::scraper::{self, Product};

const USERNAME: &str = "Unifi Store Monitor";
const ICON_URL: &str =
    "https://tse3.mm.bing.net/th?id=OIP.RadjPrUUrLwqfVTEI5YqmwHaIV&pid=Api&P=0&w=300&h=300";
const AUTHOR: &str = "🎉 **New Product Alert!** 🎉";
const EMBED_COLOR: u32 = 15277667;

#[derive(Debug, Serialize)]
pub struct Hook {
    pub username: String,
    pub avatar_url: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub thumbnail: Image,
    pub author: Author,
    pub description: String,
    pub fields: Vec<Field>,
    pub footer: Footer,
}

#[derive(Debug, Serialize)]
pub struct Image {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct Author {
    pub name: String,
    pub icon_url: String,
}

#[derive(Debug, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct Footer {
    pub text: String,
    pub icon_url: String,
}

fn field(name: &str, value: String) -> Field {
    Field {
        name: name.into(),
        value,
        inline: true,
    }
}

pub fn render_new_product(store_url: &Url, product: &Product, timestamp: DateTime<Utc>) -> Hook {
    let url = scraper::product_url(store_url, &product.slug)
        .map(String::from)
        .unwrap_or_else(|_| store_url.to_string());

    let mut fields = Vec::new();
    match product.variants.first() {
        Some(variant) => {
            fields.push(field("Variant", variant.id.clone()));
            match &variant.display_price {
                Some(price) => fields.push(field("Price", price.to_string())),
                None => warn!("Variant {} of {} has no price", variant.id, product.id),
            }
        }
        None => warn!("Product {} has no variants, omitting price", product.id),
    }

    let embed = Embed {
        title: product.title.clone(),
        color: EMBED_COLOR,
        url,
        timestamp,
        thumbnail: Image {
            url: product.thumbnail.url.clone(),
        },
        author: Author {
            name: AUTHOR.into(),
            icon_url: ICON_URL.into(),
        },
        description: format!("{}\n", product.short_description),
        fields,
        footer: Footer {
            text: USERNAME.into(),
            icon_url: ICON_URL.into(),
        },
    };

    Hook {
        username: USERNAME.into(),
        avatar_url: ICON_URL.into(),
        embeds: vec![embed],
    }
}

/// Posts new-product embeds to a Discord webhook.
pub struct Webhook {
    url: Url,
    store_url: Url,
    rate_limit_delay: Duration,
    rate_limit_retries: u32,
}

impl Webhook {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.webhook_url.clone(),
            store_url: config.store_url.clone(),
            rate_limit_delay: config.rate_limit_delay,
            rate_limit_retries: config.rate_limit_retries,
        }
    }

    pub fn send_product(&self, client: &dyn Transport, product: &Product) -> Result<(), NotifyError> {
        let payload = serde_json::to_value(render_new_product(&self.store_url, product, Utc::now()))?;

        let mut retries = 0;
        loop {
            let status = client.post_json(&self.url, &payload)?.status;
            if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
                info!("Sent notification for {}", product.id);
                return Ok(());
            }
            if status != StatusCode::TOO_MANY_REQUESTS {
                return Err(NotifyError::Rejected(status));
            }
            if retries >= self.rate_limit_retries {
                return Err(NotifyError::RateLimited(retries));
            }
            retries += 1;
            warn!(
                "Webhook rate limited, retrying in {:?} ({retries}/{})",
                self.rate_limit_delay, self.rate_limit_retries
            );
            thread::sleep(self.rate_limit_delay);
        }
    }
}

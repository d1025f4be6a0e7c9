use std::convert::Infallible;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use url::Url;

use crate::config::Config;
use crate::diff::compute_diff;
use crate::error::ScrapeError;
use crate::http::Transport;
use crate::scraper::{self, Category, Endpoint, Product};
use crate::storage::KnownProducts;
use crate::webhook::Webhook;

/// Outcome of one pass over every category.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub new_products: usize,
    pub notified: usize,
    pub skipped: Vec<Category>,
}

pub struct Monitor {
    client: Arc<dyn Transport>,
    webhook: Webhook,
    known: Mutex<KnownProducts>,
    /// Categories fetched at least once while the store was uninitialized.
    populated: Mutex<HashSet<Category>>,
    categories: Vec<Category>,
    store_url: Url,
    poll_interval: Duration,
    category_retry: Duration,
    resolve_attempts: u32,
    resolve_backoff: Duration,
}

impl Monitor {
    pub fn new(
        config: &Config,
        client: Arc<dyn Transport>,
        known: KnownProducts,
        categories: Vec<Category>,
    ) -> Self {
        Self {
            client,
            webhook: Webhook::new(config),
            known: Mutex::new(known),
            populated: Mutex::new(HashSet::new()),
            categories,
            store_url: config.store_url.clone(),
            poll_interval: config.poll_interval,
            category_retry: config.category_retry,
            resolve_attempts: config.resolve_attempts,
            resolve_backoff: config.resolve_backoff,
        }
    }

    /// Polls forever. Only returns once the endpoint cannot be resolved.
    pub fn run(&self) -> Result<Infallible, ScrapeError> {
        info!("Starting monitor for {} categories", self.categories.len());
        loop {
            let report = self.poll_once()?;
            info!(
                "Cycle done: {} new, {} notified, {} skipped. Sleeping for {:?}",
                report.new_products,
                report.notified,
                report.skipped.len(),
                self.poll_interval
            );
            thread::sleep(self.poll_interval);
        }
    }

    pub fn poll_once(&self) -> Result<CycleReport, ScrapeError> {
        let endpoint = self.resolve_with_retry()?;
        debug!("Polling {}", endpoint.as_url());
        let mut report = CycleReport::default();
        let mut new_products: Vec<Product> = Vec::new();

        for &category in &self.categories {
            let listing = match scraper::fetch_category(self.client.as_ref(), &endpoint, category) {
                Ok(listing) => listing,
                Err(e) => {
                    error!("Failed to fetch {category}: {e}");
                    report.skipped.push(category);
                    thread::sleep(self.category_retry);
                    continue;
                }
            };

            let (diff, announce) = {
                let mut known = self.lock();
                let mut populated = self.populated.lock().unwrap_or_else(PoisonError::into_inner);
                // A category's first successful fetch on a fresh store is silent.
                let announce = known.is_initialized() || !populated.insert(category);
                (compute_diff(&mut known, listing), announce)
            };
            if diff.is_empty() {
                continue;
            }

            if announce {
                for product in &diff.new_products {
                    match self.webhook.send_product(self.client.as_ref(), product) {
                        Ok(()) => report.notified += 1,
                        Err(e) => error!("Failed to notify {}: {e}", product.id),
                    }
                }
            } else {
                info!(
                    "Recorded {} products from {category} without notifying (initial populate)",
                    diff.new_products.len()
                );
            }
            new_products.extend(diff.new_products);
        }

        report.new_products = new_products.len();
        let mut known = self.lock();
        if !new_products.is_empty() {
            if let Err(e) = known.persist(&new_products) {
                error!("Failed to save known products: {e}");
            }
        }
        if !known.is_initialized() {
            let populated = self.populated.lock().unwrap_or_else(PoisonError::into_inner);
            if self.categories.iter().all(|c| populated.contains(c)) {
                info!("Initial populate of {} finished", known.path().display());
                known.mark_initialized();
            }
        }
        Ok(report)
    }

    fn resolve_with_retry(&self) -> Result<Endpoint, ScrapeError> {
        let mut backoff = self.resolve_backoff;
        let mut attempt = 1;
        loop {
            match scraper::resolve_endpoint(self.client.as_ref(), &self.store_url) {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) if attempt >= self.resolve_attempts => {
                    return Err(ScrapeError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!("Failed to resolve endpoint (attempt {attempt}), retrying in {backoff:?}: {e}");
                    thread::sleep(backoff);
                    backoff = next_backoff(backoff);
                    attempt += 1;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, KnownProducts> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_backoff(backoff: Duration) -> Duration {
    backoff.saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use strum::VariantArray;
    use tempfile::TempDir;

    use super::*;
    use crate::config::Overrides;
    use crate::http::fake::FakeTransport;
    use crate::scraper::tests::{HOME, category_url, homepage, listing, product};
    use crate::webhook::tests::WEBHOOK;

    fn config(dir: &TempDir) -> Config {
        let overrides: Overrides = serde_yaml::from_str(&format!(
            "discord_webhook_url: {WEBHOOK}\n\
             products_file: {}\n\
             poll_interval_secs: 0\n\
             category_retry_secs: 0\n\
             resolve_backoff_secs: 0\n\
             rate_limit_delay_secs: 0\n",
            dir.path().join("products.json").display()
        ))
        .unwrap();
        Config::resolve(Overrides::default(), overrides).unwrap()
    }

    fn monitor(config: &Config, client: &Arc<FakeTransport>, categories: &[Category]) -> Monitor {
        let known = KnownProducts::load(&config.products_file);
        Monitor::new(config, client.clone(), known, categories.to_vec())
    }

    fn accepting_client() -> Arc<FakeTransport> {
        let client = Arc::new(FakeTransport::default());
        client.respond(WEBHOOK, 204, "");
        client
    }

    fn notified_titles(client: &FakeTransport) -> Vec<String> {
        client
            .posted()
            .iter()
            .map(|p| p["embeds"][0]["title"].as_str().unwrap().to_string())
            .collect()
    }

    fn seed(config: &Config, ids: &[&str]) {
        let products: Vec<_> = ids.iter().map(|id| product(id)).collect();
        fs::write(&config.products_file, serde_json::to_vec(&products).unwrap()).unwrap();
    }

    #[test]
    fn first_run_populates_without_notifying() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client.respond(&category_url(Category::Wifi), 200, listing(&[&["a", "b"]]));

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        let report = monitor.poll_once().unwrap();

        assert_eq!(report.new_products, 2);
        assert_eq!(report.notified, 0);
        assert!(client.posted().is_empty());
        assert!(KnownProducts::load(&config.products_file).contains("b"));
    }

    #[test]
    fn known_products_are_not_renotified_and_new_ones_are_once() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["a", "b"]);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client.respond(
            &category_url(Category::Wifi),
            200,
            listing(&[&["a"], &["b", "m"]]),
        );

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        let first = monitor.poll_once().unwrap();
        let second = monitor.poll_once().unwrap();

        assert_eq!(first.notified, 1);
        assert_eq!(second.new_products, 0);
        assert_eq!(notified_titles(&client), ["Product m"]);

        let reloaded = KnownProducts::load(&config.products_file);
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn steady_state_starts_after_initial_populate() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client
            .respond(&category_url(Category::Wifi), 200, listing(&[&["a"]]))
            .respond(&category_url(Category::Wifi), 200, listing(&[&["a", "n"]]));

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        monitor.poll_once().unwrap();
        monitor.poll_once().unwrap();

        assert_eq!(notified_titles(&client), ["Product n"]);
    }

    #[test]
    fn failing_category_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["a"]);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client.fail(&category_url(Category::Switching), "connection reset");
        client.respond(&category_url(Category::Wifi), 200, "<html>not json</html>");
        client.respond(&category_url(Category::DoorAccess), 200, listing(&[&["d"]]));

        let monitor = monitor(
            &config,
            &client,
            &[Category::Switching, Category::Wifi, Category::DoorAccess],
        );
        let report = monitor.poll_once().unwrap();

        assert_eq!(report.skipped, [Category::Switching, Category::Wifi]);
        assert_eq!(notified_titles(&client), ["Product d"]);
    }

    #[test]
    fn novelty_follows_category_then_listing_order() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["seed"]);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client.respond(&category_url(Category::Switching), 200, listing(&[&["s2", "s1"]]));
        client.respond(&category_url(Category::Wifi), 200, listing(&[&["w1"], &["s1"]]));

        let monitor = monitor(&config, &client, &[Category::Switching, Category::Wifi]);
        monitor.poll_once().unwrap();

        assert_eq!(
            notified_titles(&client),
            ["Product s2", "Product s1", "Product w1"]
        );
    }

    #[test]
    fn failed_notification_still_marks_product_known() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["a"]);
        let client = Arc::new(FakeTransport::default());
        client.respond(HOME, 200, homepage("abc123"));
        client.respond(&category_url(Category::Wifi), 200, listing(&[&["a", "x"]]));
        client.respond(WEBHOOK, 500, "");

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        let first = monitor.poll_once().unwrap();
        let second = monitor.poll_once().unwrap();

        assert_eq!(first.new_products, 1);
        assert_eq!(first.notified, 0);
        assert_eq!(second.new_products, 0);
        assert_eq!(client.posted().len(), 1);
    }

    #[test]
    fn endpoint_is_resolved_every_cycle() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["a"]);
        let client = accepting_client();
        client
            .respond(HOME, 200, homepage("abc123"))
            .respond(HOME, 200, homepage("def456"));
        client.respond(&category_url(Category::Wifi), 200, listing(&[&["a"]]));
        client.respond(
            "https://store.ui.com/_next/data/def456/us/en.json?category=all-wifi&store=us&language=en",
            200,
            listing(&[&["a", "z"]]),
        );

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        monitor.poll_once().unwrap();
        monitor.poll_once().unwrap();

        let home_hits = client.gets.lock().unwrap().iter().filter(|u| *u == HOME).count();
        assert_eq!(home_hits, 2);
        assert_eq!(notified_titles(&client), ["Product z"]);
    }

    #[test]
    fn resolution_retries_then_gives_up() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let client = accepting_client();
        client.respond(HOME, 502, "");

        let monitor = monitor(&config, &client, Category::VARIANTS);
        let err = monitor.poll_once().unwrap_err();

        assert!(matches!(err, ScrapeError::Exhausted { attempts: 3, .. }));
        assert_eq!(client.gets.lock().unwrap().len(), 3);
    }

    #[test]
    fn resolution_recovers_within_attempts() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["a"]);
        let client = accepting_client();
        client
            .respond(HOME, 200, "<html></html>")
            .respond(HOME, 200, homepage("abc123"));
        client.respond(&category_url(Category::Wifi), 200, listing(&[&["a"]]));

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        let report = monitor.poll_once().unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[test]
    fn category_skipped_during_first_run_is_populated_silently() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client
            .respond(&category_url(Category::Switching), 200, listing(&[&["s1"]]))
            .respond(&category_url(Category::Switching), 200, listing(&[&["s1", "s2"]]));
        client
            .respond(&category_url(Category::Wifi), 503, "")
            .respond(&category_url(Category::Wifi), 200, listing(&[&["w1", "w2", "w3"]]))
            .respond(&category_url(Category::Wifi), 200, listing(&[&["w1", "w2", "w3", "w4"]]));

        let monitor = monitor(&config, &client, &[Category::Switching, Category::Wifi]);
        let first = monitor.poll_once().unwrap();
        let second = monitor.poll_once().unwrap();
        let third = monitor.poll_once().unwrap();

        assert_eq!(first.skipped, [Category::Wifi]);
        assert_eq!(second.new_products, 4);
        assert_eq!(second.notified, 1);
        assert_eq!(third.notified, 1);
        assert_eq!(notified_titles(&client), ["Product s2", "Product w4"]);
    }

    #[test]
    fn failed_persist_keeps_products_known() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        seed(&config, &["a"]);
        let client = accepting_client();
        client.respond(HOME, 200, homepage("abc123"));
        client.respond(&category_url(Category::Wifi), 200, listing(&[&["a", "x"]]));

        let monitor = monitor(&config, &client, &[Category::Wifi]);
        fs::write(&config.products_file, "[{\"id\":").unwrap();

        let first = monitor.poll_once().unwrap();
        let second = monitor.poll_once().unwrap();

        assert_eq!(first.notified, 1);
        assert_eq!(second.new_products, 0);
        assert_eq!(client.posted().len(), 1);
        assert_eq!(fs::read_to_string(&config.products_file).unwrap(), "[{\"id\":");
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::MAX), Duration::MAX);
    }
}

use log::info;

use crate::scraper::Product;
use crate::storage::KnownProducts;

/// Products from one category listing that the store had not seen yet.
#[derive(Debug, Default)]
pub struct ProductDiff {
    pub new_products: Vec<Product>,
}

impl ProductDiff {
    pub fn is_empty(&self) -> bool {
        self.new_products.is_empty()
    }
}

/// Records every unseen product of `listing` in `known`, in listing order.
/// A product repeated across subcategories is reported once.
pub fn compute_diff(known: &mut KnownProducts, listing: Vec<Product>) -> ProductDiff {
    let mut diff = ProductDiff::default();
    for product in listing {
        if known.contains(&product.id) {
            continue;
        }
        info!("New product: {} ({})", product.title, product.id);
        known.record_new(product.clone());
        diff.new_products.push(product);
    }
    diff
}

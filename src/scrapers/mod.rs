pub mod athome;
pub mod browser;
pub mod characteristics;
pub mod extractor;
#[cfg(test)]
pub(crate) mod fake;
pub mod frontier;
pub mod immotop;
pub mod traits;
pub mod types;

pub use athome::AthomeAdapter;
pub use browser::{BrowserOptions, ChromeBrowser};
pub use extractor::{DetailExtractor, ExtractTimings};
pub use frontier::FrontierWalker;
pub use immotop::ImmotopAdapter;
pub use traits::{PageSession, SessionFactory, SiteAdapter};

use anyhow::{bail, Result};
use std::sync::Arc;

/// Every supported site family
pub fn site_adapters() -> Result<Vec<Arc<dyn SiteAdapter>>> {
    Ok(vec![Arc::new(AthomeAdapter::new()?), Arc::new(ImmotopAdapter::new()?)])
}

/// Adapter owning `index_url`
pub fn adapter_for(adapters: &[Arc<dyn SiteAdapter>], index_url: &str) -> Result<Arc<dyn SiteAdapter>> {
    match adapters.iter().find(|a| a.handles(index_url)) {
        Some(adapter) => Ok(Arc::clone(adapter)),
        None => bail!("No site adapter handles index {index_url}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_index_urls_by_host() {
        let adapters = site_adapters().unwrap();
        let adapter = adapter_for(&adapters, "https://www.immotop.lu/location/?ord=date").unwrap();
        assert_eq!(adapter.source_name(), "immotop");
        assert!(adapter_for(&adapters, "https://example.com/listings").is_err());
    }
}

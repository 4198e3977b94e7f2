//! Ordered candidate sources for the catalog.

use reqwest::Url;

use crate::config::SiteConfig;
use crate::{Result, ShelfLifeError};

/// Candidate catalog URLs in the order they are tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSources {
    candidates: Vec<Url>,
}

impl DataSources {
    /// Use an explicit candidate list
    pub fn new(candidates: Vec<Url>) -> Self {
        Self { candidates }
    }

    /// Build the standard list from site settings:
    ///
    /// 1. the data file relative to the page,
    /// 2. site-root-relative under the repository directory,
    /// 3. absolute on the page's origin,
    /// 4. the external mirrors, in configured order.
    ///
    /// Candidates that resolve to the same URL are still tried separately.
    pub fn from_site(site: &SiteConfig) -> Result<Self> {
        let page = Url::parse(&site.page_url)
            .map_err(|e| ShelfLifeError::Config(format!("invalid site.page_url: {}", e)))?;

        let join = |path: &str| {
            page.join(path)
                .map_err(|e| ShelfLifeError::Config(format!("cannot resolve {}: {}", path, e)))
        };

        let mut candidates = vec![
            join(&format!("./{}", site.data_file))?,
            join(&format!("/{}/{}", site.repo_name, site.data_file))?,
        ];

        let absolute = format!(
            "{}/{}/{}",
            page.origin().ascii_serialization(),
            site.repo_name,
            site.data_file
        );
        candidates.push(
            Url::parse(&absolute)
                .map_err(|e| ShelfLifeError::Config(format!("invalid origin URL: {}", e)))?,
        );

        for mirror in &site.mirrors {
            candidates.push(
                Url::parse(mirror)
                    .map_err(|e| ShelfLifeError::Config(format!("invalid mirror {}: {}", mirror, e)))?,
            );
        }

        Ok(Self { candidates })
    }

    /// Candidates in try order
    pub fn candidates(&self) -> &[Url] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

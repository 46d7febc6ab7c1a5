//! Brand catalog: aliases and per-source query terms, loaded from YAML.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// One tracked financial institution.
///
/// `aliases` drive the term matcher; catalog order doubles as the
/// tie-break order when two brands score equally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandConfig {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
    /// Exact company names as reported by the CFPB complaints API.
    #[serde(default)]
    pub cfpb_companies: Vec<String>,
    /// Search terms for Twitter/X recent search; falls back to `aliases`.
    #[serde(default)]
    pub twitter_terms: Vec<String>,
    /// Search terms for Google Trends; falls back to `aliases`.
    #[serde(default)]
    pub trends_terms: Vec<String>,
}

impl BrandConfig {
    /// Terms to use when querying Twitter for this brand.
    #[must_use]
    pub fn twitter_query_terms(&self) -> &[String] {
        if self.twitter_terms.is_empty() {
            &self.aliases
        } else {
            &self.twitter_terms
        }
    }

    /// Terms to use when querying Google Trends for this brand.
    #[must_use]
    pub fn trends_query_terms(&self) -> &[String] {
        if self.trends_terms.is_empty() {
            &self.aliases
        } else {
            &self.trends_terms
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrandsFile {
    pub brands: Vec<BrandConfig>,
    /// Subreddits the Reddit source polls.
    #[serde(default)]
    pub subreddits: Vec<String>,
}

impl BrandsFile {
    /// Look up a brand by id.
    #[must_use]
    pub fn brand(&self, id: &str) -> Option<&BrandConfig> {
        self.brands.iter().find(|b| b.id == id)
    }
}

/// Load and validate the brand catalog from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails
/// validation.
pub fn load_brands(path: &Path) -> Result<BrandsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::BrandsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let brands_file: BrandsFile =
        serde_yaml::from_str(&content).map_err(ConfigError::BrandsFileParse)?;

    validate_brands(&brands_file)?;

    Ok(brands_file)
}

fn validate_brands(brands_file: &BrandsFile) -> Result<(), ConfigError> {
    if brands_file.brands.is_empty() {
        return Err(ConfigError::Validation(
            "brand catalog must contain at least one brand".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for brand in &brands_file.brands {
        if brand.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "brand id must be non-empty".to_string(),
            ));
        }
        if !brand
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "brand id '{}' must be lowercase snake_case",
                brand.id
            )));
        }
        if !seen_ids.insert(brand.id.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate brand id: '{}'",
                brand.id
            )));
        }
        if brand.aliases.is_empty() {
            return Err(ConfigError::Validation(format!(
                "brand '{}' has no aliases",
                brand.id
            )));
        }
        if brand.aliases.iter().any(|a| a.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "brand '{}' has an empty alias",
                brand.id
            )));
        }
    }

    if brands_file
        .subreddits
        .iter()
        .any(|s| s.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "subreddit names must be non-empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brand(id: &str, aliases: &[&str]) -> BrandConfig {
        BrandConfig {
            id: id.to_string(),
            name: id.to_string(),
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            cfpb_companies: Vec::new(),
            twitter_terms: Vec::new(),
            trends_terms: Vec::new(),
        }
    }

    #[test]
    fn validate_rejects_empty_catalog() {
        let file = BrandsFile {
            brands: Vec::new(),
            subreddits: Vec::new(),
        };
        let err = validate_brands(&file).unwrap_err();
        assert!(err.to_string().contains("at least one brand"));
    }

    #[test]
    fn validate_rejects_duplicate_id() {
        let file = BrandsFile {
            brands: vec![brand("chase", &["Chase"]), brand("chase", &["Chase Bank"])],
            subreddits: Vec::new(),
        };
        let err = validate_brands(&file).unwrap_err();
        assert!(err.to_string().contains("duplicate brand id"));
    }

    #[test]
    fn validate_rejects_empty_alias_list() {
        let file = BrandsFile {
            brands: vec![brand("chase", &[])],
            subreddits: Vec::new(),
        };
        let err = validate_brands(&file).unwrap_err();
        assert!(err.to_string().contains("no aliases"));
    }

    #[test]
    fn validate_rejects_non_snake_case_id() {
        let file = BrandsFile {
            brands: vec![brand("TD-Bank", &["TD Bank"])],
            subreddits: Vec::new(),
        };
        let err = validate_brands(&file).unwrap_err();
        assert!(err.to_string().contains("snake_case"));
    }

    #[test]
    fn twitter_terms_fall_back_to_aliases() {
        let b = brand("pnc", &["PNC", "PNC Bank"]);
        assert_eq!(b.twitter_query_terms(), b.aliases.as_slice());

        let mut with_terms = b.clone();
        with_terms.twitter_terms = vec!["@PNCBank".to_string()];
        assert_eq!(with_terms.twitter_query_terms(), ["@PNCBank".to_string()]);
    }

    #[test]
    fn load_brands_from_real_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
            .join("brands.yaml");
        assert!(
            path.exists(),
            "brands.yaml missing at {path:?} — required for this test"
        );
        let brands_file = load_brands(&path).expect("brands.yaml should load");
        assert!(!brands_file.brands.is_empty());
        assert!(!brands_file.subreddits.is_empty());
        let td = brands_file.brand("td_bank").expect("td_bank present");
        assert!(td.aliases.iter().any(|a| a == "TD"));
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = r"
brands:
  - id: chase
    name: Chase
    aliases: [Chase, Chase Bank]
";
        let file: BrandsFile = serde_yaml::from_str(yaml).unwrap();
        assert!(validate_brands(&file).is_ok());
        assert!(file.subreddits.is_empty());
        assert!(file.brands[0].cfpb_companies.is_empty());
    }
}

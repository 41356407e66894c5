//! Runtime settings
//!
//! Settings come from an optional YAML file, then environment variables
//! (usually sourced from a dotenv file) override individual values.
//!
//! ```yaml
//! data_sources:
//!   csv_path: data
//!   api_base_url: http://localhost:8080/api
//!   api_endpoints:
//!     comments: comments
//!     reviews: reviews
//! etl:
//!   run_interval_minutes: 30
//!   parallel_extraction: true
//!   staging_path: staging
//! source_database: source.db
//! destination: analytics.db
//! ```

use eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Settings file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "etl.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_sources: DataSourceSettings,
    pub etl: EtlSettings,
    /// Relational source; the database extractor is skipped when unset
    pub source_database: Option<PathBuf>,
    pub destination: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_sources: DataSourceSettings::default(),
            etl: EtlSettings::default(),
            source_database: None,
            destination: PathBuf::from("analytics.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
    pub csv_path: PathBuf,
    pub csv_files: CsvFiles,
    /// The API extractor is skipped when unset
    pub api_base_url: Option<String>,
    pub api_endpoints: ApiEndpoints,
    pub api_key: Option<String>,
    pub api_timeout_secs: u64,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data"),
            csv_files: CsvFiles::default(),
            api_base_url: None,
            api_endpoints: ApiEndpoints::default(),
            api_key: None,
            api_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvFiles {
    pub customers: String,
    pub products: String,
    pub orders: String,
    pub order_details: String,
}

impl Default for CsvFiles {
    fn default() -> Self {
        Self {
            customers: "customers.csv".to_string(),
            products: "products.csv".to_string(),
            orders: "orders.csv".to_string(),
            order_details: "order_details.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoints {
    pub comments: String,
    /// Reviews are only fetched from the API when this is set
    pub reviews: Option<String>,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            comments: "comments".to_string(),
            reviews: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlSettings {
    pub run_interval_minutes: u64,
    pub parallel_extraction: bool,
    pub staging_path: PathBuf,
}

impl Default for EtlSettings {
    fn default() -> Self {
        Self {
            run_interval_minutes: 60,
            parallel_extraction: true,
            staging_path: PathBuf::from("staging"),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or [`DEFAULT_CONFIG_FILE`] if present), then
    /// apply environment overrides and validate.
    ///
    /// # Errors
    /// An explicitly given file that does not exist, unreadable or invalid
    /// YAML, an unparsable override, or invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::read(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::read(DEFAULT_CONFIG_FILE)?
            }
            None => {
                log::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                Self::default()
            }
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read a YAML settings file; missing keys take their defaults
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        // An empty file is an empty mapping, not an error
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Apply `ETL_*` overrides found through `lookup`.
    ///
    /// Empty values are treated as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("ETL_CSV_PATH") {
            self.data_sources.csv_path = PathBuf::from(value);
        }
        if let Some(value) = get("ETL_API_BASE_URL") {
            self.data_sources.api_base_url = Some(value);
        }
        if let Some(value) = get("ETL_API_KEY") {
            self.data_sources.api_key = Some(value);
        }
        if let Some(value) = get("ETL_RUN_INTERVAL_MINUTES") {
            self.etl.run_interval_minutes = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid ETL_RUN_INTERVAL_MINUTES: {}", value))?;
        }
        if let Some(value) = get("ETL_PARALLEL") {
            self.etl.parallel_extraction = parse_flag(&value)
                .ok_or_else(|| eyre!("Invalid ETL_PARALLEL: expected true or false, got {}", value))?;
        }
        if let Some(value) = get("ETL_STAGING_PATH") {
            self.etl.staging_path = PathBuf::from(value);
        }
        if let Some(value) = get("ETL_SOURCE_DB") {
            self.source_database = Some(PathBuf::from(value));
        }
        if let Some(value) = get("ETL_DESTINATION_DB") {
            self.destination = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.etl.run_interval_minutes == 0 {
            bail!("run_interval_minutes must be at least 1");
        }
        if self.data_sources.api_timeout_secs == 0 {
            bail!("api_timeout_secs must be at least 1");
        }
        self.api_url()?;
        Ok(())
    }

    /// Parsed API base URL, `None` when the API source is not configured
    pub fn api_url(&self) -> Result<Option<Url>> {
        match self.data_sources.api_base_url.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Url::parse(raw)
                .map(Some)
                .with_context(|| format!("Invalid API base URL: {}", raw)),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.data_sources.api_timeout_secs)
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.etl.run_interval_minutes * 60)
    }

    /// Path of a CSV file under the configured CSV directory
    pub fn csv_file(&self, file_name: &str) -> PathBuf {
        self.data_sources.csv_path.join(file_name)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.etl.run_interval_minutes, 60);
        assert!(settings.etl.parallel_extraction);
        assert_eq!(settings.etl.staging_path, PathBuf::from("staging"));
        assert_eq!(settings.data_sources.api_endpoints.comments, "comments");
        assert_eq!(settings.data_sources.api_endpoints.reviews, None);
        assert_eq!(settings.api_timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.csv_file(&settings.data_sources.csv_files.order_details),
            PathBuf::from("data").join("order_details.csv")
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etl.yml");
        std::fs::write(
            &path,
            "etl:\n  run_interval_minutes: 5\ndata_sources:\n  api_base_url: http://localhost:9000/api\n",
        )
        .unwrap();

        let settings = Settings::read(&path).unwrap();

        assert_eq!(settings.etl.run_interval_minutes, 5);
        assert!(settings.etl.parallel_extraction);
        assert_eq!(settings.data_sources.csv_files.customers, "customers.csv");
        assert_eq!(
            settings.api_url().unwrap().unwrap().as_str(),
            "http://localhost:9000/api"
        );
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etl.yml");
        std::fs::write(&path, "\n").unwrap();

        assert_eq!(Settings::read(&path).unwrap(), Settings::default());
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::default();

        settings
            .apply_overrides(lookup(&[
                ("ETL_CSV_PATH", "/srv/csv"),
                ("ETL_PARALLEL", "false"),
                ("ETL_RUN_INTERVAL_MINUTES", "15"),
                ("ETL_SOURCE_DB", "source.db"),
                ("ETL_API_KEY", ""),
            ]))
            .unwrap();

        assert_eq!(settings.data_sources.csv_path, PathBuf::from("/srv/csv"));
        assert!(!settings.etl.parallel_extraction);
        assert_eq!(settings.run_interval(), Duration::from_secs(15 * 60));
        assert_eq!(settings.source_database, Some(PathBuf::from("source.db")));
        assert_eq!(settings.data_sources.api_key, None);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut settings = Settings::default();
        assert!(
            settings
                .apply_overrides(lookup(&[("ETL_PARALLEL", "maybe")]))
                .is_err()
        );
        assert!(
            settings
                .apply_overrides(lookup(&[("ETL_RUN_INTERVAL_MINUTES", "soon")]))
                .is_err()
        );
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.etl.run_interval_minutes = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.data_sources.api_base_url = Some("not a url".to_string());
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.data_sources.api_base_url = Some("  ".to_string());
        assert_eq!(settings.api_url().unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yml");
        std::fs::write(&path, "etl:\n  staging_path: from-file\n").unwrap();

        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var("ETL_STAGING_PATH", "from-env") };
        let settings = Settings::load(Some(path.as_path()));
        unsafe { std::env::remove_var("ETL_STAGING_PATH") };

        assert_eq!(
            settings.unwrap().etl.staging_path,
            PathBuf::from("from-env")
        );
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        assert!(Settings::load(Some(temp.path().join("absent.yml").as_path())).is_err());
    }
}

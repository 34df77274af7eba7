use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use ledger_core::parse_date;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tax_optimizer::LotFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub ledger_path: PathBuf,            // ledger.json
    pub quotes_path: Option<PathBuf>,    // {symbol: price}
    pub as_of: NaiveDate,                // today (UTC)
    pub tax_year: Option<i32>,           // all years when unset
    pub harvest_limit: usize,            // 10
    pub lot_filter: LotFilter,           // all
}

impl ReportConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let as_of = match lookup("TAX_AS_OF") {
            Some(text) => parse_date(&text).context("Invalid TAX_AS_OF")?,
            None => Utc::now().date_naive(),
        };

        let tax_year = lookup("TAX_YEAR")
            .map(|v| v.parse::<i32>())
            .transpose()
            .context("Invalid TAX_YEAR")?;

        let lot_filter = lookup("TAX_LOT_FILTER")
            .map(|v| v.parse::<LotFilter>())
            .transpose()
            .map_err(anyhow::Error::msg)
            .context("Invalid TAX_LOT_FILTER")?
            .unwrap_or_default();

        Ok(Self {
            ledger_path: lookup("TAX_LEDGER_PATH")
                .unwrap_or_else(|| "ledger.json".to_string())
                .into(),
            quotes_path: lookup("TAX_QUOTES_PATH").map(PathBuf::from),
            as_of,
            tax_year,
            harvest_limit: lookup("TAX_HARVEST_LIMIT")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("Invalid TAX_HARVEST_LIMIT")?,
            lot_filter,
        })
    }

    /// Command-line flags take precedence over the environment
    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        let flag = |name: &str| {
            args.iter()
                .position(|a| a == name)
                .and_then(|i| args.get(i + 1))
                .map(|s| s.as_str())
        };

        if let Some(path) = flag("--ledger") {
            self.ledger_path = path.into();
        }
        if let Some(path) = flag("--quotes") {
            self.quotes_path = Some(path.into());
        }
        if let Some(date) = flag("--as-of") {
            self.as_of = parse_date(date).context("Invalid --as-of")?;
        }
        if let Some(year) = flag("--year") {
            self.tax_year = Some(year.parse().context("Invalid --year")?);
        }
        if let Some(filter) = flag("--lots") {
            self.lot_filter = filter.parse().map_err(anyhow::Error::msg)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ReportConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ReportConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.ledger_path, PathBuf::from("ledger.json"));
        assert_eq!(config.quotes_path, None);
        assert_eq!(config.tax_year, None);
        assert_eq!(config.harvest_limit, 10);
        assert_eq!(config.lot_filter, LotFilter::All);
    }

    #[test]
    fn test_env_values() {
        let config = config(&[
            ("TAX_LEDGER_PATH", "/data/2024.json"),
            ("TAX_QUOTES_PATH", "quotes.json"),
            ("TAX_AS_OF", "2024-12-31"),
            ("TAX_YEAR", "2024"),
            ("TAX_HARVEST_LIMIT", "5"),
            ("TAX_LOT_FILTER", "lt"),
        ])
        .unwrap();

        assert_eq!(config.ledger_path, PathBuf::from("/data/2024.json"));
        assert_eq!(config.quotes_path, Some(PathBuf::from("quotes.json")));
        assert_eq!(config.as_of, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(config.tax_year, Some(2024));
        assert_eq!(config.harvest_limit, 5);
        assert_eq!(config.lot_filter, LotFilter::LongTerm);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[("TAX_YEAR", "last")]).is_err());
        assert!(config(&[("TAX_AS_OF", "soon")]).is_err());
        assert!(config(&[("TAX_HARVEST_LIMIT", "-1")]).is_err());
    }

    #[test]
    fn test_args_override_env() {
        let mut config = config(&[("TAX_YEAR", "2023")]).unwrap();
        let args: Vec<String> = ["tax-report", "--ledger", "trades.json", "--year", "2024", "--as-of", "12/31/2024"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_args(&args).unwrap();

        assert_eq!(config.ledger_path, PathBuf::from("trades.json"));
        assert_eq!(config.tax_year, Some(2024));
        assert_eq!(config.as_of, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        let bad: Vec<String> = vec!["--year".to_string(), "soon".to_string()];
        assert!(config.apply_args(&bad).is_err());
    }
}

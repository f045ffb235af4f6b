use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::DB_FILE;
use crate::error::{LinkError, Result};

/// Every tunable of the matching formula. Tolerances are in currency units, windows in days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub exact_amount_tolerance: f64,
    pub installment_amount_tolerance: f64,
    pub installment_min_parts: u32,
    pub installment_max_parts: u32,
    /// How many days a bank line may clear before the receipt date.
    pub early_days: i64,
    pub late_days: i64,
    /// Late window for receipts that look like invoices (net-30 style payment).
    pub invoice_late_days: i64,
    pub installment_late_days: i64,
    pub installment_min_name_similarity: f64,
    pub base_score: f64,
    pub date_penalty_per_day: f64,
    pub max_date_penalty: f64,
    pub name_bonus_threshold: f64,
    pub name_bonus: f64,
    pub installment_penalty: f64,
    pub accept_threshold: f64,
    pub manual_amount_tolerance: f64,
    pub manual_date_check: bool,
    pub manual_date_window_days: i64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            exact_amount_tolerance: 0.05,
            installment_amount_tolerance: 1.0,
            installment_min_parts: 2,
            installment_max_parts: 12,
            early_days: 1,
            late_days: 5,
            invoice_late_days: 45,
            installment_late_days: 180,
            installment_min_name_similarity: 0.85,
            base_score: 0.9,
            date_penalty_per_day: 0.05,
            max_date_penalty: 0.2,
            name_bonus_threshold: 0.8,
            name_bonus: 0.1,
            installment_penalty: 0.05,
            accept_threshold: 0.70,
            manual_amount_tolerance: 0.05,
            manual_date_check: false,
            manual_date_window_days: 5,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.installment_min_parts < 2 || self.installment_max_parts < self.installment_min_parts {
            return Err(LinkError::Settings(format!(
                "installment parts must satisfy 2 <= min <= max, got {}..{}",
                self.installment_min_parts, self.installment_max_parts
            )));
        }
        if self.early_days < 0 || self.late_days < 0 || self.invoice_late_days < self.late_days {
            return Err(LinkError::Settings("date windows must be non-negative and invoice window >= default".into()));
        }
        if !(0.0..=1.0).contains(&self.accept_threshold) {
            return Err(LinkError::Settings(format!(
                "accept_threshold must be within 0..1, got {}",
                self.accept_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub matching: MatchConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            log_level: default_log_level(),
            matching: MatchConfig::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(DB_FILE)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("uploads")
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ledgerlink")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("ledgerlink")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| LinkError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    Receipt,
    BankStatement,
    Unknown,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receipt => "RECEIPT",
            Self::BankStatement => "BANK_STATEMENT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for DocType {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RECEIPT" => Ok(Self::Receipt),
            "BANK_STATEMENT" => Ok(Self::BankStatement),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(LinkError::InvalidArgument(format!("unknown document type: {other}"))),
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocStatus {
    Pending,
    #[default]
    Processed,
    Error,
    ManualEdited,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Error => "ERROR",
            Self::ManualEdited => "MANUAL_EDITED",
        }
    }
}

impl FromStr for DocStatus {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSED" => Ok(Self::Processed),
            "ERROR" => Ok(Self::Error),
            "MANUAL_EDITED" => Ok(Self::ManualEdited),
            other => Err(LinkError::InvalidArgument(format!("unknown document status: {other}"))),
        }
    }
}

/// How a transaction came to hold its receipt link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Full-amount match corroborated by the merchant name.
    Auto,
    /// Full-amount match on amount and date alone.
    AutoFuzzy,
    /// One of `n` equal parts of the receipt total.
    Installment(u32),
    Manual,
}

impl MatchType {
    pub fn is_installment(&self) -> bool {
        matches!(self, Self::Installment(_))
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("AUTO"),
            Self::AutoFuzzy => f.write_str("AUTO_FUZZY"),
            Self::Installment(n) => write!(f, "INSTALLMENT({n})"),
            Self::Manual => f.write_str("MANUAL"),
        }
    }
}

impl FromStr for MatchType {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(Self::Auto),
            "AUTO_FUZZY" => Ok(Self::AutoFuzzy),
            "MANUAL" => Ok(Self::Manual),
            other => other
                .strip_prefix("INSTALLMENT(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|n| n.parse().ok())
                .map(Self::Installment)
                .ok_or_else(|| LinkError::MalformedRecord(format!("unknown match type: {other}"))),
        }
    }
}

impl Serialize for MatchType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialDocument {
    pub id: i64,
    pub filename: String,
    pub original_filename: Option<String>,
    pub doc_type: DocType,
    pub file_hash: String,
    pub status: DocStatus,
    pub competence_month: Option<u32>,
    pub competence_year: Option<i32>,
    pub raw_text: Option<String>,
}

/// The `receipt_id` / `match_score` / `match_type` triple. Always set or cleared together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Link {
    pub receipt_id: i64,
    pub match_score: f64,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub document_id: i64,
    pub merchant_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub category: Option<String>,
    pub competence_month: Option<u32>,
    pub competence_year: Option<i32>,
    pub is_finalized: bool,
    pub link: Option<Link>,
}

impl Transaction {
    /// Accounting period: explicit competence when set, else the calendar month of `date`.
    pub fn period(&self) -> (u32, i32) {
        (
            self.competence_month.unwrap_or_else(|| self.date.month()),
            self.competence_year.unwrap_or_else(|| self.date.year()),
        )
    }
}

/// A document as handed over by ingestion, before it has an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    #[serde(default)]
    pub original_filename: Option<String>,
    pub doc_type: DocType,
    #[serde(default)]
    pub status: DocStatus,
    #[serde(default)]
    pub competence_month: Option<u32>,
    #[serde(default)]
    pub competence_year: Option<i32>,
    #[serde(default)]
    pub raw_text: Option<String>,
    /// Original file to store alongside the record.
    #[serde(default, skip_serializing)]
    pub source: Option<String>,
    #[serde(default, skip_serializing)]
    pub file_hash: Option<String>,
}

/// A transaction as handed over by ingestion. Link fields are never part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub merchant_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub competence_month: Option<u32>,
    #[serde(default)]
    pub competence_year: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_text_form() {
        assert_eq!(MatchType::Installment(3).to_string(), "INSTALLMENT(3)");
        assert_eq!("INSTALLMENT(12)".parse::<MatchType>().unwrap(), MatchType::Installment(12));
        assert_eq!("AUTO_FUZZY".parse::<MatchType>().unwrap(), MatchType::AutoFuzzy);
        assert_eq!("MANUAL".parse::<MatchType>().unwrap(), MatchType::Manual);
        assert!("INSTALLMENT(x)".parse::<MatchType>().is_err());
        assert!("auto".parse::<MatchType>().is_err());
    }

    #[test]
    fn test_doc_type_parse_is_case_insensitive() {
        assert_eq!("receipt".parse::<DocType>().unwrap(), DocType::Receipt);
        assert_eq!("BANK_STATEMENT".parse::<DocType>().unwrap(), DocType::BankStatement);
        assert!("invoice".parse::<DocType>().is_err());
    }

    #[test]
    fn test_period_prefers_competence() {
        let mut txn = Transaction {
            id: 1,
            document_id: 1,
            merchant_name: "X".into(),
            date: NaiveDate::from_ymd_opt(2025, 11, 10).unwrap(),
            amount: -10.0,
            category: None,
            competence_month: None,
            competence_year: None,
            is_finalized: false,
            link: None,
        };
        assert_eq!(txn.period(), (11, 2025));
        txn.competence_month = Some(10);
        assert_eq!(txn.period(), (10, 2025));
    }

    #[test]
    fn test_new_transaction_deserializes_iso_dates() {
        let json = r#"{"merchant_name": "SURYA DENTAL", "date": "2025-10-15", "amount": 845.73}"#;
        let txn: NewTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(txn.date, NaiveDate::from_ymd_opt(2025, 10, 15).unwrap());
        assert!(txn.category.is_none());
    }
}

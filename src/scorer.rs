use std::sync::OnceLock;

use regex::Regex;

use crate::error::{LinkError, Result};
use crate::models::{MatchType, Transaction};
use crate::settings::MatchConfig;
use crate::similarity::name_similarity;

/// A receipt transaction that survived every gate for a given bank line.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub receipt_txn_id: i64,
    pub receipt_doc_id: i64,
    pub match_type: MatchType,
    pub score: f64,
    /// Bank date minus receipt date, in days. Positive means the bank cleared later.
    pub date_delta: i64,
    pub name_score: f64,
}

impl Candidate {
    pub fn date_penalty(&self) -> i64 {
        self.date_delta.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountMatch {
    Exact,
    Installment(u32),
}

fn invoice_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(nf-?e|nfs-?e|nota\s+fiscal|danfe|fatura|invoice|boleto|duplicata)\b")
            .expect("invoice pattern is valid")
    })
}

/// Whether a receipt's merchant name reads like an invoice with deferred payment terms.
pub fn looks_like_invoice(merchant_name: &str) -> bool {
    invoice_pattern().is_match(merchant_name)
}

/// Compare magnitudes: bank debits are negative, receipts positive.
pub fn amount_gate(bank_amount: f64, receipt_amount: f64, cfg: &MatchConfig) -> Option<AmountMatch> {
    let bank = bank_amount.abs();
    let receipt = receipt_amount.abs();
    if receipt <= cfg.exact_amount_tolerance {
        return None;
    }
    if (bank - receipt).abs() <= cfg.exact_amount_tolerance {
        return Some(AmountMatch::Exact);
    }

    // Closest part count wins; ties go to the smaller count.
    let mut best: Option<(u32, f64)> = None;
    for n in cfg.installment_min_parts..=cfg.installment_max_parts {
        let diff = (bank - receipt / n as f64).abs();
        if diff > cfg.installment_amount_tolerance {
            continue;
        }
        if best.map_or(true, |(_, best_diff)| diff < best_diff) {
            best = Some((n, diff));
        }
    }
    best.map(|(n, _)| AmountMatch::Installment(n))
}

/// Accepted `(earliest, latest)` day offsets of bank date relative to receipt date.
pub fn date_window(kind: AmountMatch, receipt_merchant: &str, cfg: &MatchConfig) -> (i64, i64) {
    let late = match kind {
        AmountMatch::Installment(_) => cfg.installment_late_days,
        AmountMatch::Exact if looks_like_invoice(receipt_merchant) => cfg.invoice_late_days,
        AmountMatch::Exact => cfg.late_days,
    };
    (-cfg.early_days, late)
}

pub fn compose_score(kind: AmountMatch, date_delta: i64, name_score: f64, cfg: &MatchConfig) -> f64 {
    let date_penalty = (date_delta.abs() as f64 * cfg.date_penalty_per_day).min(cfg.max_date_penalty);
    let mut score = cfg.base_score - date_penalty;
    if name_score > cfg.name_bonus_threshold {
        score += cfg.name_bonus;
    }
    if let AmountMatch::Installment(_) = kind {
        score -= cfg.installment_penalty;
    }
    score.clamp(0.0, 1.0)
}

/// Score one bank line against one receipt transaction.
///
/// `Ok(None)` is a rejection by one of the gates; `Err` means the pair could not be
/// evaluated at all and the caller should skip it.
pub fn score_pair(bank: &Transaction, receipt: &Transaction, cfg: &MatchConfig) -> Result<Option<Candidate>> {
    for txn in [bank, receipt] {
        if !txn.amount.is_finite() {
            return Err(LinkError::MalformedRecord(format!(
                "transaction {} has a non-finite amount",
                txn.id
            )));
        }
    }

    let Some(kind) = amount_gate(bank.amount, receipt.amount, cfg) else {
        return Ok(None);
    };

    let date_delta = (bank.date - receipt.date).num_days();
    let (earliest, latest) = date_window(kind, &receipt.merchant_name, cfg);
    if date_delta < earliest || date_delta > latest {
        return Ok(None);
    }

    let name_score = name_similarity(&bank.merchant_name, &receipt.merchant_name);
    if let AmountMatch::Installment(_) = kind {
        if name_score < cfg.installment_min_name_similarity {
            return Ok(None);
        }
    }

    let match_type = match kind {
        AmountMatch::Installment(n) => MatchType::Installment(n),
        AmountMatch::Exact if name_score > cfg.name_bonus_threshold => MatchType::Auto,
        AmountMatch::Exact => MatchType::AutoFuzzy,
    };

    Ok(Some(Candidate {
        receipt_txn_id: receipt.id,
        receipt_doc_id: receipt.document_id,
        match_type,
        score: compose_score(kind, date_delta, name_score, cfg),
        date_delta,
        name_score,
    }))
}


#[cfg(test)]
mod tests {
    use super::testutil::txn;
    use super::*;

    fn cfg() -> MatchConfig {
        MatchConfig::default()
    }

    #[test]
    fn test_amount_gate_compares_magnitudes() {
        assert_eq!(amount_gate(-100.00, 100.00, &cfg()), Some(AmountMatch::Exact));
        assert_eq!(amount_gate(-100.04, 100.00, &cfg()), Some(AmountMatch::Exact));
        assert_eq!(amount_gate(-100.06, 100.00, &cfg()), None);
    }

    #[test]
    fn test_amount_gate_falls_back_to_installments() {
        assert_eq!(amount_gate(-100.00, 300.00, &cfg()), Some(AmountMatch::Installment(3)));
        assert_eq!(amount_gate(-281.91, 845.73, &cfg()), Some(AmountMatch::Installment(3)));
        // 30 / 5 = 6.00 is within tolerance too, but 30 / 6 is exact.
        assert_eq!(amount_gate(-5.00, 30.00, &cfg()), Some(AmountMatch::Installment(6)));
        assert_eq!(amount_gate(-10.00, 1000.00, &cfg()), None);
    }

    #[test]
    fn test_amount_gate_rejects_zero_receipts() {
        assert_eq!(amount_gate(0.0, 0.0, &cfg()), None);
    }

    #[test]
    fn test_date_window_is_asymmetric() {
        let receipt = txn(2, 20, "PADARIA REAL", "2025-03-10", 42.00);
        let at = |date: &str| txn(1, 10, "PADARIA REAL", date, -42.00);
        assert!(score_pair(&at("2025-03-08"), &receipt, &cfg()).unwrap().is_none());
        assert!(score_pair(&at("2025-03-09"), &receipt, &cfg()).unwrap().is_some());
        assert!(score_pair(&at("2025-03-15"), &receipt, &cfg()).unwrap().is_some());
        assert!(score_pair(&at("2025-03-16"), &receipt, &cfg()).unwrap().is_none());
    }

    #[test]
    fn test_invoice_receipts_get_a_wider_late_window() {
        let receipt = txn(2, 20, "SABESP NF-E 000123", "2025-03-01", 120.00);
        let bank = txn(1, 10, "SABESP", "2025-03-31", -120.00);
        assert!(looks_like_invoice(&receipt.merchant_name));
        assert!(score_pair(&bank, &receipt, &cfg()).unwrap().is_some());

        let plain = txn(3, 30, "SABESP", "2025-03-01", 120.00);
        assert!(!looks_like_invoice(&plain.merchant_name));
        assert!(score_pair(&bank, &plain, &cfg()).unwrap().is_none());

        let too_late = txn(4, 10, "SABESP", "2025-04-16", -120.00);
        assert!(score_pair(&too_late, &receipt, &cfg()).unwrap().is_none());
    }

    #[test]
    fn test_installment_scenario() {
        let bank = txn(1, 10, "SURYA DENTAL", "2025-11-10", -281.91);
        let receipt = txn(2, 20, "SURYA DENTAL COM PROD ODONT", "2025-10-15", 845.73);
        let c = score_pair(&bank, &receipt, &cfg()).unwrap().unwrap();
        assert_eq!(c.match_type, MatchType::Installment(3));
        assert_eq!(c.date_delta, 26);
        assert_eq!(c.receipt_doc_id, 20);
        assert!(c.name_score > 0.85);
        assert!(c.score >= 0.70 && c.score <= 1.0, "score {}", c.score);
    }

    #[test]
    fn test_installment_needs_a_strong_name() {
        let bank = txn(1, 10, "PAG BOLETO 12345", "2025-11-10", -281.91);
        let receipt = txn(2, 20, "SURYA DENTAL COM PROD ODONT", "2025-10-15", 845.73);
        assert!(score_pair(&bank, &receipt, &cfg()).unwrap().is_none());
    }

    #[test]
    fn test_installment_window_allows_months_of_delay() {
        let receipt = txn(2, 20, "SURYA DENTAL", "2025-10-15", 845.73);
        let third = txn(1, 10, "SURYA DENTAL", "2026-01-10", -281.91);
        assert!(score_pair(&third, &receipt, &cfg()).unwrap().is_some());
        // 180 days late is the last accepted day.
        let edge = txn(4, 10, "SURYA DENTAL", "2026-04-13", -281.91);
        assert!(score_pair(&edge, &receipt, &cfg()).unwrap().is_some());
        let past_edge = txn(5, 10, "SURYA DENTAL", "2026-04-14", -281.91);
        assert!(score_pair(&past_edge, &receipt, &cfg()).unwrap().is_none());
        let far = txn(3, 10, "SURYA DENTAL", "2026-06-10", -281.91);
        assert!(score_pair(&far, &receipt, &cfg()).unwrap().is_none());
    }

    #[test]
    fn test_score_composition() {
        let c = cfg();
        assert!((compose_score(AmountMatch::Exact, 0, 1.0, &c) - 1.0).abs() < 1e-9);
        assert!((compose_score(AmountMatch::Exact, 0, 0.2, &c) - 0.9).abs() < 1e-9);
        assert!((compose_score(AmountMatch::Exact, 2, 0.2, &c) - 0.8).abs() < 1e-9);
        // Date penalty is capped.
        assert!((compose_score(AmountMatch::Exact, 30, 0.2, &c) - 0.7).abs() < 1e-9);
        assert!((compose_score(AmountMatch::Installment(3), 0, 1.0, &c) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_exact_prefers_direct_over_installment_for_same_pair() {
        let c = cfg();
        let direct = compose_score(AmountMatch::Exact, 3, 0.9, &c);
        let split = compose_score(AmountMatch::Installment(2), 3, 0.9, &c);
        assert!(direct > split);
    }

    #[test]
    fn test_match_type_reflects_name_evidence() {
        let receipt = txn(2, 20, "POSTO IPIRANGA", "2025-05-01", 200.00);
        let named = txn(1, 10, "POSTO IPIRANGA 042", "2025-05-01", -200.00);
        let unnamed = txn(3, 10, "COMPRA CARTAO", "2025-05-01", -200.00);
        assert_eq!(score_pair(&named, &receipt, &cfg()).unwrap().unwrap().match_type, MatchType::Auto);
        assert_eq!(score_pair(&unnamed, &receipt, &cfg()).unwrap().unwrap().match_type, MatchType::AutoFuzzy);
    }

    #[test]
    fn test_non_finite_amount_is_malformed() {
        let bank = txn(1, 10, "X", "2025-05-01", f64::NAN);
        let receipt = txn(2, 20, "X", "2025-05-01", 10.0);
        assert!(matches!(score_pair(&bank, &receipt, &cfg()), Err(LinkError::MalformedRecord(_))));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let bank = txn(1, 10, "SURYA DENTAL", "2025-11-10", -281.91);
        let receipt = txn(2, 20, "SURYA DENTAL COM PROD ODONT", "2025-10-15", 845.73);
        let first = score_pair(&bank, &receipt, &cfg()).unwrap();
        for _ in 0..5 {
            assert_eq!(score_pair(&bank, &receipt, &cfg()).unwrap(), first);
        }
    }
}

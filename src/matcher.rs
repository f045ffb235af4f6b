use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::{MatchType, Transaction};
use crate::scorer::{score_pair, Candidate};
use crate::settings::MatchConfig;

/// A link the strategy decided on, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedLink {
    pub bank_txn_id: i64,
    pub receipt_doc_id: i64,
    #[serde(skip)]
    pub receipt_txn_id: i64,
    pub score: f64,
    pub match_type: MatchType,
}

/// Which receipts are already spoken for, and how.
///
/// A receipt held by a full-amount link is closed to everyone. A receipt being
/// paid in installments only accepts further installments, up to its part count.
#[derive(Debug, Default)]
pub struct ReceiptClaims {
    full: HashSet<i64>,
    installments: HashMap<i64, u32>,
}

impl ReceiptClaims {
    /// Build from the `(receipt_id, match_type)` pairs of live links.
    pub fn from_links(links: &[(i64, Option<String>)]) -> Self {
        let mut claims = Self::default();
        for (receipt_id, tag) in links {
            let kind = tag
                .as_deref()
                .and_then(|t| t.parse::<MatchType>().ok())
                .unwrap_or(MatchType::Manual);
            claims.record(*receipt_id, kind);
        }
        claims
    }

    pub fn allows(&self, receipt_doc_id: i64, kind: MatchType) -> bool {
        if self.full.contains(&receipt_doc_id) {
            return false;
        }
        match kind {
            MatchType::Installment(parts) => self
                .installments
                .get(&receipt_doc_id)
                .map_or(true, |taken| *taken < parts),
            _ => !self.installments.contains_key(&receipt_doc_id),
        }
    }

    pub fn record(&mut self, receipt_doc_id: i64, kind: MatchType) {
        if kind.is_installment() {
            *self.installments.entry(receipt_doc_id).or_insert(0) += 1;
        } else {
            self.full.insert(receipt_doc_id);
        }
    }
}

#[derive(Debug, Default)]
pub struct Plan {
    pub links: Vec<PlannedLink>,
    /// Pairs that could not be scored at all.
    pub skipped_pairs: usize,
}

/// Closest date first, then the better name.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    a.date_penalty()
        .cmp(&b.date_penalty())
        .then_with(|| b.name_score.total_cmp(&a.name_score))
        .then_with(|| a.receipt_txn_id.cmp(&b.receipt_txn_id))
}

/// Pick the best-ranked candidate, if it clears the acceptance threshold.
pub fn select(mut candidates: Vec<Candidate>, cfg: &MatchConfig) -> Option<Candidate> {
    candidates.sort_by(rank);
    candidates
        .into_iter()
        .next()
        .filter(|best| best.score >= cfg.accept_threshold)
}

/// Decide links for `bank` lines, in order, against every receipt transaction.
///
/// Each accepted link updates `claims` before the next bank line is considered,
/// so one full-amount receipt is never handed to two bank lines in the same run.
pub fn plan_matches(
    bank: &[Transaction],
    receipts: &[Transaction],
    mut claims: ReceiptClaims,
    cfg: &MatchConfig,
) -> Plan {
    let mut plan = Plan::default();

    for bank_txn in bank {
        let mut candidates = Vec::new();
        for receipt_txn in receipts {
            match score_pair(bank_txn, receipt_txn, cfg) {
                Ok(Some(c)) if claims.allows(c.receipt_doc_id, c.match_type) => candidates.push(c),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        bank_txn = bank_txn.id,
                        receipt_txn = receipt_txn.id,
                        error = %e,
                        "skipping unscorable pair"
                    );
                    plan.skipped_pairs += 1;
                }
            }
        }

        let Some(best) = select(candidates, cfg) else {
            continue;
        };
        claims.record(best.receipt_doc_id, best.match_type);
        plan.links.push(PlannedLink {
            bank_txn_id: bank_txn.id,
            receipt_doc_id: best.receipt_doc_id,
            receipt_txn_id: best.receipt_txn_id,
            score: best.score,
            match_type: best.match_type,
        });
    }

    plan
}

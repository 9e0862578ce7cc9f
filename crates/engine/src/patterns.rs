//! Pattern engine — declarative rules evaluated against score vectors
//!
//! A pattern's conditions are a rule set over the merged score + trade
//! metric map. Operators are a closed variant set. Evaluation is pure: the
//! same (conditions, data) always yields the same (matched, score).

use chrono::Utc;
use persistence::repository::{
    InsiderRepository, PatternRepository, PatternValidation, ScoreRepository, TradeRecord,
    TradeScoreRecord,
};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

const FLOAT_EQ_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Rule DSL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "between")]
    Between,
}

/// A rule's comparison value: a number, or [lo, hi] for `between`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Number(f64),
    Range([f64; 2]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub metric: String,
    pub op: Operator,
    pub value: RuleValue,
}

impl Rule {
    /// A missing metric fails the rule; it is never defaulted.
    pub fn evaluate(&self, data: &HashMap<String, f64>) -> bool {
        let Some(actual) = data.get(&self.metric).copied() else {
            return false;
        };

        match (&self.op, &self.value) {
            (Operator::Gte, RuleValue::Number(v)) => actual >= *v,
            (Operator::Gt, RuleValue::Number(v)) => actual > *v,
            (Operator::Lte, RuleValue::Number(v)) => actual <= *v,
            (Operator::Lt, RuleValue::Number(v)) => actual < *v,
            (Operator::Eq, RuleValue::Number(v)) => (actual - v).abs() < FLOAT_EQ_EPSILON,
            (Operator::Ne, RuleValue::Number(v)) => (actual - v).abs() >= FLOAT_EQ_EPSILON,
            (Operator::Between, RuleValue::Range([lo, hi])) => actual >= *lo && actual <= *hi,
            // Mismatched operator/value shapes never match
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub logic: Logic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_matches: Option<usize>,
}

impl RuleSet {
    /// Evaluate against a metric map.
    /// AND: all rules pass, score 1.0. OR: at least min_matches (default 1)
    /// pass, score = matches / total.
    pub fn evaluate(&self, data: &HashMap<String, f64>) -> (bool, f64) {
        if self.rules.is_empty() {
            return (false, 0.0);
        }
        let matches = self.rules.iter().filter(|r| r.evaluate(data)).count();

        match self.logic {
            Logic::And => {
                if matches == self.rules.len() {
                    (true, 1.0)
                } else {
                    (false, 0.0)
                }
            }
            Logic::Or => {
                let needed = self.min_matches.unwrap_or(1).max(1);
                if matches >= needed {
                    (true, matches as f64 / self.rules.len() as f64)
                } else {
                    (false, 0.0)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Metric map
// ---------------------------------------------------------------------------

/// Merge a score row and its trade into the flat metric map rules see.
/// Only present values are inserted — a null z-score stays absent.
pub fn metric_map(score: &TradeScoreRecord, trade: &TradeRecord) -> HashMap<String, f64> {
    let mut map = HashMap::new();

    let mut put = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            if v.is_finite() {
                map.insert(key.to_string(), v);
            }
        }
    };

    put("size_zscore", score.size_zscore);
    put("timing_zscore", score.timing_zscore);
    put("wallet_age_zscore", score.wallet_age_zscore);
    put("wallet_activity_zscore", score.wallet_activity_zscore);
    put("price_extremity_zscore", score.price_extremity_zscore);
    put("position_concentration_zscore", score.position_concentration_zscore);
    put("funding_proximity_zscore", score.funding_proximity_zscore);
    put("anomaly_score", Some(score.anomaly_score));
    put("insider_probability", Some(score.insider_probability));
    put("trinity_pattern", Some(if score.trinity_pattern { 1.0 } else { 0.0 }));

    put("size", trade.size.parse::<f64>().ok());
    put("usdc_size", trade.usdc_size.parse::<f64>().ok());
    put("price", trade.price.parse::<f64>().ok());
    put("price_extremity", trade.price_extremity);
    put("hours_before_resolution", trade.hours_before_resolution);
    put("wallet_age_days", trade.wallet_age_days);
    put("wallet_trade_count", trade.wallet_trade_count.map(|c| c as f64));
    put("was_correct", trade.was_correct.map(|c| if c { 1.0 } else { 0.0 }));
    put(
        "profit_loss",
        trade.profit_loss.as_deref().and_then(|p| p.parse::<f64>().ok()),
    );

    map
}

/// Evaluate every active pattern, returning the ones that fire with their
/// scores.
pub fn match_patterns(
    patterns: &[persistence::repository::PatternRecord],
    data: &HashMap<String, f64>,
) -> BTreeMap<String, f64> {
    let mut matched = BTreeMap::new();
    for pattern in patterns {
        if !pattern.is_active {
            continue;
        }
        let rule_set: RuleSet = match serde_json::from_str(&pattern.conditions) {
            Ok(rs) => rs,
            Err(e) => {
                warn!(pattern = %pattern.pattern_name, error = %e, "Unparseable pattern conditions");
                continue;
            }
        };
        let (fired, score) = rule_set.evaluate(data);
        if fired {
            matched.insert(pattern.pattern_name.clone(), score);
        }
    }
    matched
}

// ---------------------------------------------------------------------------
// Seed library
// ---------------------------------------------------------------------------

pub struct SeedPattern {
    pub name: &'static str,
    pub description: &'static str,
    pub rule_set: RuleSet,
    pub alert_threshold: f64,
}

fn num_rule(metric: &str, op: Operator, value: f64) -> Rule {
    Rule {
        metric: metric.to_string(),
        op,
        value: RuleValue::Number(value),
    }
}

/// Default pattern library, tuned for this venue. Insiders trade large,
/// late, and from young wallets, so timing and wallet-age rules look at the
/// negative tail.
pub fn seed_patterns() -> Vec<SeedPattern> {
    vec![
        SeedPattern {
            name: "whale_trade",
            description: "Single fill far above the size baseline",
            rule_set: RuleSet {
                rules: vec![num_rule("size_zscore", Operator::Gte, 3.0)],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.7,
        },
        SeedPattern {
            name: "whale_correct",
            description: "Oversized fill that resolved correct",
            rule_set: RuleSet {
                rules: vec![
                    num_rule("size_zscore", Operator::Gte, 2.5),
                    num_rule("was_correct", Operator::Eq, 1.0),
                ],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.75,
        },
        SeedPattern {
            name: "extreme_whale_correct",
            description: "Extreme outlier size, resolved correct",
            rule_set: RuleSet {
                rules: vec![
                    num_rule("size_zscore", Operator::Gte, 4.0),
                    num_rule("was_correct", Operator::Eq, 1.0),
                ],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.85,
        },
        SeedPattern {
            name: "high_anomaly",
            description: "Weighted anomaly score in the alert band",
            rule_set: RuleSet {
                rules: vec![num_rule("anomaly_score", Operator::Gte, 0.7)],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.7,
        },
        SeedPattern {
            name: "high_anomaly_correct",
            description: "Anomalous and resolved correct",
            rule_set: RuleSet {
                rules: vec![
                    num_rule("anomaly_score", Operator::Gte, 0.6),
                    num_rule("was_correct", Operator::Eq, 1.0),
                ],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.75,
        },
        SeedPattern {
            name: "extreme_price_correct",
            description: "Entry at extreme odds that resolved correct",
            rule_set: RuleSet {
                rules: vec![
                    Rule {
                        metric: "price_extremity".into(),
                        op: Operator::Between,
                        value: RuleValue::Range([0.35, 0.5]),
                    },
                    num_rule("was_correct", Operator::Eq, 1.0),
                ],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.7,
        },
        SeedPattern {
            name: "multi_signal",
            description: "Any two of: oversized, late, young wallet, extreme odds",
            rule_set: RuleSet {
                rules: vec![
                    num_rule("size_zscore", Operator::Gte, 2.0),
                    num_rule("timing_zscore", Operator::Lte, -2.0),
                    num_rule("wallet_age_zscore", Operator::Lte, -2.0),
                    num_rule("price_extremity_zscore", Operator::Gte, 2.0),
                ],
                logic: Logic::Or,
                min_matches: Some(2),
            },
            alert_threshold: 0.65,
        },
        SeedPattern {
            name: "perfect_storm",
            description: "Oversized, late, and from a young wallet at once",
            rule_set: RuleSet {
                rules: vec![
                    num_rule("size_zscore", Operator::Gte, 2.0),
                    num_rule("timing_zscore", Operator::Lte, -2.0),
                    num_rule("wallet_age_zscore", Operator::Lte, -2.0),
                ],
                logic: Logic::And,
                min_matches: None,
            },
            alert_threshold: 0.9,
        },
    ]
}

/// Insert the seed library; existing rows are left untouched.
pub async fn seed_default_patterns(pool: &SqlitePool) -> persistence::DbResult<u64> {
    let repo = PatternRepository::new(pool);
    let mut inserted = 0u64;
    for seed in seed_patterns() {
        let conditions = serde_json::to_string(&seed.rule_set).expect("seed rule set serializes");
        if repo
            .insert_if_missing(seed.name, seed.description, &conditions, seed.alert_threshold)
            .await?
        {
            inserted += 1;
        }
    }
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationSummary {
    pub patterns_validated: u64,
    pub total_insiders: u64,
    pub total_trades: u64,
    pub avg_f1: Option<f64>,
}

/// Score every pattern against the labeled insider set: TP/FP, precision,
/// recall, F1, and lift over the base rate.
pub async fn validate_patterns(pool: &SqlitePool) -> anyhow::Result<ValidationSummary> {
    let insiders = InsiderRepository::new(pool).labeled_trade_ids().await?;
    let rows = ScoreRepository::new(pool).validation_rows().await?;
    let patterns = PatternRepository::new(pool).all().await?;
    let now = Utc::now().timestamp();

    let total_trades = rows.len() as i64;
    let total_insiders = insiders.len() as i64;

    // trade_id -> set of fired pattern names
    let fired: Vec<(i64, HashMap<String, f64>)> = rows
        .iter()
        .map(|row| {
            let map: HashMap<String, f64> =
                serde_json::from_str(&row.matched_patterns).unwrap_or_default();
            (row.trade_id, map)
        })
        .collect();

    let repo = PatternRepository::new(pool);
    let mut validated = 0u64;
    let mut f1_sum = 0.0;
    let mut f1_count = 0u64;

    for pattern in &patterns {
        let matched: Vec<i64> = fired
            .iter()
            .filter(|(_, map)| map.contains_key(&pattern.pattern_name))
            .map(|(trade_id, _)| *trade_id)
            .collect();

        let tp = matched.iter().filter(|id| insiders.contains(id)).count() as i64;
        let fp = matched.len() as i64 - tp;

        let precision = if tp + fp > 0 {
            Some(tp as f64 / (tp + fp) as f64)
        } else {
            None
        };
        let recall = if total_insiders > 0 {
            Some(tp as f64 / total_insiders as f64)
        } else {
            None
        };
        let f1 = match (precision, recall) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            _ => None,
        };
        let lift = match precision {
            Some(p) if total_insiders > 0 && total_trades > 0 => {
                let base_rate = total_insiders as f64 / total_trades as f64;
                Some(p / base_rate)
            }
            _ => None,
        };

        if let Some(f1_value) = f1 {
            f1_sum += f1_value;
            f1_count += 1;
        }

        repo.update_validation(
            &pattern.pattern_name,
            &PatternValidation {
                true_positives: tp,
                false_positives: fp,
                precision,
                recall,
                f1_score: f1,
                lift,
            },
            now,
        )
        .await?;
        validated += 1;
    }

    let summary = ValidationSummary {
        patterns_validated: validated,
        total_insiders: total_insiders as u64,
        total_trades: total_trades as u64,
        avg_f1: if f1_count > 0 { Some(f1_sum / f1_count as f64) } else { None },
    };
    info!(
        patterns = summary.patterns_validated,
        insiders = summary.total_insiders,
        "Pattern validation finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn data(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_operators() {
        let d = data(&[("x", 2.0)]);
        assert!(num_rule("x", Operator::Gte, 2.0).evaluate(&d));
        assert!(num_rule("x", Operator::Gt, 1.9).evaluate(&d));
        assert!(!num_rule("x", Operator::Gt, 2.0).evaluate(&d));
        assert!(num_rule("x", Operator::Lte, 2.0).evaluate(&d));
        assert!(num_rule("x", Operator::Lt, 2.1).evaluate(&d));
        assert!(num_rule("x", Operator::Eq, 2.0).evaluate(&d));
        assert!(num_rule("x", Operator::Ne, 3.0).evaluate(&d));
    }

    #[test]
    fn test_between_inclusive() {
        let rule = Rule {
            metric: "x".into(),
            op: Operator::Between,
            value: RuleValue::Range([1.0, 3.0]),
        };
        assert!(rule.evaluate(&data(&[("x", 1.0)])));
        assert!(rule.evaluate(&data(&[("x", 3.0)])));
        assert!(!rule.evaluate(&data(&[("x", 3.1)])));
    }

    #[test]
    fn test_missing_metric_fails_rule() {
        let rule = num_rule("absent", Operator::Gte, 0.0);
        assert!(!rule.evaluate(&data(&[("x", 100.0)])));
    }

    #[test]
    fn test_and_scores_one() {
        let rs = RuleSet {
            rules: vec![
                num_rule("a", Operator::Gte, 1.0),
                num_rule("b", Operator::Gte, 1.0),
            ],
            logic: Logic::And,
            min_matches: None,
        };
        let (matched, score) = rs.evaluate(&data(&[("a", 2.0), ("b", 2.0)]));
        assert!(matched);
        assert_eq!(score, 1.0);

        let (matched, score) = rs.evaluate(&data(&[("a", 2.0), ("b", 0.0)]));
        assert!(!matched);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_or_min_matches_and_fractional_score() {
        let rs = RuleSet {
            rules: vec![
                num_rule("a", Operator::Gte, 1.0),
                num_rule("b", Operator::Gte, 1.0),
                num_rule("c", Operator::Gte, 1.0),
                num_rule("d", Operator::Gte, 1.0),
            ],
            logic: Logic::Or,
            min_matches: Some(2),
        };
        // One match is below min_matches
        let (matched, _) = rs.evaluate(&data(&[("a", 2.0)]));
        assert!(!matched);
        // Two of four: score 0.5
        let (matched, score) = rs.evaluate(&data(&[("a", 2.0), ("c", 2.0)]));
        assert!(matched);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_evaluation_is_pure() {
        let rs = RuleSet {
            rules: vec![num_rule("a", Operator::Gte, 1.0)],
            logic: Logic::And,
            min_matches: None,
        };
        let d = data(&[("a", 1.5)]);
        assert_eq!(rs.evaluate(&d), rs.evaluate(&d));
    }

    #[test]
    fn test_operator_symbols_round_trip() {
        let rs = RuleSet {
            rules: vec![
                num_rule("size_zscore", Operator::Gte, 2.0),
                Rule {
                    metric: "price_extremity".into(),
                    op: Operator::Between,
                    value: RuleValue::Range([0.35, 0.5]),
                },
            ],
            logic: Logic::Or,
            min_matches: Some(1),
        };
        let json = serde_json::to_string(&rs).unwrap();
        assert!(json.contains("\">=\""));
        assert!(json.contains("\"between\""));
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rules.len(), 2);
        assert_eq!(back.rules[0].op, Operator::Gte);
    }

    #[test]
    fn test_seed_library_parses_and_fires() {
        // Scenario: whale-sized correct trade 24h out from a young wallet
        let d = data(&[
            ("size_zscore", 4.0),
            ("timing_zscore", -2.5),
            ("wallet_age_zscore", -2.2),
            ("was_correct", 1.0),
            ("anomaly_score", 0.55),
            ("price_extremity", 0.0),
        ]);

        let patterns: Vec<persistence::repository::PatternRecord> = seed_patterns()
            .into_iter()
            .map(|seed| persistence::repository::PatternRecord {
                id: None,
                pattern_name: seed.name.into(),
                description: seed.description.into(),
                conditions: serde_json::to_string(&seed.rule_set).unwrap(),
                alert_threshold: seed.alert_threshold,
                true_positives: 0,
                false_positives: 0,
                precision: None,
                recall: None,
                f1_score: None,
                lift: None,
                is_active: true,
                validated_at: None,
            })
            .collect();

        let matched = match_patterns(&patterns, &d);
        assert!(matched.contains_key("whale_trade"));
        assert!(matched.contains_key("whale_correct"));
        assert!(matched.contains_key("extreme_whale_correct"));
        assert!(matched.contains_key("perfect_storm"));
        assert!(matched.contains_key("multi_signal"));
        assert!(!matched.contains_key("high_anomaly"));
        // OR score is fractional: 3 of 4 signals fired
        assert!((matched["multi_signal"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_inactive_patterns_skipped() {
        let pattern = persistence::repository::PatternRecord {
            id: None,
            pattern_name: "dormant".into(),
            description: String::new(),
            conditions: serde_json::to_string(&RuleSet {
                rules: vec![num_rule("a", Operator::Gte, 0.0)],
                logic: Logic::And,
                min_matches: None,
            })
            .unwrap(),
            alert_threshold: 0.5,
            true_positives: 0,
            false_positives: 0,
            precision: None,
            recall: None,
            f1_score: None,
            lift: None,
            is_active: false,
            validated_at: None,
        };
        let matched = match_patterns(&[pattern], &data(&[("a", 1.0)]));
        assert!(matched.is_empty());
    }
}

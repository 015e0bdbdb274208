// =============================================================================
// ranking.rs — JOIN, FILTER, SORT, GROUP
// =============================================================================
//
// Pure functions over already-fetched data. Nothing in here touches the
// network, so everything in here is easy to test.
//
// Ranking is a stable sort by impact score, descending. Two orders with the
// same score keep the order the exchange returned them in.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{Announcement, ExtractedSignal, FinancialSnapshot, PriceSignals, ScoredOrder};
use crate::scorer::{impact_score, order_pct_of_market_cap, ImpactWeights, ScoreInputs};

/// Sector label used when the snapshot does not know it.
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Knobs for [`rank`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankOptions {
    /// Keep rows missing order value or market cap (they score 0 / "NA").
    pub include_unscored: bool,
    /// Drop rows scoring below this.
    pub min_score: f64,
    /// Keep only the first N rows after sorting.
    pub limit: Option<usize>,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            include_unscored: false,
            min_score: 0.0,
            limit: None,
        }
    }
}

/// Everything known about one announcement before scoring.
#[derive(Debug, Clone)]
pub struct EnrichedAnnouncement {
    pub announcement: Announcement,
    pub signal: ExtractedSignal,
    pub price_signals: PriceSignals,
}

/// Join announcements with their symbol's snapshot and score each row.
/// Rows keep their input order; a symbol without a snapshot gets an unknown one.
pub fn score_all(
    rows: Vec<EnrichedAnnouncement>,
    snapshots: &HashMap<String, FinancialSnapshot>,
    weights: &ImpactWeights,
) -> Vec<ScoredOrder> {
    rows.into_iter()
        .map(|row| {
            let snapshot = snapshots
                .get(&row.announcement.symbol)
                .cloned()
                .unwrap_or_else(|| FinancialSnapshot::unknown(row.announcement.symbol.clone()));
            let inputs = ScoreInputs::new(row.signal.order_value_cr, &snapshot, &row.price_signals);

            ScoredOrder {
                order_pct_of_mcap: order_pct_of_market_cap(row.signal.order_value_cr, snapshot.market_cap),
                impact_score: impact_score(&inputs, weights),
                next_day_move_pct: row.price_signals.next_day_move_pct,
                announcement: row.announcement,
                snapshot,
                signal: row.signal,
            }
        })
        .collect()
}

/// True when both numbers the score hinges on are known.
pub fn is_complete(order: &ScoredOrder) -> bool {
    order.signal.order_value_cr.is_some() && order.snapshot.market_cap.is_some()
}

/// Filter and sort scored orders, best first.
pub fn rank(orders: Vec<ScoredOrder>, options: &RankOptions) -> Vec<ScoredOrder> {
    let mut kept: Vec<ScoredOrder> = orders
        .into_iter()
        .filter(|o| options.include_unscored || is_complete(o))
        .filter(|o| o.impact_score >= options.min_score)
        .collect();

    // `sort_by` is stable, which is what keeps ties in fetch order.
    kept.sort_by(|a, b| b.impact_score.total_cmp(&a.impact_score));

    if let Some(limit) = options.limit {
        kept.truncate(limit);
    }
    kept
}

/// One symbol's order activity in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatOrder {
    pub symbol: String,
    pub company_name: String,
    pub announcements: usize,
    /// Sum of known order values in crore. Unknown values add nothing.
    pub total_order_value_cr: f64,
}

/// Group orders by symbol. Most active first; ties by first appearance.
pub fn repeat_orders(orders: &[ScoredOrder]) -> Vec<RepeatOrder> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<RepeatOrder> = Vec::new();

    for order in orders {
        let symbol = order.announcement.symbol.as_str();
        let slot = *index.entry(symbol).or_insert_with(|| {
            groups.push(RepeatOrder {
                symbol: symbol.to_string(),
                company_name: order.announcement.company_name.clone(),
                announcements: 0,
                total_order_value_cr: 0.0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.announcements += 1;
        group.total_order_value_cr += order.signal.order_value_cr.unwrap_or(0.0);
    }

    groups.sort_by(|a, b| b.announcements.cmp(&a.announcements));
    groups
}

/// Order money flowing into one sector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorFlow {
    pub sector: String,
    pub orders: usize,
    pub total_order_value_cr: f64,
}

/// Group orders by sector, largest total first; ties by first appearance.
pub fn sector_flow(orders: &[ScoredOrder]) -> Vec<SectorFlow> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut flows: Vec<SectorFlow> = Vec::new();

    for order in orders {
        let sector = order
            .snapshot
            .sector
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SECTOR.to_string());
        let slot = match index.get(&sector) {
            Some(slot) => *slot,
            None => {
                flows.push(SectorFlow {
                    sector: sector.clone(),
                    orders: 0,
                    total_order_value_cr: 0.0,
                });
                index.insert(sector, flows.len() - 1);
                flows.len() - 1
            }
        };
        let flow = &mut flows[slot];
        flow.orders += 1;
        flow.total_order_value_cr += order.signal.order_value_cr.unwrap_or(0.0);
    }

    flows.sort_by(|a, b| b.total_order_value_cr.total_cmp(&a.total_order_value_cr));
    flows
}

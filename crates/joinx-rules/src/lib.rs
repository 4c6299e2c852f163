//! # joinx-rules: Transformation Passes and the Planning Driver
//!
//! The passes that populate the memo with alternatives, and the `plan()`
//! entry point that wires everything together:
//!
//! resolved logical tree → logical memoization → transformation passes →
//! cost-based selection → plan reification.
//!
//! ## Transformation rules (logical → logical)
//!
//! - **`decorrelate`**: Rewrites `IN` / `NOT IN` / `EXISTS` / scalar-subquery
//!   predicates into semi, anti, and left-outer-hash join alternatives.
//! - **`convert`**: Semi-to-inner conversion when the inner side is keyed by
//!   the join keys.
//! - **`reorder`**: Join commutativity and associativity with
//!   filter-partition validity checks.
//!
//! ## Physical-alternative rules (logical → physical)
//!
//! - **`scan`**: Static index scans bound from filter conjuncts.
//! - **`hash`**: Hash joins from equality conjunctions, cross-hash for
//!   filterless cross joins.
//! - **`lookup`**: Lookup joins over index prefixes, concat lookups for
//!   disjunctions, and the right-semi lookup transform.
//! - **`merge`**: Merge joins over order-aligned indexes.
//! - **`rangeheap`**: Range-heap joins for value-against-interval predicates.
//!
//! All rules are additive: they prepend alternatives and never remove one.
//! Each rule is responsible for its own idempotence; the driver loops rounds
//! over every memo expression until a fixed point.

pub mod convert;
pub mod decorrelate;
pub mod hash;
pub mod lookup;
pub mod merge;
pub mod rangeheap;
pub mod reorder;
pub mod scan;
mod util;

use joinx_core::build::{build_best_plan, PlanNode};
use joinx_core::catalog::Catalog;
use joinx_core::context::{PlanConfig, PlanContext};
use joinx_core::cost::{Coster, DefaultCoster};
use joinx_core::error::PlanResult;
use joinx_core::hints::Hint;
use joinx_core::ids::ExprId;
use joinx_core::logical::LogicalPlan;
use joinx_core::memo::Memo;
use joinx_core::memoize::memoize_plan;
use joinx_core::stats::StatsProvider;
use tracing::{debug, trace};

/// A transformation pass over memo expressions. Rules inspect one
/// alternative at a time and prepend any new forms; they must be additive
/// and idempotent.
pub trait Rule {
    fn name(&self) -> &'static str;

    /// Inspect one alternative; memoize any new forms. Returns whether the
    /// memo changed.
    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool>;
}

/// The standard rule set, in application order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(decorrelate::DecorrelateSubqueries::default()),
        Box::new(convert::SemiToInner::default()),
        Box::new(reorder::CommuteJoins::default()),
        Box::new(reorder::AssociateJoins::default()),
        Box::new(scan::StaticIndexScans::default()),
        Box::new(hash::HashJoins::default()),
        Box::new(lookup::LookupJoins::default()),
        Box::new(merge::MergeJoins::default()),
        Box::new(rangeheap::RangeHeapJoins::default()),
    ]
}

/// Run rules to a fixed point (bounded by the configured round cap).
pub fn run_rules(memo: &mut Memo, rules: &mut [Box<dyn Rule>]) -> PlanResult<()> {
    let max_rounds = memo.config().max_rule_rounds;
    for round in 0..max_rounds {
        let mut changed = false;
        for rule in rules.iter_mut() {
            // Snapshot the arena size: alternatives added this round are
            // visited next round.
            let count = memo.num_exprs();
            for i in 0..count {
                if rule.apply(memo, ExprId(i as u32))? {
                    trace!(rule = rule.name(), expr = i, "rule fired");
                    changed = true;
                }
            }
        }
        if !changed {
            debug!(rounds = round + 1, "transformation rules reached fixpoint");
            break;
        }
    }
    Ok(())
}

/// The planner's output: the executable tree plus whether join hints had to
/// be ignored to produce a plan.
#[derive(Debug)]
pub struct PlannedQuery {
    pub plan: PlanNode,
    pub hints_ignored: bool,
}

/// Plan a resolved logical tree with the default coster.
pub fn plan(
    logical: &LogicalPlan,
    catalog: &dyn Catalog,
    stats: &dyn StatsProvider,
    hints: &[Hint],
    config: PlanConfig,
    ctx: &PlanContext,
) -> PlanResult<PlannedQuery> {
    plan_with_coster(logical, catalog, stats, hints, config, ctx, &DefaultCoster)
}

/// Plan with a caller-supplied cost model.
#[allow(clippy::too_many_arguments)]
pub fn plan_with_coster(
    logical: &LogicalPlan,
    catalog: &dyn Catalog,
    stats: &dyn StatsProvider,
    hints: &[Hint],
    config: PlanConfig,
    ctx: &PlanContext,
    coster: &dyn Coster,
) -> PlanResult<PlannedQuery> {
    let mut memo = Memo::new(config);
    memoize_plan(&mut memo, catalog, logical)?;
    for hint in hints {
        memo.apply_hint(hint)?;
    }

    let mut rules = default_rules();
    run_rules(&mut memo, &mut rules)?;
    trace!("{}", memo.format());

    memo.optimize_root(coster, stats, ctx)?;
    let plan = build_best_plan(&memo)?;
    debug!(groups = memo.num_groups(), "planning complete");
    Ok(PlannedQuery {
        plan,
        hints_ignored: memo.hints_ignored(),
    })
}

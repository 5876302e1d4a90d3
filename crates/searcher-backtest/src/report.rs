//! Backtest outcomes and block-level accuracy metrics.

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use searcher_arb::Opportunity;

use crate::recognizer::ExecutedArbitrage;

/// One block's prediction-vs-reality record.
#[derive(Clone, Debug, Default)]
pub struct BlockOutcome {
    pub block_number: u64,
    pub predicted: Vec<Opportunity>,
    pub actual: Vec<ExecutedArbitrage>,
}

/// Aggregated results over a block range.
///
/// Block-level scoring: a block is a true positive when the detector
/// predicted an opportunity and one actually executed; skipped blocks
/// simply never enter `outcomes` and show up in the denominator gap.
#[derive(Clone, Debug, Default)]
pub struct BacktestReport {
    pub start_block: u64,
    pub end_block: u64,
    pub outcomes: Vec<BlockOutcome>,

    pub total_predicted: usize,
    pub total_actual: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl BacktestReport {
    pub fn new(start_block: u64, end_block: u64) -> Self {
        Self {
            start_block,
            end_block,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: BlockOutcome) {
        self.outcomes.push(outcome);
    }

    /// Recomputes the block-level confusion counts from the outcomes.
    pub fn compute_metrics(&mut self) {
        self.total_predicted = 0;
        self.total_actual = 0;
        self.true_positives = 0;
        self.false_positives = 0;
        self.false_negatives = 0;

        for outcome in &self.outcomes {
            let has_predicted = !outcome.predicted.is_empty();
            let has_actual = !outcome.actual.is_empty();

            self.total_predicted += outcome.predicted.len();
            self.total_actual += outcome.actual.len();

            match (has_predicted, has_actual) {
                (true, true) => self.true_positives += 1,
                (true, false) => self.false_positives += 1,
                (false, true) => self.false_negatives += 1,
                (false, false) => {}
            }
        }
    }

    pub fn blocks_analyzed(&self) -> usize {
        self.outcomes.len()
    }

    /// TP / (TP + FP), if anything was predicted.
    pub fn precision(&self) -> Option<f64> {
        let denominator = self.true_positives + self.false_positives;
        (denominator > 0).then(|| self.true_positives as f64 / denominator as f64 * 100.0)
    }

    /// TP / (TP + FN), if anything actually happened.
    pub fn recall(&self) -> Option<f64> {
        let denominator = self.true_positives + self.false_negatives;
        (denominator > 0).then(|| self.true_positives as f64 / denominator as f64 * 100.0)
    }

    /// Renders the summary table.
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Metric", "Value"]);
        table.add_row(vec![
            "Blocks analyzed".to_string(),
            format!(
                "{} (of {}..={})",
                self.blocks_analyzed(),
                self.start_block,
                self.end_block
            ),
        ]);
        table.add_row(vec![
            "Opportunities predicted".to_string(),
            self.total_predicted.to_string(),
        ]);
        table.add_row(vec![
            "Arbitrages executed (ground truth)".to_string(),
            self.total_actual.to_string(),
        ]);
        table.add_row(vec![
            "True positives (blocks)".to_string(),
            self.true_positives.to_string(),
        ]);
        table.add_row(vec![
            "False positives (blocks)".to_string(),
            self.false_positives.to_string(),
        ]);
        table.add_row(vec![
            "False negatives (blocks)".to_string(),
            self.false_negatives.to_string(),
        ]);
        if let Some(precision) = self.precision() {
            table.add_row(vec!["Precision".to_string(), format!("{precision:.1}%")]);
        }
        if let Some(recall) = self.recall() {
            table.add_row(vec!["Recall (hit rate)".to_string(), format!("{recall:.1}%")]);
        }
        table.to_string()
    }
}

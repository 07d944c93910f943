use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use geosweep_engine::CellOutcome;

use crate::constants::PROGRESS_TICK_INTERVAL_MS;

const SWEEP_TEMPLATE: &str =
    "{spinner} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} cells ({per_sec}) {msg}\u{1b}[0K";
const MOCK_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {pos} rounds {msg}\u{1b}[0K";

pub(crate) struct Ui {
    bar: ProgressBar,
    encounters: u64,
    forts: u64,
    deferred: u64,
    status: Option<String>,
}

impl Ui {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::hidden();
        Self {
            bar,
            encounters: 0,
            forts: 0,
            deferred: 0,
            status: None,
        }
    }

    /// Handle for writers that must suspend the bar while printing.
    pub(crate) fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// Show the bar: `total` cells this run with `done` already finished, or
    /// an open-ended counter when `total` is `None`.
    pub(crate) fn start(&mut self, total: Option<u64>, done: u64) {
        let template = if total.is_some() { SWEEP_TEMPLATE } else { MOCK_TEMPLATE };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        self.bar.set_style(style);
        if let Some(total) = total {
            self.bar.set_length(total);
        }
        self.bar.set_position(done);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar
            .enable_steady_tick(Duration::from_millis(PROGRESS_TICK_INTERVAL_MS));
        self.refresh();
    }

    pub(crate) fn cell_finished(&mut self, outcome: &CellOutcome) {
        self.encounters += outcome.encounters as u64;
        self.forts += outcome.forts as u64;
        self.bar.inc(1);
        self.refresh();
    }

    pub(crate) fn cell_deferred(&mut self) {
        self.deferred += 1;
        self.bar.inc(1);
        self.refresh();
    }

    pub(crate) fn set_status(&mut self, status: Option<&str>) {
        self.status = status.map(str::to_string);
        self.refresh();
    }

    fn refresh(&self) {
        self.bar.set_message(format_message(
            self.encounters,
            self.forts,
            self.deferred,
            self.status.as_deref(),
        ));
    }

    pub(crate) fn println(&self, msg: &str) {
        self.bar.println(msg);
    }

    pub(crate) fn freeze(&self) {
        self.bar.abandon();
    }
}

fn format_message(encounters: u64, forts: u64, deferred: u64, status: Option<&str>) -> String {
    let mut msg = format!("{encounters} encounters, {forts} forts");
    if deferred > 0 {
        msg.push_str(&format!(", {deferred} deferred"));
    }
    if let Some(status) = status {
        msg.push_str(" | ");
        msg.push_str(status);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lists_totals_and_status() {
        assert_eq!(format_message(0, 0, 0, None), "0 encounters, 0 forts");
        assert_eq!(
            format_message(5, 2, 1, Some("paused")),
            "5 encounters, 2 forts, 1 deferred | paused"
        );
    }

    #[test]
    fn hidden_bar_counts_finished_and_deferred_cells() {
        let mut ui = Ui::new();
        ui.bar.set_length(10);
        ui.cell_finished(&CellOutcome {
            worker_idx: 0,
            cell: geosweep_core::CellId::at_level(1.0, 2.0, geosweep_core::SCAN_LEVEL),
            encounters: 3,
            forts: 1,
            attempts: 1,
            elapsed_ms: 5,
        });
        ui.cell_deferred();
        assert_eq!(ui.bar.position(), 2);
        assert_eq!(ui.encounters, 3);
        assert_eq!(ui.deferred, 1);
    }
}

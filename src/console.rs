//! Terminal rendering of coordinator updates.

use crate::stream::{CoordinatorUpdate, ResultSequence, Snapshot};

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Turns coordinator updates into printable lines.
#[derive(Debug, Clone)]
pub struct ConsoleView {
    json: bool,
    report_every: u32,
}

impl ConsoleView {
    pub fn new(json: bool, report_every: u32) -> Self {
        Self {
            json,
            report_every: report_every.max(1),
        }
    }

    /// The line to print for `update`, if any.
    pub fn render(&self, update: &CoordinatorUpdate) -> Option<String> {
        if self.json {
            return serde_json::to_string(update).ok();
        }

        match update {
            CoordinatorUpdate::StateChanged { state } => Some(format!("[{state:?}]")),
            CoordinatorUpdate::PointAppended(point) => {
                (point.epoch == 1 || point.epoch % self.report_every == 0).then(|| {
                    format!(
                        "epoch {:>5} | loss {:>14.4} | m {:>10.4} | b {:>10.4}",
                        point.epoch, point.loss, point.slope, point.intercept
                    )
                })
            }
            CoordinatorUpdate::PayloadDropped(record) => {
                Some(format!("skipped payload: {}", record.message))
            }
            CoordinatorUpdate::ErrorSurfaced(record) => Some(format!("error: {record}")),
            CoordinatorUpdate::ErrorCleared => None,
            CoordinatorUpdate::SessionSettled {
                status,
                learning_rate,
                points,
            } => Some(format!(
                "session at learning rate {learning_rate} settled as {status:?} with {points} points"
            )),
        }
    }

    /// A multi-line summary of both projections of the last session.
    pub fn summary(&self, snapshot: &Snapshot) -> Vec<String> {
        let results = &snapshot.results;
        let mut lines = Vec::new();

        if let Some(elapsed) = snapshot.session.elapsed() {
            lines.push(format!("elapsed: {:.2?}", elapsed));
        }
        if results.skipped() > 0 {
            lines.push(format!("malformed payloads dropped: {}", results.skipped()));
        }
        if let Some(best) = results.best_loss() {
            lines.push(format!("best loss: {:.4} at epoch {}", best.loss, best.epoch));
        }
        if let Some(last) = results.latest() {
            lines.push(format!(
                "final line: y = {:.4} * x + {:.4} (epoch {})",
                last.slope, last.intercept, last.epoch
            ));
        }
        if !results.is_empty() {
            lines.push(format!("loss  {}", loss_sparkline(results, 60)));
        }
        if let Some(record) = &snapshot.error {
            lines.push(format!("last error: {record}"));
        }

        lines
    }
}

/// Buckets the loss projection into `width` columns, log-scaled.
pub fn loss_sparkline(results: &ResultSequence, width: usize) -> String {
    let losses: Vec<f64> = results
        .loss_series()
        .map(|(_, loss)| loss.max(f64::MIN_POSITIVE).ln())
        .collect();
    if losses.is_empty() || width == 0 {
        return String::new();
    }

    let (lo, hi) = losses
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = hi - lo;
    let chunk = losses.len().div_ceil(width);

    losses
        .chunks(chunk)
        .map(|bucket| {
            let mean = bucket.iter().sum::<f64>() / bucket.len() as f64;
            let level = if span > 0.0 {
                ((mean - lo) / span * (SPARK.len() - 1) as f64).round() as usize
            } else {
                0
            };
            SPARK[level.min(SPARK.len() - 1)]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{CoordinatorState, ErrorKind, ErrorRecord, SessionStatus, TrainingPoint};

    fn point(epoch: u32, loss: f64) -> TrainingPoint {
        TrainingPoint {
            epoch,
            slope: 1.0,
            intercept: 2.0,
            loss,
        }
    }

    #[test]
    fn progress_is_reported_every_n_epochs() {
        let view = ConsoleView::new(false, 20);
        let shown: Vec<u32> = (1..=60)
            .filter(|&epoch| {
                view.render(&CoordinatorUpdate::PointAppended(point(epoch, 1.0)))
                    .is_some()
            })
            .collect();

        assert_eq!(shown, vec![1, 20, 40, 60]);
    }

    #[test]
    fn json_mode_prints_every_update() {
        let view = ConsoleView::new(true, 20);
        let line = view
            .render(&CoordinatorUpdate::StateChanged {
                state: CoordinatorState::Ready,
            })
            .unwrap();
        assert_eq!(line, r#"{"type":"StateChanged","payload":{"state":"Ready"}}"#);

        assert!(view
            .render(&CoordinatorUpdate::PointAppended(point(7, 1.0)))
            .is_some());
        assert!(view.render(&CoordinatorUpdate::ErrorCleared).is_some());
    }

    #[test]
    fn settled_sessions_are_always_shown() {
        let view = ConsoleView::new(false, 20);
        let line = view
            .render(&CoordinatorUpdate::SessionSettled {
                status: SessionStatus::Failed,
                learning_rate: 0.01,
                points: 56,
            })
            .unwrap();
        assert!(line.contains("Failed"));
        assert!(line.contains("56"));
    }

    #[test]
    fn dropped_payloads_are_shown_without_an_error_banner() {
        let view = ConsoleView::new(false, 20);
        let line = view
            .render(&CoordinatorUpdate::PayloadDropped(ErrorRecord::new(
                ErrorKind::Parse,
                "expected value at line 1 column 2",
            )))
            .unwrap();

        assert!(line.starts_with("skipped payload"));
        assert!(!line.contains("error:"));
    }

    #[test]
    fn sparkline_follows_a_falling_loss() {
        let mut results = ResultSequence::new();
        for epoch in 1..=8 {
            results.append(point(epoch, 2f64.powi(9 - epoch as i32))).unwrap();
        }

        let line = loss_sparkline(&results, 8);
        assert_eq!(line.chars().count(), 8);
        assert_eq!(line.chars().next(), Some('█'));
        assert_eq!(line.chars().last(), Some('▁'));
    }

    #[test]
    fn sparkline_of_nothing_is_empty() {
        assert_eq!(loss_sparkline(&ResultSequence::new(), 10), "");
    }
}

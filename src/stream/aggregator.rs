use super::{error::SequenceError, protocol::TrainingPoint};

/// Ordered, append-only record of the points streamed during one session.
///
/// Both projections are views over the same vector, so they always agree
/// on how far the stream has progressed. An epoch whose payload was dropped
/// as malformed leaves a gap, recorded with [`ResultSequence::skip_epoch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSequence {
    points: Vec<TrainingPoint>,
    next_epoch: u32,
    skipped: usize,
}

impl Default for ResultSequence {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            next_epoch: 1,
            skipped: 0,
        }
    }
}

impl ResultSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `point` at the tail.
    ///
    /// # Errors
    /// Returns a `SequenceError` if the point's epoch is not the next one;
    /// the sequence is left unchanged.
    pub fn append(&mut self, point: TrainingPoint) -> Result<(), SequenceError> {
        if point.epoch != self.next_epoch {
            return Err(SequenceError {
                expected: self.next_epoch,
                got: point.epoch,
            });
        }

        self.points.push(point);
        self.next_epoch += 1;
        Ok(())
    }

    /// Accounts for an epoch whose payload never arrived as a point.
    pub fn skip_epoch(&mut self) {
        self.next_epoch += 1;
        self.skipped += 1;
    }

    /// Drops every point, ready for a new session.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn next_epoch(&self) -> u32 {
        self.next_epoch
    }

    /// Number of epochs skipped because their payload was malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether the epochs are exactly `1..=len`.
    pub fn is_contiguous(&self) -> bool {
        self.skipped == 0
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TrainingPoint] {
        &self.points
    }

    pub fn latest(&self) -> Option<&TrainingPoint> {
        self.points.last()
    }

    /// The `(epoch, loss)` projection.
    pub fn loss_series(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.points.iter().map(|p| (p.epoch, p.loss))
    }

    /// The `(epoch, slope, intercept)` projection.
    pub fn parameter_series(&self) -> impl Iterator<Item = (u32, f64, f64)> + '_ {
        self.points.iter().map(|p| (p.epoch, p.slope, p.intercept))
    }

    /// The point with the smallest loss seen so far.
    pub fn best_loss(&self) -> Option<&TrainingPoint> {
        self.points
            .iter()
            .min_by(|a, b| a.loss.total_cmp(&b.loss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(epoch: u32, loss: f64) -> TrainingPoint {
        TrainingPoint {
            epoch,
            slope: epoch as f64,
            intercept: -(epoch as f64),
            loss,
        }
    }

    #[test]
    fn appends_in_epoch_order() {
        let mut seq = ResultSequence::new();
        for epoch in 1..=5 {
            seq.append(point(epoch, 10.0 / epoch as f64)).unwrap();
        }

        assert_eq!(seq.len(), 5);
        assert_eq!(seq.next_epoch(), 6);
        assert_eq!(seq.latest().map(|p| p.epoch), Some(5));
    }

    #[test]
    fn rejects_gaps_and_duplicates() {
        let mut seq = ResultSequence::new();
        assert_eq!(
            seq.append(point(2, 1.0)),
            Err(SequenceError {
                expected: 1,
                got: 2
            })
        );

        seq.append(point(1, 1.0)).unwrap();
        assert_eq!(
            seq.append(point(1, 1.0)),
            Err(SequenceError {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn projections_stay_aligned() {
        let mut seq = ResultSequence::new();
        for epoch in 1..=3 {
            seq.append(point(epoch, epoch as f64 * 2.0)).unwrap();
        }

        let losses: Vec<_> = seq.loss_series().collect();
        let params: Vec<_> = seq.parameter_series().collect();

        assert_eq!(losses, vec![(1, 2.0), (2, 4.0), (3, 6.0)]);
        assert_eq!(params, vec![(1, 1.0, -1.0), (2, 2.0, -2.0), (3, 3.0, -3.0)]);
    }

    #[test]
    fn skipped_epochs_leave_a_gap() {
        let mut seq = ResultSequence::new();
        seq.append(point(1, 1.0)).unwrap();
        seq.skip_epoch();
        seq.append(point(3, 1.0)).unwrap();

        let epochs: Vec<_> = seq.loss_series().map(|(epoch, _)| epoch).collect();
        assert_eq!(epochs, vec![1, 3]);
        assert_eq!(seq.skipped(), 1);
        assert!(!seq.is_contiguous());
    }

    #[test]
    fn best_loss_and_clear() {
        let mut seq = ResultSequence::new();
        seq.append(point(1, 5.0)).unwrap();
        seq.append(point(2, 1.5)).unwrap();
        seq.append(point(3, 3.0)).unwrap();
        assert_eq!(seq.best_loss().map(|p| p.epoch), Some(2));

        seq.skip_epoch();
        seq.clear();
        assert!(seq.is_empty());
        assert!(seq.is_contiguous());
        assert_eq!(seq.best_loss(), None);
        assert_eq!(seq.next_epoch(), 1);
    }
}

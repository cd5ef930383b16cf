use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::{error::EngineError, protocol::COMPLETION_MARKER};

/// A synchronous numeric routine that reports progress through a callback.
///
/// `run` blocks until every iteration is done. After each iteration it hands
/// `stream` a JSON payload `{"epoch": n, "m": .., "b": .., "loss": ..}`, with
/// `n` starting at 1. It may finish by streaming `{"epoch": "complete"}` or
/// by simply returning.
pub trait ComputeEngine: Send {
    fn run(&mut self, learning_rate: f64, stream: &mut dyn FnMut(&str)) -> Result<(), EngineError>;
}

/// What an [`EngineLoader`] hands back.
pub type LoadResult = Result<Box<dyn ComputeEngine>, EngineError>;

/// Produces a ready-to-run engine; called once per channel on its thread.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> LoadResult;
}

impl<F> ComputeEngine for F
where
    F: FnMut(f64, &mut dyn FnMut(&str)) -> Result<(), EngineError> + Send,
{
    fn run(&mut self, learning_rate: f64, stream: &mut dyn FnMut(&str)) -> Result<(), EngineError> {
        self(learning_rate, stream)
    }
}

impl<F> EngineLoader for F
where
    F: Fn() -> LoadResult + Send + Sync,
{
    fn load(&self) -> LoadResult {
        self()
    }
}

/// Paired samples the line is fitted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            x: vec![0.0, 1.0, 2.0, 3.0, 4.0],
            y: vec![10.0, 50.0, 150.0, 450.0, 625.0],
        }
    }
}

impl Dataset {
    /// # Errors
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.x.is_empty() {
            return Err("dataset must not be empty".into());
        }
        if self.x.len() != self.y.len() {
            return Err(format!(
                "dataset x has {} samples but y has {}",
                self.x.len(),
                self.y.len()
            ));
        }
        if self.x.iter().chain(&self.y).any(|v| !v.is_finite()) {
            return Err("dataset must only contain finite values".into());
        }
        Ok(())
    }
}

/// Fits `y = m * x + b` with full-batch gradient descent on the mean squared error.
pub struct LinearRegressionEngine {
    x: Array1<f64>,
    y: Array1<f64>,
    epochs: u32,
}

impl LinearRegressionEngine {
    pub fn new(dataset: &Dataset, epochs: u32) -> Self {
        Self {
            x: Array1::from(dataset.x.clone()),
            y: Array1::from(dataset.y.clone()),
            epochs,
        }
    }
}

impl ComputeEngine for LinearRegressionEngine {
    fn run(&mut self, learning_rate: f64, stream: &mut dyn FnMut(&str)) -> Result<(), EngineError> {
        let n = self.x.len() as f64;
        let mut m = 0.0;
        let mut b = 0.0;

        for epoch in 1..=self.epochs {
            let errors = &self.x * m + b - &self.y;
            let loss = errors.dot(&errors) / n;

            let dm = (2.0 / n) * (&errors * &self.x).sum();
            let db = (2.0 / n) * errors.sum();

            m -= learning_rate * dm;
            b -= learning_rate * db;

            // Non-finite values are written as-is and fail to parse downstream.
            let payload =
                format!("{{\"epoch\": {epoch}, \"m\": {m:.4}, \"b\": {b:.4}, \"loss\": {loss:.4}}}");
            stream(&payload);
        }

        stream(&format!("{{\"epoch\": \"{COMPLETION_MARKER}\"}}"));
        Ok(())
    }
}

/// Loads a [`LinearRegressionEngine`] over a fixed dataset.
#[derive(Debug, Clone)]
pub struct LinearRegressionLoader {
    dataset: Dataset,
    epochs: u32,
}

impl LinearRegressionLoader {
    pub fn new(dataset: Dataset, epochs: u32) -> Self {
        Self { dataset, epochs }
    }
}

impl Default for LinearRegressionLoader {
    fn default() -> Self {
        Self::new(Dataset::default(), 200)
    }
}

impl EngineLoader for LinearRegressionLoader {
    fn load(&self) -> LoadResult {
        self.dataset.validate().map_err(EngineError::Load)?;
        if self.epochs == 0 {
            return Err(EngineError::Load("epochs must be at least 1".into()));
        }

        Ok(Box::new(LinearRegressionEngine::new(&self.dataset, self.epochs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::protocol::{EnginePayload, TrainingPoint};

    fn collect(engine: &mut dyn ComputeEngine, learning_rate: f64) -> Vec<String> {
        let mut payloads = Vec::new();
        engine
            .run(learning_rate, &mut |p: &str| payloads.push(p.to_string()))
            .unwrap();
        payloads
    }

    fn points(payloads: &[String]) -> Vec<TrainingPoint> {
        payloads
            .iter()
            .filter_map(|p| match EnginePayload::parse(p) {
                Ok(EnginePayload::Point(point)) => Some(point),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn streams_every_epoch_then_the_sentinel() {
        let mut engine = LinearRegressionLoader::default().load().unwrap();
        let payloads = collect(engine.as_mut(), 0.01);

        assert_eq!(payloads.len(), 201);
        assert_eq!(
            EnginePayload::parse(payloads.last().unwrap()).unwrap(),
            EnginePayload::Complete { success: true }
        );

        let epochs: Vec<u32> = points(&payloads).iter().map(|p| p.epoch).collect();
        assert_eq!(epochs, (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn first_step_matches_hand_computation() {
        let mut engine = LinearRegressionLoader::default().load().unwrap();
        let first = points(&collect(engine.as_mut(), 0.01))[0];

        assert_eq!(first.epoch, 1);
        assert_eq!(first.loss, 123645.0);
        assert!((first.slope - 16.8).abs() < 1e-9);
        assert!((first.intercept - 5.14).abs() < 1e-9);
    }

    #[test]
    fn loss_decreases_for_a_small_rate() {
        let mut engine = LinearRegressionLoader::default().load().unwrap();
        let trace = points(&collect(engine.as_mut(), 0.01));

        assert!(trace.windows(2).all(|w| w[1].loss <= w[0].loss));
        assert!(trace.last().unwrap().loss < trace[0].loss / 10.0);
    }

    #[test]
    fn runs_are_deterministic() {
        let loader = LinearRegressionLoader::default();
        let a = collect(loader.load().unwrap().as_mut(), 0.02);
        let b = collect(loader.load().unwrap().as_mut(), 0.02);
        assert_eq!(a, b);
    }

    #[test]
    fn divergent_rates_produce_unparseable_payloads() {
        let mut engine = LinearRegressionLoader::default().load().unwrap();
        let payloads = collect(engine.as_mut(), 5.0);

        assert!(payloads.iter().any(|p| EnginePayload::parse(p).is_err()));
    }

    #[test]
    fn loader_rejects_bad_datasets() {
        let mismatched = Dataset {
            x: vec![1.0, 2.0],
            y: vec![1.0],
        };
        assert!(matches!(
            LinearRegressionLoader::new(mismatched, 10).load(),
            Err(EngineError::Load(_))
        ));

        let empty = Dataset {
            x: vec![],
            y: vec![],
        };
        assert!(LinearRegressionLoader::new(empty, 10).load().is_err());

        let non_finite = Dataset {
            x: vec![f64::NAN],
            y: vec![1.0],
        };
        assert!(LinearRegressionLoader::new(non_finite, 10).load().is_err());

        assert!(LinearRegressionLoader::new(Dataset::default(), 0).load().is_err());
    }
}

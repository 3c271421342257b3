use std::future::Future;
use futures::stream::{self, StreamExt};

/// Bounded fan-out/fan-in over a batch of store calls.
///
/// Every future is driven to completion and every outcome is collected
/// before the aggregate resolves, so the continuation runs exactly once no
/// matter how the outcomes interleave.
#[derive(Debug, Clone, Copy)]
pub struct FanIn {
    pub concurrency: usize,
}

impl FanIn {
    pub fn new(concurrency: usize) -> Self {
        FanIn { concurrency: concurrency.max(1) }
    }

    /// Outputs in completion order, or the first error to arrive.
    /// In-flight calls still drain after an error.
    pub async fn all<I, F, T, E>(&self, futures: I) -> Result<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        let mut outcomes = stream::iter(futures).buffer_unordered(self.concurrency);
        let mut outputs = Vec::new();
        let mut first_error = None;

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(output) => outputs.push(output),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    /// Like [`FanIn::all`] but outputs keep input order.
    pub async fn all_ordered<I, F, T, E>(&self, futures: I) -> Result<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        let mut outcomes = stream::iter(futures).buffered(self.concurrency);
        let mut outputs = Vec::new();
        let mut first_error = None;

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(output) => outputs.push(output),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    /// Every outcome, successes and failures alike (best-effort batches).
    pub async fn settle<I, F, T>(&self, futures: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T>,
    {
        stream::iter(futures)
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

use futures::future::BoxFuture;
use crate::core::backend::Backend;
use crate::core::error::Result;

/// What a step tells the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next step
    Continue,
    /// Terminal success; remaining steps are skipped
    Done,
}

pub type StepFn<C> = for<'a> fn(&'a Backend, &'a mut C) -> BoxFuture<'a, Result<Flow>>;

pub struct Step<C> {
    pub name: &'static str,
    pub run: StepFn<C>,
}

/// Named, ordered list of steps over one per-request context. The first
/// error or `Done` ends the run.
pub struct Pipeline<C> {
    pub name: &'static str,
    pub steps: Vec<Step<C>>,
}

impl<C: Send> Pipeline<C> {
    pub fn new(name: &'static str) -> Self {
        Pipeline { name, steps: Vec::new() }
    }

    pub fn step(mut self, name: &'static str, run: StepFn<C>) -> Self {
        self.steps.push(Step { name, run });
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    pub async fn run(&self, backend: &Backend, log_id: &str, ctx: &mut C) -> Result<()> {
        for step in &self.steps {
            log::trace!("{} {}: {}", log_id, self.name, step.name);
            match (step.run)(backend, ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done) => {
                    log::debug!("{} {} done at {}", log_id, self.name, step.name);
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("{} {} failed at {}: {}", log_id, self.name, step.name, e);
                    return Err(e);
                }
            }
        }
        log::debug!("{} {} done", log_id, self.name);
        Ok(())
    }
}

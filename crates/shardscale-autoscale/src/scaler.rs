//! Autoscaler — runs a pass over every configured stream on an interval.
//!
//! Streams are independent: each pass gets its own controller, clients and
//! random source, and a failure in one stream never aborts the others. At
//! most `max_concurrent_streams` passes run at once.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use shardscale_core::{Config, StreamConfig};

use crate::controller::{PassOutcome, ScaleContext, StreamController};
use crate::error::ScaleError;
use crate::provider::{ClientFactory, Notifier};

/// Drives every configured stream through the control loop.
pub struct Autoscaler {
    streams: Vec<StreamConfig>,
    ctx: Arc<ScaleContext>,
    factory: Arc<dyn ClientFactory>,
    limit: Arc<Semaphore>,
    /// Fixed seed for reproducible sampling; entropy when unset.
    seed: Option<u64>,
    passes: u64,
}

impl Autoscaler {
    pub fn new(config: &Config, factory: Arc<dyn ClientFactory>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            streams: config.streams.clone(),
            ctx: Arc::new(ScaleContext::from_config(config, notifier)),
            factory,
            limit: Arc::new(Semaphore::new(config.max_concurrent_streams.max(1))),
            seed: None,
            passes: 0,
        }
    }

    /// Seed the shard and pair sampling. Each stream in each pass still
    /// draws from its own generator derived from this seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Run one pass over every stream and return the outcomes in
    /// configuration order.
    pub async fn run_once(&mut self) -> Vec<(String, PassOutcome)> {
        let pass = self.passes;
        self.passes += 1;

        let mut tasks = JoinSet::new();
        for (index, stream) in self.streams.iter().cloned().enumerate() {
            let ctx = self.ctx.clone();
            let factory = self.factory.clone();
            let limit = self.limit.clone();
            let rng = self.rng_for(pass, index);

            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = limit.acquire_owned().await.ok();
                let outcome = run_stream(stream, ctx, factory, rng).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<PassOutcome>> = vec![None; self.streams.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!(error = %e, "stream pass task failed"),
            }
        }

        let outcomes: Vec<(String, PassOutcome)> = self
            .streams
            .iter()
            .zip(slots)
            .filter_map(|(stream, slot)| slot.map(|outcome| (stream.name.clone(), outcome)))
            .collect();

        let acted = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PassOutcome::Acted(_)))
            .count();
        let failed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PassOutcome::Failed(_)))
            .count();
        info!(
            pass,
            streams = self.streams.len(),
            acted,
            skipped = outcomes.len() - acted - failed,
            failed,
            "pass complete"
        );
        outcomes
    }

    /// Run passes every `interval` until `shutdown` flips. The first pass
    /// starts immediately; an in-flight pass is finished before returning.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            streams = self.streams.len(),
            "autoscaler started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }

    fn rng_for(&self, pass: u64, index: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(
                seed.wrapping_add(pass.wrapping_mul(1_000_003))
                    .wrapping_add(index as u64),
            ),
            None => StdRng::from_entropy(),
        }
    }
}

async fn run_stream(
    stream: StreamConfig,
    ctx: Arc<ScaleContext>,
    factory: Arc<dyn ClientFactory>,
    rng: StdRng,
) -> PassOutcome {
    let clients = match factory.clients_for(&stream).await {
        Ok(clients) => clients,
        Err(e) => {
            warn!(stream = %stream.name, error = %e, "could not build clients");
            ctx.notifier
                .notify(&format!("Scaling {} failed: {e}.", stream.name))
                .await;
            return PassOutcome::Failed(ScaleError::Provider(e));
        }
    };

    StreamController::new(stream, ctx, clients, rng)
        .run_pass()
        .await
}

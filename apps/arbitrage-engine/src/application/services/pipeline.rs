//! Pipeline Assembly
//!
//! Wires the workers together under one cancellation token:
//!
//! ```text
//! connector -> bridge -> normalizer -> router -+-> quotes topic
//!                                              +-> spread detector -> spreads topic -> simulator
//!                                              +-> triangular detector -> opportunities topic
//! ```

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::ingestion::IngestionBridge;
use super::normalizer::NormalizerService;
use super::router::QuoteRouter;
use super::spread_detector::SpreadDetectorService;
use super::supervisor::{ConnectorSupervisor, SupervisorExit};
use super::trade_simulator::TradeSimulatorService;
use super::triangular_detector::TriangularDetectorService;
use crate::application::ports::ExchangeConnector;
use crate::domain::market_data::NormalizedQuote;
use crate::domain::normalization::{Clock, Normalizer, SystemClock};
use crate::domain::simulation::{SimulationStats, TradeSimulator};
use crate::domain::spread::{SpreadBook, SpreadEvent};
use crate::domain::triangular::{PathCatalog, PathEvaluator, TriangularOpportunity};
use crate::error::ServiceError;
use crate::infrastructure::broadcast::{EventBus, Subscription};
use crate::infrastructure::config::PipelineConfig;
use crate::resilience::ReconnectError;

/// Result reported by a finished supervisor, tagged with its exchange.
pub type SupervisorOutcome = (String, Result<SupervisorExit, ReconnectError>);

/// Running pipeline.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
    quotes: EventBus<NormalizedQuote>,
    normalizer: NormalizerService,
    spread: SpreadDetectorService,
    triangular: TriangularDetectorService,
    simulator: TradeSimulatorService,
    router: QuoteRouter,
    workers: Vec<JoinHandle<()>>,
    supervisors: JoinSet<SupervisorOutcome>,
}

impl Pipeline {
    /// Start every worker on the system clock.
    #[must_use]
    pub fn start(config: PipelineConfig) -> Self {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    /// Start every worker with an explicit time source.
    #[must_use]
    pub fn start_with_clock(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        let cancel = CancellationToken::new();
        let capacity = config.service.command_capacity;
        let topics = config.broadcast;

        let quotes = EventBus::new("quotes", topics.quotes_capacity);
        let spreads: EventBus<SpreadEvent> = EventBus::new("spreads", topics.spreads_capacity);
        let opportunities = EventBus::new("opportunities", topics.opportunities_capacity);

        let (normalizer, normalizer_task) = NormalizerService::spawn(
            Normalizer::with_clock(config.normalizer.clone(), Arc::clone(&clock)),
            capacity,
            cancel.child_token(),
        );
        let (spread, spread_task) = SpreadDetectorService::spawn(
            SpreadBook::new(config.spread.clone()),
            spreads.clone(),
            capacity,
            cancel.child_token(),
        );
        let (triangular, triangular_task) = TriangularDetectorService::spawn(
            PathEvaluator::new(config.triangular.clone()),
            PathCatalog::standard(),
            clock,
            opportunities,
            capacity,
            cancel.child_token(),
        );
        let (simulator, simulator_task) = TradeSimulatorService::spawn(
            TradeSimulator::new(config.simulation.clone()),
            spreads.subscribe(),
            capacity,
            cancel.child_token(),
        );

        let router = QuoteRouter::new(quotes.clone(), spread.clone(), triangular.clone());
        tracing::info!(
            exchanges = ?config.exchanges,
            symbols = ?config.symbols,
            "Pipeline started"
        );

        Self {
            config,
            cancel,
            quotes,
            normalizer,
            spread,
            triangular,
            simulator,
            router,
            workers: vec![normalizer_task, spread_task, triangular_task, simulator_task],
            supervisors: JoinSet::new(),
        }
    }

    /// Configuration the pipeline was started with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Supervise `connector` for `symbols`.
    pub fn attach(&mut self, connector: Arc<dyn ExchangeConnector>, symbols: &[String]) {
        let supervisor = ConnectorSupervisor::new(
            connector,
            symbols.to_vec(),
            IngestionBridge::new(self.normalizer.clone(), self.config.service.command_capacity),
            self.router.clone(),
            self.config.breaker.clone(),
            self.config.reconnect.clone(),
        );
        let exchange = supervisor.exchange().to_string();
        let cancel = self.cancel.child_token();
        self.supervisors
            .spawn(async move { (exchange, supervisor.run(cancel).await) });
    }

    /// Normalized quotes as they are routed.
    #[must_use]
    pub fn subscribe_quotes(&self) -> Subscription<NormalizedQuote> {
        self.quotes.subscribe()
    }

    /// Every computed spread event.
    #[must_use]
    pub fn subscribe_spreads(&self) -> Subscription<SpreadEvent> {
        self.spread.subscribe()
    }

    /// Profitable triangular opportunities.
    #[must_use]
    pub fn subscribe_opportunities(&self) -> Subscription<TriangularOpportunity> {
        self.triangular.subscribe()
    }

    /// Normalizer handle.
    #[must_use]
    pub const fn normalizer(&self) -> &NormalizerService {
        &self.normalizer
    }

    /// Spread detector handle.
    #[must_use]
    pub const fn spread_detector(&self) -> &SpreadDetectorService {
        &self.spread
    }

    /// Triangular detector handle.
    #[must_use]
    pub const fn triangular_detector(&self) -> &TriangularDetectorService {
        &self.triangular
    }

    /// Trade simulator handle.
    #[must_use]
    pub const fn simulator(&self) -> &TradeSimulatorService {
        &self.simulator
    }

    /// Router feeding both detectors.
    #[must_use]
    pub const fn router(&self) -> &QuoteRouter {
        &self.router
    }

    /// Current simulation results.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if the simulator is gone.
    pub async fn statistics(&self) -> Result<SimulationStats, ServiceError> {
        self.simulator.statistics().await
    }

    /// Wait for the next supervisor to finish. `None` when none are running.
    pub async fn next_supervisor_exit(&mut self) -> Option<SupervisorOutcome> {
        loop {
            match self.supervisors.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(e) => tracing::error!(error = %e, "Connector supervisor panicked"),
            }
        }
    }

    /// Cancel every task and wait for them. Returns the final statistics.
    pub async fn shutdown(mut self) -> Option<SimulationStats> {
        let stats = self.simulator.statistics().await.ok();
        tracing::info!("Pipeline shutting down");
        self.cancel.cancel();

        while let Some(joined) = self.supervisors.join_next().await {
            match joined {
                Ok((exchange, Err(e))) => tracing::warn!(%exchange, error = %e, "Supervisor had failed"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Connector supervisor panicked"),
            }
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker panicked");
            }
        }

        tracing::info!("Pipeline stopped");
        stats
    }
}

//! Quote fan-out from ingestion to the detectors.

use crate::domain::market_data::NormalizedQuote;
use crate::error::ServiceError;
use crate::infrastructure::broadcast::EventBus;

use super::spread_detector::SpreadDetectorService;
use super::triangular_detector::TriangularDetectorService;

/// Publishes each normalized quote and hands it to both detectors.
#[derive(Debug, Clone)]
pub struct QuoteRouter {
    quotes: EventBus<NormalizedQuote>,
    spread: SpreadDetectorService,
    triangular: TriangularDetectorService,
}

impl QuoteRouter {
    /// Create a router.
    #[must_use]
    pub const fn new(
        quotes: EventBus<NormalizedQuote>,
        spread: SpreadDetectorService,
        triangular: TriangularDetectorService,
    ) -> Self {
        Self {
            quotes,
            spread,
            triangular,
        }
    }

    /// Route one quote. Both detectors are fed concurrently.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Stopped` if either detector is gone.
    pub async fn route(&self, quote: NormalizedQuote) -> Result<(), ServiceError> {
        let _ = self.quotes.publish(quote.clone());
        let (spread, triangular) = tokio::join!(
            self.spread.ingest(quote.clone()),
            self.triangular.ingest(quote)
        );
        spread?;
        triangular
    }
}

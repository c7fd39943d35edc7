//! Static catalog of triangular cycles.
//!
//! Every cycle has the shape `[START, INTERMEDIATE, USD, START]` and is
//! executed USD -> START -> INTERMEDIATE -> USD.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::domain::market_data::pair_symbol;

/// Settlement currency closing every cycle.
pub const SETTLEMENT_ASSET: &str = "USD";

/// Assets a cycle may start from.
pub const START_ASSETS: [&str; 2] = ["BTC", "ETH"];

/// Assets crossed through between start and settlement.
/// Each start asset skips itself, leaving 50 cycles per start.
const INTERMEDIATE_ASSETS: [&str; 51] = [
    "ETH", "BTC", "BNB", "SOL", "XRP", "ADA", "DOGE", "AVAX", "DOT", "MATIC", "LINK", "LTC",
    "TRX", "ATOM", "UNI", "XLM", "ETC", "FIL", "APT", "ARB", "OP", "NEAR", "ALGO", "VET", "ICP",
    "AAVE", "MKR", "SAND", "MANA", "AXS", "EOS", "XTZ", "THETA", "EGLD", "FTM", "GRT", "SNX",
    "CRV", "COMP", "ZEC", "DASH", "KSM", "CHZ", "ENJ", "BAT", "ZIL", "1INCH", "SUSHI", "YFI",
    "RUNE", "INJ",
];

static CATALOG: LazyLock<Arc<PathCatalog>> = LazyLock::new(|| Arc::new(PathCatalog::build()));

/// One triangular cycle and the pair symbols it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriangularPath {
    /// `[START, INTERMEDIATE, USD, START]`.
    pub assets: [String; 4],
    /// `START-USD`.
    pub start_usd: String,
    /// `INTERMEDIATE-USD`.
    pub intermediate_usd: String,
    /// `START-INTERMEDIATE`.
    pub cross: String,
    /// `INTERMEDIATE-START`, inverted when the direct cross is missing.
    pub inverse_cross: String,
}

impl TriangularPath {
    /// Build the cycle for a start/intermediate pair.
    #[must_use]
    pub fn new(start: &str, intermediate: &str) -> Self {
        Self {
            assets: [
                start.to_string(),
                intermediate.to_string(),
                SETTLEMENT_ASSET.to_string(),
                start.to_string(),
            ],
            start_usd: pair_symbol(start, SETTLEMENT_ASSET),
            intermediate_usd: pair_symbol(intermediate, SETTLEMENT_ASSET),
            cross: pair_symbol(start, intermediate),
            inverse_cross: pair_symbol(intermediate, start),
        }
    }

    /// Start asset.
    #[must_use]
    pub fn start(&self) -> &str {
        &self.assets[0]
    }

    /// Intermediate asset.
    #[must_use]
    pub fn intermediate(&self) -> &str {
        &self.assets[1]
    }

    /// Whether a quote for `symbol` can change this cycle's result.
    #[must_use]
    pub fn reads(&self, symbol: &str) -> bool {
        self.symbols().contains(&symbol)
    }

    /// All pair symbols the cycle may read.
    #[must_use]
    pub fn symbols(&self) -> [&str; 4] {
        [
            &self.start_usd,
            &self.intermediate_usd,
            &self.cross,
            &self.inverse_cross,
        ]
    }
}

/// Indexed, immutable set of cycles.
#[derive(Debug)]
pub struct PathCatalog {
    paths: Vec<TriangularPath>,
    by_symbol: HashMap<String, Vec<usize>>,
}

impl PathCatalog {
    /// Process-wide default catalog.
    #[must_use]
    pub fn standard() -> Arc<Self> {
        Arc::clone(&CATALOG)
    }

    /// Build a catalog from explicit cycles.
    #[must_use]
    pub fn from_paths(paths: Vec<TriangularPath>) -> Self {
        let mut by_symbol: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, path) in paths.iter().enumerate() {
            for symbol in path.symbols() {
                by_symbol.entry(symbol.to_string()).or_default().push(index);
            }
        }
        Self { paths, by_symbol }
    }

    fn build() -> Self {
        let paths = START_ASSETS
            .iter()
            .flat_map(|start| {
                INTERMEDIATE_ASSETS
                    .iter()
                    .filter(move |intermediate| *intermediate != start)
                    .map(move |intermediate| TriangularPath::new(start, intermediate))
            })
            .collect();
        Self::from_paths(paths)
    }

    /// All cycles.
    #[must_use]
    pub fn paths(&self) -> &[TriangularPath] {
        &self.paths
    }

    /// Number of cycles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Cycle at `index`.
    #[must_use]
    pub fn path(&self, index: usize) -> Option<&TriangularPath> {
        self.paths.get(index)
    }

    /// Indices of the cycles reading `symbol`.
    #[must_use]
    pub fn indices_touching(&self, symbol: &str) -> &[usize] {
        self.by_symbol.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }

    /// Cycles reading `symbol`.
    pub fn touching(&self, symbol: &str) -> impl Iterator<Item = &TriangularPath> {
        self.indices_touching(symbol)
            .iter()
            .filter_map(|&index| self.path(index))
    }
}

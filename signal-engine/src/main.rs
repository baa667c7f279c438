// Demo entry point: synthetic universe, one full pipeline pass

use anyhow::Result;
use common::{Instrument, MarketVenue, WeightTable};
use market_data::{
    CachedMarketData, HeuristicScoringService, InMemoryStore, SyntheticMarketData,
};
use signal_engine::{
    EngineConfig, InMemoryOutcomeStore, InMemorySignalStore, SignalPipeline,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = EngineConfig::default();
    config.validate()?;

    let mut source = SyntheticMarketData::new(90);
    let universe: Vec<Instrument> = (0..100)
        .map(|i| {
            let symbol = format!("SYM{i:04}");
            // Give a third of the universe a real trend to find
            if i % 3 == 0 {
                source.set_drift(&symbol, 0.015);
            }
            let venue = if i % 2 == 0 {
                MarketVenue::Nasdaq
            } else {
                MarketVenue::Kospi
            };
            Instrument::new(symbol, venue)
        })
        .collect();

    let provider = Arc::new(CachedMarketData::new(
        Arc::new(source),
        Arc::new(HeuristicScoringService),
        Arc::new(InMemoryStore::new()),
        config.cache_config(),
    ));
    let weights = Arc::new(WeightTable::new(Vec::<String>::new()));
    let pipeline = SignalPipeline::new(
        config.clone(),
        provider,
        weights,
        Arc::new(InMemorySignalStore::new()),
        Arc::new(InMemoryOutcomeStore::new()),
    )?;

    let report = pipeline.run(&universe).await?;
    info!(
        universe = report.universe_size,
        shortlist = report.shortlist_size,
        ranked = report.ranked_size,
        issued = report.signals.len(),
        partial_failures = report.partial_failures(),
        "pipeline finished"
    );

    for signal in &report.signals {
        println!(
            "{:<8} score {:>5.1}  {}",
            signal.candidate.symbol,
            signal.candidate.score,
            config.translator.render(&signal.bucket)
        );
    }
    Ok(())
}

pub mod agents;
pub mod auction;
pub mod cli;
pub mod equilibrium;
pub mod experiment;
pub mod market;
pub mod metrics;
pub mod records;
pub mod scenario;
pub mod valuation;

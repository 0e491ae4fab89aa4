pub mod advisories;
pub mod aggregator;
pub mod airports;
pub mod awc;
pub mod briefing;
pub mod cache;
pub mod corridor;
pub mod fetcher;
pub mod forecast;
pub mod gpx;
pub mod map;
pub mod provider;
pub mod stations;
pub mod yr;

#[cfg(test)]
pub mod test_support;

//! Guarded HTTP access to the market and news APIs

mod client;

pub use client::{HttpMarketClient, HttpMarketClientBuilder, MARKET_RESOURCE, NEWS_RESOURCE};

//! Economic strategy router for Tempo.
//!
//! Mirrors the on-chain payment router: a protocol fee is taken from every
//! gross payment, then the song's strategy decides minimum payments,
//! authorization, and how the net amount is split among payees.
//!
//! # Strategies
//!
//! | Identifier | Model |
//! |---|---|
//! | `pay-per-stream-v1` | fixed price per play, static royalty table |
//! | `patronage-v1` | recurring subscription, free plays while current |
//! | `gift-economy-v1` | free plays with listener rewards, optional tips |
//! | `dutch-auction-v1` | decaying price for a one-time access grant |
//! | `dynamic-pricing-v1` | price grows with popularity, time-of-day discounts |
//!
//! New strategies are added by registering a factory in
//! [`StrategyRegistry`]; the router never matches on identifiers.

pub mod amount;
pub mod registry;
pub mod royalty;
pub mod router;
pub mod strategies;

pub use registry::{StrategyDescriptor, StrategyFactory, StrategyRegistry};
pub use royalty::{RoyaltyShare, RoyaltyTable};
pub use router::{
    DEFAULT_PROTOCOL_FEE_BPS, MAX_PROTOCOL_FEE_BPS, RoutedPayment, RouterHandle, StrategyRouter,
};

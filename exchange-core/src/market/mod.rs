#[cfg(any(test, feature = "test-utils"))]
pub mod sim;

#[cfg(any(test, feature = "test-utils"))]
pub use sim::SimMarket;

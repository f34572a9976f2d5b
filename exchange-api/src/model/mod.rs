pub mod envelope;
pub mod ids;
pub mod instrument;
pub mod participant;
pub mod trade;

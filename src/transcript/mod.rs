//! Deterministic transcript rewrites and hallucination filters (§4.2).

pub mod normalizer;

pub use normalizer::{
    contains_unconfirmed_claim, correct, is_phantom, is_price_or_eta_hallucination,
    join_alphanumeric,
};

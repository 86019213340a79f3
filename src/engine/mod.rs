// Engine: fan-out orchestration and the study cache.

pub mod cache;
pub mod expansion;
pub mod orchestrator;
pub mod result;
pub mod service;
pub mod stats;

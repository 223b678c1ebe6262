#![deny(unused_variables)]
pub mod baseline;
pub mod config;
pub mod logistic;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod seeding;
pub mod split;
pub mod standardize;
pub mod sweep;
pub mod trainer;

#[path = "../data/mod.rs"]
pub mod data;

#[path = "../results/mod.rs"]
pub mod results;

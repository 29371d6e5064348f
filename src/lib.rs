// Library exports for hitclust
pub mod config;
pub mod conservation;
pub mod error;
pub mod hits_table;
pub mod membership;
pub mod paf;
pub mod partition;
pub mod pipeline;
pub mod ranking;
pub mod sequences;

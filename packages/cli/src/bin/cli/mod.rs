pub mod prune;
pub mod run;

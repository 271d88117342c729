pub mod comment;
pub mod history;
pub mod information;
pub mod step;
pub mod workflow;

pub mod client;
pub mod rows;
pub mod types;

pub use client::{AllocationSource, KubecostClient, KubecostError};
pub use rows::{allocation_rows, RowContext};
pub use types::{Allocation, AllocationResponse};

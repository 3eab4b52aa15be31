pub mod naming;
pub mod writer;

pub use writer::{validate_gzip, FileWriter, WriterError};

/// Canonical column set of every output file.
pub const CSV_HEADERS: [&str; 20] = [
    "ResourceID",
    "Cost",
    "CurrencyCode",
    "Aggregation",
    "UsageType",
    "UsageAmount",
    "UsageUnit",
    "Cluster",
    "Container",
    "Namespace",
    "Pod",
    "Node",
    "Controller",
    "ControllerKind",
    "ProviderID",
    "Labels",
    "InvoiceYearMonth",
    "InvoiceDate",
    "StartTime",
    "EndTime",
];

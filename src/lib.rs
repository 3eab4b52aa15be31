pub mod cli;
pub mod config;
pub mod export;
pub mod inventory;
pub mod kubecost;
pub mod lock;
pub mod optima;
pub mod output;
pub mod window;

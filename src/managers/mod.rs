pub mod audit;
pub mod backup;
pub mod logging;
pub mod notification;
pub mod progress;
pub mod scheduler;
pub mod transfer;

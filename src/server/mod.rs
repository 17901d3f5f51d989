mod router;
mod shutdown;

pub use router::HttpServer;
pub use shutdown::shutdown_signal;
pub use shutdown::ServerShutdownHandle;
pub use shutdown::ServerShutdownSignal;

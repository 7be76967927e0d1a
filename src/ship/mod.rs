pub mod core;
pub mod http;
pub mod scheduler;
pub mod transport;

pub use self::core::{CycleEnd, CycleReport, ErrorHandler, Shipper};
pub use self::http::{HttpTransport, HttpTransportError};
pub use self::scheduler::{CycleState, Scheduler};
pub use self::transport::{SendReport, Transport};

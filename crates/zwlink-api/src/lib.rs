// zwlink-api: Driver boundary for Z-Wave controllers (notifications, value addressing, simulation)

pub mod driver;
pub mod error;
pub mod notification;
pub mod ports;
pub mod sim;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use driver::{Driver, NotificationCallback};
pub use error::Error;
pub use notification::{Notification, NotificationCode, NotificationKind};
pub use sim::{DriverCall, SimData, SimDriver, SimNetwork, SimNode, SimValue};
pub use value::{COMMAND_CLASS_BASIC, Genre, HomeId, NodeId, ValueId, ValueKind};

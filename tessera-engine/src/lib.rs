pub mod dispatch;
pub mod locks;
pub mod reconcile;
pub mod session;
pub mod sweeper;

pub use dispatch::{BroadcastTransport, Envelope, NotificationDispatcher};
pub use locks::{AcquireGrant, SeatLockManager};
pub use reconcile::{ReconcileReport, Reconciler};
pub use session::PaymentSessions;
pub use sweeper::{ExpirySweeper, SweepReport};

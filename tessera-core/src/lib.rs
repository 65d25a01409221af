pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod repository;

pub use error::{BoxError, ReservationError};
pub use events::{ReleaseCause, ReservationEvent};
pub use models::{Booking, PaymentSession, Seat, SeatLock, SeatStatus, SessionStatus};
pub use notify::EventTransport;
pub use repository::{
    BookingStore, LockStore, LockWrite, ReleaseWrite, SessionPatch, SessionStore,
};

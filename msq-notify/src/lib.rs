//! MeterSquare Notify - push notifications for the signed-in user.
//!
//! The [`NotificationHub`] joins the user's socket rooms, filters incoming
//! notifications by user and role, drops duplicates, stores them and raises
//! desktop notifications and toasts. While the socket is down a
//! [`PollingFallback`] fetches missed notifications over REST.

mod dedup;
mod desktop;
mod hub;
mod polling;
mod socket;
mod store;

pub use dedup::{Deduper, DEFAULT_DEDUP_CAPACITY};
pub use desktop::{DesktopNotifier, DesktopPermission, NoDesktop};
pub use hub::{
    ConnectionState, DeliveryOutcome, NotificationHub, NotifyConfig, Recipient,
};
pub use polling::{PollSchedule, PollingConfig, PollingFallback};
pub use socket::{
    BoqStatusPayload, NotificationApi, PrAction, PrPayload, PushSocket, SocketEvent, SocketFrame,
};
pub use store::{NotificationStore, DEFAULT_STORE_CAPACITY};

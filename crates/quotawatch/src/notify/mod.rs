/// Channel routing and subscriber delivery
mod delivery;
mod gateway;
mod router;

pub use delivery::{DeliveryService, DeliveryStats, DispatchReport};
pub use gateway::{ChannelGateway, ChannelKey, DeliveryError, DirectGateway, DirectMessage};
pub use router::NotificationRouter;

/**
 * Sign-in affordance presented by the broker
 *  when the host has no session.
 */
pub mod affordance;
/**
 * The authority broker: pins the host origin,
 *  owns sessions and serves storage calls.
 */
pub mod broker;
/**
 * Origin-stamping message bus between
 *  execution contexts.
 */
pub mod bus;
/**
 * Broker and facade configuration.
 */
pub mod config;
/**
 * Derives per-application secrets and hands
 *  them to the broker.
 */
pub mod establisher;
/**
 * Host side API over the broker protocol.
 */
pub mod facade;
pub mod messages;
pub mod session;

pub mod prelude {
    pub use crate::affordance::{ChannelAffordance, NoopAffordance, SignInAffordance};
    pub use crate::broker::{http_connector, AuthorityBroker, BrokerError, NetworkConnector};
    pub use crate::bus::{ContextId, Endpoint, MessageBus};
    pub use crate::config::{BrokerConfig, FacadeConfig};
    pub use crate::establisher::{PostageGrant, SessionEstablisher};
    pub use crate::facade::{BrokerEmbed, HostFacade, UploadReceipt};
    pub use crate::messages::UploadDataRequestOptions;
}

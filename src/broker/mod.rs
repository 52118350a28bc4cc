pub mod gateway;
pub mod transport;

pub use gateway::{BrokerGateway, CloseAllReport, OrderAck, OrderRequest, SpreadInfo};
pub use transport::{BrokerTransport, HttpTransport};

//! Address and broker topology types shared by the controller components.

pub mod address;
pub mod broker;

pub use address::{
    AddressSettings, AddressShape, AddressStatus, AddressType, DesiredAddress, MessageTtl,
    PlanResources, PlanStatus,
};
pub use broker::{
    join_topology, ActualAddress, AddressInfo, ConnectionInfo, LinkInfo, QueueInfo, RoutingType,
};

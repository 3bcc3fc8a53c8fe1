//! UPnP/IGD port mapping, behind a trait so engine tests can swap in a fake
//! router (spec.md section 8). Grounded on `Router.h`/`Router.cpp`'s
//! `miniupnpc`-based discover/add/delete mapping sequence, reimplemented
//! with the `igd-next` crate (`examples/other_examples/manifests/
//! jaronchong-hyperzoom/Cargo.toml`).

use std::net::{IpAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use igd_next::{search_gateway, Gateway, PortMappingProtocol, SearchOptions};

use crate::error::RouterError;

/// What `RouterClient::add_mapping` reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOutcome {
    Mapped,
    /// The router rejected the mapping because it's already in use
    /// (`Router.cpp::setPortMapping`'s error 718, `ConflictInMappingEntry`).
    InUse,
}

pub trait RouterClient: Send {
    /// Discover an IGD on the LAN and learn our external IP address
    /// (`Router::Router`'s constructor sequence).
    fn discover(&mut self, timeout: Duration) -> Result<(), RouterError>;

    /// Map `external_port` on the router to `local_port` on this host.
    fn add_mapping(
        &mut self,
        local_port: u16,
        external_port: u16,
        description: &str,
    ) -> Result<MappingOutcome, RouterError>;

    /// Remove a previously-added mapping. Errors are never fatal — the
    /// original ignores `NoSuchEntryInArray` and logs anything else.
    fn delete_mapping(&mut self, external_port: u16);

    /// Our external IP address, known only after a successful `discover`
    /// (`Router::getWanAddress`).
    fn external_ip(&self) -> Option<IpAddr>;
}

pub struct IgdRouterClient {
    gateway: Option<Gateway>,
    local_ip: Option<IpAddr>,
    external_ip: Option<IpAddr>,
}

impl IgdRouterClient {
    pub fn new() -> Self {
        IgdRouterClient {
            gateway: None,
            local_ip: None,
            external_ip: None,
        }
    }
}

impl Default for IgdRouterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterClient for IgdRouterClient {
    fn discover(&mut self, timeout: Duration) -> Result<(), RouterError> {
        let options = SearchOptions {
            timeout: Some(timeout),
            ..Default::default()
        };
        let gateway =
            search_gateway(options).map_err(|e| RouterError::DiscoveryFailed(e.to_string()))?;
        self.local_ip = Some(local_lan_address().map_err(RouterError::DiscoveryFailed)?);
        self.external_ip = gateway
            .get_external_ip()
            .ok()
            .map(IpAddr::V4);
        self.gateway = Some(gateway);
        Ok(())
    }

    fn add_mapping(
        &mut self,
        local_port: u16,
        external_port: u16,
        description: &str,
    ) -> Result<MappingOutcome, RouterError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| RouterError::MappingFailed("router not discovered".into()))?;
        let local_ip = self
            .local_ip
            .ok_or_else(|| RouterError::MappingFailed("local address unknown".into()))?;
        let IpAddr::V4(local_v4) = local_ip else {
            return Err(RouterError::MappingFailed(
                "IGD mapping requires an IPv4 LAN address".into(),
            ));
        };
        let local_addr = SocketAddrV4::new(local_v4, local_port);
        match gateway.add_port(
            PortMappingProtocol::UDP,
            external_port,
            local_addr,
            0,
            description,
        ) {
            Ok(()) => Ok(MappingOutcome::Mapped),
            Err(e) if e.to_string().contains("ConflictInMappingEntry") => Ok(MappingOutcome::InUse),
            Err(e) => Err(RouterError::MappingFailed(e.to_string())),
        }
    }

    fn delete_mapping(&mut self, external_port: u16) {
        if let Some(gateway) = &self.gateway {
            // NoSuchEntryInArray is expected if we never successfully
            // mapped; anything else we log but never propagate
            // (`Router.cpp::clearPortMapping`).
            if let Err(e) = gateway.remove_port(PortMappingProtocol::UDP, external_port) {
                tracing::warn!("failed to clear router port mapping: {e}");
            }
        }
    }

    fn external_ip(&self) -> Option<IpAddr> {
        self.external_ip
    }
}

/// Discover this host's LAN address without a DNS lookup or an extra crate:
/// "connect" a UDP socket to a public address (no packet is actually sent)
/// and read back the local endpoint the kernel would have used.
fn local_lan_address() -> Result<IpAddr, String> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| e.to_string())?;
    socket.connect("8.8.8.8:80").map_err(|e| e.to_string())?;
    socket.local_addr().map(|a| a.ip()).map_err(|e| e.to_string())
}

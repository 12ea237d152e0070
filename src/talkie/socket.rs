//! Shared UDP endpoint and the talkie sink registry
//!
//! One socket per playback carries all talkie traffic: broadcasts while
//! a device's address is unknown, unicasts once discovery has bound it,
//! and the non-blocking drain of reply datagrams. The playback thread is
//! the only toucher; no locking is involved.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use std::collections::HashMap;

use crate::error::PlayerError;

/// Largest datagram the drain will accept.
const MAX_DATAGRAM: usize = 2048;

/// A named talkie device reachable over UDP.
#[derive(Debug, Clone)]
pub struct TalkieSink {
    /// Symbolic device name (matched against the `f` field of replies).
    pub name: String,
    /// Target UDP port.
    pub port: u16,
    /// Resolved device address; `None` keeps the sink broadcasting.
    pub target_ip: Option<IpAddr>,
}

/// The playback-wide UDP endpoint.
#[derive(Debug)]
pub struct TalkieSocket {
    socket: UdpSocket,
}

impl TalkieSocket {
    /// Bind the endpoint on `local_port`, broadcast-enabled and
    /// non-blocking.
    pub fn bind(local_port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_port))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        log::debug!("talkie socket bound on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    /// Local address the socket ended up on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn send_unicast(&self, ip: IpAddr, port: u16, text: &str) -> std::io::Result<()> {
        self.socket.send_to(text.as_bytes(), (ip, port))?;
        Ok(())
    }

    pub fn send_broadcast(&self, port: u16, text: &str) -> std::io::Result<()> {
        self.socket
            .send_to(text.as_bytes(), (Ipv4Addr::BROADCAST, port))?;
        Ok(())
    }

    /// Drain every datagram currently queued on the socket.
    ///
    /// Never blocks; returns as soon as the queue is empty. Datagrams
    /// that are not valid UTF-8 are discarded.
    pub fn poll_receive(&self) -> Vec<(IpAddr, String)> {
        let mut received = Vec::new();
        let mut buffer = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buffer) {
                Ok((length, sender)) => {
                    match std::str::from_utf8(&buffer[..length]) {
                        Ok(text) => received.push((sender.ip(), text.to_string())),
                        Err(_) => log::debug!("dropping non-UTF8 datagram from {}", sender),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("talkie receive error: {}", e);
                    break;
                }
            }
        }
        received
    }
}

/// Every talkie device the timeline has named, plus the shared socket.
#[derive(Debug, Default)]
pub struct TalkieRegistry {
    socket: Option<TalkieSocket>,
    sinks: Vec<TalkieSink>,
    by_name: HashMap<String, usize>,
    by_channel: HashMap<u64, usize>,
    resolved_addresses: usize,
}

impl TalkieRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the shared socket if it is not bound yet.
    pub fn ensure_socket(&mut self, local_port: u16) -> Result<(), PlayerError> {
        if self.socket.is_none() {
            self.socket = Some(TalkieSocket::bind(local_port)?);
        }
        Ok(())
    }

    pub fn socket(&self) -> Option<&TalkieSocket> {
        self.socket.as_ref()
    }

    /// Sink for a named device, created on first reference.
    ///
    /// Returns the sink index and whether this call created it.
    pub fn register_named(&mut self, name: &str, port: u16) -> (usize, bool) {
        if let Some(&index) = self.by_name.get(name) {
            return (index, false);
        }
        let index = self.push_sink(name.to_string(), port);
        self.by_name.insert(name.to_string(), index);
        (index, true)
    }

    /// Sink for a channel-addressed device, created on first reference.
    pub fn register_channel(&mut self, channel: u64, port: u16) -> (usize, bool) {
        if let Some(&index) = self.by_channel.get(&channel) {
            return (index, false);
        }
        let index = self.push_sink(channel.to_string(), port);
        self.by_channel.insert(channel, index);
        (index, true)
    }

    fn push_sink(&mut self, name: String, port: u16) -> usize {
        log::info!("talkie device '{}' on port {}", name, port);
        self.sinks.push(TalkieSink {
            name,
            port,
            target_ip: None,
        });
        self.sinks.len() - 1
    }

    pub fn sink(&self, index: usize) -> &TalkieSink {
        &self.sinks[index]
    }

    /// Number of known sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// How many sinks discovery has bound to an address.
    pub fn resolved_addresses(&self) -> usize {
        self.resolved_addresses
    }

    /// True once every known sink has a bound address.
    pub fn all_resolved(&self) -> bool {
        self.resolved_addresses >= self.sinks.len()
    }

    /// Index of the named sink if its address is still unbound.
    pub fn find_unresolved(&self, name: &str) -> Option<usize> {
        self.by_name
            .get(name)
            .copied()
            .filter(|&index| self.sinks[index].target_ip.is_none())
    }

    /// Bind a sink to the address its replies come from.
    pub fn set_target_ip(&mut self, index: usize, ip: IpAddr) {
        let sink = &mut self.sinks[index];
        if sink.target_ip.replace(ip).is_none() {
            self.resolved_addresses += 1;
            log::info!("talkie device '{}' resolved to {}", sink.name, ip);
        }
    }

    /// Send a datagram to a sink: unicast once resolved, broadcast
    /// before that.
    pub fn send(&self, index: usize, text: &str) -> std::io::Result<()> {
        let sink = &self.sinks[index];
        let Some(socket) = self.socket.as_ref() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "talkie socket not bound",
            ));
        };
        match sink.target_ip {
            Some(ip) => socket.send_unicast(ip, sink.port, text),
            None => socket.send_broadcast(sink.port, text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_drains_without_blocking() {
        let socket = TalkieSocket::bind(0).unwrap();
        assert!(socket.poll_receive().is_empty());
    }

    #[test]
    fn loopback_datagrams_arrive_with_sender_ip() {
        let receiver = TalkieSocket::bind(0).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", ("127.0.0.1", port)).unwrap();

        // Give the datagram a moment to land.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let received = receiver.poll_receive();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, IpAddr::from(Ipv4Addr::LOCALHOST));
        assert_eq!(received[0].1, "hello");
    }

    #[test]
    fn named_sinks_are_created_once() {
        let mut registry = TalkieRegistry::new();
        let (a, created_a) = registry.register_named("drums", 5006);
        let (b, created_b) = registry.register_named("drums", 5006);
        assert_eq!(a, b);
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn channel_sinks_are_keyed_by_number() {
        let mut registry = TalkieRegistry::new();
        let (a, _) = registry.register_channel(3, 5006);
        let (b, _) = registry.register_channel(4, 5006);
        assert_ne!(a, b);
        assert_eq!(registry.sink(a).name, "3");
    }

    #[test]
    fn resolution_counts_each_sink_once() {
        let mut registry = TalkieRegistry::new();
        let (index, _) = registry.register_named("drums", 5006);
        assert_eq!(registry.find_unresolved("drums"), Some(index));

        let ip = IpAddr::from(Ipv4Addr::new(10, 0, 0, 5));
        registry.set_target_ip(index, ip);
        registry.set_target_ip(index, ip);
        assert_eq!(registry.resolved_addresses(), 1);
        assert!(registry.all_resolved());
        assert_eq!(registry.find_unresolved("drums"), None);
    }

    #[test]
    fn unicast_reaches_a_resolved_sink() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target_port = receiver.local_addr().unwrap().port();

        let mut registry = TalkieRegistry::new();
        registry.ensure_socket(0).unwrap();
        let (index, _) = registry.register_named("dev", target_port);
        registry.set_target_ip(index, IpAddr::from(Ipv4Addr::LOCALHOST));
        registry.send(index, "{\"m\":2}").unwrap();

        let mut buffer = [0u8; 64];
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .unwrap();
        let (length, _) = receiver.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..length], b"{\"m\":2}");
    }
}

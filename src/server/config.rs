//! Listener configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::protocol::constants::{DEFAULT_MAX_RECORD_LEN, DEFAULT_PORT, DEFAULT_READ_CHUNK_SIZE};

/// Stream listener configuration options
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Bytes requested per socket read
    pub read_buffer_size: usize,

    /// Records longer than this many bytes are dropped
    pub max_record_len: usize,

    /// Enable TCP_NODELAY on accepted connections
    pub tcp_nodelay: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            read_buffer_size: DEFAULT_READ_CHUNK_SIZE,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            tcp_nodelay: true,
        }
    }
}

impl ListenerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the listening port, keeping the host
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set the read buffer size (at least one byte)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the maximum record length
    pub fn max_record_len(mut self, len: usize) -> Self {
        self.max_record_len = len;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

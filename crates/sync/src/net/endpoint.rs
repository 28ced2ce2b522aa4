use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::MAX_PACKET_SIZE;

/// Best-effort datagram endpoint for the unreliable channel.
#[derive(Debug)]
pub struct UnreliableEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer: Box<[u8]>,
}

impl UnreliableEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            recv_buffer: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn try_clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    /// Drains the socket until it would block.
    pub fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if size == 0 {
                        continue;
                    }
                    datagrams.push((self.recv_buffer[..size].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_drains_until_would_block() {
        let mut endpoint = UnreliableEndpoint::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        assert!(endpoint.receive().unwrap().is_empty());

        sender.send_to(&[1, 2], endpoint.local_addr()).unwrap();
        sender.send_to(&[3], endpoint.local_addr()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let received = endpoint.receive().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0, vec![1, 2]);
        assert_eq!(received[1].1, sender.local_addr().unwrap());
    }
}

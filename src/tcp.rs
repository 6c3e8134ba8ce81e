/// Modbus TCP slave framer and client lifecycle
///
/// Each poll cycle:
///
/// 1. accepts at most one new client ([`TcpServer::connect_new_clients_at`])
/// 2. services every client ([`TcpServer::process_clients_at`]): disconnected
///    clients are marked closed, idle or half-closed clients past their timeout
///    are force-closed, the rest have their bytes accumulated and every
///    complete MBAP frame answered
/// 3. removes closed clients
///
/// A client's partial frame survives between polls. Frames with a protocol id
/// other than 0, or a length no frame buffer can hold, are discarded together
/// with everything buffered behind them; the master cannot resynchronise a
/// TCP stream anyway and will time out and reconnect.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::buffer::{FrameAccumulator, FrameBuffer, StaticBuffer};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{MbapHeader, MBAP_HEADER_LEN};
use crate::register_table::RegisterTable;
use crate::server::{ModbusServer, ServerStats};
use crate::transport::{ByteStream, Connection, Listener};
use crate::{DEFAULT_TCP_PORT, MAX_TCP_FRAME_SIZE};

/// Modbus TCP slave configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpServerConfig {
    pub bind_address: SocketAddr,
    /// Idle time after which a client is force-closed
    pub client_timeout_ms: u64,
    /// Time a half-closed client gets to finish before it is force-closed
    pub shutdown_timeout_ms: u64,
    /// Bound on the startup wait for the network link
    pub link_timeout_ms: u64,
    pub max_clients: usize,
    /// Frame buffer size for heap-backed servers
    pub frame_capacity: usize,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT)),
            client_timeout_ms: 5000,
            shutdown_timeout_ms: 5000,
            link_timeout_ms: 5000,
            max_clients: 16,
            frame_capacity: MAX_TCP_FRAME_SIZE,
        }
    }
}

impl TcpServerConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ModbusResult<()> {
        if self.max_clients == 0 {
            return Err(ModbusError::configuration("max_clients must be at least 1"));
        }
        if self.frame_capacity <= MBAP_HEADER_LEN {
            return Err(ModbusError::configuration(format!(
                "frame_capacity {} cannot hold an MBAP header", self.frame_capacity
            )));
        }
        Ok(())
    }
}

/// State kept for one connected client
pub struct ClientConnection<C: Connection, B: FrameBuffer> {
    connection: C,
    address: Option<SocketAddr>,
    frame: FrameAccumulator<B>,
    last_read: Instant,
    output_closed: bool,
    closed_time: Option<Instant>,
    closed: bool,
}

impl<C: Connection, B: FrameBuffer> ClientConnection<C, B> {
    fn new(connection: C, buffer: B, now: Instant) -> Self {
        let address = connection.remote_address();
        Self {
            connection,
            address,
            frame: FrameAccumulator::new(buffer),
            last_read: now,
            output_closed: false,
            closed_time: None,
            closed: false,
        }
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Last time a byte was received
    pub fn last_read(&self) -> Instant {
        self.last_read
    }

    /// `true` once the server half-closed the connection
    pub fn is_output_closed(&self) -> bool {
        self.output_closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Half-close the connection at `now`
    fn shutdown_output(&mut self, now: Instant) {
        if self.output_closed || self.closed {
            return;
        }
        if let Err(e) = self.connection.shutdown_output() {
            debug!("Half-close of {} failed: {}", display_address(self.address), e);
            self.close();
            return;
        }
        self.output_closed = true;
        self.closed_time = Some(now);
    }

    fn close(&mut self) {
        self.connection.close();
        self.closed = true;
        self.frame.clear();
    }
}

fn display_address(address: Option<SocketAddr>) -> String {
    address.map_or_else(|| "<unknown>".to_string(), |address| address.to_string())
}

/// Modbus TCP slave
pub struct TcpServer<L: Listener, B: FrameBuffer + Clone = StaticBuffer<MAX_TCP_FRAME_SIZE>> {
    listener: L,
    config: TcpServerConfig,
    clients: Vec<ClientConnection<L::Connection, B>>,
    scratch: B,
    stats: ServerStats,
    logger: CallbackLogger,
    shutting_down: bool,
}

impl<L: Listener> TcpServer<L> {
    /// Create a TCP slave with inline 260-byte frame buffers
    pub fn new(listener: L, config: TcpServerConfig) -> ModbusResult<Self> {
        Self::with_buffer(listener, config, StaticBuffer::new())
    }
}

impl<L: Listener, B: FrameBuffer + Clone> TcpServer<L, B> {
    /// Create a TCP slave; every client gets a clone of `buffer`
    pub fn with_buffer(listener: L, config: TcpServerConfig, buffer: B) -> ModbusResult<Self> {
        config.validate()?;
        if buffer.capacity() <= MBAP_HEADER_LEN {
            return Err(ModbusError::configuration(format!(
                "Frame buffer of {} bytes cannot hold an MBAP header", buffer.capacity()
            )));
        }
        info!("📡 TCP slave: max {} clients, client timeout {:?}, shutdown timeout {:?}",
              config.max_clients, config.client_timeout(), config.shutdown_timeout());
        Ok(Self {
            listener,
            config,
            clients: Vec::new(),
            scratch: buffer,
            stats: ServerStats::default(),
            logger: CallbackLogger::disabled(),
            shutting_down: false,
        })
    }

    /// Install a packet logger
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &TcpServerConfig {
        &self.config
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn clients(&self) -> &[ClientConnection<L::Connection, B>] {
        &self.clients
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Most recently connected client still open, for unsolicited updates
    pub fn newest_client_mut(&mut self) -> Option<&mut ClientConnection<L::Connection, B>> {
        self.clients.iter_mut().rev().find(|client| !client.closed && client.connection.connected())
    }

    /// Accept at most one pending client
    ///
    /// Returns `true` if a client was added. Clients beyond `max_clients`, and
    /// any client arriving during shutdown, are closed right away.
    pub fn connect_new_clients_at(&mut self, now: Instant) -> ModbusResult<bool> {
        let Some(mut connection) = self.listener.accept()? else {
            return Ok(false);
        };
        let address = display_address(connection.remote_address());
        self.stats.connections_accepted += 1;

        if self.shutting_down || self.clients.len() >= self.config.max_clients {
            warn!("Refusing client {}: {} of {} slots in use{}",
                  address, self.clients.len(), self.config.max_clients,
                  if self.shutting_down { ", shutting down" } else { "" });
            connection.close();
            self.stats.connections_closed += 1;
            return Ok(false);
        }

        self.clients.push(ClientConnection::new(connection, self.scratch.clone(), now));
        self.stats.active_connections = self.clients.len();
        info!("📡 Client connected: {} ({} active)", address, self.clients.len());
        Ok(true)
    }

    /// Service every client once, then drop the closed ones
    pub fn process_clients_at(&mut self, now: Instant, table: &mut RegisterTable) {
        let client_timeout = self.config.client_timeout();
        let shutdown_timeout = self.config.shutdown_timeout();

        for client in self.clients.iter_mut() {
            if client.closed {
                continue;
            }
            if !client.connection.connected() {
                debug!("Client {} disconnected", display_address(client.address));
                client.close();
                continue;
            }

            if let Some(closed_time) = client.closed_time {
                if now.saturating_duration_since(closed_time) >= shutdown_timeout {
                    info!("Client shutdown timeout: {}", display_address(client.address));
                    client.close();
                    continue;
                }
            } else if now.saturating_duration_since(client.last_read) >= client_timeout {
                info!("Client timeout: {}", display_address(client.address));
                client.close();
                continue;
            }

            Self::serve_client(client, &mut self.scratch, table, &mut self.stats, &self.logger, now);
        }

        self.prune_closed();
    }

    /// Half-close every client and stop accepting new ones
    ///
    /// Half-closed clients are drained without responses until they disconnect
    /// or the shutdown timeout force-closes them.
    pub fn shutdown_at(&mut self, now: Instant) {
        if !self.shutting_down {
            info!("Shutting down TCP slave, half-closing {} clients", self.clients.len());
        }
        self.shutting_down = true;
        for client in self.clients.iter_mut() {
            client.shutdown_output(now);
        }
        self.prune_closed();
    }

    fn prune_closed(&mut self) {
        let before = self.clients.len();
        self.clients.retain(|client| !client.closed);
        let removed = before - self.clients.len();
        if removed > 0 {
            self.stats.connections_closed += removed as u64;
            debug!("Removed {} closed clients, {} active", removed, self.clients.len());
        }
        self.stats.active_connections = self.clients.len();
    }

    /// Read what the client sent and answer every complete frame
    ///
    /// Only the bytes reported available when the poll reaches the client are
    /// read, so a master that never stops sending cannot starve the others.
    fn serve_client(
        client: &mut ClientConnection<L::Connection, B>,
        scratch: &mut B,
        table: &mut RegisterTable,
        stats: &mut ServerStats,
        logger: &CallbackLogger,
        now: Instant,
    ) {
        let mut budget = match client.connection.bytes_available() {
            Ok(count) => count,
            Err(e) => {
                debug!("Read from {} failed: {}", display_address(client.address), e);
                client.close();
                return;
            }
        };

        // Frames longer than the buffer are rejected by their header, so after
        // dispatch the buffer always has room left and every pass reads
        while budget > 0 {
            while budget > 0 && client.frame.remaining_capacity() > 0 {
                match client.connection.read_byte() {
                    Ok(Some(byte)) => {
                        client.frame.push(byte);
                        client.last_read = now;
                        stats.bytes_received += 1;
                        budget -= 1;
                    }
                    Ok(None) => budget = 0,
                    Err(e) => {
                        debug!("Read from {} failed: {}", display_address(client.address), e);
                        client.close();
                        return;
                    }
                }
            }

            Self::dispatch_frames(client, scratch, table, stats, logger);
            if client.closed {
                return;
            }
        }
    }

    fn dispatch_frames(
        client: &mut ClientConnection<L::Connection, B>,
        scratch: &mut B,
        table: &mut RegisterTable,
        stats: &mut ServerStats,
        logger: &CallbackLogger,
    ) {
        loop {
            let pending = client.frame.as_slice();
            if pending.len() < MBAP_HEADER_LEN {
                return;
            }
            let header = match MbapHeader::parse(pending) {
                Ok(header) => header,
                Err(_) => return,
            };

            let frame_len = header.frame_len();
            if header.protocol_id != 0 || header.length < 2 || frame_len > scratch.capacity() {
                debug!("Invalid MBAP header from {}: {:?}, buffer discarded",
                       display_address(client.address), header);
                client.frame.clear();
                stats.record_drop();
                return;
            }
            if pending.len() < frame_len {
                // Wait for the rest of the frame
                return;
            }

            let storage = scratch.as_mut_slice();
            storage[..frame_len].copy_from_slice(&pending[..frame_len]);
            client.frame.consume(frame_len);

            if client.output_closed {
                debug!("Draining frame from half-closed {}", display_address(client.address));
                continue;
            }

            let request_frame = logger.is_enabled().then(|| storage[..frame_len].to_vec());
            let pdu_len = frame_len - MBAP_HEADER_LEN;
            let transaction = match table.process_stream(&mut storage[MBAP_HEADER_LEN..], pdu_len) {
                Ok(transaction) => transaction,
                Err(e) => {
                    debug!("TCP request from {} dropped: {}", display_address(client.address), e);
                    stats.record_drop();
                    continue;
                }
            };
            stats.record_transaction(&transaction);

            let response_len = MBAP_HEADER_LEN + transaction.len;
            storage[4..6].copy_from_slice(&((transaction.len + 1) as u16).to_be_bytes());

            if let Some(request_frame) = request_frame {
                logger.log_request(header.unit_id, &transaction.request, &request_frame);
            }
            logger.log_response(header.unit_id, &transaction.response, &storage[..response_len]);

            if let Err(e) = client.connection.write_bytes(&storage[..response_len]) {
                warn!("Write to {} failed, closing: {}", display_address(client.address), e);
                client.close();
                return;
            }
            stats.bytes_sent += response_len as u64;
        }
    }
}

impl<L: Listener, B: FrameBuffer + Clone> ModbusServer for TcpServer<L, B> {
    fn poll(&mut self, table: &mut RegisterTable) -> ModbusResult<()> {
        let now = Instant::now();
        let accepted = self.connect_new_clients_at(now);
        self.process_clients_at(now, table);
        accepted.map(|_| ())
    }

    fn shutdown(&mut self) {
        self.shutdown_at(Instant::now());
    }

    fn is_idle(&self) -> bool {
        self.clients.is_empty()
    }

    fn protocol(&self) -> &'static str {
        "TCP"
    }

    fn get_stats(&self) -> ServerStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HeapBuffer;
    use crate::protocol::{ModbusFunction, RequestPdu};
    use crate::register::{CoilRegister, HoldingRegister, COIL_FUNCTIONS, HOLDING_FUNCTIONS};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Peer {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        disconnected: bool,
        output_closed: bool,
        closed: bool,
        fail_writes: bool,
        /// Frame resent whenever the peer runs dry
        flood: Option<Vec<u8>>,
    }

    impl Peer {
        fn refill(&mut self) {
            if self.rx.is_empty() {
                if let Some(frame) = &self.flood {
                    self.rx.extend(frame.iter().copied());
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct MockConnection(Rc<RefCell<Peer>>);

    impl MockConnection {
        fn send(&self, bytes: &[u8]) {
            self.0.borrow_mut().rx.extend(bytes.iter().copied());
        }

        fn take_tx(&self) -> Vec<u8> {
            std::mem::take(&mut self.0.borrow_mut().tx)
        }
    }

    impl ByteStream for MockConnection {
        fn bytes_available(&mut self) -> ModbusResult<usize> {
            let mut peer = self.0.borrow_mut();
            peer.refill();
            Ok(peer.rx.len())
        }

        fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
            let mut peer = self.0.borrow_mut();
            peer.refill();
            Ok(peer.rx.pop_front())
        }

        fn write_bytes(&mut self, bytes: &[u8]) -> ModbusResult<()> {
            let mut peer = self.0.borrow_mut();
            if peer.fail_writes {
                return Err(ModbusError::io("connection reset"));
            }
            peer.tx.extend_from_slice(bytes);
            Ok(())
        }
    }

    impl Connection for MockConnection {
        fn connected(&self) -> bool {
            let peer = self.0.borrow();
            !peer.disconnected && !peer.closed
        }

        fn remote_address(&self) -> Option<SocketAddr> {
            Some(SocketAddr::from(([10, 0, 0, 2], 50200)))
        }

        fn shutdown_output(&mut self) -> ModbusResult<()> {
            self.0.borrow_mut().output_closed = true;
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    #[derive(Default)]
    struct MockListener {
        pending: VecDeque<MockConnection>,
    }

    impl Listener for MockListener {
        type Connection = MockConnection;

        fn accept(&mut self) -> ModbusResult<Option<MockConnection>> {
            Ok(self.pending.pop_front())
        }
    }

    fn table() -> RegisterTable {
        let mut holding = HoldingRegister::zeroed("holding", 0, 15, &HOLDING_FUNCTIONS).unwrap();
        holding.set_value(0, 0x0102);
        holding.set_value(1, 0x0304);
        RegisterTable::new(vec![
            holding.into(),
            CoilRegister::zeroed("coils", 0, 15, &COIL_FUNCTIONS).unwrap().into(),
        ])
    }

    fn config() -> TcpServerConfig {
        TcpServerConfig {
            client_timeout_ms: 1000,
            shutdown_timeout_ms: 500,
            max_clients: 2,
            ..TcpServerConfig::default()
        }
    }

    fn server_with_client(now: Instant) -> (TcpServer<MockListener>, MockConnection) {
        let client = MockConnection::default();
        let listener = MockListener { pending: VecDeque::from(vec![client.clone()]) };
        let mut server = TcpServer::new(listener, config()).unwrap();
        assert!(server.connect_new_clients_at(now).unwrap());
        (server, client)
    }

    fn mbap(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let header = MbapHeader {
            transaction_id,
            protocol_id: 0,
            length: pdu.len() as u16 + 1,
            unit_id,
        };
        let mut frame = header.to_bytes().to_vec();
        frame.extend_from_slice(pdu);
        frame
    }

    fn read_holding(transaction_id: u16, address: u16, count: u16) -> Vec<u8> {
        let pdu = RequestPdu::new_read(ModbusFunction::ReadHoldingRegisters, address, count).to_bytes();
        mbap(transaction_id, 1, &pdu)
    }

    #[test]
    fn test_read_answered_with_mbap() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        client.send(&read_holding(0x1234, 0, 2));
        server.process_clients_at(now, &mut table);

        assert_eq!(client.take_tx(), vec![
            0x12, 0x34, 0x00, 0x00, 0x00, 0x07, 0x01,
            0x03, 0x04, 0x01, 0x02, 0x03, 0x04,
        ]);
        let stats = server.get_stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.bytes_sent, 13);
    }

    #[test]
    fn test_frame_split_across_polls() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);
        let frame = read_holding(7, 1, 1);

        client.send(&frame[..4]);
        server.process_clients_at(now, &mut table);
        assert!(client.take_tx().is_empty());

        client.send(&frame[4..]);
        server.process_clients_at(now, &mut table);
        assert_eq!(client.take_tx(), vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_pipelined_frames_answered_in_order() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        let write = mbap(1, 1, &RequestPdu::new_write_single(ModbusFunction::WriteSingleCoil, 3, 0xFF00).to_bytes());
        let read = mbap(2, 1, &RequestPdu::new_read(ModbusFunction::ReadCoils, 0, 8).to_bytes());
        let mut both = write.clone();
        both.extend_from_slice(&read);
        client.send(&both);
        server.process_clients_at(now, &mut table);

        let mut expected = write;
        expected.extend_from_slice(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0b0000_1000]);
        assert_eq!(client.take_tx(), expected);
    }

    #[test]
    fn test_exception_response() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        client.send(&read_holding(9, 14, 4));
        server.process_clients_at(now, &mut table);
        assert_eq!(client.take_tx(), vec![0x00, 0x09, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
        assert_eq!(server.get_stats().exception_responses, 1);
    }

    #[test]
    fn test_bad_protocol_id_dropped() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        let mut frame = read_holding(1, 0, 1);
        frame[3] = 0x01;
        client.send(&frame);
        server.process_clients_at(now, &mut table);
        assert!(client.take_tx().is_empty());
        assert_eq!(server.get_stats().dropped_frames, 1);

        // The stream recovers with the next valid frame
        client.send(&read_holding(2, 0, 1));
        server.process_clients_at(now, &mut table);
        assert_eq!(client.take_tx().len(), 11);
    }

    #[test]
    fn test_idle_client_removed() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        server.process_clients_at(now + Duration::from_millis(999), &mut table);
        assert_eq!(server.client_count(), 1);

        server.process_clients_at(now + Duration::from_millis(1000), &mut table);
        assert_eq!(server.client_count(), 0);
        assert!(client.0.borrow().closed);
        assert_eq!(server.get_stats().connections_closed, 1);
    }

    #[test]
    fn test_activity_resets_timeout() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        client.send(&read_holding(1, 0, 1));
        server.process_clients_at(now + Duration::from_millis(800), &mut table);
        server.process_clients_at(now + Duration::from_millis(1500), &mut table);
        assert_eq!(server.client_count(), 1);
        server.process_clients_at(now + Duration::from_millis(1800), &mut table);
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn test_disconnected_client_removed() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        client.0.borrow_mut().disconnected = true;
        server.process_clients_at(now, &mut table);
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn test_write_failure_closes_client() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        client.0.borrow_mut().fail_writes = true;
        client.send(&read_holding(1, 0, 1));
        server.process_clients_at(now, &mut table);
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn test_shutdown_half_closes_and_drains() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        server.shutdown_at(now);
        assert!(client.0.borrow().output_closed);
        assert!(!server.is_idle());

        // Requests arriving after the half-close get no answer
        client.send(&read_holding(1, 0, 1));
        server.process_clients_at(now + Duration::from_millis(100), &mut table);
        assert!(client.take_tx().is_empty());
        assert_eq!(server.client_count(), 1);

        // Idle timeout no longer applies, the shutdown timeout does
        server.process_clients_at(now + Duration::from_millis(499), &mut table);
        assert_eq!(server.client_count(), 1);
        server.process_clients_at(now + Duration::from_millis(500), &mut table);
        assert!(server.is_idle());
    }

    #[test]
    fn test_max_clients() {
        let now = Instant::now();
        let clients: Vec<MockConnection> = (0..3).map(|_| MockConnection::default()).collect();
        let listener = MockListener { pending: clients.iter().cloned().collect() };
        let mut server = TcpServer::new(listener, config()).unwrap();

        assert!(server.connect_new_clients_at(now).unwrap());
        assert!(server.connect_new_clients_at(now).unwrap());
        assert!(!server.connect_new_clients_at(now).unwrap());
        assert!(!server.connect_new_clients_at(now).unwrap());

        assert_eq!(server.client_count(), 2);
        assert!(clients[2].0.borrow().closed);
        assert!(server.newest_client_mut().is_some());
    }

    #[test]
    fn test_oversized_length_discarded() {
        let now = Instant::now();
        let mut table = table();
        let (mut server, client) = server_with_client(now);

        client.send(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03]);
        server.process_clients_at(now, &mut table);
        assert!(client.take_tx().is_empty());
        assert_eq!(server.get_stats().dropped_frames, 1);
    }

    #[test]
    fn test_flooding_client_does_not_starve_others() {
        let now = Instant::now();
        let mut table = table();
        let flooder = MockConnection::default();
        flooder.0.borrow_mut().flood = Some(read_holding(1, 0, 1));
        let quiet = MockConnection::default();
        let listener = MockListener { pending: VecDeque::from(vec![flooder.clone(), quiet.clone()]) };
        let mut server = TcpServer::new(listener, config()).unwrap();
        assert!(server.connect_new_clients_at(now).unwrap());
        assert!(server.connect_new_clients_at(now).unwrap());

        quiet.send(&read_holding(2, 1, 1));
        server.process_clients_at(now, &mut table);

        assert_eq!(quiet.take_tx(), vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x03, 0x04]);
        // One poll answers only what the flooder had pending when reached
        assert_eq!(flooder.take_tx().len(), 11);
        assert_eq!(server.get_stats().total_requests, 2);
    }

    #[test]
    fn test_small_buffer_reads_in_passes() {
        let now = Instant::now();
        let mut table = table();
        let client = MockConnection::default();
        let listener = MockListener { pending: VecDeque::from(vec![client.clone()]) };
        let mut server = TcpServer::with_buffer(listener, config(), HeapBuffer::new(16)).unwrap();
        assert!(server.connect_new_clients_at(now).unwrap());

        // 24 bytes pending against a 16 byte buffer
        let mut both = read_holding(1, 0, 1);
        both.extend_from_slice(&read_holding(2, 1, 1));
        client.send(&both);
        server.process_clients_at(now, &mut table);
        assert_eq!(client.take_tx(), vec![
            0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x01, 0x02,
            0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x03, 0x04,
        ]);
        assert_eq!(server.get_stats().dropped_frames, 0);

        // A header announcing 17 bytes can never fit and is discarded
        let oversized = mbap(3, 1, &[0x03; 10]);
        client.send(&oversized[..MBAP_HEADER_LEN]);
        server.process_clients_at(now, &mut table);
        assert!(client.take_tx().is_empty());
        assert_eq!(server.get_stats().dropped_frames, 1);

        client.send(&read_holding(4, 0, 1));
        server.process_clients_at(now, &mut table);
        assert_eq!(client.take_tx().len(), 11);
    }

    #[test]
    fn test_config_validation() {
        let bad = TcpServerConfig { max_clients: 0, ..TcpServerConfig::default() };
        assert!(TcpServer::new(MockListener::default(), bad).is_err());

        let json = r#"{ "bind_address": "127.0.0.1:1502", "client_timeout_ms": 250 }"#;
        let config: TcpServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.client_timeout(), Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout_ms, 5000);
    }
}

/// Poll-driven Modbus slave servers
///
/// Both framers implement [`ModbusServer`]: one call to [`ModbusServer::poll`]
/// performs one non-blocking service cycle against the application's
/// [`RegisterTable`]. Between polls the application is free to read and update
/// the table. [`run_polling`] drives any server on a tokio interval until a
/// shutdown future resolves.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::MissedTickBehavior;

use crate::error::ModbusResult;
use crate::register_table::{RegisterTable, RegisterTableStats, Transaction};

/// Modbus slave server driven by polling
pub trait ModbusServer {
    /// Run one service cycle
    ///
    /// Errors are transport failures the server could not absorb; malformed
    /// frames and misbehaving clients never surface here.
    fn poll(&mut self, table: &mut RegisterTable) -> ModbusResult<()>;

    /// Begin an orderly shutdown; polling continues until [`ModbusServer::is_idle`]
    fn shutdown(&mut self) {}

    /// `true` when nothing is left to drain
    fn is_idle(&self) -> bool {
        true
    }

    /// Short protocol name for log lines
    fn protocol(&self) -> &'static str;

    /// Get server statistics
    fn get_stats(&self) -> ServerStats;
}

/// Server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Requests dispatched to the register table
    pub total_requests: u64,
    /// Requests answered with an exception
    pub exception_responses: u64,
    /// Broadcast requests processed without a response
    pub broadcast_requests: u64,
    /// Frames dropped for CRC, framing, overflow or addressing problems
    pub dropped_frames: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub active_connections: usize,
    pub register_table_stats: Option<RegisterTableStats>,
}

impl ServerStats {
    /// Count a processed request
    pub fn record_transaction(&mut self, transaction: &Transaction) {
        self.total_requests += 1;
        if transaction.response.is_exception() {
            self.exception_responses += 1;
        }
    }

    /// Count a silently dropped frame
    pub fn record_drop(&mut self) {
        self.dropped_frames += 1;
    }

    /// Share of requests answered without an exception, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let successful = self.total_requests - self.exception_responses;
        (successful as f64 / self.total_requests as f64) * 100.0
    }
}

/// Poll `server` every `interval` until `shutdown` resolves, then drain it
///
/// Runs on the calling task; nothing is spawned. Returns the final statistics.
pub async fn run_polling<S, F>(
    server: &mut S,
    table: &mut RegisterTable,
    interval: Duration,
    shutdown: F,
) -> ModbusResult<ServerStats>
where
    S: ModbusServer,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!("🚀 {} slave polling every {:?}", server.protocol(), interval);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, draining {} slave", server.protocol());
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = server.poll(table) {
                    warn!("{} poll failed: {}", server.protocol(), e);
                }
            }
        }
    }

    server.shutdown();
    while !server.is_idle() {
        ticker.tick().await;
        if let Err(e) = server.poll(table) {
            debug!("{} poll during shutdown failed: {}", server.protocol(), e);
        }
    }

    let mut stats = server.get_stats();
    stats.register_table_stats = Some(table.get_stats());
    info!("⏹️  {} slave stopped: {} requests, {} exceptions, {} dropped frames",
          server.protocol(), stats.total_requests, stats.exception_responses, stats.dropped_frames);
    Ok(stats)
}

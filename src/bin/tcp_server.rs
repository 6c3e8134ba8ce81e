/// Voltage Modbus TCP Slave
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Serves a PLC-style register map over Modbus TCP until Ctrl+C.
///
/// Usage: `tcp_server [config.json]`
///
/// The optional JSON file holds a `server` section (TcpServerConfig) and a
/// `registers` list (RegisterConfig); both fall back to the built-in map.

use std::time::{Duration, Instant};

use log::{error, info};
use serde::{Deserialize, Serialize};

use voltage_modbus_slave::{
    run_polling, utils, Endianness, HeapBuffer, ModbusFunction, ModbusResult,
    RegisterConfig, RegisterTable, StdTcpListener, TcpServer, TcpServerConfig,
};

use ModbusFunction::*;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Firmware version exposed in the text block, two characters per register
const VERSION_TEXT: &[u8; 8] = b"2.6.66  ";
const VERSION_TEXT_ADDRESS: u16 = 0x9005;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SlaveConfig {
    server: TcpServerConfig,
    registers: Vec<RegisterConfig>,
}

fn default_registers() -> Vec<RegisterConfig> {
    let coil_rw = [ReadCoils, WriteSingleCoil, WriteMultipleCoils];
    let holding_rw = [ReadHoldingRegisters, WriteSingleHoldingRegister, WriteMultipleHoldingRegisters];

    vec![
        RegisterConfig::coil("inputs", 0x0000, 0x010F, &[ReadDiscreteInputs]),
        RegisterConfig::coil("outputs", 0x2000, 0x210F, &coil_rw),
        RegisterConfig::coil("coils", 0x4000, 0x47CF, &coil_rw),
        RegisterConfig::coil("system_coils", 0xF000, 0xF3E7,
                             &[ReadDiscreteInputs, ReadCoils, WriteSingleCoil, WriteMultipleCoils]),
        RegisterConfig::holding("integers", 0x0000, 0x1193, &holding_rw),
        RegisterConfig::holding("doubles", 0x4000, 0x47CE, &holding_rw),
        RegisterConfig::holding("floats", 0x7000, 0x73E6, &holding_rw)
            .with_byte_order(Endianness::Little, Endianness::Big),
        RegisterConfig::holding("system_ints", 0xF000, 0xF3E7,
                                &[ReadInputRegisters, ReadHoldingRegisters,
                                  WriteSingleHoldingRegister, WriteMultipleHoldingRegisters]),
        RegisterConfig::holding("version", VERSION_TEXT_ADDRESS, 0x9008, &[ReadHoldingRegisters]),
    ]
}

fn load_config() -> ModbusResult<SlaveConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            info!("📄 Loading configuration from {}", path);
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str::<SlaveConfig>(&text)?
        }
        None => SlaveConfig::default(),
    };
    if config.registers.is_empty() {
        config.registers = default_registers();
    }
    config.server.validate()?;
    Ok(config)
}

fn build_table(config: &SlaveConfig) -> ModbusResult<RegisterTable> {
    let mut table = RegisterTable::from_config(&config.registers)?;
    if table.register("version").is_some() {
        for (offset, pair) in VERSION_TEXT.chunks_exact(2).enumerate() {
            table.set_holding(VERSION_TEXT_ADDRESS + offset as u16,
                              u16::from_be_bytes([pair[0], pair[1]]))?;
        }
    }
    Ok(table)
}

async fn serve(config: SlaveConfig) -> ModbusResult<()> {
    let mut table = build_table(&config)?;
    let stats = table.get_stats();
    info!("🔧 Register table: {} registers, {} coils, {} holding words",
          stats.register_count, stats.coil_count, stats.holding_word_count);

    let server_config = config.server;
    let listener = StdTcpListener::bind_with_retry(server_config.bind_address, server_config.link_timeout())?;
    info!("📍 Listening on: {}", listener.local_addr()?);

    let buffer = HeapBuffer::new(server_config.frame_capacity);
    let mut server = TcpServer::with_buffer(listener, server_config, buffer)?;

    let started = Instant::now();
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    let stats = run_polling(&mut server, &mut table, POLL_INTERVAL, shutdown).await?;

    println!("{}", utils::format::format_stats(&stats, started.elapsed()));
    Ok(())
}

fn main() {
    utils::logging::init_logger("info");

    println!("🚀 {}", voltage_modbus_slave::info());
    println!("=============================");

    let result = load_config().and_then(|config| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(serve(config))
    });

    if let Err(e) = result {
        error!("❌ TCP slave failed: {}", e);
        std::process::exit(1);
    }
}

/// Voltage Modbus RTU Slave
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Answers Modbus RTU requests on a serial port until Ctrl+C.
///
/// Usage: `rtu_slave [port] [baud] [unit]`, defaults `/dev/ttyUSB0 19200 1`

use std::time::{Duration, Instant};

use log::{error, info};

use voltage_modbus_slave::{
    console_logger, run_polling, utils, ModbusError, ModbusFunction, ModbusResult,
    RegisterConfig, RegisterTable, RtuServer, RtuServerConfig, SerialStream,
};

use ModbusFunction::*;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

fn parse_args() -> ModbusResult<RtuServerConfig> {
    let defaults = RtuServerConfig::default();
    let mut args = std::env::args().skip(1);

    let port = args.next().unwrap_or(defaults.port);
    let baud_rate = match args.next() {
        Some(text) => text.parse::<u32>()
            .map_err(|_| ModbusError::configuration(format!("Invalid baud rate: {}", text)))?,
        None => defaults.baud_rate,
    };
    let unit_address = match args.next() {
        Some(text) => text.parse::<u8>()
            .map_err(|_| ModbusError::configuration(format!("Invalid unit address: {}", text)))?,
        None => defaults.unit_address,
    };

    let config = RtuServerConfig::for_serial_port(&port, baud_rate, unit_address);
    config.validate()?;
    Ok(config)
}

fn build_table() -> ModbusResult<RegisterTable> {
    RegisterTable::from_config(&[
        RegisterConfig::coil("status", 0x0000, 0x00FF, &[ReadDiscreteInputs]),
        RegisterConfig::coil("commands", 0x1000, 0x10FF,
                             &[ReadCoils, WriteSingleCoil, WriteMultipleCoils]),
        RegisterConfig::holding("measurements", 0x0000, 0x03E7, &[ReadInputRegisters]),
        RegisterConfig::holding("setpoints", 0x1000, 0x13E7,
                                &[ReadHoldingRegisters, WriteSingleHoldingRegister,
                                  WriteMultipleHoldingRegisters]),
    ])
}

async fn serve(config: RtuServerConfig) -> ModbusResult<()> {
    let mut table = build_table()?;

    let stream = SerialStream::open(&config.port, config.baud_rate)?;
    info!("🔌 Opened {} at {} baud", stream.name(), config.baud_rate);

    let mut server = RtuServer::new(stream, config)?.with_logger(console_logger!());

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

    let result = parse_args().and_then(|config| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(serve(config))
    });

    if let Err(e) = result {
        error!("❌ RTU slave failed: {}", e);
        std::process::exit(1);
    }
}

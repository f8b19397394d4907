//! modbus_regmap Demo
//!
//! Starts an in-process Modbus TCP server with 100 holding registers set to
//! 0..99, then walks a client through:
//! - FC03 read of registers 0-9
//! - FC06 write of register 10 = 999 and read-back
//! - an FC03 read past the end of the table (exception 0x02)
//!
//! Usage: cargo run --features cli --bin demo [bind_address]
//! Example: RUST_LOG=debug cargo run --features cli --bin demo 127.0.0.1:5020

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use modbus_regmap::{
    ClientConfig, ModbusClient, ModbusTcpClient, ModbusTcpServer, ServerConfig, StoreConfig,
    TableConfig,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "127.0.0.1:5020";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("modbus_regmap v{} demo", modbus_regmap::VERSION);
    println!("=============================\n");

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let bind: SocketAddr = match bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid bind address {bind}: {e}");
            return ExitCode::from(2);
        }
    };

    // =========================================================================
    // Server: 100 holding registers initialised to 0..99
    // =========================================================================
    let store =
        StoreConfig::new().with_holding_registers(TableConfig::from_values((0..100).collect()));
    let config = ServerConfig::new(bind).with_store(store);

    let mut server = match ModbusTcpServer::with_config(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Invalid server configuration: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = server.start().await {
        eprintln!("Failed to start server on {bind}: {e}");
        return ExitCode::FAILURE;
    }
    let Some(listening) = server.local_addr() else {
        eprintln!("Server reported no listening address");
        return ExitCode::FAILURE;
    };
    println!("Server listening on {listening}");

    // =========================================================================
    // Client scenario
    // =========================================================================
    let client_config = ClientConfig::new(listening.ip().to_string(), listening.port())
        .with_timeout(Duration::from_secs(2));
    let mut client = match ModbusTcpClient::connect(client_config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Client connection failed: {e}");
            let _ = server.stop().await;
            return ExitCode::FAILURE;
        }
    };
    let unit = client.unit_id();

    match client.read_03(unit, 0, 10).await {
        Ok(values) => println!("  FC03 read 0..10    -> {values:?}"),
        Err(e) => println!("  FC03 read 0..10    -> error: {e}"),
    }
    match client.write_06(unit, 10, 999).await {
        Ok(()) => println!("  FC06 write 10=999  -> ok"),
        Err(e) => println!("  FC06 write 10=999  -> error: {e}"),
    }
    match client.read_03(unit, 10, 1).await {
        Ok(values) => println!("  FC03 read 10       -> {values:?}"),
        Err(e) => println!("  FC03 read 10       -> error: {e}"),
    }
    match client.read_03(unit, 95, 10).await {
        Ok(values) => println!("  FC03 read 95..105  -> unexpected {values:?}"),
        Err(e) => println!("  FC03 read 95..105  -> {e}"),
    }

    let stats = client.get_stats();
    println!("\nClient statistics:");
    println!(
        "  Requests: {}, Responses: {}, Exceptions: {}",
        stats.requests_sent, stats.responses_received, stats.exceptions
    );
    println!("  Bytes sent: {}, received: {}", stats.bytes_sent, stats.bytes_received);

    if let Err(e) = client.close().await {
        eprintln!("Close error: {e}");
    }

    let server_stats = server.get_stats();
    if let Err(e) = server.stop().await {
        eprintln!("Server shutdown error: {e}");
        return ExitCode::FAILURE;
    }
    println!("\nServer statistics:");
    println!(
        "  Connections: {}, Requests: {}, Exceptions: {}",
        server_stats.connections_accepted, server_stats.requests_processed, server_stats.exceptions_sent
    );

    println!("\nDemo completed");
    ExitCode::SUCCESS
}

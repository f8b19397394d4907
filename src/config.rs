//! # Configuration
//!
//! Plain configuration structs for the register store, the server and the
//! client. Every struct has a `Default`, consuming `with_*` setters and a
//! `validate()` step that is run by the component consuming it.
//!
//! ```rust
//! use modbus_regmap::{ServerConfig, StoreConfig, TableConfig};
//!
//! let store = StoreConfig::new()
//!     .with_holding_registers(TableConfig::from_values((0..100).collect()));
//! let config = ServerConfig::new("127.0.0.1:5020".parse().unwrap())
//!     .with_max_connections(8)
//!     .with_store(store);
//!
//! assert!(config.validate().is_ok());
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constants::{
    ADDRESS_SPACE, BROADCAST_UNIT_ID, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{SlaveId, Table};

/// Size and initial contents of one table
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TableConfig<T> {
    /// Number of addressable cells, starting at address 0
    pub size: usize,
    /// Values for addresses `0..initial.len()`, the rest start zeroed
    pub initial: Vec<T>,
}

impl<T> Default for TableConfig<T> {
    fn default() -> Self {
        Self {
            size: 0,
            initial: Vec::new(),
        }
    }
}

impl<T> TableConfig<T> {
    /// Zero-initialised table of `size` cells
    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            initial: Vec::new(),
        }
    }

    /// Table sized to exactly hold `values`
    pub fn from_values(values: Vec<T>) -> Self {
        Self {
            size: values.len(),
            initial: values,
        }
    }

    pub fn with_initial(mut self, values: Vec<T>) -> Self {
        self.initial = values;
        self
    }

    pub fn validate(&self, table: Table) -> ModbusResult<()> {
        if self.size > ADDRESS_SPACE {
            return Err(ModbusError::configuration(format!(
                "{table}: size {} exceeds the {ADDRESS_SPACE}-cell address space",
                self.size
            )));
        }
        if self.initial.len() > self.size {
            return Err(ModbusError::configuration(format!(
                "{table}: {} initial values for a table of {} cells",
                self.initial.len(),
                self.size
            )));
        }
        Ok(())
    }
}

/// Layout of one slave's four tables.
///
/// Tables left at their default are empty, so any access to them is
/// answered with ILLEGAL_DATA_ADDRESS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StoreConfig {
    pub coils: TableConfig<bool>,
    pub discrete_inputs: TableConfig<bool>,
    pub holding_registers: TableConfig<u16>,
    pub input_registers: TableConfig<u16>,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every table zero-initialised with `size` cells
    pub fn uniform(size: usize) -> Self {
        Self {
            coils: TableConfig::with_size(size),
            discrete_inputs: TableConfig::with_size(size),
            holding_registers: TableConfig::with_size(size),
            input_registers: TableConfig::with_size(size),
        }
    }

    pub fn with_coils(mut self, table: TableConfig<bool>) -> Self {
        self.coils = table;
        self
    }

    pub fn with_discrete_inputs(mut self, table: TableConfig<bool>) -> Self {
        self.discrete_inputs = table;
        self
    }

    pub fn with_holding_registers(mut self, table: TableConfig<u16>) -> Self {
        self.holding_registers = table;
        self
    }

    pub fn with_input_registers(mut self, table: TableConfig<u16>) -> Self {
        self.input_registers = table;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        self.coils.validate(Table::Coils)?;
        self.discrete_inputs.validate(Table::DiscreteInputs)?;
        self.holding_registers.validate(Table::HoldingRegisters)?;
        self.input_registers.validate(Table::InputRegisters)
    }
}

/// What the server answers when no store is registered for a unit id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MissingUnitPolicy {
    /// Exception 0x02
    #[default]
    IllegalDataAddress,
    /// Exception 0x0B, as a gateway would
    GatewayTargetFailed,
    /// Send no response at all
    Ignore,
}

/// How unit ids select a store
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RoutingConfig {
    /// One store. `unit_id: None` accepts every unit id, `Some(id)` only that one.
    Single {
        unit_id: Option<SlaveId>,
        store: StoreConfig,
    },
    /// One store per listed unit id
    Multi {
        units: BTreeMap<SlaveId, StoreConfig>,
        /// Apply writes addressed to unit 0 to every store, without a response
        broadcast: bool,
    },
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig::Single {
            unit_id: None,
            store: StoreConfig::default(),
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> ModbusResult<()> {
        match self {
            RoutingConfig::Single { store, .. } => store.validate(),
            RoutingConfig::Multi { units, broadcast } => {
                if units.is_empty() {
                    return Err(ModbusError::configuration("multi-unit routing without units"));
                }
                if *broadcast && units.contains_key(&BROADCAST_UNIT_ID) {
                    return Err(ModbusError::configuration(
                        "unit 0 cannot hold a store while broadcast is enabled",
                    ));
                }
                units.values().try_for_each(StoreConfig::validate)
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// Connections above this count are accepted and closed immediately
    pub max_connections: usize,
    /// Close connections that send nothing for this long
    pub idle_timeout: Duration,
    /// How long `stop()` waits for in-flight requests
    pub shutdown_grace: Duration,
    /// Log every frame in hex
    pub packet_logging: bool,
    pub routing: RoutingConfig,
    pub missing_unit: MissingUnitPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            packet_logging: false,
            routing: RoutingConfig::default(),
            missing_unit: MissingUnitPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Single store answering every unit id
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.routing = RoutingConfig::Single {
            unit_id: None,
            store,
        };
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_missing_unit(mut self, policy: MissingUnitPolicy) -> Self {
        self.missing_unit = policy;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.max_connections == 0 {
            return Err(ModbusError::configuration("max_connections must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ModbusError::configuration("idle_timeout must be non-zero"));
        }
        self.routing.validate()
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Per-request deadline
    pub timeout: Duration,
    /// Unit id used by the `ModbusClient` methods that take no explicit unit
    pub unit_id: SlaveId,
    pub packet_logging: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            unit_id: 1,
            packet_logging: false,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_unit_id(mut self, unit_id: SlaveId) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.host.is_empty() {
            return Err(ModbusError::configuration("host must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(ModbusError::configuration("timeout must be non-zero"));
        }
        Ok(())
    }
}

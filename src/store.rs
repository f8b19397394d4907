//! Register store for server-side data
//!
//! Four independently addressed tables: coils, discrete inputs, holding
//! registers and input registers. Each table is a fixed-size block guarded
//! by its own lock, held only for the duration of one read or write call.
//! Every access is bounds-checked; an access past the configured size
//! returns [`ModbusError::OutOfRange`] and leaves the table untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::config::{StoreConfig, TableConfig};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{Table, TableValues};

/// One table: a contiguous block of cells starting at address 0
#[derive(Debug)]
struct DataBlock<T> {
    table: Table,
    cells: RwLock<Vec<T>>,
}

impl<T: Copy + Default> DataBlock<T> {
    fn new(table: Table, config: &TableConfig<T>) -> Self {
        let mut cells = vec![T::default(); config.size];
        cells[..config.initial.len()].copy_from_slice(&config.initial);
        Self {
            table,
            cells: RwLock::new(cells),
        }
    }

    fn len(&self) -> ModbusResult<usize> {
        Ok(self.read_guard()?.len())
    }

    fn read_guard(&self) -> ModbusResult<std::sync::RwLockReadGuard<'_, Vec<T>>> {
        self.cells
            .read()
            .map_err(|_| ModbusError::internal(format!("Failed to lock {}", self.table)))
    }

    fn write_guard(&self) -> ModbusResult<std::sync::RwLockWriteGuard<'_, Vec<T>>> {
        self.cells
            .write()
            .map_err(|_| ModbusError::internal(format!("Failed to lock {}", self.table)))
    }

    /// Range check done in usize so `address + quantity` cannot wrap
    fn range(&self, address: u16, quantity: usize, size: usize) -> ModbusResult<std::ops::Range<usize>> {
        let start = address as usize;
        let end = start + quantity;
        if end > size {
            return Err(ModbusError::out_of_range(self.table, address, quantity, size));
        }
        Ok(start..end)
    }

    fn read(&self, address: u16, quantity: usize) -> ModbusResult<Vec<T>> {
        let cells = self.read_guard()?;
        let range = self.range(address, quantity, cells.len())?;
        Ok(cells[range].to_vec())
    }

    fn write(&self, address: u16, values: &[T]) -> ModbusResult<()> {
        let mut cells = self.write_guard()?;
        let range = self.range(address, values.len(), cells.len())?;
        cells[range].copy_from_slice(values);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    out_of_range: AtomicU64,
}

/// Register store shared by all connections (wrap it in an `Arc`)
#[derive(Debug)]
pub struct RegisterStore {
    coils: DataBlock<bool>,
    discrete_inputs: DataBlock<bool>,
    holding_registers: DataBlock<u16>,
    input_registers: DataBlock<u16>,
    counters: Counters,
}

impl RegisterStore {
    /// Store with four empty tables
    pub fn new() -> Self {
        Self::build(&StoreConfig::default())
    }

    /// Store with four zeroed tables of `size` cells
    pub fn with_size(size: usize) -> ModbusResult<Self> {
        Self::from_config(&StoreConfig::uniform(size))
    }

    pub fn from_config(config: &StoreConfig) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &StoreConfig) -> Self {
        debug!(
            "Register store: coils={}, discrete_inputs={}, holding={}, input={}",
            config.coils.size,
            config.discrete_inputs.size,
            config.holding_registers.size,
            config.input_registers.size
        );
        Self {
            coils: DataBlock::new(Table::Coils, &config.coils),
            discrete_inputs: DataBlock::new(Table::DiscreteInputs, &config.discrete_inputs),
            holding_registers: DataBlock::new(Table::HoldingRegisters, &config.holding_registers),
            input_registers: DataBlock::new(Table::InputRegisters, &config.input_registers),
            counters: Counters::default(),
        }
    }

    /// Configured size of `table`
    pub fn size(&self, table: Table) -> ModbusResult<usize> {
        match table {
            Table::Coils => self.coils.len(),
            Table::DiscreteInputs => self.discrete_inputs.len(),
            Table::HoldingRegisters => self.holding_registers.len(),
            Table::InputRegisters => self.input_registers.len(),
        }
    }

    fn track<T>(&self, result: ModbusResult<T>, counter: &AtomicU64) -> ModbusResult<T> {
        match &result {
            Ok(_) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(ModbusError::OutOfRange { .. }) => {
                self.counters.out_of_range.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        result
    }

    /// Read `quantity` cells of `table` starting at `address`
    pub fn read(&self, table: Table, address: u16, quantity: usize) -> ModbusResult<TableValues> {
        let result = match table {
            Table::Coils => self.coils.read(address, quantity).map(TableValues::Bits),
            Table::DiscreteInputs => self
                .discrete_inputs
                .read(address, quantity)
                .map(TableValues::Bits),
            Table::HoldingRegisters => self
                .holding_registers
                .read(address, quantity)
                .map(TableValues::Registers),
            Table::InputRegisters => self
                .input_registers
                .read(address, quantity)
                .map(TableValues::Registers),
        };
        self.track(result, &self.counters.reads)
    }

    /// Write `values` into `table` starting at `address`, all or nothing.
    ///
    /// Any table can be written here; restricting Modbus clients to coils
    /// and holding registers is the dispatcher's job.
    pub fn write(&self, table: Table, address: u16, values: TableValues) -> ModbusResult<()> {
        let result = match (table, values) {
            (Table::Coils, TableValues::Bits(v)) => self.coils.write(address, &v),
            (Table::DiscreteInputs, TableValues::Bits(v)) => self.discrete_inputs.write(address, &v),
            (Table::HoldingRegisters, TableValues::Registers(v)) => {
                self.holding_registers.write(address, &v)
            }
            (Table::InputRegisters, TableValues::Registers(v)) => {
                self.input_registers.write(address, &v)
            }
            (table, _) => Err(ModbusError::invalid_data(format!(
                "value kind does not match {table}"
            ))),
        };
        self.track(result, &self.counters.writes)
    }

    pub fn read_coils(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let result = self.coils.read(address, quantity as usize);
        self.track(result, &self.counters.reads)
    }

    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let result = self.discrete_inputs.read(address, quantity as usize);
        self.track(result, &self.counters.reads)
    }

    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let result = self.holding_registers.read(address, quantity as usize);
        self.track(result, &self.counters.reads)
    }

    pub fn read_input_registers(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let result = self.input_registers.read(address, quantity as usize);
        self.track(result, &self.counters.reads)
    }

    pub fn write_coil(&self, address: u16, value: bool) -> ModbusResult<()> {
        self.write_coils(address, &[value])
    }

    pub fn write_coils(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        let result = self.coils.write(address, values);
        self.track(result, &self.counters.writes)
    }

    pub fn write_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_registers(address, &[value])
    }

    pub fn write_registers(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let result = self.holding_registers.write(address, values);
        self.track(result, &self.counters.writes)
    }

    /// Update input registers from the application side (not reachable over Modbus)
    pub fn set_input_registers(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let result = self.input_registers.write(address, values);
        self.track(result, &self.counters.writes)
    }

    /// Update discrete inputs from the application side (not reachable over Modbus)
    pub fn set_discrete_inputs(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        let result = self.discrete_inputs.write(address, values);
        self.track(result, &self.counters.writes)
    }

    /// Alias for read_coils using function code naming
    pub fn read_01(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_coils(address, quantity)
    }

    /// Alias for read_discrete_inputs using function code naming
    pub fn read_02(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_discrete_inputs(address, quantity)
    }

    /// Alias for read_holding_registers using function code naming
    pub fn read_03(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_holding_registers(address, quantity)
    }

    /// Alias for read_input_registers using function code naming
    pub fn read_04(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_input_registers(address, quantity)
    }

    pub fn write_05(&self, address: u16, value: bool) -> ModbusResult<()> {
        self.write_coil(address, value)
    }

    pub fn write_06(&self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_register(address, value)
    }

    pub fn write_0f(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.write_coils(address, values)
    }

    pub fn write_10(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.write_registers(address, values)
    }

    pub fn get_stats(&self) -> ModbusResult<RegisterStoreStats> {
        Ok(RegisterStoreStats {
            coils_count: self.coils.len()?,
            discrete_inputs_count: self.discrete_inputs.len()?,
            holding_registers_count: self.holding_registers.len()?,
            input_registers_count: self.input_registers.len()?,
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            out_of_range: self.counters.out_of_range.load(Ordering::Relaxed),
        })
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Register store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterStoreStats {
    pub coils_count: usize,
    pub discrete_inputs_count: usize,
    pub holding_registers_count: usize,
    pub input_registers_count: usize,
    /// Successful reads
    pub reads: u64,
    /// Successful writes
    pub writes: u64,
    /// Accesses rejected by the bounds check
    pub out_of_range: u64,
}

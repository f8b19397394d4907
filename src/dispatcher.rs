//! Server-side function dispatcher
//!
//! Routes a decoded [`Request`] to the register store selected by its unit
//! id, performs the single read or write it asks for and builds the
//! [`Response`]. Store and validation errors become exception responses here;
//! nothing below this layer ever produces wire bytes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{MissingUnitPolicy, RoutingConfig};
use crate::constants::BROADCAST_UNIT_ID;
use crate::error::ModbusResult;
use crate::protocol::{ModbusException, Request, Response, SlaveId};
use crate::store::RegisterStore;

/// Maps unit ids to register stores
#[derive(Debug, Clone)]
pub enum UnitRouter {
    /// One store; `unit_id: None` answers every unit id
    Single {
        unit_id: Option<SlaveId>,
        store: Arc<RegisterStore>,
    },
    /// One store per unit id, optionally with write broadcast on unit 0
    Multi {
        units: HashMap<SlaveId, Arc<RegisterStore>>,
        broadcast: bool,
    },
}

impl UnitRouter {
    /// Single store answering every unit id
    pub fn single(store: Arc<RegisterStore>) -> Self {
        UnitRouter::Single {
            unit_id: None,
            store,
        }
    }

    /// Single store answering only `unit_id`
    pub fn single_unit(unit_id: SlaveId, store: Arc<RegisterStore>) -> Self {
        UnitRouter::Single {
            unit_id: Some(unit_id),
            store,
        }
    }

    pub fn multi(units: HashMap<SlaveId, Arc<RegisterStore>>, broadcast: bool) -> Self {
        UnitRouter::Multi { units, broadcast }
    }

    pub fn from_config(config: &RoutingConfig) -> ModbusResult<Self> {
        config.validate()?;
        let router = match config {
            RoutingConfig::Single { unit_id, store } => UnitRouter::Single {
                unit_id: *unit_id,
                store: Arc::new(RegisterStore::from_config(store)?),
            },
            RoutingConfig::Multi { units, broadcast } => {
                let units = units
                    .iter()
                    .map(|(unit, cfg)| Ok((*unit, Arc::new(RegisterStore::from_config(cfg)?))))
                    .collect::<ModbusResult<HashMap<_, _>>>()?;
                UnitRouter::Multi {
                    units,
                    broadcast: *broadcast,
                }
            }
        };
        Ok(router)
    }

    /// Store registered for `unit_id`
    pub fn store(&self, unit_id: SlaveId) -> Option<Arc<RegisterStore>> {
        match self {
            UnitRouter::Single { unit_id: None, store } => Some(Arc::clone(store)),
            UnitRouter::Single {
                unit_id: Some(id),
                store,
            } => (*id == unit_id).then(|| Arc::clone(store)),
            UnitRouter::Multi { units, .. } => units.get(&unit_id).cloned(),
        }
    }

    /// Whether `unit_id` addresses every store at once
    pub fn is_broadcast(&self, unit_id: SlaveId) -> bool {
        matches!(self, UnitRouter::Multi { broadcast: true, .. }) && unit_id == BROADCAST_UNIT_ID
    }

    fn all_stores(&self) -> Vec<Arc<RegisterStore>> {
        match self {
            UnitRouter::Single { store, .. } => vec![Arc::clone(store)],
            UnitRouter::Multi { units, .. } => units.values().cloned().collect(),
        }
    }
}

/// Request dispatcher shared by all connections of a server
#[derive(Debug, Clone)]
pub struct Dispatcher {
    router: UnitRouter,
    missing_unit: MissingUnitPolicy,
}

impl Dispatcher {
    pub fn new(router: UnitRouter, missing_unit: MissingUnitPolicy) -> Self {
        Self {
            router,
            missing_unit,
        }
    }

    pub fn router(&self) -> &UnitRouter {
        &self.router
    }

    /// Handle one request for `unit_id`.
    ///
    /// `None` means no response must be sent: a broadcast, or a missing unit
    /// under [`MissingUnitPolicy::Ignore`].
    pub fn dispatch(&self, unit_id: SlaveId, request: &Request) -> Option<Response> {
        if self.router.is_broadcast(unit_id) {
            self.broadcast(request);
            return None;
        }

        let Some(store) = self.router.store(unit_id) else {
            let fc = request.function().to_u8();
            return match self.missing_unit {
                MissingUnitPolicy::IllegalDataAddress => {
                    debug!("No store for unit {}, answering illegal data address", unit_id);
                    Some(Response::exception(fc, ModbusException::IllegalDataAddress))
                }
                MissingUnitPolicy::GatewayTargetFailed => {
                    debug!("No store for unit {}, answering gateway target failed", unit_id);
                    Some(Response::exception(
                        fc,
                        ModbusException::GatewayTargetDeviceFailedToRespond,
                    ))
                }
                MissingUnitPolicy::Ignore => {
                    debug!("No store for unit {}, ignoring request", unit_id);
                    None
                }
            };
        };

        Some(dispatch_request(&store, request))
    }

    fn broadcast(&self, request: &Request) {
        if request.function().is_read_function() {
            debug!("Ignoring broadcast read {}", request.function());
            return;
        }
        for store in self.router.all_stores() {
            if let Err(e) = execute(&store, request) {
                warn!("Broadcast {} failed on one store: {}", request.function(), e);
            }
        }
    }
}

/// Run `request` against `store`, turning failures into an exception response
pub fn dispatch_request(store: &RegisterStore, request: &Request) -> Response {
    match execute(store, request) {
        Ok(response) => response,
        Err(e) => {
            let exception = e.to_exception();
            debug!(
                "{} rejected with {}: {}",
                request.function().name(),
                exception,
                e
            );
            Response::exception(request.function().to_u8(), exception)
        }
    }
}

/// Run `request` against `store`.
///
/// Limits are checked before the store is touched and the store checks the
/// whole range before writing, so a rejected write changes nothing.
pub fn execute(store: &RegisterStore, request: &Request) -> ModbusResult<Response> {
    request.validate()?;
    let response = match request {
        Request::ReadCoils { address, quantity } => {
            Response::ReadCoils(store.read_01(*address, *quantity)?)
        }
        Request::ReadDiscreteInputs { address, quantity } => {
            Response::ReadDiscreteInputs(store.read_02(*address, *quantity)?)
        }
        Request::ReadHoldingRegisters { address, quantity } => {
            Response::ReadHoldingRegisters(store.read_03(*address, *quantity)?)
        }
        Request::ReadInputRegisters { address, quantity } => {
            Response::ReadInputRegisters(store.read_04(*address, *quantity)?)
        }
        Request::WriteSingleCoil { address, value } => {
            store.write_05(*address, *value)?;
            Response::WriteSingleCoil {
                address: *address,
                value: *value,
            }
        }
        Request::WriteSingleRegister { address, value } => {
            store.write_06(*address, *value)?;
            Response::WriteSingleRegister {
                address: *address,
                value: *value,
            }
        }
        Request::WriteMultipleCoils { address, values } => {
            store.write_0f(*address, values)?;
            Response::WriteMultipleCoils {
                address: *address,
                quantity: values.len() as u16,
            }
        }
        Request::WriteMultipleRegisters { address, values } => {
            store.write_10(*address, values)?;
            Response::WriteMultipleRegisters {
                address: *address,
                quantity: values.len() as u16,
            }
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, TableConfig};

    fn store() -> Arc<RegisterStore> {
        Arc::new(
            RegisterStore::from_config(
                &StoreConfig::new()
                    .with_holding_registers(TableConfig::from_values((0..100).collect()))
                    .with_coils(TableConfig::with_size(32)),
            )
            .unwrap(),
        )
    }

    fn read_hr(address: u16, quantity: u16) -> Request {
        Request::ReadHoldingRegisters { address, quantity }
    }

    #[test]
    fn test_single_store_accepts_any_unit() {
        let dispatcher = Dispatcher::new(UnitRouter::single(store()), MissingUnitPolicy::default());
        for unit in [0u8, 1, 17, 255] {
            let resp = dispatcher.dispatch(unit, &read_hr(0, 3)).unwrap();
            assert_eq!(resp, Response::ReadHoldingRegisters(vec![0, 1, 2]));
        }
    }

    #[test]
    fn test_out_of_range_is_illegal_data_address() {
        let dispatcher = Dispatcher::new(UnitRouter::single(store()), MissingUnitPolicy::default());
        let resp = dispatcher.dispatch(1, &read_hr(95, 10)).unwrap();
        assert_eq!(
            resp,
            Response::Exception {
                function: 0x03,
                code: 0x02
            }
        );
    }

    #[test]
    fn test_write_then_read_back() {
        let dispatcher = Dispatcher::new(UnitRouter::single(store()), MissingUnitPolicy::default());
        let write = Request::WriteSingleRegister {
            address: 10,
            value: 999,
        };
        assert_eq!(
            dispatcher.dispatch(1, &write).unwrap(),
            Response::WriteSingleRegister {
                address: 10,
                value: 999
            }
        );
        assert_eq!(
            dispatcher.dispatch(1, &read_hr(10, 1)).unwrap(),
            Response::ReadHoldingRegisters(vec![999])
        );
    }

    #[test]
    fn test_rejected_multi_write_changes_nothing() {
        let store = store();
        let response = dispatch_request(
            &store,
            &Request::WriteMultipleRegisters {
                address: 98,
                values: vec![1, 2, 3],
            },
        );
        assert_eq!(response.function_code(), 0x90);
        assert_eq!(store.read_03(98, 2).unwrap(), vec![98, 99]);
    }

    #[test]
    fn test_oversized_direct_request_is_illegal_data_value() {
        let response = dispatch_request(
            &store(),
            &Request::WriteMultipleRegisters {
                address: 0,
                values: vec![0; 124],
            },
        );
        assert_eq!(
            response,
            Response::Exception {
                function: 0x10,
                code: 0x03
            }
        );
    }

    #[test]
    fn test_fixed_unit_and_missing_unit_policies() {
        let router = UnitRouter::single_unit(1, store());

        let strict = Dispatcher::new(router.clone(), MissingUnitPolicy::IllegalDataAddress);
        assert!(strict.dispatch(1, &read_hr(0, 1)).is_some());
        assert_eq!(
            strict.dispatch(2, &read_hr(0, 1)),
            Some(Response::Exception {
                function: 0x03,
                code: 0x02
            })
        );

        let gateway = Dispatcher::new(router.clone(), MissingUnitPolicy::GatewayTargetFailed);
        assert_eq!(
            gateway.dispatch(2, &read_hr(0, 1)),
            Some(Response::Exception {
                function: 0x03,
                code: 0x0B
            })
        );

        let ignore = Dispatcher::new(router, MissingUnitPolicy::Ignore);
        assert_eq!(ignore.dispatch(2, &read_hr(0, 1)), None);
    }

    #[test]
    fn test_multi_unit_broadcast() {
        let a = store();
        let b = store();
        let mut units = HashMap::new();
        units.insert(1, Arc::clone(&a));
        units.insert(2, Arc::clone(&b));
        let dispatcher = Dispatcher::new(UnitRouter::multi(units, true), MissingUnitPolicy::default());

        let write = Request::WriteSingleCoil {
            address: 4,
            value: true,
        };
        assert_eq!(dispatcher.dispatch(0, &write), None);
        assert_eq!(a.read_01(4, 1).unwrap(), vec![true]);
        assert_eq!(b.read_01(4, 1).unwrap(), vec![true]);

        assert_eq!(dispatcher.dispatch(0, &read_hr(0, 1)), None);
        assert!(dispatcher.dispatch(2, &read_hr(0, 1)).is_some());
    }

    #[test]
    fn test_multi_unit_without_broadcast_treats_zero_as_missing() {
        let mut units = HashMap::new();
        units.insert(1, store());
        let dispatcher = Dispatcher::new(UnitRouter::multi(units, false), MissingUnitPolicy::default());
        let resp = dispatcher.dispatch(0, &read_hr(0, 1)).unwrap();
        assert!(resp.is_exception());
    }

    #[test]
    fn test_router_from_config() {
        let router = UnitRouter::from_config(&RoutingConfig::Single {
            unit_id: Some(5),
            store: StoreConfig::uniform(10),
        })
        .unwrap();
        assert!(router.store(5).is_some());
        assert!(router.store(6).is_none());
    }
}

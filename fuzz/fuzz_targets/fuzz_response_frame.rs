#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use modbus_regmap::frame;
use modbus_regmap::{Request, Table};

#[derive(Debug, Arbitrary)]
struct Input {
    table: u8,
    address: u16,
    quantity: u16,
    frame: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let table = Table::ALL[input.table as usize % Table::ALL.len()];
    let request = Request::read(table, input.address, input.quantity);
    // Must never panic, only return Result
    if let Ok((_, response)) = frame::decode_response(&request, &input.frame) {
        if !response.is_exception() {
            assert_eq!(response.function_code(), request.function().to_u8());
        }
    }
});

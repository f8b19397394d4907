#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_regmap::dispatcher::dispatch_request;
use modbus_regmap::frame;
use modbus_regmap::RegisterStore;

fuzz_target!(|data: &[u8]| {
    let store = match RegisterStore::with_size(256) {
        Ok(store) => store,
        Err(_) => return,
    };
    match frame::decode_request(data) {
        Ok((header, request)) => {
            // Every decodable request must produce an encodable response
            let response = dispatch_request(&store, &request);
            let reply = frame::encode_response(&header, &response).expect("encodable response");
            assert_eq!(reply[..2], data[..2]);
        }
        Err(err) => {
            // A recovered header must still be answerable
            if let Some(recovered) = err.recovered {
                let response = modbus_regmap::Response::exception(
                    recovered.function_code,
                    recovered.exception,
                );
                frame::encode_response(&recovered.header, &response).expect("encodable exception");
            }
        }
    }
});

pub mod logging;
pub mod request;

pub use logging::messages_from_wire;
pub use request::build_responses_request;

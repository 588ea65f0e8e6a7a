//! Message model and the header subset the bridge understands

mod headers;
mod message;

pub use headers::{header_section, parse_address, parse_date, parse_headers, text_section};
pub use message::Message;

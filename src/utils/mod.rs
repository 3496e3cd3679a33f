pub mod audit_logger;
pub mod path_utils;
pub mod utf8_stream;

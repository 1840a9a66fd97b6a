//! Wire protocol constants

/// Opens a record
pub const RECORD_START: u8 = b'<';

/// Separates key from value
pub const KEY_VALUE_SEPARATOR: u8 = b'|';

/// Closes a record
pub const RECORD_END: u8 = b'>';

/// Default listening port
pub const DEFAULT_PORT: u16 = 13000;

/// Default size of a single socket read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Default upper bound on the bytes of one record, delimiters excluded
pub const DEFAULT_MAX_RECORD_LEN: usize = 64 * 1024;
